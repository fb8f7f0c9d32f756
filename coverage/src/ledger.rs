// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Persistent coverage ledger.
//!
//! The ledger maps block UIDs to their descriptions and hit counts. The backing
//! database is shared between processes and held under an exclusive lock while
//! open, so concurrent openers wait rather than fail.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::block::{BlockIdentity, BlockRecord, Count, Uid};
use crate::config::LedgerConfig;

mod store;

#[cfg(test)]
mod tests;

use store::Store;

/// How hit counts reach the database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Keep the database open and locked, writing every increment through.
    Durable,

    /// Count in memory and merge into the database on [`Ledger::flush`]. The
    /// database is only locked while loading and flushing.
    Deferred,
}

pub struct Ledger {
    config: LedgerConfig,
    mode: Mode,

    // Open for the lifetime of a durable ledger. Deferred ledgers open a
    // transient store per operation.
    store: Option<Store>,

    next_uid: u32,

    // Counts since the last flush. Deferred mode only.
    pending: BTreeMap<Uid, Count>,

    // The next flush replaces durable counts instead of adding to them.
    reset_pending: bool,
}

impl Ledger {
    /// Open the ledger, blocking until no other holder has it locked.
    pub fn open(config: &LedgerConfig, mode: Mode) -> Result<Self> {
        let store = Store::open(config)?;
        let next_uid = store.record_count()?;

        let mut ledger = Self {
            config: config.clone(),
            mode,
            store: None,
            next_uid,
            pending: BTreeMap::new(),
            reset_pending: false,
        };

        match mode {
            Mode::Durable => {
                ledger.store = Some(store);
            }
            Mode::Deferred => {
                for uid in store.known_uids()? {
                    ledger.pending.insert(uid, Count::default());
                }

                // Release the lock until the next flush.
                drop(store);
            }
        }

        debug!(
            "opened {:?} ledger {} with {} registered blocks",
            mode,
            config.path.display(),
            next_uid
        );

        Ok(ledger)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The UID the next new block will be given.
    pub fn next_uid(&self) -> Uid {
        Uid(self.next_uid)
    }

    /// Existing UID for `description`, or the next unused one.
    ///
    /// Allocation does not reserve the UID: it is only consumed once
    /// [`register`](Self::register) commits a record for it.
    pub fn get_or_allocate_id(&self, description: &str) -> Result<Uid> {
        match self.lookup(description)? {
            Some(uid) => Ok(uid),
            None => Ok(Uid(self.next_uid)),
        }
    }

    /// Record the description of block `uid`.
    ///
    /// Returns `false` without writing if `uid` is already registered. Fails if
    /// the block's description is registered under a different UID.
    pub fn register(
        &mut self,
        uid: Uid,
        name: &str,
        identity: &BlockIdentity,
        lines: &BTreeSet<u32>,
    ) -> Result<bool> {
        let record = BlockRecord {
            uid,
            description: identity.description(),
            name: name.to_owned(),
            unit: identity.unit.clone(),
            method: identity.method.clone(),
            offset: identity.offset,
            lines: lines.clone(),
        };

        let inserted = match &mut self.store {
            Some(store) => store.insert(&record)?,
            None => Store::open(&self.config)?.insert(&record)?,
        };

        if inserted {
            self.next_uid = self.next_uid.max(uid.0.saturating_add(1));

            if self.mode == Mode::Deferred {
                self.pending.entry(uid).or_default();
            }

            trace!("registered ID {} {}", uid, record.description);
        }

        Ok(inserted)
    }

    /// Count one execution of block `uid`.
    pub fn increment(&mut self, uid: Uid) -> Result<()> {
        match &self.store {
            Some(store) => store.increment(uid)?,
            None => self.pending.entry(uid).or_default().increment(),
        }

        Ok(())
    }

    /// Zero all hit counts.
    ///
    /// In deferred mode the durable counts are replaced on the next flush.
    pub fn reset(&mut self) -> Result<()> {
        match &self.store {
            Some(store) => store.clear_counts()?,
            None => {
                for count in self.pending.values_mut() {
                    *count = Count::default();
                }

                self.reset_pending = true;
            }
        }

        info!("reset hit counts in {}", self.config.path.display());

        Ok(())
    }

    /// Merge in-memory counts into the database.
    ///
    /// Durable ledgers write through, so this is a no-op for them.
    pub fn flush(&mut self) -> Result<()> {
        if self.mode == Mode::Durable {
            return Ok(());
        }

        let mut store = Store::open(&self.config)?;

        if self.reset_pending {
            store.replace_counts(&self.pending)?;
        } else {
            store.add_counts(&self.pending)?;
        }

        drop(store);

        let hits: u64 = self.pending.values().map(|count| count.0).sum();
        debug!("flushed {} hits to {}", hits, self.config.path.display());

        for count in self.pending.values_mut() {
            *count = Count::default();
        }

        self.reset_pending = false;

        Ok(())
    }

    /// Flush and release the database.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.store = None;
        Ok(())
    }

    /// Registered blocks, in UID order.
    pub fn records(&self) -> Result<Vec<BlockRecord>> {
        match &self.store {
            Some(store) => store.blocks(),
            None => Store::open(&self.config)?.blocks(),
        }
    }

    pub fn record(&self, uid: Uid) -> Result<Option<BlockRecord>> {
        match &self.store {
            Some(store) => store.block(uid),
            None => Store::open(&self.config)?.block(uid),
        }
    }

    pub fn lookup(&self, description: &str) -> Result<Option<Uid>> {
        match &self.store {
            Some(store) => store.lookup(description),
            None => Store::open(&self.config)?.lookup(description),
        }
    }

    /// Durable hit counts. Unflushed deferred counts are not included.
    pub fn hit_counts(&self) -> Result<BTreeMap<Uid, Count>> {
        match &self.store {
            Some(store) => store.counts(),
            None => Store::open(&self.config)?.counts(),
        }
    }

    /// Durable hit count of `uid`, zero if it has never been counted.
    pub fn hit_count(&self, uid: Uid) -> Result<Count> {
        let count = match &self.store {
            Some(store) => store.count(uid)?,
            None => Store::open(&self.config)?.count(uid)?,
        };

        Ok(count.unwrap_or_default())
    }

    /// Unflushed count of `uid`. Always `None` in durable mode.
    pub fn pending(&self, uid: Uid) -> Option<Count> {
        self.pending.get(&uid).copied()
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        let unflushed = self.pending.values().filter(|count| count.reached()).count();

        if unflushed > 0 || self.reset_pending {
            warn!(
                "ledger {} dropped without flushing {} counted blocks",
                self.config.path.display(),
                unflushed
            );
        }
    }
}

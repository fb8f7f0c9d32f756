// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytecode::Offset;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::block::{BlockRecord, Count, Uid};
use crate::config::LedgerConfig;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

const MMAP_SIZE: i64 = 64 * 1024 * 1024;

// `blocks` holds the description-side tables (UID -> description, name, lines,
// and the reverse description -> UID index). `hits` holds UID -> hit count.
const SCHEMA: &str = "
    BEGIN EXCLUSIVE;
    CREATE TABLE IF NOT EXISTS blocks (
        uid INTEGER PRIMARY KEY,
        description TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        unit TEXT NOT NULL,
        method TEXT NOT NULL,
        bc_offset INTEGER NOT NULL,
        lines TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS hits (
        uid INTEGER PRIMARY KEY,
        hit_count INTEGER NOT NULL
    );
    COMMIT;
";

/// An open, exclusively locked connection to the ledger database.
pub(crate) struct Store {
    conn: Connection,
}

impl Store {
    /// Open the database, waiting for as long as another connection holds it.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let path = &config.path;
        let conn = Connection::open(path)
            .with_context(|| format!("unable to open ledger {}", path.display()))?;

        conn.busy_handler(Some(wait_for_lock))?;

        // Once taken, the file lock is kept until the connection closes.
        conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| {
            row.get::<_, String>(0)
        })?;

        let mmap_size = if config.cleaner_hack { 0 } else { MMAP_SIZE };
        match conn.pragma_update_and_check(None, "mmap_size", mmap_size, |row| {
            row.get::<_, i64>(0)
        }) {
            Ok(_) | Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(err) => return Err(err.into()),
        }

        conn.execute_batch(SCHEMA)
            .with_context(|| format!("unable to lock ledger {}", path.display()))?;

        debug!("opened ledger {}", path.display());

        Ok(Self { conn })
    }

    pub fn record_count(&self) -> Result<u32> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))?;

        Ok(u32::try_from(count)?)
    }

    pub fn lookup(&self, description: &str) -> Result<Option<Uid>> {
        let uid = self
            .conn
            .query_row(
                "SELECT uid FROM blocks WHERE description = ?1",
                params![description],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;

        Ok(uid.map(Uid))
    }

    /// Insert `record` unless its UID is already registered.
    ///
    /// Returns `true` if the record was written.
    pub fn insert(&mut self, record: &BlockRecord) -> Result<bool> {
        let lines = serde_json::to_string(&record.lines)?;

        let tx = self.conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE uid = ?1)",
            params![record.uid.0],
            |row| row.get(0),
        )?;

        if exists {
            return Ok(false);
        }

        let other = tx
            .query_row(
                "SELECT uid FROM blocks WHERE description = ?1",
                params![record.description],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;

        if let Some(other) = other {
            bail!(
                "cannot register {} as ID {}: already registered as ID {}",
                record.description,
                record.uid,
                other
            );
        }

        tx.execute(
            "INSERT INTO blocks (uid, description, name, unit, method, bc_offset, lines)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.uid.0,
                record.description,
                record.name,
                record.unit,
                record.method,
                record.offset.0,
                lines,
            ],
        )?;

        tx.commit()?;

        Ok(true)
    }

    pub fn block(&self, uid: Uid) -> Result<Option<BlockRecord>> {
        let raw = self
            .conn
            .query_row(
                "SELECT uid, description, name, unit, method, bc_offset, lines
                 FROM blocks WHERE uid = ?1",
                params![uid.0],
                RawBlock::from_row,
            )
            .optional()?;

        raw.map(RawBlock::into_record).transpose()
    }

    /// All registered blocks, in UID order.
    pub fn blocks(&self) -> Result<Vec<BlockRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, description, name, unit, method, bc_offset, lines
             FROM blocks ORDER BY uid",
        )?;

        let mut blocks = vec![];

        for raw in stmt.query_map([], RawBlock::from_row)? {
            blocks.push(raw?.into_record()?);
        }

        Ok(blocks)
    }

    /// UIDs that have a record or a counter.
    pub fn known_uids(&self) -> Result<BTreeSet<Uid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uid FROM blocks UNION SELECT uid FROM hits")?;

        let mut uids = BTreeSet::new();

        for uid in stmt.query_map([], |row| row.get::<_, u32>(0))? {
            uids.insert(Uid(uid?));
        }

        Ok(uids)
    }

    pub fn count(&self, uid: Uid) -> Result<Option<Count>> {
        let count = self
            .conn
            .query_row(
                "SELECT hit_count FROM hits WHERE uid = ?1",
                params![uid.0],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        count.map(to_count).transpose()
    }

    pub fn counts(&self) -> Result<BTreeMap<Uid, Count>> {
        let mut stmt = self.conn.prepare("SELECT uid, hit_count FROM hits")?;

        let mut counts = BTreeMap::new();

        for row in stmt.query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?)))? {
            let (uid, count) = row?;
            counts.insert(Uid(uid), to_count(count)?);
        }

        Ok(counts)
    }

    pub fn increment(&self, uid: Uid) -> Result<()> {
        self.conn.execute(
            "INSERT INTO hits (uid, hit_count) VALUES (?1, 1)
             ON CONFLICT(uid) DO UPDATE SET hit_count = hit_count + 1",
            params![uid.0],
        )?;

        Ok(())
    }

    /// Add `counts` to the stored counts, treating absent entries as zero.
    pub fn add_counts(&mut self, counts: &BTreeMap<Uid, Count>) -> Result<()> {
        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO hits (uid, hit_count) VALUES (?1, ?2)
                 ON CONFLICT(uid) DO UPDATE SET hit_count = hit_count + excluded.hit_count",
            )?;

            for (uid, count) in counts {
                stmt.execute(params![uid.0, from_count(*count)?])?;
            }
        }

        tx.commit()?;

        Ok(())
    }

    /// Zero every stored count, then store `counts`.
    pub fn replace_counts(&mut self, counts: &BTreeMap<Uid, Count>) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute("UPDATE hits SET hit_count = 0", [])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO hits (uid, hit_count) VALUES (?1, ?2)
                 ON CONFLICT(uid) DO UPDATE SET hit_count = excluded.hit_count",
            )?;

            for (uid, count) in counts {
                stmt.execute(params![uid.0, from_count(*count)?])?;
            }
        }

        tx.commit()?;

        Ok(())
    }

    pub fn clear_counts(&self) -> Result<()> {
        self.conn.execute("UPDATE hits SET hit_count = 0", [])?;
        Ok(())
    }
}

// Never give up: blocking until the lock is released is the contract of `open`.
fn wait_for_lock(attempt: i32) -> bool {
    if attempt == 0 {
        info!("ledger is locked by another process, waiting");
    }

    thread::sleep(LOCK_RETRY_INTERVAL);

    true
}

fn to_count(value: i64) -> Result<Count> {
    Ok(Count(u64::try_from(value)?))
}

fn from_count(count: Count) -> Result<i64> {
    Ok(i64::try_from(count.0)?)
}

struct RawBlock {
    uid: u32,
    description: String,
    name: String,
    unit: String,
    method: String,
    offset: u32,
    lines: String,
}

impl RawBlock {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            uid: row.get(0)?,
            description: row.get(1)?,
            name: row.get(2)?,
            unit: row.get(3)?,
            method: row.get(4)?,
            offset: row.get(5)?,
            lines: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<BlockRecord> {
        let lines = serde_json::from_str(&self.lines)
            .with_context(|| format!("corrupt line set for block ID {}", self.uid))?;

        Ok(BlockRecord {
            uid: Uid(self.uid),
            description: self.description,
            name: self.name,
            unit: self.unit,
            method: self.method,
            offset: Offset(self.offset),
            lines,
        })
    }
}

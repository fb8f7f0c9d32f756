// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resolve property descriptors to block identities and UIDs.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};
use bytecode::Offset;

use crate::block::{BlockHash, BlockIdentity, Uid};
use crate::ledger::Ledger;
use crate::property::PropertyDescriptor;

/// Namespace prefix on qualified function names in property descriptors.
pub const NAMESPACE_PREFIX: &str = "java::";

/// Blocks of one unit to instrument, keyed by identity hash.
#[derive(Clone, Debug, Default)]
pub struct OffsetIndex {
    uids: HashMap<BlockHash, Uid>,
}

impl OffsetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, identity: &BlockIdentity, uid: Uid) {
        self.uids.insert(identity.block_hash(), uid);
    }

    pub fn get(&self, identity: &BlockIdentity) -> Option<Uid> {
        self.uids.get(&identity.block_hash()).copied()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.uids.contains_key(hash)
    }

    pub fn uids(&self) -> BTreeSet<Uid> {
        self.uids.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }
}

/// A block whose record was first written during resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Registration {
    pub uid: Uid,
    pub identity: BlockIdentity,
}

#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub index: OffsetIndex,
    pub registrations: Vec<Registration>,
}

/// Method signature of `function` if it is declared directly by `unit`.
///
/// `unit` is the internal (slash-separated) name. Functions of other units,
/// including nested ones, yield `None`.
pub fn method_signature<'a>(unit: &str, function: &'a str) -> Option<&'a str> {
    let qualified = function.strip_prefix(NAMESPACE_PREFIX).unwrap_or(function);

    let dotted = unit.replace('/', ".");
    let method = qualified.strip_prefix(dotted.as_str())?.strip_prefix('.')?;

    let name = method.split(':').next().unwrap_or(method);

    if name.contains('.') {
        return None;
    }

    Some(method)
}

/// Resolve every descriptor of `unit` that names one of its blocks,
/// registering blocks the ledger does not know yet.
pub fn resolve(
    unit: &str,
    properties: &[PropertyDescriptor],
    ledger: &mut Ledger,
) -> Result<Resolution> {
    let mut resolution = Resolution::default();

    for property in properties {
        let Some(location) = &property.source_location else {
            continue;
        };

        if !location.is_complete() {
            warn!(
                "property {} does not contain full source location info",
                property.name
            );
        }

        let lines = property.lines();

        let (Some(index), Some(function)) = (&location.bytecode_index, &location.function) else {
            warn!(
                "bytecode index or function information is missing in property {}",
                property.name
            );
            continue;
        };

        let Some(offset) = index.as_u32() else {
            warn!(
                "property {} has invalid bytecode index {:?}",
                property.name, index
            );
            continue;
        };

        let Some(method) = method_signature(unit, function) else {
            trace!("property {} is not in unit {}", property.name, unit);
            continue;
        };

        let identity = BlockIdentity::new(unit, method, Offset(offset));

        if resolution.index.contains(&identity.block_hash()) {
            continue;
        }

        if lines.is_empty() {
            error!("no line numbers for property {}", property.name);
        }

        let description = identity.description();
        let uid = ledger.get_or_allocate_id(&description)?;

        if ledger.register(uid, &property.name, &identity, &lines)? {
            info!("register ID {} {}", uid, description);
            resolution.registrations.push(Registration {
                uid,
                identity: identity.clone(),
            });
        } else {
            // Another ledger handle may have registered the allocated UID
            // for a different block since this one was opened.
            let registered = ledger.record(uid)?.map(|record| record.description);

            if registered.as_deref() != Some(description.as_str()) {
                bail!(
                    "cannot register {} as ID {}: ID is registered as {}",
                    description,
                    uid,
                    registered.as_deref().unwrap_or("nothing")
                );
            }
        }

        resolution.index.insert(&identity, uid);
    }

    debug!(
        "resolved {} blocks of {} ({} new)",
        resolution.index.len(),
        unit,
        resolution.registrations.len()
    );

    Ok(resolution)
}

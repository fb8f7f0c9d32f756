// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;
use std::fmt;

use bytecode::Offset;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable numeric identifier of a basic block.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Count(pub u64);

impl Count {
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn merge(&mut self, other: Count) {
        self.0 = self.0.saturating_add(other.0);
    }

    pub fn reached(&self) -> bool {
        self.0 > 0
    }
}

/// Hash of a block's canonical description.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BlockHash(pub u64);

/// Canonical identity of a basic block: unit, method signature, offset.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BlockIdentity {
    /// Internal unit name, e.g. `com/example/Foo`.
    pub unit: String,

    /// Method `name:descriptor`.
    pub method: String,

    pub offset: Offset,
}

impl BlockIdentity {
    pub fn new(unit: impl Into<String>, method: impl Into<String>, offset: Offset) -> Self {
        Self {
            unit: unit.into(),
            method: method.into(),
            offset,
        }
    }

    /// Deterministic string form, `unit.method@offset`.
    pub fn description(&self) -> String {
        format!("{}.{}@{}", self.unit, self.method, self.offset)
    }

    pub fn block_hash(&self) -> BlockHash {
        let digest = Sha256::digest(self.description().as_bytes());

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);

        BlockHash(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for BlockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Persistent description of a registered block. Never modified after creation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlockRecord {
    pub uid: Uid,

    /// Canonical identity string.
    pub description: String,

    /// External property name the block was registered for.
    pub name: String,

    pub unit: String,
    pub method: String,
    pub offset: Offset,

    /// Source lines covered by the block's property.
    pub lines: BTreeSet<u32>,
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serialized form of a [`Unit`].
//!
//! A unit file is a 4-byte magic, a little-endian `u16` format version, and a
//! `bincode` body.

use anyhow::Result;
use thiserror::Error;

use crate::Unit;

pub const MAGIC: [u8; 4] = *b"BCU\0";
pub const VERSION: u16 = 1;

const HEADER_LEN: usize = MAGIC.len() + 2;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unit data is truncated ({0} bytes)")]
    Truncated(usize),

    #[error("bad unit magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported unit format version {0}")]
    UnsupportedVersion(u16),

    #[error("malformed unit body")]
    Body(#[from] bincode::Error),

    #[error("method `{method}` branches to @{target}, past the end of its {len} instructions")]
    LabelOutOfRange {
        method: String,
        target: u32,
        len: usize,
    },
}

/// True if `data` starts with the unit magic.
pub fn is_unit(data: &[u8]) -> bool {
    data.starts_with(&MAGIC)
}

pub fn decode(data: &[u8]) -> Result<Unit, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(data.len()));
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&data[..MAGIC.len()]);

    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);

    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let unit: Unit = bincode::deserialize(&data[HEADER_LEN..])?;
    validate(&unit)?;

    debug!(
        "decoded unit {} ({} fields, {} methods)",
        unit.name,
        unit.fields.len(),
        unit.methods.len()
    );

    Ok(unit)
}

pub fn encode(unit: &Unit) -> Result<Vec<u8>> {
    let body = bincode::serialize(unit)?;

    let mut data = Vec::with_capacity(HEADER_LEN + body.len());
    data.extend_from_slice(&MAGIC);
    data.extend_from_slice(&VERSION.to_le_bytes());
    data.extend_from_slice(&body);

    Ok(data)
}

fn validate(unit: &Unit) -> Result<(), DecodeError> {
    for method in &unit.methods {
        let len = method.code.len();

        for insn in &method.code {
            for label in insn.labels() {
                if label.index() >= len {
                    return Err(DecodeError::LabelOutOfRange {
                        method: method.signature(),
                        target: label.0,
                        len,
                    });
                }
            }
        }
    }

    Ok(())
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Property descriptors produced by a model checker's `--show-properties`
//! JSON output.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Line recorded for a block whose descriptor has no usable line information.
pub const SENTINEL_LINE: u32 = 0;

/// Widest `min-max` range accepted in covered lines.
pub const MAX_LINE_SPAN: u32 = 1 << 16;

#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("no properties found")]
    MissingProperties,

    #[error("malformed property descriptors")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,

    /// Comma-separated lines and inclusive `min-max` ranges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covered_lines: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<Number>,

    /// Qualified method, e.g. `java::com.example.Foo.bar:(I)V`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode_index: Option<Number>,
}

impl SourceLocation {
    pub fn is_complete(&self) -> bool {
        self.file.is_some() && self.line.is_some() && self.function.is_some()
    }
}

/// A numeric field that producers emit either as a JSON number or a string.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Text(String),
}

impl Number {
    /// The value as an unsigned 32-bit integer, if it is one.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Number::Int(value) => u32::try_from(*value).ok(),
            Number::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl PropertyDescriptor {
    /// Source lines the property covers.
    ///
    /// Absent or malformed line information yields the sentinel line alone.
    pub fn lines(&self) -> BTreeSet<u32> {
        let Some(covered) = &self.covered_lines else {
            warn!("property {} does not contain line coverage information", self.name);
            return BTreeSet::from([SENTINEL_LINE]);
        };

        match parse_covered_lines(covered) {
            Some(lines) => lines,
            None => {
                warn!(
                    "property {} has malformed covered lines `{}`",
                    self.name, covered
                );
                BTreeSet::from([SENTINEL_LINE])
            }
        }
    }
}

/// Parse `"3-5,9"` into `{3, 4, 5, 9}`.
///
/// A range whose lower bound exceeds its upper bound adds nothing. Returns
/// `None` if any token is not a line number or range, or if a range spans
/// more than [`MAX_LINE_SPAN`] lines.
pub fn parse_covered_lines(value: &str) -> Option<BTreeSet<u32>> {
    let mut lines = BTreeSet::new();

    for token in value.split(',') {
        let token = token.trim();

        match token.split_once('-') {
            Some((min, max)) => {
                let min: u32 = min.trim().parse().ok()?;
                let max: u32 = max.trim().parse().ok()?;

                if max.saturating_sub(min) >= MAX_LINE_SPAN {
                    return None;
                }

                lines.extend(min..=max);
            }
            None => {
                lines.insert(token.parse().ok()?);
            }
        }
    }

    Some(lines)
}

/// Extract the descriptors of the first analysis record that has any.
pub fn parse_properties(json: &str) -> Result<Vec<PropertyDescriptor>, PropertyError> {
    let records: Vec<Value> = serde_json::from_str(json)?;

    for record in records {
        if let Value::Object(mut record) = record {
            if let Some(properties) = record.remove("properties") {
                return Ok(serde_json::from_value(properties)?);
            }
        }
    }

    Err(PropertyError::MissingProperties)
}

pub fn load_properties(path: impl AsRef<Path>) -> Result<Vec<PropertyDescriptor>> {
    let path = path.as_ref();

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read property descriptors {}", path.display()))?;

    let properties = parse_properties(&json)
        .with_context(|| format!("invalid property descriptors {}", path.display()))?;

    Ok(properties)
}

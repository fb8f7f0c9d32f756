// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Instrument a list of units in place.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coverage::instrument::{instrument_file, Disposition};
use coverage::Ledger;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchSummary {
    pub instrumented: usize,

    /// Interfaces and already instrumented units.
    pub copied: usize,

    pub skipped: usize,

    /// Newly registered blocks.
    pub registered: usize,
}

/// Unit paths listed one per line in `list`. Blank lines are ignored.
pub fn read_unit_list(list: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let list = list.as_ref();

    let text = std::fs::read_to_string(list)
        .with_context(|| format!("unable to read unit list {}", list.display()))?;

    let units = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect();

    Ok(units)
}

/// Property descriptors of `unit` live next to it, at `<unit>.json`.
pub fn descriptor_path(unit: &Path) -> PathBuf {
    let mut path = OsString::from(unit.as_os_str());
    path.push(".json");
    PathBuf::from(path)
}

/// Instrument every unit named in `list`, writing one `register ID` line per
/// newly registered block to `out`.
///
/// Units that cannot be instrumented are logged and skipped. Only an
/// unreadable list fails the batch.
pub fn run(
    list: impl AsRef<Path>,
    ledger: &mut Ledger,
    out: &mut impl Write,
) -> Result<BatchSummary> {
    let units = read_unit_list(list)?;

    let mut summary = BatchSummary::default();

    for unit in &units {
        let properties = descriptor_path(unit);

        if !properties.is_file() {
            error!(
                "no property descriptors {} for {}",
                properties.display(),
                unit.display()
            );
            summary.skipped += 1;
            continue;
        }

        let instrumented = match instrument_file(unit, unit, &properties, ledger) {
            Ok(instrumented) => instrumented,
            Err(err) => {
                error!("skipping {}: {:#}", unit.display(), err);
                summary.skipped += 1;
                continue;
            }
        };

        for registration in &instrumented.registrations {
            writeln!(out, "register ID {} {}", registration.uid, registration.identity)?;
        }

        summary.registered += instrumented.registrations.len();

        match instrumented.disposition {
            Disposition::Instrumented => summary.instrumented += 1,
            Disposition::Interface | Disposition::AlreadyInstrumented => summary.copied += 1,
        }
    }

    info!(
        "instrumented {} units, copied {}, skipped {}",
        summary.instrumented, summary.copied, summary.skipped
    );

    Ok(summary)
}

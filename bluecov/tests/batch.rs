// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::Path;

use anyhow::Result;
use bluecov::batch::{self, BatchSummary};
use bytecode::{Access, Cond, Insn, Label, Method, Unit};
use coverage::instrument::is_instrumented;
use coverage::{Ledger, LedgerConfig, Mode};
use pretty_assertions::assert_eq;
use serde_json::json;

fn sample(name: &str) -> Unit {
    let mut unit = Unit::new(name, Access::PUBLIC);
    unit.methods.push(Method::new(
        Access::PUBLIC | Access::STATIC,
        "choose",
        "(I)I",
        1,
        1,
        vec![
            Insn::Load(0),
            Insn::If {
                cond: Cond::Eq,
                target: Label(4),
            },
            Insn::Push(1),
            Insn::ReturnValue,
            Insn::Push(2),
            Insn::ReturnValue,
        ],
    ));
    unit
}

fn write_properties(path: &Path, dotted: &str, offsets: &[u32]) -> Result<()> {
    let properties: Vec<_> = offsets
        .iter()
        .map(|offset| {
            json!({
                "name": format!("{dotted}.choose:(I)I.coverage.{offset}"),
                "coveredLines": offset.to_string(),
                "sourceLocation": {
                    "file": "Sample.java",
                    "line": offset.to_string(),
                    "function": format!("java::{dotted}.choose:(I)I"),
                    "bytecodeIndex": offset.to_string(),
                }
            })
        })
        .collect();

    let json = json!([{ "properties": properties }]);
    std::fs::write(path, json.to_string())?;

    Ok(())
}

#[test]
fn test_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path();

    let first = root.join("First.bcu");
    sample("pkg/First").save(&first)?;
    write_properties(&root.join("First.bcu.json"), "pkg.First", &[2, 4])?;

    let second = root.join("Second.bcu");
    sample("pkg/Second").save(&second)?;
    write_properties(&root.join("Second.bcu.json"), "pkg.Second", &[4])?;

    // No descriptors.
    let lonely = root.join("Lonely.bcu");
    sample("pkg/Lonely").save(&lonely)?;

    // Not a unit.
    let junk = root.join("Junk.bcu");
    std::fs::write(&junk, b"junk")?;
    write_properties(&root.join("Junk.bcu.json"), "pkg.Junk", &[0])?;

    let list = root.join("units.txt");
    let entries = [&first, &lonely, &junk, &second]
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join("\n\n");
    std::fs::write(&list, entries)?;

    let config = LedgerConfig::new(root.join("blueCov.db"));
    let mut ledger = Ledger::open(&config, Mode::Durable)?;

    let mut out = vec![];
    let summary = batch::run(&list, &mut ledger, &mut out)?;

    assert_eq!(
        summary,
        BatchSummary {
            instrumented: 2,
            copied: 0,
            skipped: 2,
            registered: 3,
        }
    );

    assert_eq!(
        String::from_utf8(out)?,
        "register ID 0 pkg/First.choose:(I)I@2\n\
         register ID 1 pkg/First.choose:(I)I@4\n\
         register ID 2 pkg/Second.choose:(I)I@4\n"
    );

    assert!(is_instrumented(&Unit::load(&first)?));
    assert!(is_instrumented(&Unit::load(&second)?));
    assert!(!is_instrumented(&Unit::load(&lonely)?));
    assert_eq!(std::fs::read(&junk)?, b"junk");

    // A second batch registers nothing and leaves the units alone.
    let before = std::fs::read(&first)?;
    let mut out = vec![];
    let summary = batch::run(&list, &mut ledger, &mut out)?;

    assert_eq!(summary.copied, 2);
    assert_eq!(summary.registered, 0);
    assert!(out.is_empty());
    assert_eq!(std::fs::read(&first)?, before);

    ledger.close()
}

#[test]
fn test_missing_list_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = LedgerConfig::new(dir.path().join("blueCov.db"));
    let mut ledger = Ledger::open(&config, Mode::Durable)?;

    let mut out = vec![];
    let result = batch::run(dir.path().join("missing.txt"), &mut ledger, &mut out);
    assert!(result.is_err());

    ledger.close()
}

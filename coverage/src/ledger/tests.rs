// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bytecode::Offset;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::*;

fn config(dir: &TempDir) -> LedgerConfig {
    LedgerConfig::new(dir.path().join("blueCov.db"))
}

fn identity(offset: u32) -> BlockIdentity {
    BlockIdentity::new("pkg/Sample", "choose:(I)I", Offset(offset))
}

fn lines(lines: &[u32]) -> BTreeSet<u32> {
    lines.iter().copied().collect()
}

#[test]
fn test_allocate_and_register() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut ledger = Ledger::open(&config(&dir), Mode::Durable)?;

    let id = identity(2);
    let uid = ledger.get_or_allocate_id(&id.description())?;
    assert_eq!(uid, Uid(0));

    // Allocation alone does not consume the UID.
    assert_eq!(ledger.get_or_allocate_id("pkg/Sample.other:()V@0")?, Uid(0));

    assert!(ledger.register(uid, "prop-2", &id, &lines(&[7, 8]))?);
    assert_eq!(ledger.next_uid(), Uid(1));
    assert_eq!(ledger.get_or_allocate_id(&id.description())?, uid);
    assert_eq!(ledger.get_or_allocate_id("pkg/Sample.other:()V@0")?, Uid(1));

    let record = ledger.record(uid)?.expect("registered record");
    assert_eq!(record.description, "pkg/Sample.choose:(I)I@2");
    assert_eq!(record.name, "prop-2");
    assert_eq!(record.unit, "pkg/Sample");
    assert_eq!(record.method, "choose:(I)I");
    assert_eq!(record.offset, Offset(2));
    assert_eq!(record.lines, lines(&[7, 8]));

    ledger.close()
}

#[test]
fn test_register_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut ledger = Ledger::open(&config(&dir), Mode::Durable)?;

    assert!(ledger.register(Uid(0), "first", &identity(2), &lines(&[1]))?);
    assert!(!ledger.register(Uid(0), "second", &identity(4), &lines(&[2]))?);

    let records = ledger.records()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "first");
    assert_eq!(records[0].offset, Offset(2));

    ledger.close()
}

#[test]
fn test_register_conflicting_description() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut ledger = Ledger::open(&config(&dir), Mode::Durable)?;

    ledger.register(Uid(0), "a", &identity(2), &lines(&[1]))?;
    let err = ledger
        .register(Uid(1), "b", &identity(2), &lines(&[1]))
        .unwrap_err();
    assert!(err.to_string().contains("already registered as ID 0"));

    ledger.close()
}

#[test]
fn test_durable_increment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir);

    let mut ledger = Ledger::open(&config, Mode::Durable)?;
    ledger.register(Uid(0), "a", &identity(2), &lines(&[1]))?;

    for _ in 0..3 {
        ledger.increment(Uid(0))?;
    }

    assert_eq!(ledger.hit_count(Uid(0))?, Count(3));
    assert_eq!(ledger.hit_count(Uid(9))?, Count(0));
    assert_eq!(ledger.pending(Uid(0)), None);
    ledger.close()?;

    let ledger = Ledger::open(&config, Mode::Durable)?;
    assert_eq!(ledger.hit_count(Uid(0))?, Count(3));
    ledger.close()
}

#[test]
fn test_deferred_flush_merges() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir);

    let mut ledger = Ledger::open(&config, Mode::Deferred)?;
    ledger.register(Uid(0), "a", &identity(2), &lines(&[1]))?;
    assert_eq!(ledger.pending(Uid(0)), Some(Count(0)));

    for _ in 0..5 {
        ledger.increment(Uid(0))?;
    }

    assert_eq!(ledger.pending(Uid(0)), Some(Count(5)));
    assert_eq!(ledger.hit_count(Uid(0))?, Count(0));

    ledger.flush()?;
    assert_eq!(ledger.pending(Uid(0)), Some(Count(0)));
    assert_eq!(ledger.hit_count(Uid(0))?, Count(5));

    ledger.increment(Uid(0))?;
    ledger.close()?;

    // A second session adds to what is stored.
    let mut ledger = Ledger::open(&config, Mode::Deferred)?;
    ledger.increment(Uid(0))?;
    ledger.increment(Uid(0))?;
    ledger.close()?;

    let ledger = Ledger::open(&config, Mode::Durable)?;
    assert_eq!(ledger.hit_counts()?, BTreeMap::from([(Uid(0), Count(8))]));
    ledger.close()
}

#[test]
fn test_deferred_seeds_known_uids() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir);

    let mut ledger = Ledger::open(&config, Mode::Durable)?;
    ledger.register(Uid(0), "a", &identity(2), &lines(&[1]))?;
    ledger.register(Uid(1), "b", &identity(4), &lines(&[2]))?;
    ledger.increment(Uid(1))?;
    ledger.close()?;

    let ledger = Ledger::open(&config, Mode::Deferred)?;
    assert_eq!(ledger.next_uid(), Uid(2));
    assert_eq!(ledger.pending(Uid(0)), Some(Count(0)));
    assert_eq!(ledger.pending(Uid(1)), Some(Count(0)));
    assert_eq!(ledger.pending(Uid(2)), None);
    ledger.close()
}

#[test]
fn test_durable_reset() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut ledger = Ledger::open(&config(&dir), Mode::Durable)?;

    ledger.register(Uid(0), "a", &identity(2), &lines(&[1]))?;
    ledger.increment(Uid(0))?;
    ledger.reset()?;

    assert_eq!(ledger.hit_count(Uid(0))?, Count(0));

    // Registrations survive a reset.
    assert_eq!(ledger.records()?.len(), 1);

    ledger.close()
}

#[test]
fn test_deferred_reset_replaces_on_flush() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir);

    let mut ledger = Ledger::open(&config, Mode::Durable)?;
    ledger.register(Uid(0), "a", &identity(2), &lines(&[1]))?;
    ledger.register(Uid(1), "b", &identity(4), &lines(&[2]))?;
    ledger.increment(Uid(0))?;
    ledger.increment(Uid(1))?;
    ledger.close()?;

    let mut ledger = Ledger::open(&config, Mode::Deferred)?;
    ledger.increment(Uid(0))?;
    ledger.reset()?;
    assert_eq!(ledger.pending(Uid(0)), Some(Count(0)));

    // Nothing reaches the store until the flush.
    assert_eq!(ledger.hit_count(Uid(1))?, Count(1));

    ledger.increment(Uid(1))?;
    ledger.flush()?;

    assert_eq!(
        ledger.hit_counts()?,
        BTreeMap::from([(Uid(0), Count(0)), (Uid(1), Count(1))])
    );

    // Later flushes merge again.
    ledger.increment(Uid(1))?;
    ledger.flush()?;
    assert_eq!(ledger.hit_count(Uid(1))?, Count(2));

    ledger.close()
}

#[test]
fn test_cleaner_hack_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir).cleaner_hack(true);

    let mut ledger = Ledger::open(&config, Mode::Durable)?;
    ledger.register(Uid(0), "a", &identity(2), &lines(&[1]))?;
    ledger.increment(Uid(0))?;
    assert_eq!(ledger.hit_count(Uid(0))?, Count(1));
    ledger.close()
}

#[test]
fn test_open_waits_for_lock() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(&dir);

    let mut ledger = Ledger::open(&config, Mode::Durable)?;
    ledger.register(Uid(0), "a", &identity(2), &lines(&[1]))?;

    let (started, wait_started) = mpsc::channel();

    let waiter = {
        let config = config.clone();

        thread::spawn(move || -> Result<Count> {
            started.send(())?;
            let ledger = Ledger::open(&config, Mode::Durable)?;
            let count = ledger.hit_count(Uid(0))?;
            ledger.close()?;
            Ok(count)
        })
    };

    wait_started.recv()?;
    thread::sleep(Duration::from_millis(100));

    // The waiter cannot see the store until this holder closes.
    ledger.increment(Uid(0))?;
    ledger.close()?;

    let count = waiter.join().expect("waiter panicked")?;
    assert_eq!(count, Count(1));

    Ok(())
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{stdout, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytecode::Unit;
use clap::{Parser, Subcommand};
use coverage::config::cleaner_hack_from_env;
use coverage::instrument::instrument_file;
use coverage::report::{summary, CoverageReport};
use coverage::runtime::Vm;
use coverage::{Ledger, LedgerConfig, Mode};

/// Basic-block coverage of compiled units.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Ledger database. Defaults to `$BLUECOV_DB`, then `blueCov.db`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Disable memory-mapped I/O on the ledger database. Also enabled by
    /// `DB_USE_CLEANER_HACK=true`.
    #[arg(long, global = true)]
    cleaner_hack: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Instrument in place every unit listed in LIST, one path per line, using
    /// the property descriptors at `<unit>.json`.
    Batch { list: PathBuf },

    /// Instrument a single unit.
    Instrument {
        input: PathBuf,
        output: PathBuf,
        properties: PathBuf,
    },

    /// Print hit counts of all registered blocks as JSON.
    Report {
        /// Order entries by goal ID.
        #[arg(long)]
        sort: bool,
    },

    /// Print the hit count of every reached block.
    Summary {
        /// Also list blocks that were never reached.
        #[arg(long)]
        uncovered: bool,
    },

    /// Zero all hit counts.
    Reset,

    /// Execute a static method of an instrumented unit, recording coverage.
    Run {
        #[arg(required = true, num_args = 1..)]
        units: Vec<PathBuf>,

        /// Internal name of the unit declaring the method.
        #[arg(long)]
        entry: String,

        /// Method signature, `name:descriptor`.
        #[arg(long)]
        method: String,

        /// Integer argument, repeated in parameter order.
        #[arg(long = "arg", allow_negative_numbers = true)]
        args: Vec<i64>,
    },

    /// Disassemble a unit.
    Dump { unit: PathBuf },
}

impl Args {
    fn ledger_config(&self) -> LedgerConfig {
        let config = match &self.db {
            Some(path) => LedgerConfig::new(path).cleaner_hack(cleaner_hack_from_env()),
            None => LedgerConfig::from_env(),
        };

        if self.cleaner_hack {
            config.cleaner_hack(true)
        } else {
            config
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = args.ledger_config();

    match args.command {
        Command::Batch { list } => batch(&config, list)?,
        Command::Instrument {
            input,
            output,
            properties,
        } => instrument(&config, input, output, properties)?,
        Command::Report { sort } => report(&config, sort)?,
        Command::Summary { uncovered } => print_summary(&config, uncovered)?,
        Command::Reset => reset(&config)?,
        Command::Run {
            units,
            entry,
            method,
            args,
        } => run(&config, units, &entry, &method, &args)?,
        Command::Dump { unit } => dump(unit)?,
    }

    Ok(())
}

fn batch(config: &LedgerConfig, list: PathBuf) -> Result<()> {
    let mut ledger = Ledger::open(config, Mode::Durable)?;
    let mut out = stdout().lock();

    bluecov::batch::run(list, &mut ledger, &mut out)?;

    ledger.close()
}

fn instrument(
    config: &LedgerConfig,
    input: PathBuf,
    output: PathBuf,
    properties: PathBuf,
) -> Result<()> {
    let mut ledger = Ledger::open(config, Mode::Durable)?;
    let instrumented = instrument_file(input, output, properties, &mut ledger)?;

    let mut out = stdout().lock();
    for registration in &instrumented.registrations {
        writeln!(out, "register ID {} {}", registration.uid, registration.identity)?;
    }

    ledger.close()
}

fn report(config: &LedgerConfig, sort: bool) -> Result<()> {
    let ledger = Ledger::open(config, Mode::Durable)?;

    let mut report = CoverageReport::generate(&ledger)?;
    if sort {
        report = report.sorted();
    }

    println!("{}", report.to_json()?);

    ledger.close()
}

fn print_summary(config: &LedgerConfig, uncovered: bool) -> Result<()> {
    let ledger = Ledger::open(config, Mode::Durable)?;

    let records = ledger.records()?;
    let counts = ledger.hit_counts()?;

    for line in summary(&records, &counts, uncovered) {
        println!("{line}");
    }

    ledger.close()
}

fn reset(config: &LedgerConfig) -> Result<()> {
    let mut ledger = Ledger::open(config, Mode::Durable)?;
    ledger.reset()?;
    ledger.close()
}

fn run(
    config: &LedgerConfig,
    units: Vec<PathBuf>,
    entry: &str,
    method: &str,
    args: &[i64],
) -> Result<()> {
    let mut ledger = Ledger::open(config, Mode::Deferred)?;

    let result = {
        let mut vm = Vm::new(&mut ledger);

        for unit in &units {
            vm.load_file(unit)?;
        }

        vm.invoke(entry, method, args)
    };

    // Keep the hits counted before a fault.
    ledger.close()?;

    let value = result.with_context(|| format!("{entry}.{method} faulted"))?;

    if let Some(value) = value {
        println!("{value}");
    }

    Ok(())
}

fn dump(path: PathBuf) -> Result<()> {
    let unit = Unit::load(path)?;
    bluecov::dump::dump(&unit, &mut stdout().lock())
}

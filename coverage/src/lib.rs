// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod block;
pub mod config;
pub mod instrument;
pub mod ledger;
pub mod property;
pub mod report;
pub mod resolve;
pub mod runtime;

pub use block::{BlockHash, BlockIdentity, BlockRecord, Count, Uid};
pub use config::LedgerConfig;
pub use ledger::{Ledger, Mode};

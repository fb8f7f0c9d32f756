// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod access;
pub mod codec;
pub mod descriptor;
pub mod insn;
pub mod unit;

pub use access::Access;
pub use codec::DecodeError;
pub use insn::{Cond, FieldRef, Insn, InvokeKind, Label, MethodRef};
pub use unit::{Field, Method, Unit};

/// Address of an instruction within a method's code.
///
/// Every instruction occupies exactly one address unit, so the offset of an
/// instruction is its index in the method's original instruction list.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Offset(pub u32);

impl Offset {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<Label> for Offset {
    fn from(label: Label) -> Self {
        Offset(label.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

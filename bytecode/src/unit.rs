// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::{Access, Insn};

/// Name of the static initializer method.
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// Descriptor of the static initializer method.
pub const STATIC_INITIALIZER_DESCRIPTOR: &str = "()V";

/// A compiled unit: one class-like container of fields and methods.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Unit {
    /// Internal, slash-separated name, e.g. `com/example/Foo`.
    pub name: String,
    pub access: Access,
    pub source_file: Option<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

impl Unit {
    pub fn new(name: impl Into<String>, access: Access) -> Self {
        Self {
            name: name.into(),
            access,
            source_file: None,
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data =
            std::fs::read(path).with_context(|| format!("unable to read unit {}", path.display()))?;
        let unit = codec::decode(&data)
            .with_context(|| format!("unable to decode unit {}", path.display()))?;

        Ok(unit)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = codec::encode(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("unable to write unit {}", path.display()))?;

        Ok(())
    }

    /// Name with `/` replaced by `.`, as used in qualified method names.
    pub fn dotted_name(&self) -> String {
        self.name.replace('/', ".")
    }

    pub fn is_interface(&self) -> bool {
        self.access.contains(Access::INTERFACE)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a method by `name:descriptor`.
    pub fn method(&self, signature: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.signature() == signature)
    }

    pub fn static_initializer(&self) -> Option<&Method> {
        self.methods.iter().find(|m| m.is_static_initializer())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Field {
    pub access: Access,
    pub name: String,
    pub descriptor: String,
}

impl Field {
    pub fn new(access: Access, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Method {
    pub access: Access,
    pub name: String,
    pub descriptor: String,

    /// Declared maximum operand stack depth.
    pub max_stack: u16,

    /// Declared number of local variable slots, parameters included.
    pub max_locals: u16,

    /// Empty for abstract methods.
    pub code: Vec<Insn>,
}

impl Method {
    pub fn new(
        access: Access,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        max_stack: u16,
        max_locals: u16,
        code: Vec<Insn>,
    ) -> Self {
        Self {
            access,
            name: name.into(),
            descriptor: descriptor.into(),
            max_stack,
            max_locals,
            code,
        }
    }

    /// `name:descriptor`.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.name, self.descriptor)
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == STATIC_INITIALIZER && self.descriptor == STATIC_INITIALIZER_DESCRIPTOR
    }

    pub fn is_abstract(&self) -> bool {
        self.access.contains(Access::ABSTRACT)
    }
}

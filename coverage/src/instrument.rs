// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coverage instrumentation pass
//!
//! Inserts a probe immediately before every instruction whose address matches
//! a resolved block:
//!
//! ```text
//! getstatic     <unit>.bluecov_ledger:Lbluecov/Ledger;
//! push          <uid>
//! invokevirtual bluecov/Ledger.record:(I)V
//! ```
//!
//! Branches to a probed instruction are relocated to the start of its probe,
//! so entering a block by a jump is counted like falling into it. The probe
//! leaves the operand stack as it found it and touches no locals; it needs two
//! extra stack slots, which are added to the method's declared maximum.
//!
//! The ledger handle is a static synthetic field, initialized at the top of
//! the unit's static initializer (which is synthesized if absent).

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use bytecode::unit::{STATIC_INITIALIZER, STATIC_INITIALIZER_DESCRIPTOR};
use bytecode::{
    codec, Access, Field, FieldRef, Insn, InvokeKind, Label, Method, MethodRef, Offset, Unit,
};

use crate::block::{BlockIdentity, Uid};
use crate::ledger::Ledger;
use crate::property::{self, PropertyDescriptor};
use crate::resolve::{self, OffsetIndex, Registration};


/// Runtime class providing the ledger handle.
pub const LEDGER_CLASS: &str = "bluecov/Ledger";

/// Static field holding the ledger handle in every instrumented unit.
pub const LEDGER_FIELD: &str = "bluecov_ledger";

pub const LEDGER_DESCRIPTOR: &str = "Lbluecov/Ledger;";

pub const INSTANCE_METHOD: &str = "instance";
pub const INSTANCE_DESCRIPTOR: &str = "()Lbluecov/Ledger;";

pub const RECORD_METHOD: &str = "record";
pub const RECORD_DESCRIPTOR: &str = "(I)V";

/// Stack slots a probe needs on top of whatever the method already uses.
const PROBE_STACK: u16 = 2;

const PROBE_LEN: usize = 3;

/// How a method body is rewritten.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// Insert probes only.
    Normal,

    /// Insert probes and prepend the ledger handle initialization.
    SynthesizeOrExtendInitializer,
}

impl Strategy {
    pub fn for_method(method: &Method) -> Self {
        if method.is_static_initializer() {
            Strategy::SynthesizeOrExtendInitializer
        } else {
            Strategy::Normal
        }
    }
}

/// UIDs of the probes inserted during one pass, in insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstrumentedLocations {
    uids: Vec<Uid>,
}

impl InstrumentedLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, uid: Uid) {
        self.uids.push(uid);
    }

    pub fn uids(&self) -> &[Uid] {
        &self.uids
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.uids.contains(&uid)
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Resolved UIDs that no probe was inserted for.
    pub fn missing(&self, index: &OffsetIndex) -> BTreeSet<Uid> {
        let instrumented: BTreeSet<Uid> = self.uids.iter().copied().collect();
        index.uids().difference(&instrumented).copied().collect()
    }
}

pub fn ledger_field(unit: &str) -> FieldRef {
    FieldRef::new(unit, LEDGER_FIELD, LEDGER_DESCRIPTOR)
}

/// Instructions emitted before the instruction at a resolved block.
pub fn probe(unit: &str, uid: Uid) -> [Insn; PROBE_LEN] {
    [
        Insn::GetStatic(ledger_field(unit)),
        Insn::Push(i64::from(uid.0)),
        Insn::Invoke {
            kind: InvokeKind::Virtual,
            method: MethodRef::new(LEDGER_CLASS, RECORD_METHOD, RECORD_DESCRIPTOR),
        },
    ]
}

/// Instructions that store the ledger handle in the unit's field.
pub fn initializer_prologue(unit: &str) -> [Insn; 2] {
    [
        Insn::Invoke {
            kind: InvokeKind::Static,
            method: MethodRef::new(LEDGER_CLASS, INSTANCE_METHOD, INSTANCE_DESCRIPTOR),
        },
        Insn::PutStatic(ledger_field(unit)),
    ]
}

/// True if `unit` already carries the ledger handle field.
pub fn is_instrumented(unit: &Unit) -> bool {
    unit.field(LEDGER_FIELD).is_some()
}

/// Rewrite every method of `unit`, probing the blocks in `index`.
///
/// Adds the ledger handle field and initializes it from the static
/// initializer, synthesizing one if the unit has none.
pub fn instrument(unit: &mut Unit, index: &OffsetIndex) -> InstrumentedLocations {
    let mut locations = InstrumentedLocations::new();

    unit.fields.push(Field::new(
        Access::STATIC | Access::SYNTHETIC,
        LEDGER_FIELD,
        LEDGER_DESCRIPTOR,
    ));

    if unit.static_initializer().is_none() {
        debug!("synthesizing static initializer for {}", unit.name);

        unit.methods.push(Method::new(
            Access::STATIC,
            STATIC_INITIALIZER,
            STATIC_INITIALIZER_DESCRIPTOR,
            0,
            0,
            vec![Insn::Return],
        ));
    }

    let mut instrumenter = Instrumenter {
        unit: &unit.name,
        index,
        locations: &mut locations,
    };

    for method in &mut unit.methods {
        let strategy = Strategy::for_method(method);
        instrumenter.instrument_method(method, strategy);
    }

    locations
}

struct Instrumenter<'a> {
    unit: &'a str,
    index: &'a OffsetIndex,
    locations: &'a mut InstrumentedLocations,
}

impl<'a> Instrumenter<'a> {
    fn instrument_method(&mut self, method: &mut Method, strategy: Strategy) {
        if method.code.is_empty() {
            match strategy {
                Strategy::Normal => return,
                // The handle must be stored even by a bodiless initializer.
                Strategy::SynthesizeOrExtendInitializer => method.code.push(Insn::Return),
            }
        }

        let signature = method.signature();

        let probes: Vec<Option<Uid>> = (0..method.code.len())
            .map(|address| {
                let identity = BlockIdentity::new(self.unit, &signature, Offset(address as u32));
                self.index.get(&identity)
            })
            .collect();

        let prologue = match strategy {
            Strategy::Normal => vec![],
            Strategy::SynthesizeOrExtendInitializer => initializer_prologue(self.unit).to_vec(),
        };

        // New address of each original instruction's entry point: its probe
        // if it has one, otherwise the instruction itself.
        let mut starts = Vec::with_capacity(probes.len());
        let mut address = prologue.len();

        for uid in &probes {
            starts.push(Label(address as u32));
            address += 1 + if uid.is_some() { PROBE_LEN } else { 0 };
        }

        let mut code = Vec::with_capacity(address);
        code.extend(prologue);

        for (mut insn, uid) in method.code.drain(..).zip(&probes) {
            if let Some(uid) = *uid {
                code.extend(probe(self.unit, uid));
                self.locations.push(uid);
            }

            insn.map_labels(|label| starts.get(label.index()).copied().unwrap_or(label));
            code.push(insn);
        }

        method.code = code;

        if strategy == Strategy::SynthesizeOrExtendInitializer {
            method.max_stack = method.max_stack.max(1);
        }

        let count = probes.iter().flatten().count();

        if count > 0 {
            method.max_stack = method.max_stack.saturating_add(PROBE_STACK);
            trace!("inserted {} probes in {}.{}", count, self.unit, signature);
        }
    }
}

/// What happened to a unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition {
    Instrumented,

    /// Interfaces are copied through unchanged.
    Interface,

    /// The unit already carried probes and was copied through unchanged.
    AlreadyInstrumented,
}

#[derive(Clone, Debug)]
pub struct InstrumentedUnit {
    pub name: String,

    /// Encoded output unit.
    pub data: Vec<u8>,

    pub disposition: Disposition,

    /// Blocks first registered while resolving this unit.
    pub registrations: Vec<Registration>,

    pub locations: InstrumentedLocations,

    /// Resolved UIDs whose offsets matched no instruction.
    pub missing: BTreeSet<Uid>,
}

/// Resolve `properties` against the unit encoded in `data` and probe its
/// blocks.
pub fn instrument_unit(
    data: &[u8],
    properties: &[PropertyDescriptor],
    ledger: &mut Ledger,
) -> Result<InstrumentedUnit> {
    let mut unit = codec::decode(data)?;

    let copied = |unit: Unit, disposition| InstrumentedUnit {
        name: unit.name,
        data: data.to_vec(),
        disposition,
        registrations: vec![],
        locations: InstrumentedLocations::new(),
        missing: BTreeSet::new(),
    };

    if is_instrumented(&unit) {
        warn!("{} is already instrumented, copying it unchanged", unit.name);
        return Ok(copied(unit, Disposition::AlreadyInstrumented));
    }

    if unit.is_interface() {
        debug!("{} is an interface, copying it unchanged", unit.name);
        return Ok(copied(unit, Disposition::Interface));
    }

    let resolution = resolve::resolve(&unit.name, properties, ledger)?;
    let locations = instrument(&mut unit, &resolution.index);

    let missing = locations.missing(&resolution.index);

    for uid in &missing {
        error!("didn't instrument ID {} in {}", uid, unit.name);
    }

    info!("instrumented {} with {} probes", unit.name, locations.len());

    Ok(InstrumentedUnit {
        data: codec::encode(&unit)?,
        name: unit.name,
        disposition: Disposition::Instrumented,
        registrations: resolution.registrations,
        locations,
        missing,
    })
}

/// Instrument the unit at `input` using the descriptors at `properties`,
/// writing the result to `output`.
///
/// Nothing is written if the unit or its descriptors cannot be read.
pub fn instrument_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    properties: impl AsRef<Path>,
    ledger: &mut Ledger,
) -> Result<InstrumentedUnit> {
    let input = input.as_ref();
    let output = output.as_ref();

    let properties = property::load_properties(properties)?;

    let data =
        std::fs::read(input).with_context(|| format!("unable to read unit {}", input.display()))?;

    let instrumented = instrument_unit(&data, &properties, ledger)
        .with_context(|| format!("unable to instrument {}", input.display()))?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("unable to create output directory {}", parent.display())
            })?;
        }
    }

    std::fs::write(output, &instrumented.data)
        .with_context(|| format!("unable to write unit {}", output.display()))?;

    Ok(instrumented)
}

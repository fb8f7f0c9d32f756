// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Stack interpreter for compiled units.
//!
//! Probes inserted by [`crate::instrument`] call into the `bluecov/Ledger`
//! runtime class, which the interpreter binds to a [`Ledger`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use bytecode::descriptor::{DescriptorError, MethodDescriptor};
use bytecode::{FieldRef, Insn, InvokeKind, Method, MethodRef, Unit};
use thiserror::Error;

use crate::block::Uid;
use crate::instrument::{
    INSTANCE_DESCRIPTOR, INSTANCE_METHOD, LEDGER_CLASS, RECORD_DESCRIPTOR, RECORD_METHOD,
};
use crate::ledger::Ledger;

pub const MAX_CALL_DEPTH: usize = 256;

pub const DEFAULT_STEP_BUDGET: u64 = 10_000_000;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Int(i64),

    /// Handle to the coverage ledger.
    Ledger,

    /// Default value of an unassigned reference field.
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Ledger => write!(f, "<ledger>"),
            Value::Null => write!(f, "null"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Fault {
    #[error("unknown unit `{0}`")]
    UnknownUnit(String),

    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    #[error("unknown static field `{0}`")]
    UnknownField(String),

    #[error("`{0}` has no code")]
    NoCode(String),

    #[error("`{method}` expects {expected} arguments, got {found}")]
    ArgumentCount {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("operand stack underflow in `{0}`")]
    StackUnderflow(String),

    #[error("operand stack of `{method}` exceeds its declared maximum of {max}")]
    StackOverflow { method: String, max: u16 },

    #[error("local slot {slot} is outside the {max} locals of `{method}`")]
    LocalOutOfRange { method: String, slot: u16, max: u16 },

    #[error("local slot {slot} of `{method}` is read before it is written")]
    UninitializedLocal { method: String, slot: u16 },

    #[error("type mismatch in `{method}`: expected {expected}, found {found}")]
    TypeMismatch {
        method: String,
        expected: &'static str,
        found: Value,
    },

    #[error("division by zero in `{0}`")]
    DivisionByZero(String),

    #[error("invalid block ID {0}")]
    InvalidUid(i64),

    #[error("execution fell off the end of `{0}`")]
    FellOffEnd(String),

    #[error("call depth exceeds {}", MAX_CALL_DEPTH)]
    CallDepth,

    #[error("step budget of {0} exhausted")]
    StepBudget(u64),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

/// Executes units, counting probe hits in a [`Ledger`].
pub struct Vm<'a> {
    ledger: &'a mut Ledger,
    units: HashMap<String, Rc<Unit>>,
    statics: HashMap<(String, String), Value>,
    initialized: HashSet<String>,
    depth: usize,
    steps: u64,
    step_budget: u64,
}

impl<'a> Vm<'a> {
    pub fn new(ledger: &'a mut Ledger) -> Self {
        Self {
            ledger,
            units: HashMap::new(),
            statics: HashMap::new(),
            initialized: HashSet::new(),
            depth: 0,
            steps: 0,
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    pub fn step_budget(mut self, steps: u64) -> Self {
        self.step_budget = steps;
        self
    }

    pub fn ledger(&mut self) -> &mut Ledger {
        &mut *self.ledger
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn load(&mut self, unit: Unit) {
        debug!("loaded unit {}", unit.name);
        self.units.insert(unit.name.clone(), Rc::new(unit));
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.load(Unit::load(path)?);
        Ok(())
    }

    /// Call the static method `signature` of `unit` with integer arguments.
    pub fn invoke(
        &mut self,
        unit: &str,
        signature: &str,
        args: &[i64],
    ) -> Result<Option<Value>, Fault> {
        let owner = self.unit(unit)?;

        let method = owner
            .method(signature)
            .ok_or_else(|| Fault::UnknownMethod(format!("{unit}.{signature}")))?;

        let expected = MethodDescriptor::parse(&method.descriptor)?.param_count();

        if expected != args.len() {
            return Err(Fault::ArgumentCount {
                method: format!("{unit}.{signature}"),
                expected,
                found: args.len(),
            });
        }

        self.initialize(unit)?;

        let args = args.iter().copied().map(Value::Int).collect();
        self.call(&owner, method, args)
    }

    fn unit(&self, name: &str) -> Result<Rc<Unit>, Fault> {
        self.units
            .get(name)
            .cloned()
            .ok_or_else(|| Fault::UnknownUnit(name.to_owned()))
    }

    /// Run the static initializer of `unit` unless it has already started.
    fn initialize(&mut self, unit: &str) -> Result<(), Fault> {
        if self.initialized.contains(unit) {
            return Ok(());
        }

        let owner = self.unit(unit)?;
        self.initialized.insert(unit.to_owned());

        if let Some(clinit) = owner.static_initializer() {
            trace!("initializing {}", unit);
            self.call(&owner, clinit, vec![])?;
        }

        Ok(())
    }

    fn static_field(&mut self, field: &FieldRef) -> Result<(String, String), Fault> {
        self.initialize(&field.owner)?;

        let owner = self.unit(&field.owner)?;

        if owner.field(&field.name).is_none() {
            return Err(Fault::UnknownField(field.to_string()));
        }

        Ok((field.owner.clone(), field.name.clone()))
    }

    fn call(
        &mut self,
        unit: &Rc<Unit>,
        method: &Method,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Fault> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Fault::CallDepth);
        }

        self.depth += 1;
        let result = self.execute(unit, method, args);
        self.depth -= 1;

        result
    }

    fn execute(
        &mut self,
        unit: &Rc<Unit>,
        method: &Method,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Fault> {
        let mut frame = Frame::new(unit, method, args)?;

        if method.code.is_empty() {
            return Err(Fault::NoCode(frame.method));
        }

        let mut pc = 0;

        loop {
            self.steps += 1;

            if self.steps > self.step_budget {
                return Err(Fault::StepBudget(self.step_budget));
            }

            let insn = method
                .code
                .get(pc)
                .ok_or_else(|| Fault::FellOffEnd(frame.method.clone()))?;

            pc += 1;

            match insn {
                Insn::Nop => {}
                Insn::Push(value) => frame.push(Value::Int(*value))?,
                Insn::Load(slot) => {
                    let value = frame.load(*slot)?;
                    frame.push(value)?;
                }
                Insn::Store(slot) => {
                    let value = frame.pop()?;
                    frame.store(*slot, value)?;
                }
                Insn::Inc { slot, delta } => {
                    let value = frame.load(*slot)?;
                    let value = frame.int(value)?;
                    frame.store(*slot, Value::Int(value.wrapping_add(i64::from(*delta))))?;
                }
                Insn::Dup => {
                    let value = frame.pop()?;
                    frame.push(value.clone())?;
                    frame.push(value)?;
                }
                Insn::Pop => {
                    frame.pop()?;
                }
                Insn::Swap => {
                    let top = frame.pop()?;
                    let below = frame.pop()?;
                    frame.push(top)?;
                    frame.push(below)?;
                }
                Insn::Add => frame.binary(|lhs, rhs| Ok(lhs.wrapping_add(rhs)))?,
                Insn::Sub => frame.binary(|lhs, rhs| Ok(lhs.wrapping_sub(rhs)))?,
                Insn::Mul => frame.binary(|lhs, rhs| Ok(lhs.wrapping_mul(rhs)))?,
                Insn::Div => {
                    let method = frame.method.clone();
                    frame.binary(|lhs, rhs| match rhs {
                        0 => Err(Fault::DivisionByZero(method)),
                        _ => Ok(lhs.wrapping_div(rhs)),
                    })?
                }
                Insn::Rem => {
                    let method = frame.method.clone();
                    frame.binary(|lhs, rhs| match rhs {
                        0 => Err(Fault::DivisionByZero(method)),
                        _ => Ok(lhs.wrapping_rem(rhs)),
                    })?
                }
                Insn::Neg => {
                    let value = frame.pop_int()?;
                    frame.push(Value::Int(value.wrapping_neg()))?;
                }
                Insn::If { cond, target } => {
                    let value = frame.pop_int()?;
                    if cond.holds(value, 0) {
                        pc = target.index();
                    }
                }
                Insn::IfCmp { cond, target } => {
                    let rhs = frame.pop_int()?;
                    let lhs = frame.pop_int()?;
                    if cond.holds(lhs, rhs) {
                        pc = target.index();
                    }
                }
                Insn::Goto(target) => pc = target.index(),
                Insn::TableSwitch {
                    low,
                    default,
                    targets,
                } => {
                    let value = frame.pop_int()?;
                    let target = value
                        .checked_sub(*low)
                        .and_then(|index| usize::try_from(index).ok())
                        .and_then(|index| targets.get(index))
                        .unwrap_or(default);
                    pc = target.index();
                }
                Insn::LookupSwitch { default, pairs } => {
                    let value = frame.pop_int()?;
                    let target = pairs
                        .iter()
                        .find(|(key, _)| *key == value)
                        .map(|(_, target)| target)
                        .unwrap_or(default);
                    pc = target.index();
                }
                Insn::GetStatic(field) => {
                    let key = self.static_field(field)?;
                    let value = self
                        .statics
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| default_value(&field.descriptor));
                    frame.push(value)?;
                }
                Insn::PutStatic(field) => {
                    let value = frame.pop()?;
                    let key = self.static_field(field)?;
                    self.statics.insert(key, value);
                }
                Insn::Invoke { kind, method } => {
                    if let Some(value) = self.invoke_method(&mut frame, *kind, method)? {
                        frame.push(value)?;
                    }
                }
                Insn::Return => return Ok(None),
                Insn::ReturnValue => return Ok(Some(frame.pop()?)),
            }
        }
    }

    fn invoke_method(
        &mut self,
        frame: &mut Frame,
        kind: InvokeKind,
        target: &MethodRef,
    ) -> Result<Option<Value>, Fault> {
        if target.owner == LEDGER_CLASS {
            return self.invoke_ledger(frame, kind, target);
        }

        if kind == InvokeKind::Virtual {
            return Err(Fault::UnknownMethod(target.to_string()));
        }

        let owner = self.unit(&target.owner)?;
        let method = owner
            .method(&target.signature())
            .ok_or_else(|| Fault::UnknownMethod(target.to_string()))?;

        let count = MethodDescriptor::parse(&method.descriptor)?.param_count();

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(frame.pop()?);
        }
        args.reverse();

        self.initialize(&target.owner)?;

        self.call(&owner, method, args)
    }

    fn invoke_ledger(
        &mut self,
        frame: &mut Frame,
        kind: InvokeKind,
        target: &MethodRef,
    ) -> Result<Option<Value>, Fault> {
        match (kind, target.name.as_str(), target.descriptor.as_str()) {
            (InvokeKind::Static, INSTANCE_METHOD, INSTANCE_DESCRIPTOR) => Ok(Some(Value::Ledger)),
            (InvokeKind::Virtual, RECORD_METHOD, RECORD_DESCRIPTOR) => {
                let uid = frame.pop_int()?;
                let receiver = frame.pop()?;

                if receiver != Value::Ledger {
                    return Err(frame.mismatch("ledger handle", receiver));
                }

                let uid = u32::try_from(uid).map_err(|_| Fault::InvalidUid(uid))?;
                self.ledger.increment(Uid(uid))?;

                Ok(None)
            }
            _ => Err(Fault::UnknownMethod(target.to_string())),
        }
    }
}

fn default_value(descriptor: &str) -> Value {
    if descriptor.starts_with('L') || descriptor.starts_with('[') {
        Value::Null
    } else {
        Value::Int(0)
    }
}

struct Frame {
    method: String,
    stack: Vec<Value>,
    max_stack: u16,
    locals: Vec<Option<Value>>,
}

impl Frame {
    fn new(unit: &Unit, method: &Method, args: Vec<Value>) -> Result<Self, Fault> {
        let name = format!("{}.{}", unit.name, method.signature());

        if args.len() > usize::from(method.max_locals) {
            return Err(Fault::LocalOutOfRange {
                method: name,
                slot: method.max_locals,
                max: method.max_locals,
            });
        }

        let mut locals = vec![None; usize::from(method.max_locals)];
        for (slot, arg) in args.into_iter().enumerate() {
            locals[slot] = Some(arg);
        }

        Ok(Self {
            method: name,
            stack: Vec::with_capacity(usize::from(method.max_stack)),
            max_stack: method.max_stack,
            locals,
        })
    }

    fn push(&mut self, value: Value) -> Result<(), Fault> {
        if self.stack.len() >= usize::from(self.max_stack) {
            return Err(Fault::StackOverflow {
                method: self.method.clone(),
                max: self.max_stack,
            });
        }

        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack
            .pop()
            .ok_or_else(|| Fault::StackUnderflow(self.method.clone()))
    }

    fn pop_int(&mut self) -> Result<i64, Fault> {
        let value = self.pop()?;
        self.int(value)
    }

    fn int(&self, value: Value) -> Result<i64, Fault> {
        match value {
            Value::Int(value) => Ok(value),
            other => Err(self.mismatch("int", other)),
        }
    }

    fn binary(&mut self, op: impl FnOnce(i64, i64) -> Result<i64, Fault>) -> Result<(), Fault> {
        let rhs = self.pop_int()?;
        let lhs = self.pop_int()?;
        self.push(Value::Int(op(lhs, rhs)?))
    }

    fn load(&self, slot: u16) -> Result<Value, Fault> {
        match self.locals.get(usize::from(slot)) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(Fault::UninitializedLocal {
                method: self.method.clone(),
                slot,
            }),
            None => Err(self.local_out_of_range(slot)),
        }
    }

    fn store(&mut self, slot: u16, value: Value) -> Result<(), Fault> {
        if let Some(local) = self.locals.get_mut(usize::from(slot)) {
            *local = Some(value);
            return Ok(());
        }

        Err(self.local_out_of_range(slot))
    }

    fn local_out_of_range(&self, slot: u16) -> Fault {
        Fault::LocalOutOfRange {
            method: self.method.clone(),
            slot,
            max: self.locals.len() as u16,
        }
    }

    fn mismatch(&self, expected: &'static str, found: Value) -> Fault {
        Fault::TypeMismatch {
            method: self.method.clone(),
            expected,
            found,
        }
    }
}

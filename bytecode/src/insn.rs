// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Branch target: the address of the destination instruction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Label(pub u32);

impl Label {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        use Cond::*;

        match self {
            Eq => lhs == rhs,
            Ne => lhs != rhs,
            Lt => lhs < rhs,
            Ge => lhs >= rhs,
            Gt => lhs > rhs,
            Le => lhs <= rhs,
        }
    }

    fn mnemonic(self) -> &'static str {
        use Cond::*;

        match self {
            Eq => "eq",
            Ne => "ne",
            Lt => "lt",
            Ge => "ge",
            Gt => "gt",
            Le => "le",
        }
    }
}

/// Symbolic reference to a static field.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// Symbolic reference to a method.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// `name:descriptor`, the key methods are looked up by within their owner.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.name, self.descriptor)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.descriptor)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum InvokeKind {
    /// No receiver; arguments only.
    Static,

    /// Receiver is popped below the arguments.
    Virtual,
}

/// One instruction of a method body.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Insn {
    Nop,

    Push(i64),
    Load(u16),
    Store(u16),
    Inc { slot: u16, delta: i32 },

    Dup,
    Pop,
    Swap,

    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,

    /// Pop one value and branch if `cond` holds against zero.
    If { cond: Cond, target: Label },

    /// Pop two values and branch if `cond` holds between them.
    IfCmp { cond: Cond, target: Label },

    Goto(Label),

    /// Jump to `targets[value - low]`, or `default` when out of range.
    TableSwitch {
        low: i64,
        default: Label,
        targets: Vec<Label>,
    },

    LookupSwitch {
        default: Label,
        pairs: Vec<(i64, Label)>,
    },

    GetStatic(FieldRef),
    PutStatic(FieldRef),

    Invoke { kind: InvokeKind, method: MethodRef },

    Return,
    ReturnValue,
}

impl Insn {
    /// Branch targets of this instruction, in operand order.
    pub fn labels(&self) -> Vec<Label> {
        use Insn::*;

        match self {
            If { target, .. } | IfCmp { target, .. } | Goto(target) => vec![*target],
            TableSwitch {
                default, targets, ..
            } => {
                let mut labels = targets.clone();
                labels.push(*default);
                labels
            }
            LookupSwitch { default, pairs } => {
                let mut labels: Vec<_> = pairs.iter().map(|(_, label)| *label).collect();
                labels.push(*default);
                labels
            }
            _ => vec![],
        }
    }

    /// Rewrite every branch target through `f`.
    pub fn map_labels(&mut self, mut f: impl FnMut(Label) -> Label) {
        use Insn::*;

        match self {
            If { target, .. } | IfCmp { target, .. } | Goto(target) => {
                *target = f(*target);
            }
            TableSwitch {
                default, targets, ..
            } => {
                for target in targets.iter_mut() {
                    *target = f(*target);
                }
                *default = f(*default);
            }
            LookupSwitch { default, pairs } => {
                for (_, target) in pairs.iter_mut() {
                    *target = f(*target);
                }
                *default = f(*default);
            }
            _ => {}
        }
    }

    /// True if execution never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        use Insn::*;

        matches!(
            self,
            Goto(..) | TableSwitch { .. } | LookupSwitch { .. } | Return | ReturnValue
        )
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Insn::*;

        match self {
            Nop => write!(f, "nop"),
            Push(value) => write!(f, "push {value}"),
            Load(slot) => write!(f, "load {slot}"),
            Store(slot) => write!(f, "store {slot}"),
            Inc { slot, delta } => write!(f, "inc {slot} {delta}"),
            Dup => write!(f, "dup"),
            Pop => write!(f, "pop"),
            Swap => write!(f, "swap"),
            Add => write!(f, "add"),
            Sub => write!(f, "sub"),
            Mul => write!(f, "mul"),
            Div => write!(f, "div"),
            Rem => write!(f, "rem"),
            Neg => write!(f, "neg"),
            If { cond, target } => write!(f, "if.{} {target}", cond.mnemonic()),
            IfCmp { cond, target } => write!(f, "ifcmp.{} {target}", cond.mnemonic()),
            Goto(target) => write!(f, "goto {target}"),
            TableSwitch {
                low,
                default,
                targets,
            } => {
                write!(f, "tableswitch {low} [")?;
                for (i, target) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{target}")?;
                }
                write!(f, "] default {default}")
            }
            LookupSwitch { default, pairs } => {
                write!(f, "lookupswitch {{")?;
                for (i, (key, target)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {target}")?;
                }
                write!(f, "}} default {default}")
            }
            GetStatic(field) => write!(f, "getstatic {field}"),
            PutStatic(field) => write!(f, "putstatic {field}"),
            Invoke {
                kind: InvokeKind::Static,
                method,
            } => write!(f, "invokestatic {method}"),
            Invoke {
                kind: InvokeKind::Virtual,
                method,
            } => write!(f, "invokevirtual {method}"),
            Return => write!(f, "return"),
            ReturnValue => write!(f, "vreturn"),
        }
    }
}

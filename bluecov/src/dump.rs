// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Write;

use anyhow::Result;
use bytecode::{Access, Unit};

/// Write a disassembly of `unit`, one instruction per line, prefixed by its
/// address.
pub fn dump(unit: &Unit, out: &mut impl Write) -> Result<()> {
    write!(out, "unit {}", unit.name)?;
    write_access(out, unit.access)?;

    if let Some(source) = &unit.source_file {
        write!(out, " source {source}")?;
    }

    writeln!(out)?;

    for field in &unit.fields {
        write!(out, "field {} {}", field.name, field.descriptor)?;
        write_access(out, field.access)?;
        writeln!(out)?;
    }

    for method in &unit.methods {
        writeln!(out)?;
        write!(
            out,
            "method {} stack={} locals={}",
            method.signature(),
            method.max_stack,
            method.max_locals
        )?;
        write_access(out, method.access)?;
        writeln!(out)?;

        for (address, insn) in method.code.iter().enumerate() {
            writeln!(out, "{address:>6}  {insn}")?;
        }
    }

    Ok(())
}

fn write_access(out: &mut impl Write, access: Access) -> Result<()> {
    if access.is_empty() {
        return Ok(());
    }

    let names: Vec<_> = access
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect();

    write!(out, " ({})", names.join(" "))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use bytecode::{Cond, Field, Insn, Label, Method};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_dump() -> Result<()> {
        let mut unit = Unit::new("pkg/Sample", Access::PUBLIC);
        unit.source_file = Some("Sample.java".into());
        unit.fields.push(Field::new(Access::STATIC, "count", "I"));
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

        let mut out = vec![];
        dump(&unit, &mut out)?;

        let expected = "\
unit pkg/Sample (public) source Sample.java
field count I (static)

method choose:(I)I stack=1 locals=1 (public static)
     0  load 0
     1  if.eq @4
     2  push 1
     3  vreturn
     4  push 2
     5  vreturn
";

        assert_eq!(String::from_utf8(out)?, expected);

        Ok(())
    }
}

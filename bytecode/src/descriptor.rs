// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::str::Chars;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("method descriptor `{0}` does not start with `(`")]
    MissingParameters(String),

    #[error("method descriptor `{0}` is truncated")]
    Truncated(String),

    #[error("unexpected `{found}` in method descriptor `{descriptor}`")]
    Unexpected { descriptor: String, found: char },
}

/// Parsed method descriptor, e.g. `(ILpkg/Foo;)V`.
///
/// Each parameter occupies a single operand slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodDescriptor {
    pub params: Vec<String>,
    pub returns: Option<String>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut chars = descriptor.chars();

        if chars.next() != Some('(') {
            return Err(DescriptorError::MissingParameters(descriptor.to_owned()));
        }

        let mut params = vec![];

        loop {
            match chars.clone().next() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => {
                    params.push(field_type(descriptor, &mut chars)?);
                }
                None => return Err(DescriptorError::Truncated(descriptor.to_owned())),
            }
        }

        let returns = if chars.clone().next() == Some('V') {
            chars.next();
            None
        } else {
            Some(field_type(descriptor, &mut chars)?)
        };

        if let Some(found) = chars.next() {
            return Err(DescriptorError::Unexpected {
                descriptor: descriptor.to_owned(),
                found,
            });
        }

        Ok(Self { params, returns })
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn returns_value(&self) -> bool {
        self.returns.is_some()
    }
}

fn field_type(descriptor: &str, chars: &mut Chars) -> Result<String, DescriptorError> {
    let mut ty = String::new();

    // Array dimensions prefix the component type.
    while chars.clone().next() == Some('[') {
        chars.next();
        ty.push('[');
    }

    match chars.next() {
        Some(c @ ('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z')) => {
            ty.push(c);
        }
        Some('L') => {
            ty.push('L');
            loop {
                match chars.next() {
                    Some(';') => break,
                    Some(c) => ty.push(c),
                    None => return Err(DescriptorError::Truncated(descriptor.to_owned())),
                }
            }
            ty.push(';');
        }
        Some(found) => {
            return Err(DescriptorError::Unexpected {
                descriptor: descriptor.to_owned(),
                found,
            })
        }
        None => return Err(DescriptorError::Truncated(descriptor.to_owned())),
    }

    Ok(ty)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_primitives() {
        let desc = MethodDescriptor::parse("(IJZ)I").unwrap();
        assert_eq!(desc.params, vec!["I", "J", "Z"]);
        assert_eq!(desc.returns.as_deref(), Some("I"));
        assert!(desc.returns_value());
    }

    #[test]
    fn test_parse_references_and_arrays() {
        let desc = MethodDescriptor::parse("(Ljava/lang/String;[[I)V").unwrap();
        assert_eq!(desc.params, vec!["Ljava/lang/String;", "[[I"]);
        assert_eq!(desc.returns, None);
        assert_eq!(desc.param_count(), 2);
    }

    #[test]
    fn test_parse_no_params() {
        let desc = MethodDescriptor::parse("()Lbluecov/Ledger;").unwrap();
        assert!(desc.params.is_empty());
        assert_eq!(desc.returns.as_deref(), Some("Lbluecov/Ledger;"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            MethodDescriptor::parse("I)V"),
            Err(DescriptorError::MissingParameters("I)V".into()))
        );
        assert_eq!(
            MethodDescriptor::parse("(Lpkg/Foo"),
            Err(DescriptorError::Truncated("(Lpkg/Foo".into()))
        );
        assert_eq!(
            MethodDescriptor::parse("(Q)V"),
            Err(DescriptorError::Unexpected {
                descriptor: "(Q)V".into(),
                found: 'Q'
            })
        );
        assert!(MethodDescriptor::parse("()VV").is_err());
    }
}

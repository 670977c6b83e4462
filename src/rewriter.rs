//! Whole-body replacement.

use crate::il::{Instruction, MethodBody};
use crate::module::Method;
use crate::signature::ReturnKind;

/// Canonical replacement bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum Replacement {
    /// Load a 32-bit constant and return it; booleans are 0 and 1.
    ReturnInt(i32),
    /// Load a string literal and return it.
    ReturnString(String),
    /// Return immediately.
    ReturnVoid,
    /// A caller-supplied instruction sequence.
    Instructions(Vec<Instruction>),
}

impl Replacement {
    /// `true` / `false` as `ReturnInt(1)` / `ReturnInt(0)`.
    #[must_use]
    pub fn return_bool(value: bool) -> Self {
        Self::ReturnInt(i32::from(value))
    }

    /// The instruction sequence this replacement installs.
    #[must_use]
    pub fn instructions(&self) -> Vec<Instruction> {
        match self {
            Self::ReturnInt(value) => vec![Instruction::ldc_i4(*value), Instruction::ret()],
            Self::ReturnString(value) => vec![Instruction::ldstr(value.as_str()), Instruction::ret()],
            Self::ReturnVoid => vec![Instruction::ret()],
            Self::Instructions(instructions) => instructions.clone(),
        }
    }

    /// Return class the replacement produces; `None` for custom sequences.
    #[must_use]
    pub fn return_kind(&self) -> Option<ReturnKind> {
        match self {
            Self::ReturnInt(_) => Some(ReturnKind::Integer),
            Self::ReturnString(_) => Some(ReturnKind::String),
            Self::ReturnVoid => Some(ReturnKind::Void),
            Self::Instructions(_) => None,
        }
    }
}

/// Replace the whole body of `method` with `instructions`.
///
/// Locals, init-locals and exception clauses are dropped. The caller must make the
/// sequence agree with the declared return type; it is not verified here.
pub fn replace_body(method: &mut Method, instructions: Vec<Instruction>) {
    let mut body = MethodBody::with_instructions(instructions);
    // Each instruction pushes at most one value.
    body.max_stack = body.instructions.len().clamp(1, usize::from(u16::MAX)) as u16;
    method.install_body(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::opcode;
    use crate::module::Module;
    use crate::test::{ImageBuilder, MethodSpec};

    fn module() -> Module {
        let image = ImageBuilder::new()
            .class("Foo")
            .method(
                MethodSpec::instance("Run", &["mode"]).body(vec![
                    Instruction::simple(opcode::NOP),
                    Instruction::ldc_i4(500),
                    Instruction::simple(opcode::OpCode::from_name("pop").unwrap()),
                    Instruction::ret(),
                ]),
            )
            .build();
        Module::parse(&image).unwrap()
    }

    #[test]
    fn test_return_void_is_single_ret() {
        let mut module = module();
        let method = module.methods_mut().next().unwrap();
        replace_body(method, Replacement::ReturnVoid.instructions());

        let body = method.body().unwrap();
        assert_eq!(body.instructions, [Instruction::ret()]);
        assert!(body.local_var_sig.is_null());
        assert!(body.extra_sections.is_empty());
        assert!(method.is_modified());
    }

    #[test]
    fn test_replacement_shapes() {
        assert_eq!(
            Replacement::return_bool(true).instructions(),
            [Instruction::simple(opcode::LDC_I4_1), Instruction::ret()]
        );
        assert_eq!(
            Replacement::ReturnString(String::new()).instructions(),
            [Instruction::ldstr(""), Instruction::ret()]
        );
        assert_eq!(Replacement::ReturnInt(7).return_kind(), Some(ReturnKind::Integer));
        assert_eq!(Replacement::Instructions(Vec::new()).return_kind(), None);
    }

    #[test]
    fn test_later_replacement_supersedes() {
        let mut module = module();
        let method = module.methods_mut().next().unwrap();
        replace_body(method, Replacement::ReturnInt(1).instructions());
        replace_body(method, Replacement::ReturnInt(0).instructions());
        assert_eq!(
            method.body().unwrap().instructions,
            [Instruction::simple(opcode::LDC_I4_0), Instruction::ret()]
        );
    }
}

use std::collections::BTreeMap;

use crate::attribute_info::{ExceptionEntry, LocalVariableTable};
use crate::code_attribute::{Instruction, Label};

/// A decoded method: everything the structurer needs, with constant-pool
/// references already resolved.
#[derive(Clone, Debug, Default)]
pub struct MethodBody {
    pub name: String,
    pub descriptor: String,
    pub access_flags: MethodAccessFlags,
    pub instructions: Vec<Instruction>,
    pub exception_table: Vec<ExceptionEntry>,
    pub local_variables: LocalVariableTable,
}

impl MethodBody {
    pub fn new(name: &str, descriptor: &str, instructions: Vec<Instruction>) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access_flags: MethodAccessFlags::STATIC,
            instructions,
            exception_table: Vec::new(),
            local_variables: LocalVariableTable::default(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    /// Abstract and native methods carry no instructions.
    pub fn has_code(&self) -> bool {
        !self
            .access_flags
            .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
            && !self.instructions.is_empty()
    }

    /// Index of every label pseudo-instruction in the stream.
    pub fn label_positions(&self) -> BTreeMap<Label, usize> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(index, instr)| match instr {
                Instruction::Label(label) => Some((*label, index)),
                _ => None,
            })
            .collect()
    }
}

bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;       // Declared public; may be accessed from outside its package.
        const PRIVATE = 0x0002;      // Declared private; accessible only within the defining class.
        const PROTECTED = 0x0004;    // Declared protected; may be accessed within subclasses.
        const STATIC = 0x0008;       // Declared static.
        const FINAL = 0x0010;        // Declared final; must not be overridden.
        const SYNCHRONIZED = 0x0020; // Declared synchronized; invocation is wrapped by a monitor use.
        const BRIDGE = 0x0040;       // A bridge method, generated by the compiler.
        const VARARGS = 0x0080;      // Declared with variable number of arguments.
        const NATIVE = 0x0100;       // Declared native; implemented in a language other than Java.
        const ABSTRACT = 0x0400;     // Declared abstract; no implementation is provided.
        const STRICT = 0x0800;       // Declared strictfp; floating-point mode is FP-strict.
        const SYNTHETIC = 0x1000;    // Declared synthetic; not present in the source code.
    }
}

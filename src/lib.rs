//! Control-flow structuring for decoded [Java class file](https://docs.oracle.com/javase/specs/jvms/se10/html/jvms-4.html)
//! method bodies.
//!
//! ```rust
//! use classfile_structurer::code_attribute::Instruction;
//! use classfile_structurer::decompile::{render_body, RenderConfig, Structurer};
//! use classfile_structurer::MethodBody;
//!
//! let method = MethodBody::new("run", "()V", vec![Instruction::Return]);
//! let structured = Structurer::default().structure_method(&method).unwrap();
//! assert_eq!(render_body(&structured.body, &RenderConfig::default()), "return;\n");
//! ```

#[macro_use]
extern crate bitflags;

pub mod attribute_info;
pub mod code_attribute;
pub mod decompile;
pub mod types;

pub use types::*;

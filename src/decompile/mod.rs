//! Control-flow structuring: from a jump-based instruction stream to a
//! tree of `if`, loops, `switch` and `try`/`catch`.
//!
//! The pipeline runs in stages, one module each: [`cfg`] builds the block
//! graph, [`cleanup`] tidies it, [`ternary`] collapses conditional
//! expressions, [`structuring`] decomposes the graph into nested regions and
//! [`assemble`] replays the regions into structured statements.

pub mod assemble;
pub mod cfg;
pub mod cfg_types;
pub mod cleanup;
pub mod condition;
pub mod error;
pub mod expr;
pub mod method_decompiler;
pub mod renderer;
pub mod stack_sim;
pub mod structured_types;
pub mod structuring;
pub mod ternary;

pub use self::condition::Condition;
pub use self::error::StructureError;
pub use self::method_decompiler::{BatchReport, DecompileError, StructureOptions, StructuredMethod, Structurer};
pub use self::renderer::{render_body, RenderConfig};
pub use self::structured_types::*;

//! Method-level tables that travel alongside the instruction stream.

mod types;

pub use self::types::*;

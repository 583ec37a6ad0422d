//! Decoded method instructions, as handed over by the class-file reader.

mod types;

pub use self::types::*;

//! Text coordinate utilities.
//!
//! LSP positions count UTF-16 code units per line, while mapping tables work
//! on byte offsets. Everything that crosses that boundary goes through
//! [`LineIndex`].

pub mod position;

pub use position::{LineIndex, convert_byte_to_utf16_in_line, convert_utf16_to_byte_in_line};

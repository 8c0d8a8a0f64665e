//! Relocation encoding errors.

use std::fmt;

use crate::arch::RelType;

/// Failure to encode a relocation. Nothing has been written when this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// The relocation type is outside the architecture's ABI.
    UnrecognizedRelocation { r_type: RelType },
    /// The section is too short to hold the instruction window the relocation patches.
    OutOfBounds {
        r_type: RelType,
        offset: usize,
        len: usize,
    },
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::UnrecognizedRelocation { r_type } => {
                write!(f, "unrecognized relocation type {r_type}")
            }
            EncodingError::OutOfBounds { r_type, offset, len } => write!(
                f,
                "relocation type {r_type} at offset 0x{offset:x} runs past the end of a {len}-byte section"
            ),
        }
    }
}

impl std::error::Error for EncodingError {}

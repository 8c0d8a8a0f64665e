//! Architecture abstraction.
//!
//! This module defines the `Architecture` trait, which encapsulates all architecture-specific
//! relocation logic. The generic driver asks a backend two questions per relocation record:
//! which value to compute (`rel_expr`) and how to encode it into the instruction bytes
//! (`relocate`). Backends are stateless and selected once by ELF machine number.

use std::borrow::Cow;
use std::fmt;

use object::Endianness;

use crate::diagnostics::DiagnosticSink;
use crate::error::EncodingError;

pub mod bpf;

/// A raw ELF relocation type (`r_type`).
///
/// Kept as a plain number so that kinds outside an architecture's ABI can still be
/// carried around and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelType(pub u32);

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the generic resolver should compute the value of a relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelExpr {
    /// Nothing to compute, nothing to write.
    None,
    /// `S + A`
    Abs,
    /// `S + A - P`
    Pc,
    /// The relocation type is not understood by the backend.
    Invalid,
}

/// Where a relocation lives, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct RelocSite<'a> {
    /// Input file (or `archive(member)`) the relocation came from.
    pub file: &'a str,
    /// Name of the input section being patched.
    pub section: &'a str,
    /// Offset of the relocated instruction within that section.
    pub offset: u64,
}

impl fmt::Display for RelocSite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:({}+0x{:x})", self.file, self.section, self.offset)
    }
}

/// A trait representing a target architecture's relocation backend.
pub trait Architecture: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// ELF `e_machine` value of input objects this backend accepts.
    fn machine(&self) -> u16;

    /// The object crate's endianness for this architecture.
    fn endianness(&self) -> Endianness;

    /// The relocation type that never does anything.
    fn none_rel(&self) -> RelType;

    /// The relocation type used for load-time-relative dynamic relocations.
    fn relative_rel(&self) -> RelType;

    /// ABI name of a relocation type, or `Unknown (N)`.
    fn rel_type_name(&self, r_type: RelType) -> Cow<'static, str>;

    /// Classifies a relocation type.
    ///
    /// `symbol` and `site` only feed the diagnostic emitted for unknown types.
    fn rel_expr(
        &self,
        r_type: RelType,
        symbol: &str,
        site: &RelocSite<'_>,
        diag: &dyn DiagnosticSink,
    ) -> RelExpr;

    /// Encodes `value` into the instruction starting at `offset` in `data`.
    ///
    /// Either the complete encoding is written or nothing is.
    fn relocate(
        &self,
        data: &mut [u8],
        offset: usize,
        r_type: RelType,
        value: u64,
        site: &RelocSite<'_>,
        diag: &dyn DiagnosticSink,
    ) -> Result<(), EncodingError>;
}

/// Backends indexed by ELF machine number.
static TARGETS: &[&dyn Architecture] = &[&bpf::Bpf];

/// Looks up the backend for an ELF `e_machine`.
pub fn for_machine(machine: u16) -> Option<&'static dyn Architecture> {
    TARGETS.iter().copied().find(|arch| arch.machine() == machine)
}

//! BPF Architecture backend.
//!
//! Implements the `Architecture` trait for eBPF objects (ELF64, little-endian).
//! Every BPF instruction occupies an 8-byte slot whose upper 4 bytes hold the 32-bit
//! immediate; relocations patch that immediate.

use std::borrow::Cow;

use object::elf::{EM_BPF, R_BPF_64_32, R_BPF_64_64, R_BPF_NONE};
use object::Endianness;

use super::{Architecture, RelExpr, RelType, RelocSite};
use crate::diagnostics::DiagnosticSink;
use crate::error::EncodingError;

// ELF BPF relocation types not mapped by object crate
const R_BPF_64_RELATIVE: u32 = 8;

/// Size of one instruction slot.
const INSN_SIZE: u64 = 8;
/// Offset of the immediate field inside an instruction slot.
const IMM_OFFSET: usize = 4;

/// The BPF architecture backend.
pub struct Bpf;

impl Bpf {
    fn unrecognized(&self, r_type: RelType, site: &RelocSite<'_>, diag: &dyn DiagnosticSink) {
        diag.error(
            &site.to_string(),
            &format!("unrecognized reloc {}", self.rel_type_name(r_type)),
        );
    }
}

/// Returns the `len` bytes starting at `offset`, or an error if the section is too short.
fn window(
    data: &mut [u8],
    offset: usize,
    len: usize,
    r_type: RelType,
) -> Result<&mut [u8], EncodingError> {
    let data_len = data.len();
    offset
        .checked_add(len)
        .and_then(|end| data.get_mut(offset..end))
        .ok_or(EncodingError::OutOfBounds {
            r_type,
            offset,
            len: data_len,
        })
}

fn read32le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn write32le(bytes: &mut [u8], value: u32) {
    bytes[..4].copy_from_slice(&value.to_le_bytes());
}

/// Converts a byte displacement into the immediate of a `call`.
///
/// Displacements below one slot are kept as raw byte counts. Everything else is
/// measured in slots from the instruction following the call. Backward displacements
/// arrive as large unsigned values and truncate to the right negative immediate.
fn call_imm(value: u64) -> u32 {
    if value < INSN_SIZE {
        value as u32
    } else {
        ((value - INSN_SIZE) / INSN_SIZE) as u32
    }
}

impl Architecture for Bpf {
    fn name(&self) -> &'static str {
        "bpf"
    }

    fn machine(&self) -> u16 {
        EM_BPF
    }

    fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    fn none_rel(&self) -> RelType {
        RelType(R_BPF_NONE)
    }

    fn relative_rel(&self) -> RelType {
        RelType(R_BPF_64_RELATIVE)
    }

    fn rel_type_name(&self, r_type: RelType) -> Cow<'static, str> {
        match r_type.0 {
            R_BPF_NONE => "R_BPF_NONE".into(),
            R_BPF_64_64 => "R_BPF_64_64".into(),
            R_BPF_64_RELATIVE => "R_BPF_64_RELATIVE".into(),
            R_BPF_64_32 => "R_BPF_64_32".into(),
            other => format!("Unknown ({other})").into(),
        }
    }

    fn rel_expr(
        &self,
        r_type: RelType,
        _symbol: &str,
        site: &RelocSite<'_>,
        diag: &dyn DiagnosticSink,
    ) -> RelExpr {
        match r_type.0 {
            R_BPF_64_32 => RelExpr::Pc,
            R_BPF_64_64 => RelExpr::Abs,
            R_BPF_NONE => RelExpr::None,
            _ => {
                self.unrecognized(r_type, site, diag);
                RelExpr::Invalid
            }
        }
    }

    fn relocate(
        &self,
        data: &mut [u8],
        offset: usize,
        r_type: RelType,
        value: u64,
        site: &RelocSite<'_>,
        diag: &dyn DiagnosticSink,
    ) -> Result<(), EncodingError> {
        match r_type.0 {
            // call imm: pc-relative, in instruction slots
            R_BPF_64_32 => {
                let insn = window(data, offset, INSN_SIZE as usize, r_type)?;
                let imm = &mut insn[IMM_OFFSET..];
                let old = read32le(imm);
                let new = call_imm(value);
                write32le(imm, new);
                tracing::trace!("R_BPF_64_32({value:#018x}) at {site}: {old:#010x} -> {new:#010x}");
            }
            // lddw: low half in this slot's imm, high half in the next slot's imm
            R_BPF_64_64 => {
                let insn = window(data, offset, 2 * INSN_SIZE as usize, r_type)?;
                let old_lo = read32le(&insn[IMM_OFFSET..]);
                let old_hi = read32le(&insn[INSN_SIZE as usize + IMM_OFFSET..]);
                write32le(&mut insn[IMM_OFFSET..], value as u32);
                write32le(&mut insn[INSN_SIZE as usize + IMM_OFFSET..], (value >> 32) as u32);
                tracing::trace!(
                    "R_BPF_64_64({value:#018x}) at {site}: {:#018x} -> {value:#018x}",
                    (u64::from(old_hi) << 32) | u64::from(old_lo)
                );
            }
            R_BPF_NONE => {}
            _ => {
                self.unrecognized(r_type, site, diag);
                return Err(EncodingError::UnrecognizedRelocation { r_type });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use pretty_assertions::assert_eq;

    const SITE: RelocSite<'static> = RelocSite {
        file: "prog.o",
        section: ".text",
        offset: 0,
    };

    /// Two instruction slots filled with a recognisable pattern.
    fn lddw() -> Vec<u8> {
        vec![
            0x18, 0x01, 0x00, 0x00, 0xaa, 0xaa, 0xaa, 0xaa, //
            0x00, 0x00, 0x00, 0x00, 0xbb, 0xbb, 0xbb, 0xbb,
        ]
    }

    fn imm_at(data: &[u8], offset: usize) -> u32 {
        read32le(&data[offset..])
    }

    fn call_with(value: u64) -> u32 {
        let diag = Diagnostics::new();
        let mut data = vec![0x85, 0x10, 0, 0, 0xff, 0xff, 0xff, 0xff];
        Bpf.relocate(&mut data, 0, RelType(R_BPF_64_32), value, &SITE, &diag).unwrap();
        assert_eq!(&data[..4], &[0x85, 0x10, 0, 0]);
        imm_at(&data, 4)
    }

    #[test]
    fn classify_known_types() {
        let diag = Diagnostics::new();
        for (symbol, offset) in [("", 0), ("entry", 8), ("helper", 0x1000)] {
            let site = RelocSite { offset, ..SITE };
            assert_eq!(Bpf.rel_expr(RelType(R_BPF_64_32), symbol, &site, &diag), RelExpr::Pc);
            assert_eq!(Bpf.rel_expr(RelType(R_BPF_64_64), symbol, &site, &diag), RelExpr::Abs);
            assert_eq!(Bpf.rel_expr(RelType(R_BPF_NONE), symbol, &site, &diag), RelExpr::None);
        }
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn classify_unknown_type_reports_once() {
        for r_type in [2, 3, 4, 42, u32::MAX] {
            let diag = Diagnostics::new();
            assert_eq!(Bpf.rel_expr(RelType(r_type), "f", &SITE, &diag), RelExpr::Invalid);
            let errors = diag.errors();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].location, "prog.o:(.text+0x0)");
            assert!(errors[0].message.contains(&r_type.to_string()));
        }
    }

    #[test]
    fn dynamic_relative_is_not_a_static_relocation() {
        let diag = Diagnostics::new();
        let r_type = Bpf.relative_rel();
        assert_eq!(Bpf.rel_expr(r_type, "f", &SITE, &diag), RelExpr::Invalid);
        assert_eq!(diag.errors()[0].message, "unrecognized reloc R_BPF_64_RELATIVE");
    }

    #[test]
    fn call_displacement_boundaries() {
        assert_eq!(call_with(0), 0);
        assert_eq!(call_with(7), 7);
        assert_eq!(call_with(8), 0);
        assert_eq!(call_with(15), 0);
        assert_eq!(call_with(16), 1);
        assert_eq!(call_with(23), 1);
        assert_eq!(call_with(0x808), 0x100);
    }

    #[test]
    fn call_backward_displacement() {
        // Target two slots before the call: P + 8 + imm * 8 == P - 16.
        assert_eq!(call_with((-16i64) as u64) as i32, -3);
        // Recursive call to itself.
        assert_eq!(call_with((-8i64) as u64) as i32, -2);
    }

    #[test]
    fn lddw_splits_immediate() {
        let diag = Diagnostics::new();
        for value in [0, 0x1234_5678, 0xdead_beef_0000_0000, u64::MAX, 0x0102_0304_0506_0708] {
            let mut data = lddw();
            Bpf.relocate(&mut data, 0, RelType(R_BPF_64_64), value, &SITE, &diag).unwrap();
            assert_eq!(imm_at(&data, 4), value as u32);
            assert_eq!(imm_at(&data, 12), (value >> 32) as u32);
            assert_eq!(&data[..4], &[0x18, 0x01, 0x00, 0x00]);
            assert_eq!(&data[8..12], &[0x00; 4]);
        }
    }

    #[test]
    fn lddw_at_offset_touches_only_its_window() {
        let diag = Diagnostics::new();
        let mut data = vec![0x55; 32];
        Bpf.relocate(
            &mut data,
            8,
            RelType(R_BPF_64_64),
            0x1122_3344_5566_7788,
            &SITE,
            &diag,
        )
        .unwrap();

        let mut expected = vec![0x55; 32];
        expected[12..16].copy_from_slice(&[0x88, 0x77, 0x66, 0x55]);
        expected[20..24].copy_from_slice(&[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(data, expected);
    }

    #[test]
    fn none_leaves_buffer_alone() {
        let diag = Diagnostics::new();
        let mut data = lddw();
        Bpf.relocate(&mut data, 0, RelType(R_BPF_NONE), u64::MAX, &SITE, &diag).unwrap();
        assert_eq!(data, lddw());

        // Nothing is written, so even an empty section is fine.
        Bpf.relocate(&mut Vec::<u8>::new(), 0, RelType(R_BPF_NONE), 1, &SITE, &diag).unwrap();
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn unknown_type_fails_without_writing() {
        let diag = Diagnostics::new();
        let mut data = lddw();
        let err = Bpf.relocate(&mut data, 0, RelType(42), 0x1234, &SITE, &diag).unwrap_err();

        assert_eq!(
            err,
            EncodingError::UnrecognizedRelocation {
                r_type: RelType(42),
            }
        );
        assert_eq!(data, lddw());
        let errors = diag.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "unrecognized reloc Unknown (42)");
    }

    #[test]
    fn short_section_is_rejected_before_writing() {
        let diag = Diagnostics::new();
        let mut data = lddw();
        data.truncate(12);
        let err = Bpf
            .relocate(&mut data, 0, RelType(R_BPF_64_64), u64::MAX, &SITE, &diag)
            .unwrap_err();
        assert!(matches!(err, EncodingError::OutOfBounds { len: 12, .. }));
        assert_eq!(data, lddw()[..12].to_vec());

        let err = Bpf
            .relocate(&mut data, usize::MAX, RelType(R_BPF_64_32), 16, &SITE, &diag)
            .unwrap_err();
        assert!(matches!(err, EncodingError::OutOfBounds { .. }));
    }

    #[test]
    fn relocate_is_idempotent() {
        let diag = Diagnostics::new();
        let mut once = lddw();
        Bpf.relocate(&mut once, 0, RelType(R_BPF_64_64), 0xabcd_0000_1234, &SITE, &diag).unwrap();
        let mut twice = once.clone();
        Bpf.relocate(&mut twice, 0, RelType(R_BPF_64_64), 0xabcd_0000_1234, &SITE, &diag).unwrap();
        assert_eq!(once, twice);

        let mut call = lddw();
        for _ in 0..2 {
            Bpf.relocate(&mut call, 0, RelType(R_BPF_64_32), 40, &SITE, &diag).unwrap();
        }
        assert_eq!(imm_at(&call, 4), 4);
    }

    #[test]
    fn architecture_constants() {
        assert_eq!(Bpf.none_rel(), RelType(0));
        assert_eq!(Bpf.relative_rel(), RelType(8));
        assert_eq!(Bpf.rel_type_name(RelType(R_BPF_64_64)), "R_BPF_64_64");
        assert_eq!(Bpf.rel_type_name(RelType(7)), "Unknown (7)");
    }
}

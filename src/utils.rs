//! Utility functions.

use anyhow::{Context, Result};
use object::read::elf::FileHeader;
use object::Endianness;

/// Aligns an address or size up to the next multiple of `align`.
///
/// Returns `None` if `align` is not a power of two or the result overflows.
pub fn align_up(addr: u64, align: u64) -> Option<u64> {
    if !align.is_power_of_two() {
        return None;
    }
    addr.checked_add(align - 1).map(|end| end & !(align - 1))
}

/// Reads `e_machine` and the data encoding from a 64-bit ELF header.
pub fn elf_target(data: &[u8]) -> Result<(u16, Endianness)> {
    let header = object::elf::FileHeader64::<Endianness>::parse(data)
        .context("not a 64-bit ELF file")?;
    let endian = header.endian().context("invalid ELF byte order")?;
    Ok((header.e_machine(endian), endian))
}

/// Parses a `0x`-prefixed hex or plain decimal address.
pub fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address `{s}`: {e}"))
}

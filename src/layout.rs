//! Layout management.
//!
//! Input sections are grouped into output segments by kind (`.text`, `.rodata`, `.data`,
//! `.bss`). Each segment is a contiguous byte buffer placed at a fixed address.

use object::read::SectionIndex;
use object::SectionKind;

/// Represents a section from an input file.
pub struct Section {
    /// Index of the input file.
    pub file_index: usize,
    /// Index of the section in the input file.
    pub section_index: SectionIndex,
    /// The offset where this section starts within the `Segment`.
    pub offset: u64,
}

/// Represents a segment in the output image.
pub struct Segment {
    /// Name of the segment (e.g., ".text", ".data").
    pub name: &'static str,
    /// List of input sections that make up this segment.
    pub sections: Vec<Section>,
    /// Total size of the segment in bytes.
    pub size: u64,
    /// The address where this segment starts.
    pub address: u64,
    /// The raw data content of the segment. Empty for `.bss`.
    pub data: Vec<u8>,
    /// The kind of segment (Text, Data, etc.).
    pub kind: SectionKind,
}

impl Segment {
    /// Creates a new, empty segment.
    pub fn new(name: &'static str, kind: SectionKind) -> Self {
        Self {
            name,
            sections: Vec::new(),
            size: 0,
            address: 0,
            data: Vec::new(),
            kind,
        }
    }

    /// Whether the segment's contents come from the input files.
    pub fn has_file_data(&self) -> bool {
        self.kind != SectionKind::UninitializedData
    }
}

/// Output segment an input section of `kind` belongs to, as an index into `SEGMENTS`.
pub fn segment_for(kind: SectionKind) -> Option<usize> {
    match kind {
        SectionKind::Text => Some(0),
        SectionKind::ReadOnlyData | SectionKind::ReadOnlyString => Some(1),
        SectionKind::Data => Some(2),
        SectionKind::UninitializedData => Some(3),
        _ => None,
    }
}

/// Output segments in address order.
pub const SEGMENTS: [(&str, SectionKind); 4] = [
    (".text", SectionKind::Text),
    (".rodata", SectionKind::ReadOnlyData),
    (".data", SectionKind::Data),
    (".bss", SectionKind::UninitializedData),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_matching_segments() {
        for (index, (_, kind)) in SEGMENTS.iter().enumerate() {
            assert_eq!(segment_for(*kind), Some(index));
        }
        assert_eq!(segment_for(SectionKind::ReadOnlyString), Some(1));
        assert_eq!(segment_for(SectionKind::Debug), None);
        assert_eq!(segment_for(SectionKind::Metadata), None);
    }
}

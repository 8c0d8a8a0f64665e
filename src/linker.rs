//! Core Linker logic.
//!
//! This module contains the `Linker` struct, a small generic driver around an
//! `Architecture` backend:
//! 1. Input Loading: Reads object files (and Archives) for the backend's machine.
//! 2. Symbol Resolution: Builds a global symbol table.
//! 3. Layout: Maps input sections to output segments and assigns addresses.
//! 4. Relocation: Classifies each relocation, computes its value and lets the backend
//!    encode it.
//! 5. Output: Produces a flat image of all segments.

use anyhow::{anyhow, bail, Context, Result};
use object::read::{Object, ObjectSection, RelocationTarget, SectionIndex};
use object::{ObjectSymbol, RelocationFlags, SymbolKind};
use std::collections::{HashMap, HashSet};

use crate::arch::{Architecture, RelExpr, RelType, RelocSite};
use crate::error::EncodingError;
use crate::diagnostics::{DiagnosticSink, Diagnostics};
use crate::layout::{segment_for, Section, Segment, SEGMENTS};
use crate::symbol::{DefinedSymbol, SymbolTable};
use crate::utils::{align_up, elf_target};

const SEGMENT_ALIGN: u64 = 8;

/// A relocation whose value has been computed, waiting to be encoded.
struct Patch<'a> {
    /// Offset of the relocated instruction within the segment.
    offset: u64,
    r_type: RelType,
    value: u64,
    file_index: usize,
    section_name: &'a str,
    section_offset: u64,
}

pub struct Linker<'a, A: Architecture + ?Sized> {
    arch: &'a A,
    base_address: u64,
    keep_going: bool,
    input_objects: Vec<object::File<'a>>,
    input_paths: Vec<String>,
    symbol_table: SymbolTable,
    segments: Vec<Segment>,
    section_map: HashMap<(usize, SectionIndex), (usize, u64)>,
    /// Weak symbols that stayed undefined; they resolve to address 0.
    allowed_undefined: HashSet<String>,
    diag: Diagnostics,
}

impl<'a, A: Architecture + ?Sized> Linker<'a, A> {
    pub fn new(arch: &'a A) -> Self {
        Self {
            arch,
            base_address: 0,
            keep_going: false,
            input_objects: Vec::new(),
            input_paths: Vec::new(),
            symbol_table: SymbolTable::new(),
            segments: Vec::new(),
            section_map: HashMap::new(),
            allowed_undefined: HashSet::new(),
            diag: Diagnostics::new(),
        }
    }

    /// Sets the address of the first output segment.
    pub fn base_address(mut self, base_address: u64) -> Self {
        self.base_address = base_address;
        self
    }

    /// Keeps relocating after a bad relocation so that every problem gets reported.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn add_file(&mut self, path: &str, data: &'a [u8]) -> Result<()> {
        if data.starts_with(b"!<arch>\n") {
            let archive = object::read::archive::ArchiveFile::parse(data)?;
            for member in archive.members() {
                let member = member?;
                let name = String::from_utf8_lossy(member.name()).to_string();
                let member_data = member.data(data)?;
                let member_path = format!("{}({})", path, name);
                let data: &'a [u8] = if member_data.as_ptr().align_offset(8) != 0 {
                    Box::leak(member_data.to_vec().into_boxed_slice())
                } else {
                    member_data
                };
                self.process_object(member_path, data)?;
            }
        } else {
            self.process_object(path.to_string(), data)?;
        }
        Ok(())
    }

    fn process_object(&mut self, path: String, data: &'a [u8]) -> Result<()> {
        let (machine, endian) =
            elf_target(data).with_context(|| format!("failed to parse {}", path))?;
        if machine != self.arch.machine() {
            bail!(
                "{}: e_machine {} does not match the {} backend ({})",
                path,
                machine,
                self.arch.name(),
                self.arch.machine()
            );
        }
        if endian != self.arch.endianness() {
            bail!(
                "{}: {:?}-endian object, the {} backend expects {:?}",
                path,
                endian,
                self.arch.name(),
                self.arch.endianness()
            );
        }
        let obj = object::File::parse(data)
            .with_context(|| format!("failed to parse object file {}", path))?;

        let file_index = self.input_objects.len();
        self.input_paths.push(path);
        for sym in obj.symbols() {
            if sym.is_local() {
                continue;
            }
            let name = sym.name()?;
            if sym.is_undefined() {
                if sym.is_weak() {
                    self.allowed_undefined.insert(name.to_string());
                }
                continue;
            }
            let def = DefinedSymbol {
                input_file_index: file_index,
                section_index: sym.section_index(),
                value: sym.address(),
                is_weak: sym.is_weak(),
            };
            self.symbol_table.define(name, def, &self.input_paths)?;
        }
        tracing::debug!(
            "loaded {} ({} global symbols so far)",
            self.input_paths[file_index],
            self.symbol_table.len()
        );
        self.input_objects.push(obj);
        Ok(())
    }

    pub fn layout(&mut self) -> Result<()> {
        self.segments = SEGMENTS
            .iter()
            .map(|&(name, kind)| Segment::new(name, kind))
            .collect();

        for (file_index, obj) in self.input_objects.iter().enumerate() {
            for section in obj.sections() {
                let size = section.size();
                if size == 0 {
                    continue;
                }
                let kind = section.kind();
                let Some(segment_idx) = segment_for(kind) else {
                    tracing::debug!(
                        "Skipping section {} (kind: {:?}, size: {})",
                        section.name().unwrap_or("?"),
                        kind,
                        size
                    );
                    continue;
                };
                let align = section.align().max(1);
                let segment = &mut self.segments[segment_idx];
                let start_offset = align_up(segment.size, align)
                    .filter(|start| start.checked_add(size).is_some())
                    .with_context(|| {
                        format!(
                            "{}: section {} has invalid alignment {} or size {}",
                            self.input_paths[file_index],
                            section.name().unwrap_or("?"),
                            align,
                            size
                        )
                    })?;
                segment.size = start_offset + size;
                if segment.has_file_data() {
                    segment.data.resize(start_offset as usize, 0);
                    segment.data.extend_from_slice(section.data()?);
                }
                segment.sections.push(Section {
                    file_index,
                    section_index: section.index(),
                    offset: start_offset,
                });
                self.section_map
                    .insert((file_index, section.index()), (segment_idx, start_offset));
            }
        }

        let mut current = self.base_address;
        for segment in &mut self.segments {
            if segment.size == 0 {
                continue;
            }
            segment.address = align_up(current, SEGMENT_ALIGN)
                .context("output segments overflow the address space")?;
            current = segment
                .address
                .checked_add(segment.size)
                .context("output segments overflow the address space")?;
            tracing::debug!(
                "{} at 0x{:x} ({} bytes, {} sections)",
                segment.name,
                segment.address,
                segment.size,
                segment.sections.len()
            );
        }
        Ok(())
    }

    fn resolve_symbol_va(&self, file_index: usize, sym: &object::Symbol) -> Result<u64> {
        if sym.kind() == SymbolKind::Section || sym.is_local() {
            let Some(sec_idx) = sym.section_index() else {
                return Ok(sym.address());
            };
            let base = self.get_section_addr(file_index, sec_idx).unwrap_or(0);
            return Ok(base + sym.address());
        }

        let name = sym.name()?;
        if let Some(addr) = self.get_symbol_addr(name) {
            return Ok(addr);
        }

        Err(anyhow!(
            "undefined symbol: name={}, file={}",
            name,
            self.input_paths[file_index]
        ))
    }

    /// Fails the link on a bad relocation unless keep-going was requested.
    ///
    /// `reported` is set when the backend has already sent the problem to the sink.
    fn check_failure(
        &self,
        err: anyhow::Error,
        site: &RelocSite<'_>,
        reported: bool,
    ) -> Result<()> {
        if !reported {
            self.diag.error(&site.to_string(), &format!("{:#}", err));
        }
        if self.keep_going {
            return Ok(());
        }
        Err(err.context(format!("failed to relocate {}", site)))
    }

    /// Address of a relocation's target (S).
    fn resolve_target(&self, file_index: usize, target: RelocationTarget) -> Result<u64> {
        match target {
            RelocationTarget::Symbol(idx) => {
                let sym = self.input_objects[file_index].symbol_by_index(idx)?;
                self.resolve_symbol_va(file_index, &sym)
            }
            RelocationTarget::Section(sec_idx) => {
                Ok(self.get_section_addr(file_index, sec_idx).unwrap_or(0))
            }
            other => bail!("unsupported relocation target {:?}", other),
        }
    }

    pub fn relocate(&mut self) -> Result<()> {
        let mut failed = 0usize;

        for seg_idx in 0..self.segments.len() {
            let mut patches = Vec::new();
            {
                let segment = &self.segments[seg_idx];
                if !segment.has_file_data() {
                    continue;
                }
                for input_section in &segment.sections {
                    let file_index = input_section.file_index;
                    let obj = &self.input_objects[file_index];
                    let section = obj.section_by_index(input_section.section_index)?;
                    let section_name = section.name().unwrap_or("?");
                    let section_va = segment.address + input_section.offset;

                    for (offset, reloc) in section.relocations() {
                        let RelocationFlags::Elf { r_type } = reloc.flags() else {
                            bail!("non-ELF relocation in {}", self.input_paths[file_index]);
                        };
                        let r_type = RelType(r_type);
                        if r_type == self.arch.none_rel() {
                            continue;
                        }
                        let site = RelocSite {
                            file: &self.input_paths[file_index],
                            section: section_name,
                            offset,
                        };

                        let symbol_name = match reloc.target() {
                            RelocationTarget::Symbol(idx) => {
                                obj.symbol_by_index(idx)?.name().unwrap_or("")
                            }
                            RelocationTarget::Section(_) => "",
                            _ => continue,
                        };

                        let expr = self.arch.rel_expr(r_type, symbol_name, &site, &self.diag);
                        match expr {
                            RelExpr::None => continue,
                            RelExpr::Invalid => {
                                failed += 1;
                                let r_name = self.arch.rel_type_name(r_type);
                                let err = anyhow!("unrecognized reloc {}", r_name);
                                self.check_failure(err, &site, true)?;
                                continue;
                            }
                            RelExpr::Abs | RelExpr::Pc => {}
                        }

                        let s = match self.resolve_target(file_index, reloc.target()) {
                            Ok(s) => s,
                            Err(err) => {
                                failed += 1;
                                self.check_failure(err, &site, false)?;
                                continue;
                            }
                        };
                        let a = reloc.addend();
                        let p = section_va + offset;
                        let value = match expr {
                            RelExpr::Pc => s.wrapping_add_signed(a).wrapping_sub(p),
                            _ => s.wrapping_add_signed(a),
                        };

                        patches.push(Patch {
                            offset: input_section.offset + offset,
                            r_type,
                            value,
                            file_index,
                            section_name,
                            section_offset: offset,
                        });
                    }
                }
            }

            for patch in patches {
                let site = RelocSite {
                    file: &self.input_paths[patch.file_index],
                    section: patch.section_name,
                    offset: patch.section_offset,
                };
                let data = &mut self.segments[seg_idx].data;
                if let Err(err) = self.arch.relocate(
                    data,
                    patch.offset as usize,
                    patch.r_type,
                    patch.value,
                    &site,
                    &self.diag,
                ) {
                    failed += 1;
                    let reported = matches!(err, EncodingError::UnrecognizedRelocation { .. });
                    self.check_failure(err.into(), &site, reported)?;
                }
            }
        }

        if failed > 0 {
            bail!("{} relocation(s) could not be applied", failed);
        }
        Ok(())
    }

    fn get_symbol_addr(&self, name: &str) -> Option<u64> {
        if let Some(sym) = self.symbol_table.get(name) {
            let Some(section_index) = sym.section_index else {
                return Some(sym.value);
            };
            let (seg_idx, off) = self.section_map.get(&(sym.input_file_index, section_index))?;
            return Some(self.segments[*seg_idx].address + off + sym.value);
        }

        if self.allowed_undefined.contains(name) {
            return Some(0);
        }

        None
    }

    fn get_section_addr(&self, file_index: usize, section_index: SectionIndex) -> Option<u64> {
        let (seg_idx, offset) = self.section_map.get(&(file_index, section_index))?;
        Some(self.segments[*seg_idx].address + offset)
    }

    /// Address of a global symbol after layout.
    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.get_symbol_addr(name)
    }

    /// Flat image of every file-backed segment, starting at the base address.
    pub fn image(&self) -> Vec<u8> {
        let mut image = Vec::new();
        for segment in self.segments.iter().filter(|s| s.has_file_data() && s.size > 0) {
            let start = (segment.address - self.base_address) as usize;
            image.resize(start, 0);
            image.extend_from_slice(&segment.data);
        }
        image
    }

    /// Runs layout and relocation and returns the image.
    pub fn link(&mut self) -> Result<Vec<u8>> {
        self.layout()?;
        self.relocate()?;
        tracing::info!(
            "linked {} input(s) for {} ({} errors reported)",
            self.input_objects.len(),
            self.arch.name(),
            self.diag.error_count()
        );
        Ok(self.image())
    }
}

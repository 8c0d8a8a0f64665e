//! Symbol table management.
//!
//! Tracks global symbol definitions from input object files. Addresses are computed by the
//! linker after layout from the defining section's placement.

use anyhow::{bail, Result};
use object::read::SectionIndex;
use std::collections::HashMap;

/// A symbol defined in an input object file.
#[derive(Debug, Clone, Copy)]
pub struct DefinedSymbol {
    /// Index of the input file in the linker's file list.
    pub input_file_index: usize,
    /// Section index within that input file, `None` for absolute symbols.
    pub section_index: Option<SectionIndex>,
    /// Offset within the section, or the address itself for absolute symbols.
    pub value: u64,
    /// Whether this is a weak symbol (can be overridden).
    pub is_weak: bool,
}

/// Global symbols by name.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, DefinedSymbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a definition. A strong definition replaces a weak one; the first weak
    /// definition wins among weak ones. Two strong definitions are an error.
    pub fn define(&mut self, name: &str, sym: DefinedSymbol, files: &[String]) -> Result<()> {
        if let Some(existing) = self.symbols.get(name) {
            match (existing.is_weak, sym.is_weak) {
                (true, false) => {}
                (false, false) => bail!(
                    "duplicate symbol: {} (defined in {} and {})",
                    name,
                    files[existing.input_file_index],
                    files[sym.input_file_index]
                ),
                _ => return Ok(()),
            }
        }
        self.symbols.insert(name.to_string(), sym);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DefinedSymbol> {
        self.symbols.get(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(file: usize, value: u64, is_weak: bool) -> DefinedSymbol {
        DefinedSymbol {
            input_file_index: file,
            section_index: Some(SectionIndex(1)),
            value,
            is_weak,
        }
    }

    #[test]
    fn strong_overrides_weak() {
        let files = vec!["a.o".to_string(), "b.o".to_string()];
        let mut table = SymbolTable::new();
        table.define("f", def(0, 8, true), &files).unwrap();
        table.define("f", def(1, 16, false), &files).unwrap();
        assert_eq!(table.get("f").unwrap().value, 16);

        // A later weak definition does not replace it.
        table.define("f", def(0, 24, true), &files).unwrap();
        assert_eq!(table.get("f").unwrap().input_file_index, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_strong_is_an_error() {
        let files = vec!["a.o".to_string(), "b.o".to_string()];
        let mut table = SymbolTable::new();
        table.define("f", def(0, 0, false), &files).unwrap();
        let err = table.define("f", def(1, 0, false), &files).unwrap_err();
        assert_eq!(err.to_string(), "duplicate symbol: f (defined in a.o and b.o)");
    }
}

//! Minimal BPF Linker Library.
//!
//! This library provides the core components for the `ubld` linker.
//! It is organized into several modules:
//! - `arch`: Architecture-specific relocation backends (BPF).
//! - `config`: CLI configuration.
//! - `diagnostics`: Sink for problems found in input relocations.
//! - `error`: Relocation encoding errors.
//! - `linker`: The main linking orchestration.
//! - `layout`: Output memory layout management.
//! - `symbol`: Symbol table management.

pub mod arch;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod layout;
pub mod linker;
pub mod symbol;
pub mod utils;

//! Entry point for the ubld linker.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap` (see `Config::link_options`) and set up `tracing`.
//! 2. Map the inputs and pick the relocation backend from the first input's ELF machine.
//! 3. Execute the linking steps: load, layout, relocate, write.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs::File;
use tracing_subscriber::EnvFilter;

use ubld::arch;
use ubld::config::Config;
use ubld::linker::Linker;
use ubld::utils::elf_target;

fn main() -> Result<()> {
    let options = Config::parse()
        .link_options()
        .map_err(anyhow::Error::msg)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut input_paths = Vec::new();
    for path in options.inputs {
        if !path.exists() {
            // Ignore non-existent files (assumed values of unknown flags)
            tracing::warn!("ignoring missing input {}", path.display());
            continue;
        }
        input_paths.push(path);
    }

    if input_paths.is_empty() {
        anyhow::bail!("no input files");
    }

    // Map input files into memory
    let mut open_files = Vec::new();
    for path in &input_paths {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file)? };
        open_files.push((path.display().to_string(), mmap));
    }

    // Backend is chosen from the first plain object; archives are checked member by member.
    let machine = open_files
        .iter()
        .find(|(_, mmap)| !mmap.starts_with(b"!<arch>\n"))
        .map(|(path, mmap)| {
            elf_target(mmap)
                .map(|(machine, _)| machine)
                .with_context(|| format!("failed to parse {}", path))
        })
        .transpose()?
        .unwrap_or(object::elf::EM_BPF);
    let backend = arch::for_machine(machine)
        .with_context(|| format!("unsupported ELF machine {}", machine))?;
    tracing::debug!("using {} backend", backend.name());

    let mut linker = Linker::new(backend)
        .base_address(options.base_address)
        .keep_going(options.keep_going);

    // 1. Add files (Parses symbols)
    for (path, mmap) in &open_files {
        linker.add_file(path, mmap)?;
    }

    // 2-4. Layout, relocate, build image
    let image = linker.link()?;

    // 5. Write final image
    std::fs::write(&options.output, &image)
        .with_context(|| format!("failed to write {}", options.output.display()))?;

    println!("Linked successfully to {}", options.output.display());
    Ok(())
}

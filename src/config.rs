//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the linker using `clap`.

use clap::Parser;
use std::path::PathBuf;

use crate::utils::parse_address;

/// A minimal static linker for eBPF object files.
///
/// Combines relocatable BPF objects (and archives of them) into one flat program image,
/// resolving calls and 64-bit address loads between them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Input object files (and ignored flags)
    #[arg(required = true, allow_hyphen_values = true, num_args = 1..)]
    pub inputs: Vec<String>,

    /// Output file
    #[arg(short, long, default_value = "a.out", help = "Path to the output image")]
    pub output: PathBuf,

    /// Address of the first output segment
    #[arg(long, default_value = "0", value_parser = parse_address)]
    pub base_address: u64,

    /// Report every bad relocation instead of stopping at the first one
    #[arg(long)]
    pub keep_going: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

/// Settings after folding flags that ended up among the inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub base_address: u64,
    pub keep_going: bool,
    pub log_level: String,
}

impl Config {
    /// Resolves the arguments captured by `inputs`.
    ///
    /// `allow_hyphen_values` makes clap hand every argument after the first input to the
    /// positional list, so the known flags are picked out here. Unknown flags are ignored.
    pub fn link_options(self) -> Result<LinkOptions, String> {
        let mut options = LinkOptions {
            inputs: Vec::new(),
            output: self.output,
            base_address: self.base_address,
            keep_going: self.keep_going,
            log_level: self.log_level,
        };

        let mut iter = self.inputs.into_iter();
        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with('-') => (flag, Some(value.to_string())),
                _ => (arg.as_str(), None),
            };
            let mut value = |name: &str| {
                inline
                    .clone()
                    .or_else(|| iter.next())
                    .ok_or_else(|| format!("missing value for {name}"))
            };
            match flag {
                "-o" | "--output" => options.output = PathBuf::from(value(flag)?),
                "--base-address" => options.base_address = parse_address(&value(flag)?)?,
                "--log-level" => options.log_level = value(flag)?,
                "--keep-going" => options.keep_going = true,
                _ if flag.starts_with('-') => {}
                _ => options.inputs.push(PathBuf::from(&arg)),
            }
        }
        Ok(options)
    }
}

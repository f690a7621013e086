// SPDX-License-Identifier: AGPL-3.0-only

//! `epiphany` — command-line front end for the Epiphany hardware access layer.
//!
//! ```text
//! USAGE:
//!   epiphany load <program.elf> [--row R --col C --rows N --cols M] [--start]
//!   epiphany read <addr> [count] [--row R --col C]
//!   epiphany write <addr> <word>... [--row R --col C]
//!   epiphany reset                   Reset every core of the platform
//!   epiphany regs <row> <col>        Dump a core's register file
//!   epiphany platform                Print the platform description
//! ```
//!
//! Coordinates are platform-relative. `EHAL_TARGET` selects the backend
//! (`direct`, `sim`, `pal`), `EPIPHANY_HDF` the platform description.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use epiphany_chip::addr::{is_local, split_global};
use epiphany_chip::regs::CORE_REGISTERS;
use epiphany_chip::AddrClass;
use epiphany_hal::{
    BackendSelection, DiagLevel, Hal, HalConfig, LoadConfig, Platform, Workgroup,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "epiphany", about = "Epiphany many-core host utility", version)]
struct Cli {
    /// Backend: direct, sim or pal (overrides EHAL_TARGET).
    #[arg(long, global = true)]
    target: Option<BackendSelection>,

    /// Platform description file (overrides EPIPHANY_HDF).
    #[arg(long, global = true)]
    hdf: Option<PathBuf>,

    /// Device file for the direct backend.
    #[arg(long, global = true)]
    device: Option<PathBuf>,

    /// More output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Load an ELF program onto a rectangle of cores.
    Load {
        /// Program to load.
        program: PathBuf,
        /// First row.
        #[arg(long, default_value_t = 0)]
        row: u32,
        /// First column.
        #[arg(long, default_value_t = 0)]
        col: u32,
        /// Rows to load.
        #[arg(long, default_value_t = 1)]
        rows: u32,
        /// Columns to load.
        #[arg(long, default_value_t = 1)]
        cols: u32,
        /// Start the cores once all are loaded.
        #[arg(short, long)]
        start: bool,
        /// Reset the cores before loading.
        #[arg(long)]
        reset: bool,
        /// Zero the tail of segments whose memory size exceeds their file size.
        #[arg(long)]
        zero_fill: bool,
    },
    /// Read words from a core or from external memory.
    Read {
        /// Local (with --row/--col), global or external address.
        #[arg(value_parser = parse_u32)]
        addr: u32,
        /// Number of words.
        #[arg(default_value_t = 1)]
        count: u32,
        /// Core row for local addresses.
        #[arg(long, default_value_t = 0)]
        row: u32,
        /// Core column for local addresses.
        #[arg(long, default_value_t = 0)]
        col: u32,
    },
    /// Write words to a core or to external memory.
    Write {
        /// Local (with --row/--col), global or external address.
        #[arg(value_parser = parse_u32)]
        addr: u32,
        /// Words to write.
        #[arg(required = true, value_parser = parse_u32)]
        words: Vec<u32>,
        /// Core row for local addresses.
        #[arg(long, default_value_t = 0)]
        row: u32,
        /// Core column for local addresses.
        #[arg(long, default_value_t = 0)]
        col: u32,
    },
    /// Reset every core of the platform.
    Reset,
    /// Dump a core's register file.
    Regs {
        /// Core row.
        row: u32,
        /// Core column.
        col: u32,
    },
    /// Print the platform description.
    Platform,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("'{s}': {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let platform = match &cli.hdf {
        Some(path) => Platform::from_hdf_file(path)?,
        None => Platform::from_env()?,
    };

    if let Cmd::Platform = cli.command {
        print_platform(&platform);
        return Ok(());
    }

    let mut load = LoadConfig::default().with_diag(DiagLevel::from_verbosity(cli.verbose));
    if let Cmd::Load { zero_fill, .. } = &cli.command {
        load = load.with_zero_fill(*zero_fill);
    }
    let config = HalConfig {
        backend: match cli.target {
            Some(target) => target,
            None => BackendSelection::from_env()?,
        },
        platform,
        device: cli.device.clone(),
        load,
    };
    let mut hal = Hal::init(config).context("Cannot initialise the HAL")?;

    match cli.command {
        Cmd::Load {
            program,
            row,
            col,
            rows,
            cols,
            start,
            reset,
            ..
        } => cmd_load(&mut hal, &program, (row, col, rows, cols), start, reset)?,
        Cmd::Read {
            addr,
            count,
            row,
            col,
        } => cmd_read(&mut hal, addr, count, row, col)?,
        Cmd::Write {
            addr,
            words,
            row,
            col,
        } => cmd_write(&mut hal, addr, &words, row, col)?,
        Cmd::Reset => cmd_reset(&mut hal)?,
        Cmd::Regs { row, col } => cmd_regs(&mut hal, row, col)?,
        Cmd::Platform => unreachable!("handled before HAL init"),
    }

    Ok(())
}

fn cmd_load(
    hal: &mut Hal,
    program: &Path,
    (row, col, rows, cols): (u32, u32, u32, u32),
    start: bool,
    reset: bool,
) -> Result<()> {
    let group = hal.open(row, col, rows, cols)?;
    if reset {
        hal.reset_group(&group)?;
    }

    let metrics = hal
        .load_group(program, &group, 0, 0, rows, cols, start)
        .with_context(|| format!("Loading {}", program.display()))?;

    println!(
        "{}: {} core(s), {} segment write(s), {} bytes{} in {:?}",
        program.display(),
        metrics.cores_loaded,
        metrics.segments_written,
        metrics.bytes_written,
        if start { ", started" } else { "" },
        metrics.duration
    );
    hal.close(group)?;
    Ok(())
}

/// Where an address given on the command line lives
enum Location {
    Core { group: Workgroup, offset: u32 },
    External { offset: u32 },
}

fn locate(hal: &mut Hal, addr: u32, len: u32, row: u32, col: u32) -> Result<Location> {
    let platform = hal.platform();
    let (prow, pcol) = (platform.row(), platform.col());
    let class = if is_local(addr) {
        AddrClass::Local
    } else {
        platform.classify(addr)
    };

    match class {
        AddrClass::Local => Ok(Location::Core {
            group: hal.open(row, col, 1, 1)?,
            offset: addr,
        }),
        AddrClass::OnChip { row, col } => {
            let (_, offset) = split_global(addr);
            let (rel_row, rel_col) = platform_relative((row, col), (prow, pcol))?;
            Ok(Location::Core {
                group: hal.open(rel_row, rel_col, 1, 1)?,
                offset,
            })
        }
        AddrClass::OffChip => {
            let emem = platform.emem()?;
            match emem.window(0, emem.size)?.offset_of(addr, len) {
                Some(offset) => Ok(Location::External { offset }),
                None => bail!("{addr:#010x} is neither on a core nor in external memory"),
            }
        }
    }
}

/// Absolute mesh coordinates relative to the platform origin.
fn platform_relative((row, col): (u32, u32), (prow, pcol): (u32, u32)) -> Result<(u32, u32)> {
    match (row.checked_sub(prow), col.checked_sub(pcol)) {
        (Some(r), Some(c)) => Ok((r, c)),
        _ => bail!("core ({row},{col}) lies before the platform origin ({prow},{pcol})"),
    }
}

fn cmd_read(hal: &mut Hal, addr: u32, count: u32, row: u32, col: u32) -> Result<()> {
    let len = count.checked_mul(4).context("count too large")?;
    let mut buf = vec![0u8; len as usize];

    match locate(hal, addr, len, row, col)? {
        Location::Core { group, offset } => {
            hal.read(&group, 0, 0, offset, &mut buf)?;
            hal.close(group)?;
        }
        Location::External { offset } => {
            let mut seg = hal.alloc(offset, len)?;
            hal.read_mem(&mut seg, 0, &mut buf)?;
        }
    }

    for (i, word) in buf.chunks_exact(4).enumerate() {
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        #[allow(clippy::cast_possible_truncation)]
        let at = addr.wrapping_add(4 * i as u32);
        println!("[{at:#010x}] = {value:#010x}");
    }
    Ok(())
}

fn cmd_write(hal: &mut Hal, addr: u32, words: &[u32], row: u32, col: u32) -> Result<()> {
    let data: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;

    match locate(hal, addr, len, row, col)? {
        Location::Core { group, offset } => {
            hal.write(&group, 0, 0, offset, &data)?;
            hal.close(group)?;
        }
        Location::External { offset } => {
            let mut seg = hal.alloc(offset, len)?;
            hal.write_mem(&mut seg, 0, &data)?;
        }
    }
    Ok(())
}

fn cmd_reset(hal: &mut Hal) -> Result<()> {
    let (rows, cols) = {
        let chip = hal.platform().chip_type();
        (chip.rows(), chip.cols())
    };
    let group = hal.open(0, 0, rows, cols)?;
    hal.reset_group(&group)?;
    println!("Reset {} core(s)", rows * cols);
    hal.close(group)?;
    Ok(())
}

fn cmd_regs(hal: &mut Hal, row: u32, col: u32) -> Result<()> {
    let group = hal.open(row, col, 1, 1)?;
    println!("Core {} ({row},{col}):", group.base());
    for &(name, offset) in CORE_REGISTERS {
        match hal.read_reg(&group, 0, 0, offset) {
            Ok(value) => println!("  {name:<12} [{offset:#07x}] = {value:#010x}"),
            Err(e) => println!("  {name:<12} [{offset:#07x}] : {e}"),
        }
    }
    hal.close(group)?;
    Ok(())
}

fn print_platform(platform: &Platform) {
    println!("Platform     : {}", platform.version);
    if let Some(base) = platform.esys_regs_base {
        println!("ESYS regs    : {base:#010x}");
    }
    for (i, chip) in platform.chips.iter().enumerate() {
        let rect = chip.rect();
        println!(
            "Chip {i}       : {} at ({},{}), {}×{} cores",
            chip.chip_type, rect.row, rect.col, rect.rows, rect.cols
        );
    }
    for emem in &platform.emems {
        println!(
            "External mem : {} host {:#010x} device {:#010x} size {:#x} ({:?})",
            emem.name, emem.phy_base, emem.ephy_base, emem.size, emem.access
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_u32("0x8E00_0000"), Ok(0x8E00_0000));
        assert_eq!(parse_u32("4096"), Ok(4096));
        assert!(parse_u32("0xG").is_err());
    }

    #[test]
    fn coordinates_before_origin_are_rejected() {
        assert_eq!(platform_relative((33, 9), (32, 8)).unwrap(), (1, 1));
        assert!(platform_relative((0, 9), (32, 8)).is_err());
        assert!(platform_relative((33, 0), (32, 8)).is_err());
    }
}

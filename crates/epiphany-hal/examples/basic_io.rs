// SPDX-License-Identifier: AGPL-3.0-only

//! Basic I/O against a workgroup
//!
//! Opens a 2×2 group, writes a pattern to each core and to external memory,
//! and reads it back. Runs on the simulator unless `EHAL_TARGET` says
//! otherwise.

use epiphany_hal::{BackendSelection, Hal, HalConfig, Result, TARGET_ENV};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("epiphany_hal=info")
        .init();

    let mut config = HalConfig::from_env()?;
    if std::env::var_os(TARGET_ENV).is_none() {
        config.backend = BackendSelection::Simulator;
    }
    let mut hal = Hal::init(config)?;
    println!("Epiphany basic I/O ({} backend)\n", hal.backend_type());

    let group = hal.open(0, 0, 2, 2)?;
    println!("Opened 2×2 group at core {}", group.base());

    for (row, col) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        let pattern: Vec<u8> = (0..64).map(|i| (i as u8) ^ (row * 2 + col) as u8).collect();
        hal.write(&group, row, col, 0x4000, &pattern)?;

        let mut back = vec![0u8; pattern.len()];
        hal.read(&group, row, col, 0x4000, &mut back)?;
        let verdict = if back == pattern { "ok" } else { "MISMATCH" };
        println!("  core ({row},{col}): {} bytes {verdict}", back.len());
    }

    let mut seg = hal.alloc(0, 0x1000)?;
    hal.write_mem(&mut seg, 0, b"hello from the host")?;
    let mut greeting = [0u8; 19];
    hal.read_mem(&mut seg, 0, &mut greeting)?;
    println!(
        "\nExternal memory at {:#010x}: {}",
        seg.ephy_base(),
        String::from_utf8_lossy(&greeting)
    );

    hal.close(group)?;
    Ok(())
}

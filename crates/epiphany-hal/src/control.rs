// SPDX-License-Identifier: AGPL-3.0-only

//! Core control through the memory-mapped register file

use crate::backend::{Backend, Target};
use crate::error::Result;
use epiphany_chip::regs::{self, debugcmd, debugstatus, irq};
use epiphany_chip::CoreId;
use tracing::debug;

/// Raise SYNC: the core begins executing from its reset vector.
///
/// # Errors
///
/// Returns error if the register write fails.
pub fn start_core(backend: &mut dyn Backend, id: CoreId) -> Result<()> {
    debug!("Starting core {id}");
    backend.write_word(Target::Core(id), regs::ILATST, 1 << irq::SYNC)
}

/// Pulse the core's reset line.
///
/// # Errors
///
/// Returns error if a register write fails.
pub fn reset_core(backend: &mut dyn Backend, id: CoreId) -> Result<()> {
    debug!("Resetting core {id}");
    backend.write_word(Target::Core(id), regs::RESETCORE, 1)?;
    backend.write_word(Target::Core(id), regs::RESETCORE, 0)
}

/// Halt the core in debug mode.
///
/// # Errors
///
/// Returns error if the register write fails.
pub fn halt_core(backend: &mut dyn Backend, id: CoreId) -> Result<()> {
    debug!("Halting core {id}");
    backend.write_word(Target::Core(id), regs::DEBUGCMD, debugcmd::HALT)
}

/// Resume a halted core.
///
/// # Errors
///
/// Returns error if the register write fails.
pub fn resume_core(backend: &mut dyn Backend, id: CoreId) -> Result<()> {
    debug!("Resuming core {id}");
    backend.write_word(Target::Core(id), regs::DEBUGCMD, debugcmd::RESUME)
}

/// Raise the user interrupt.
///
/// # Errors
///
/// Returns error if the register write fails.
pub fn signal_core(backend: &mut dyn Backend, id: CoreId) -> Result<()> {
    debug!("Signalling core {id}");
    backend.write_word(Target::Core(id), regs::ILATST, 1 << irq::USER)
}

/// True if the core reports itself halted.
///
/// # Errors
///
/// Returns error if the register read fails.
pub fn is_halted(backend: &mut dyn Backend, id: CoreId) -> Result<bool> {
    let status = backend.read_word(Target::Core(id), regs::DEBUGSTATUS)?;
    Ok(status & debugstatus::HALTED != 0)
}

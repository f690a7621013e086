//! Backend implementations
//!
//! Three backends available:
//! - **Direct**: mmap of `/dev/epiphany` (or `/dev/mem`), real hardware
//! - **Simulator**: in-process memory model, no hardware required
//! - **PAL**: ranked team transport, cores addressed by rank

pub mod direct;
pub mod mmap;
pub mod pal;
pub mod simulator;
pub mod store;

pub use direct::DirectBackend;
pub use pal::{MemoryTeam, PalBackend, Team};
pub use simulator::SimulatorBackend;

// SPDX-License-Identifier: AGPL-3.0-only

//! Silicon model for Epiphany many-core mesh chips (E16G301 / E64G401).
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the silicon: core IDs and the global address map, the
//! per-core local memory layout, the memory-mapped register file, and the
//! fixed in-core configuration block that the host loader writes.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`addr`] | Core ID packing, local ↔ global translation, address classes, external-memory windows |
//! | [`mesh`] | Chip types and mesh rectangles (row-major iteration) |
//! | [`layout`] | Per-core local memory map, config block offsets, reference platforms |
//! | [`regs`] | Core register offsets and bit definitions |
//!
//! # Address map
//!
//! ```text
//!  31          20 19                    0
//! ┌──────────────┬───────────────────────┐
//! │ core ID (12) │  local offset (20)    │
//! │ row:6 col:6  │  SRAM 0x00000–0x07FFF │
//! │              │  regs 0xF0000–0xF0FFF │
//! └──────────────┴───────────────────────┘
//! ```
//!
//! A zero core ID means "this core" (local addressing). A core ID that does
//! not decode to a core on any chip of the platform routes off-chip, to the
//! shared external DRAM.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod layout;
pub mod mesh;
pub mod regs;

pub use addr::{AddrClass, CoreId, ExtWindow};
pub use mesh::{ChipType, MeshRect};

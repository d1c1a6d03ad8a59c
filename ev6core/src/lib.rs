// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Functional EV6 (Alpha 21264) core emulation: the software TLB with its
//! lazy two-axis invalidation protocol, the IPR bank, the translation and
//! fault engine, and the SMP TLB-shootdown interconnect.
//!
//! Each emulated CPU runs on one host thread.  Cross-thread state is limited
//! to the CBox register tier, the per-CPU shootdown rings and guest physical
//! memory; everything else is single-writer and owned by the CPU's run loop.
//! Instruction decode, the FPU and the run loop itself live outside this
//! crate and consume it through [`Machine`], [`Cpu`], [`GuestMemory`] and
//! [`FaultSink`].

pub mod address;
pub mod config;
pub mod cpu;
pub mod error;
pub mod event;
pub mod guestmem;
pub mod machine;
pub mod mm;
pub mod platform;
pub mod types;

pub use address::{PhysAddr, VirtAddr};
pub use config::{MachineConfig, TbchkScope};
pub use cpu::Cpu;
pub use error::{EmuError, MemError, TranslateError};
pub use event::{FaultSink, PendingEvent};
pub use guestmem::{DenseMemory, GuestMemory};
pub use machine::Machine;

// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Bit-exact Alpha AXP EV6 (21264) architectural definitions.
//!
//! This crate contains only stateless encodings: the PTE quadword layout,
//! virtual-address formats, the IPR index space with its packed register
//! layouts, and the PALcode entry geometry.  Nothing in here performs I/O or
//! holds emulator state.

#![no_std]

pub mod pal;
pub mod pte;
pub mod regs;
pub mod va;

// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! The EV6 three-level page-table walk.
//!
//! 8 KB pages and quadword PTEs give 10 index bits per level; the walk
//! starts at the frame named by PTBR and reads guest physical memory
//! through the supplied [`GuestMemory`] only.  The walker classifies
//! structure (missing levels); the caller classifies the leaf against the
//! access it was trying to make.

use axparch::pte::{AccessDecision, AccessKind, CpuMode, Pte};
use axparch::va::{l1_index, l2_index, l3_index, PAGE_SHIFT};

use crate::address::PhysAddr;
use crate::error::{MemError, TranslateError};
use crate::guestmem::GuestMemory;

/// A completed walk: the leaf PTE and where it was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkOk {
    pub pte: Pte,
    pub pte_pa: PhysAddr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkError {
    /// The PTE at `level` (1-based) has the valid bit clear.
    Invalid { level: u8 },
    /// The physical read callback failed.
    Bus(MemError),
}

impl From<MemError> for WalkError {
    fn from(err: MemError) -> Self {
        Self::Bus(err)
    }
}

fn level_entry(
    mem: &dyn GuestMemory,
    table_pa: PhysAddr,
    index: u64,
    level: u8,
) -> Result<Pte, WalkError> {
    let pte = Pte::new(mem.read_quad(table_pa.offset(index * 8))?);
    if !pte.is_valid() {
        return Err(WalkError::Invalid { level });
    }
    Ok(pte)
}

/// Walks the three levels for `va`, rooted at the page frame `ptbr_pfn`.
pub fn walk(mem: &dyn GuestMemory, ptbr_pfn: u64, va: u64) -> Result<WalkOk, WalkError> {
    let l1_base = PhysAddr::new(ptbr_pfn << PAGE_SHIFT);
    let l1 = level_entry(mem, l1_base, l1_index(va), 1)?;
    let l2 = level_entry(mem, PhysAddr::new(l1.pa()), l2_index(va), 2)?;
    let l3_base = PhysAddr::new(l2.pa());
    let pte_pa = l3_base.offset(l3_index(va) * 8);
    let pte = Pte::new(mem.read_quad(pte_pa)?);
    if !pte.is_valid() {
        return Err(WalkError::Invalid { level: 3 });
    }
    Ok(WalkOk { pte, pte_pa })
}

/// Classifies a walked leaf against the faulting access: fault-on bits win,
/// then the mode's enable bit.
pub fn classify_leaf(pte: Pte, access: AccessKind, mode: CpuMode) -> Result<(), TranslateError> {
    match pte.check_access(access, mode) {
        AccessDecision::Grant => Ok(()),
        AccessDecision::FaultOnRead => Err(TranslateError::FaultOnRead),
        AccessDecision::FaultOnWrite => Err(TranslateError::FaultOnWrite),
        AccessDecision::FaultOnExecute => Err(TranslateError::FaultOnExecute),
        AccessDecision::Deny => Err(TranslateError::AccessViolation),
    }
}

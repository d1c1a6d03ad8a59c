// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! The fast-path translation engine.
//!
//! Classifies a VA, short-circuits the direct-mapped cases (kseg and the
//! chassis superpage windows), checks alignment, then probes the per-CPU
//! SPAM shard.  Every outcome is a value; a miss here never walks — the run
//! loop vectors into the PAL miss handler, which walks and refills.

use axparch::pte::{AccessKind, CpuMode, GranularityHint};
use axparch::va::{classify, kseg_to_physical, VaClass, VaWidth, PA_MASK};

use crate::address::{PhysAddr, VirtAddr};
use crate::error::TranslateError;
use crate::mm::spam::SpamShard;
use crate::mm::walk::classify_leaf;
use crate::platform::SuperpageTable;
use crate::types::{AccessSize, Realm};

/// One translation request, as produced by instruction fetch or a
/// load/store grain.
#[derive(Clone, Copy, Debug)]
pub struct AccessRequest {
    pub va: VirtAddr,
    pub realm: Realm,
    pub access: AccessKind,
    pub mode: CpuMode,
    pub asn: u8,
    pub size: AccessSize,
}

impl AccessRequest {
    /// A natural quadword data read, the common case.
    pub fn data_read(va: VirtAddr, mode: CpuMode, asn: u8) -> Self {
        Self {
            va,
            realm: Realm::Data,
            access: AccessKind::Read,
            mode,
            asn,
            size: AccessSize::Quad,
        }
    }

    pub fn data_write(va: VirtAddr, mode: CpuMode, asn: u8) -> Self {
        Self {
            access: AccessKind::Write,
            ..Self::data_read(va, mode, asn)
        }
    }

    /// An instruction fetch (longword-aligned on Alpha).
    pub fn fetch(va: VirtAddr, mode: CpuMode, asn: u8) -> Self {
        Self {
            realm: Realm::Instruction,
            access: AccessKind::Execute,
            size: AccessSize::Long,
            ..Self::data_read(va, mode, asn)
        }
    }

    pub fn with_size(self, size: AccessSize) -> Self {
        Self { size, ..self }
    }
}

/// How a successful translation was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslationSource {
    KSeg,
    Superpage,
    Tlb(GranularityHint),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Translation {
    pub pa: PhysAddr,
    pub source: TranslationSource,
}

/// Translates one access.  Never blocks and never touches guest memory;
/// the only shared state consulted is the (lock-free) SPAM shard.
pub fn translate(
    shard: &SpamShard,
    superpages: &SuperpageTable,
    width: VaWidth,
    req: &AccessRequest,
) -> Result<Translation, TranslateError> {
    let va = req.va.bits();

    match classify(va, width) {
        VaClass::Unknown => return Err(TranslateError::NonCanonical),
        VaClass::KSeg => {
            // Direct map, kernel only.  Never touches the TLB.
            if req.mode != CpuMode::Kernel {
                return Err(TranslateError::AccessViolation);
            }
            check_alignment(va, req.size)?;
            return Ok(Translation {
                pa: PhysAddr::new(kseg_to_physical(va)),
                source: TranslationSource::KSeg,
            });
        }
        VaClass::User | VaClass::Kernel => {}
    }

    // Chassis superpage windows bypass the TLB for kernel-mode accesses
    // whose address names reserved physical space directly.
    if req.mode == CpuMode::Kernel {
        let candidate = PhysAddr::new(va & PA_MASK);
        if superpages.find(candidate).is_some() {
            check_alignment(va, req.size)?;
            return Ok(Translation {
                pa: candidate,
                source: TranslationSource::Superpage,
            });
        }
    }

    check_alignment(va, req.size)?;

    let hit = shard
        .lookup(req.realm, va, req.asn)
        .ok_or(TranslateError::TlbMiss(req.realm))?;
    classify_leaf(hit.pte_prot(), req.access, req.mode)?;

    Ok(Translation {
        pa: hit.pa,
        source: TranslationSource::Tlb(hit.size),
    })
}

fn check_alignment(va: u64, size: AccessSize) -> Result<(), TranslateError> {
    if size.is_aligned(va) {
        Ok(())
    } else {
        Err(TranslateError::Unaligned)
    }
}

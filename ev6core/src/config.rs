// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Machine configuration, consumed once at construction.

use crate::platform::SuperpageTable;

/// Which translation buffers a TBCHK probe consults.  The SRM wording is
/// ambiguous between "the TB" and "either TB", so both readings are
/// available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TbchkScope {
    #[default]
    BothRealms,
    DataOnly,
}

#[derive(Clone, Debug)]
pub struct MachineConfig {
    /// Number of emulated CPUs.
    pub cpus: usize,
    /// Buckets per TLB shard; must be a power of two.
    pub tlb_buckets: usize,
    /// Ways per bucket (1..=64).
    pub tlb_ways: usize,
    /// Whether the guest OS runs with address space numbers.  Without them
    /// a context switch flushes the process-private TLB entries.
    pub asn_enabled: bool,
    /// Wait for shootdown acknowledgements before the local invalidation
    /// returns.
    pub ack_shootdowns: bool,
    /// Broadcast a precise invalidate for every miss-handler fill.  Not
    /// architecturally required; some OSes are happier with it.
    pub coherent_insert: bool,
    pub tbchk_scope: TbchkScope,
    /// Spins before the ack wait logs a watchdog warning.  The wait itself
    /// never gives up.
    pub ack_watchdog_spins: u64,
    pub superpages: SuperpageTable,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cpus: 1,
            tlb_buckets: 256,
            tlb_ways: 4,
            asn_enabled: true,
            ack_shootdowns: false,
            coherent_insert: false,
            tbchk_scope: TbchkScope::default(),
            ack_watchdog_spins: 100_000_000,
            superpages: SuperpageTable::chassis_default(),
        }
    }
}

impl MachineConfig {
    pub fn with_cpus(cpus: usize) -> Self {
        Self {
            cpus,
            ..Self::default()
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Per-CPU generation counters for lazy TLB invalidation.
//!
//! Every TLB entry is stamped at fill time with the then-current value of
//! two counters: the per-(realm, ASN) epoch and the CPU-wide global epoch.
//! A lookup only honours entries whose stamps still match, so bumping a
//! counter retires an arbitrary number of entries in O(1) without touching
//! the buckets.  Slots are reclaimed later, by sweeps or on insert.
//!
//! The table belongs to exactly one CPU.  Peers never read or write it;
//! remote invalidation arrives as a shootdown message and the owner bumps
//! its own counters.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::types::{Realm, ASN_COUNT};

/// Bump count at which the wrap guard requests a flush-and-sweep.  A 32-bit
/// epoch cannot realistically wrap, but a sweep every 2^31 bumps makes the
/// stamp comparison immune to it outright.
const WRAP_GUARD_INTERVAL: u64 = 1 << 31;

#[derive(Debug)]
pub struct EpochTable {
    global: AtomicU32,
    itb: [AtomicU32; ASN_COUNT],
    dtb: [AtomicU32; ASN_COUNT],
    bumps: AtomicU64,
}

impl EpochTable {
    pub fn new() -> Self {
        Self {
            global: AtomicU32::new(0),
            itb: [const { AtomicU32::new(0) }; ASN_COUNT],
            dtb: [const { AtomicU32::new(0) }; ASN_COUNT],
            bumps: AtomicU64::new(0),
        }
    }

    fn realm_table(&self, realm: Realm) -> &[AtomicU32; ASN_COUNT] {
        match realm {
            Realm::Instruction => &self.itb,
            Realm::Data => &self.dtb,
        }
    }

    /// Current epoch for entries filled under `(realm, asn)`.  Relaxed: the
    /// bucket seqlock provides the acquire fence on the entry payload.
    pub fn current(&self, realm: Realm, asn: u8) -> u32 {
        self.realm_table(realm)[asn as usize].load(Ordering::Relaxed)
    }

    pub fn current_global(&self) -> u32 {
        self.global.load(Ordering::Relaxed)
    }

    /// Retires every non-global entry filled under `(realm, asn)`.
    /// Returns true when the wrap guard wants a full sweep.
    #[must_use = "a true return obliges the caller to sweep the shard"]
    pub fn bump_realm(&self, realm: Realm, asn: u8) -> bool {
        self.realm_table(realm)[asn as usize].fetch_add(1, Ordering::Release);
        self.note_bump(1)
    }

    /// Retires `asn`'s non-global entries in both realms.
    #[must_use = "a true return obliges the caller to sweep the shard"]
    pub fn bump_both(&self, asn: u8) -> bool {
        self.itb[asn as usize].fetch_add(1, Ordering::Release);
        self.dtb[asn as usize].fetch_add(1, Ordering::Release);
        self.note_bump(2)
    }

    /// Retires every non-global entry on this CPU, both realms, all ASNs.
    #[must_use = "a true return obliges the caller to sweep the shard"]
    pub fn bump_global(&self) -> bool {
        self.global.fetch_add(1, Ordering::Release);
        self.note_bump(1)
    }

    /// Retires all non-global entries of one realm, every ASN.
    #[must_use = "a true return obliges the caller to sweep the shard"]
    pub fn bump_all_asns(&self, realm: Realm) -> bool {
        let table = self.realm_table(realm);
        for epoch in table.iter() {
            epoch.fetch_add(1, Ordering::Release);
        }
        self.note_bump(ASN_COUNT as u64)
    }

    /// Bumps everything at once.  Used by the wrap guard itself and by
    /// power-on style resets that keep the table allocated.
    pub fn bump_everything(&self) {
        self.global.fetch_add(1, Ordering::Release);
        for epoch in self.itb.iter().chain(self.dtb.iter()) {
            epoch.fetch_add(1, Ordering::Release);
        }
    }

    /// Power-on reset: all counters to zero.  Only valid while no other
    /// thread can observe the table.
    pub fn reset(&self) {
        self.global.store(0, Ordering::Relaxed);
        for epoch in self.itb.iter().chain(self.dtb.iter()) {
            epoch.store(0, Ordering::Relaxed);
        }
        self.bumps.store(0, Ordering::Relaxed);
    }

    fn note_bump(&self, n: u64) -> bool {
        let before = self.bumps.fetch_add(n, Ordering::Relaxed);
        let crossed =
            (before + n) / WRAP_GUARD_INTERVAL != before / WRAP_GUARD_INTERVAL;
        if crossed {
            log::warn!("epoch wrap guard tripped after {} bumps", before + n);
        }
        crossed
    }
}

impl Default for EpochTable {
    fn default() -> Self {
        Self::new()
    }
}

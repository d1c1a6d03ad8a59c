// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! The per-CPU SPAM shard: hashed bucket arrays for the instruction and
//! data translation buffers, plus the epoch table that makes bulk
//! invalidation O(1).
//!
//! Only the owning CPU mutates a shard.  Other CPUs request invalidation
//! through the shootdown interconnect and the owner applies it here at an
//! instruction boundary, so every operation below takes `&self` and is
//! reader-safe but single-writer.

use core::sync::atomic::{AtomicU32, Ordering};

use axparch::pte::{GranularityHint, Pte};
use axparch::va::PAGE_SHIFT;

use crate::address::PhysAddr;
use crate::error::EmuError;
use crate::mm::bucket::{SpamBucket, TagProbe, TlbEntry};
use crate::mm::epoch::EpochTable;
use crate::types::Realm;

const TAG_VPN_MASK: u64 = (1 << 48) - 1;

/// VPN at the entry's granularity; sign-extension bits are folded into the
/// tag so insert and lookup agree without consulting the VA width.
fn tag_vpn(va: u64, size: GranularityHint) -> u64 {
    (va >> size.va_shift()) & TAG_VPN_MASK
}

/// A successful shard lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupHit {
    pub pa: PhysAddr,
    /// The PTE protection halfword captured at fill time.
    pub prot: u16,
    pub size: GranularityHint,
}

impl LookupHit {
    /// The protection image as a PTE value, for permission evaluation.
    pub fn pte_prot(&self) -> Pte {
        Pte::new(self.prot as u64)
    }
}

#[derive(Debug)]
struct BucketArray {
    buckets: Box<[SpamBucket]>,
    index_shift: u32,
}

impl BucketArray {
    fn new(buckets: usize, ways: usize) -> Self {
        assert!(buckets.is_power_of_two());
        let mut v = Vec::with_capacity(buckets);
        v.resize_with(buckets, || SpamBucket::new(ways));
        Self {
            buckets: v.into_boxed_slice(),
            index_shift: 64 - buckets.ilog2(),
        }
    }

    /// Fibonacci-hashed bucket index.  ASM entries hash without the ASN so
    /// they are reachable from any address space.
    fn bucket(&self, vpn: u64, asn: Option<u8>) -> &SpamBucket {
        if self.buckets.len() == 1 {
            return &self.buckets[0];
        }
        let mut key = vpn;
        if let Some(asn) = asn {
            key ^= (asn as u64) << 40;
        }
        let idx = (key.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> self.index_shift) as usize;
        &self.buckets[idx]
    }

    fn iter(&self) -> impl Iterator<Item = &SpamBucket> {
        self.buckets.iter()
    }
}

/// One CPU's software TLB.
#[derive(Debug)]
pub struct SpamShard {
    epochs: EpochTable,
    itb: BucketArray,
    dtb: BucketArray,
    evict_seed: AtomicU32,
}

impl SpamShard {
    pub fn new(buckets: usize, ways: usize) -> Self {
        Self {
            epochs: EpochTable::new(),
            itb: BucketArray::new(buckets, ways),
            dtb: BucketArray::new(buckets, ways),
            evict_seed: AtomicU32::new(0x1BADB002),
        }
    }

    pub fn epochs(&self) -> &EpochTable {
        &self.epochs
    }

    fn array(&self, realm: Realm) -> &BucketArray {
        match realm {
            Realm::Instruction => &self.itb,
            Realm::Data => &self.dtb,
        }
    }

    fn probe_at(&self, realm: Realm, va: u64, asn: u8, size: GranularityHint, global: bool) -> TagProbe {
        TagProbe {
            vpn: tag_vpn(va, size),
            size,
            realm,
            global,
            asn,
            asn_gen: self.epochs.current(realm, asn),
            global_gen: self.epochs.current_global(),
        }
    }

    /// Scans all four size classes and both tag shapes for a live entry
    /// translating `va` under `asn`.
    pub fn lookup(&self, realm: Realm, va: u64, asn: u8) -> Option<LookupHit> {
        let array = self.array(realm);
        for size in GranularityHint::ALL {
            for global in [false, true] {
                let probe = self.probe_at(realm, va, asn, size, global);
                let bucket = array.bucket(probe.vpn, (!global).then_some(asn));
                if let Some(entry) = bucket.find(&probe) {
                    let span = size.span();
                    let pa = ((entry.pfn << PAGE_SHIFT) & !(span - 1)) | (va & (span - 1));
                    return Some(LookupHit {
                        pa: PhysAddr::new(pa),
                        prot: entry.prot,
                        size,
                    });
                }
            }
        }
        None
    }

    /// TBCHK support: is any live entry present for `va` in `realm`?
    pub fn probe(&self, realm: Realm, va: u64, asn: u8) -> bool {
        self.lookup(realm, va, asn).is_some()
    }

    /// Fills an entry from a walked PTE, stamping both current generations.
    pub fn insert(&self, realm: Realm, va: u64, asn: u8, pte: Pte) -> Result<(), EmuError> {
        let size = pte.gh();
        let global = pte.is_global();
        let entry = TlbEntry {
            vpn: tag_vpn(va, size),
            size,
            realm,
            global,
            valid: true,
            transitioning: false,
            asn,
            pfn: pte.pfn(),
            prot: pte.raw() as u16,
            asn_gen: self.epochs.current(realm, asn),
            global_gen: self.epochs.current_global(),
        };
        let bucket = self.array(realm).bucket(entry.vpn, (!global).then_some(asn));
        if bucket.insert(&entry) {
            return Ok(());
        }
        // Full: reclaim epoch-dead slots for this ASN and retry once.
        bucket.sweep_dead_for_asn(realm, asn, entry.asn_gen);
        if bucket.insert(&entry) {
            return Ok(());
        }
        if bucket.evict_victim(self.next_rand()) && bucket.insert(&entry) {
            return Ok(());
        }
        log::error!(
            "spam: bucket exhausted inserting va {:#x} asn {} realm {:?}",
            va,
            asn,
            realm
        );
        Err(EmuError::TlbInsertionFailed)
    }

    /// TBIAP-for-one-ASN: retires `(realm, asn)` entries in O(1).
    pub fn invalidate_asn(&self, realm: Realm, asn: u8) {
        if self.epochs.bump_realm(realm, asn) {
            self.wrap_flush();
        }
    }

    /// Both realms at once (context-switch path).
    pub fn invalidate_asn_both(&self, asn: u8) {
        if self.epochs.bump_both(asn) {
            self.wrap_flush();
        }
    }

    /// TBIA for one realm: every ASN epoch is bumped and the ASM entries,
    /// which no epoch reaches, are swept explicitly.
    pub fn invalidate_all(&self, realm: Realm) {
        if self.epochs.bump_all_asns(realm) {
            self.wrap_flush();
            return;
        }
        for bucket in self.array(realm).iter() {
            bucket.sweep_globals(realm);
        }
    }

    /// TBIAP: one bump of the global epoch retires every non-ASM entry in
    /// both realms.
    pub fn invalidate_global(&self) {
        if self.epochs.bump_global() {
            self.wrap_flush();
        }
    }

    /// Per-realm TBIAP (the ITB_IAP/DTB_IAP write path): retires the
    /// realm's non-ASM entries, every ASN, leaving the other realm alone.
    pub fn invalidate_all_process(&self, realm: Realm) {
        if self.epochs.bump_all_asns(realm) {
            self.wrap_flush();
        }
    }

    /// TBIS for one realm: precise removal of whatever entry maps `va`,
    /// including ASM entries, at any granularity.
    pub fn invalidate_va(&self, realm: Realm, va: u64, asn: u8) {
        let array = self.array(realm);
        for size in GranularityHint::ALL {
            for global in [false, true] {
                let probe = self.probe_at(realm, va, asn, size, global);
                array
                    .bucket(probe.vpn, (!global).then_some(asn))
                    .invalidate_tag(&probe);
            }
        }
    }

    /// TBIS across both realms.
    pub fn invalidate_va_both(&self, va: u64, asn: u8) {
        self.invalidate_va(Realm::Instruction, va, asn);
        self.invalidate_va(Realm::Data, va, asn);
    }

    /// TBISI.
    pub fn invalidate_instruction_stream_va(&self, va: u64, asn: u8) {
        self.invalidate_va(Realm::Instruction, va, asn);
    }

    /// TBISD.
    pub fn invalidate_data_stream_va(&self, va: u64, asn: u8) {
        self.invalidate_va(Realm::Data, va, asn);
    }

    /// Slot reclamation for one ASN across the whole shard.
    pub fn sweep_dead_for_asn(&self, realm: Realm, asn: u8) {
        let cur = self.epochs.current(realm, asn);
        for bucket in self.array(realm).iter() {
            bucket.sweep_dead_for_asn(realm, asn, cur);
        }
    }

    /// Full flush: every counter advanced, every slot dropped.  Used by the
    /// epoch wrap guard and by shootdown-ring overflow recovery.
    pub fn wrap_flush(&self) {
        self.epochs.bump_everything();
        for bucket in self.itb.iter().chain(self.dtb.iter()) {
            bucket.clear();
        }
    }

    fn next_rand(&self) -> u32 {
        let mut x = self.evict_seed.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        if x == 0 {
            x = 0x9E37_79B9;
        }
        self.evict_seed.store(x, Ordering::Relaxed);
        x
    }
}

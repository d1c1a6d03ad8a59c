// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! The TLB-shootdown interconnect.
//!
//! Each CPU owns one bounded multi-producer/single-consumer ring of
//! [`ShootdownMsg`].  Senders enqueue with release ordering and raise the
//! target's CBox pending-event flag; the owner drains at instruction
//! boundaries with acquire ordering and applies each message to its own
//! shard.  When acknowledgement mode is on, each sender arms an
//! [`AckTracker`] and receivers count it down as they finish.
//!
//! A full ring never blocks the sender or drops an invalidation: the sender
//! sets the target's sticky flush-all flag instead, degrading that drain to
//! a full TLB flush.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::types::RealmSel;

/// The shootdown verbs, mirroring the TBI selector set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShootdownKind {
    /// Flush everything, ASM entries included.
    InvalidateAll,
    /// Flush all process-private (non-ASM) entries.
    InvalidateAllProcess,
    /// Flush one ASN's entries in the selected realm(s).
    InvalidateAsn,
    /// Flush one VA in the selected realm(s).
    InvalidateVa,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShootdownMsg {
    pub kind: ShootdownKind,
    pub realm: RealmSel,
    pub va: u64,
    pub asn: u8,
    /// CPU index of the sender, for acknowledgement routing.
    pub sender: u32,
    /// Whether the sender armed its tracker and is waiting.
    pub wants_ack: bool,
}

struct Slot {
    seq: AtomicUsize,
    msg: UnsafeCell<MaybeUninit<ShootdownMsg>>,
}

// SAFETY: slot payloads are only read or written by the thread that won the
// matching sequence-number handshake, which transfers ownership with
// release/acquire ordering.
unsafe impl Sync for Slot {}

/// Bounded MPSC ring (sequence-numbered slots).  Capacity must be a power
/// of two.
pub struct IpiRing {
    slots: Box<[Slot]>,
    mask: usize,
    /// Producer cursor, CAS-claimed.
    tail: AtomicUsize,
    /// Consumer cursor; single consumer, plain stores.
    head: AtomicUsize,
}

impl core::fmt::Debug for IpiRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IpiRing")
            .field("capacity", &self.slots.len())
            .finish()
    }
}

impl IpiRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                seq: AtomicUsize::new(i),
                msg: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }
        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            tail: AtomicUsize::new(0),
            head: AtomicUsize::new(0),
        }
    }

    /// Enqueues from any thread.  `Err` means the ring is full.
    pub fn push(&self, msg: ShootdownMsg) -> Result<(), ShootdownMsg> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[tail & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);

            if seq == tail {
                // Slot free at our position: claim it.
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS above granted this thread exclusive
                        // write access to the slot until the sequence store
                        // publishes it.
                        unsafe {
                            (*slot.msg.get()).write(msg);
                        }
                        slot.seq.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(_) => tail = self.tail.load(Ordering::Relaxed),
                }
            } else if (seq as isize).wrapping_sub(tail as isize) < 0 {
                // Lapped: the consumer has not freed this slot yet.
                return Err(msg);
            } else {
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeues on the owning CPU only.
    pub fn pop(&self) -> Option<ShootdownMsg> {
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[head & self.mask];
        let seq = slot.seq.load(Ordering::Acquire);
        if seq != head.wrapping_add(1) {
            return None;
        }
        // SAFETY: the sequence match proves the producer published this slot
        // and no other consumer exists.
        let msg = unsafe { (*slot.msg.get()).assume_init() };
        slot.seq
            .store(head.wrapping_add(self.mask + 1), Ordering::Release);
        self.head.store(head.wrapping_add(1), Ordering::Relaxed);
        Some(msg)
    }

    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        self.slots[head & self.mask].seq.load(Ordering::Acquire) != head.wrapping_add(1)
    }
}

/// Counts outstanding shootdown acknowledgements for one sender.
#[derive(Debug, Default)]
pub struct AckTracker {
    pending: AtomicU32,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one expected acknowledgement.  Called by the sender before the
    /// matching message is pushed, so a fast receiver cannot drive the
    /// count negative.
    pub fn expect_one(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Withdraws an expectation that was never posted (push raced with a
    /// full ring and the flush-all path took over).
    pub fn forget_one(&self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }

    /// Receiver side: one message fully applied.
    pub fn complete_one(&self) {
        self.pending.fetch_sub(1, Ordering::Release);
    }

    pub fn outstanding(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Spins until every receiver has acknowledged.  Logs once past the
    /// watchdog threshold but never gives up; correctness requires
    /// completion.
    pub fn wait(&self, sender: u32, watchdog_spins: u64) {
        let mut spins = 0u64;
        let mut warned = false;
        while self.outstanding() != 0 {
            core::hint::spin_loop();
            spins += 1;
            if !warned && spins >= watchdog_spins {
                warned = true;
                log::warn!(
                    "cpu{}: shootdown ack wait exceeded {} spins",
                    sender,
                    watchdog_spins
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RealmSel;

    fn msg(va: u64) -> ShootdownMsg {
        ShootdownMsg {
            kind: ShootdownKind::InvalidateVa,
            realm: RealmSel::Both,
            va,
            asn: 3,
            sender: 0,
            wants_ack: false,
        }
    }

    #[test]
    fn fifo_order() {
        let ring = IpiRing::new(8);
        for i in 0..5 {
            ring.push(msg(i)).unwrap();
        }
        for i in 0..5 {
            assert_eq!(ring.pop().unwrap().va, i);
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn reports_full() {
        let ring = IpiRing::new(2);
        ring.push(msg(0)).unwrap();
        ring.push(msg(1)).unwrap();
        assert!(ring.push(msg(2)).is_err());
        assert_eq!(ring.pop().unwrap().va, 0);
        ring.push(msg(2)).unwrap();
        assert_eq!(ring.pop().unwrap().va, 1);
        assert_eq!(ring.pop().unwrap().va, 2);
    }

    #[test]
    fn wraps_many_times() {
        let ring = IpiRing::new(4);
        for round in 0..100u64 {
            ring.push(msg(round)).unwrap();
            assert_eq!(ring.pop().unwrap().va, round);
        }
    }

    #[test]
    fn concurrent_producers() {
        use std::sync::Arc;
        let ring = Arc::new(IpiRing::new(1024));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                for i in 0..128u64 {
                    loop {
                        if ring.push(msg(t * 1000 + i)).is_ok() {
                            break;
                        }
                        std::thread::yield_now();
                    }
                }
            }));
        }
        let mut seen = Vec::new();
        while seen.len() < 512 {
            if let Some(m) = ring.pop() {
                seen.push(m.va);
            } else {
                std::thread::yield_now();
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 512);
    }

    #[test]
    fn ack_tracker_counts_down() {
        let ack = AckTracker::new();
        ack.expect_one();
        ack.expect_one();
        assert_eq!(ack.outstanding(), 2);
        ack.complete_one();
        ack.forget_one();
        assert_eq!(ack.outstanding(), 0);
        ack.wait(0, 16);
    }
}

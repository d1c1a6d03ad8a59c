// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Central error types.  Nothing in the core unwinds: every failure is a
//! tagged value that either becomes a [`PendingEvent`](crate::PendingEvent)
//! or is reported to the caller as-is.

use core::fmt;

use crate::address::PhysAddr;
use crate::types::Realm;

/// Physical-memory access failures reported by a [`GuestMemory`]
/// implementation.
///
/// [`GuestMemory`]: crate::guestmem::GuestMemory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemError {
    /// The address (or the end of the access) lies outside backed memory.
    OutOfRange(PhysAddr),
    /// The device backing this range rejected the access.
    Rejected(PhysAddr),
}

/// Outcome classification for a failed translation.  The variants map 1:1
/// onto the PendingEvent classes the fault engine constructs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslateError {
    /// No live TLB entry; a page-table walk is required.
    TlbMiss(Realm),
    /// The mode's enable bit (or a mode gate such as kseg-from-user) denies
    /// the access.
    AccessViolation,
    FaultOnRead,
    FaultOnWrite,
    FaultOnExecute,
    /// Bits above the configured VA width do not sign-extend.
    NonCanonical,
    /// The access straddles its natural alignment.
    Unaligned,
    /// The physical-memory callback failed mid-walk.
    Bus(MemError),
}

impl From<MemError> for TranslateError {
    fn from(err: MemError) -> Self {
        Self::Bus(err)
    }
}

/// Top-level error for the core's host-facing APIs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmuError {
    Mem(MemError),
    Translate(TranslateError),
    /// IPR access from an insufficiently privileged mode, or to an index
    /// that does not exist in this direction.
    IllegalIpr,
    /// The shard stayed full after a sweep and an eviction attempt.
    TlbInsertionFailed,
    /// An ASN outside 0..=255 was supplied; no state was changed.
    InvalidAsn(u64),
}

impl From<MemError> for EmuError {
    fn from(err: MemError) -> Self {
        Self::Mem(err)
    }
}

impl From<TranslateError> for EmuError {
    fn from(err: TranslateError) -> Self {
        Self::Translate(err)
    }
}

impl fmt::Display for EmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mem(e) => write!(f, "physical memory error: {e:?}"),
            Self::Translate(e) => write!(f, "translation error: {e:?}"),
            Self::IllegalIpr => write!(f, "illegal IPR access"),
            Self::TlbInsertionFailed => write!(f, "TLB insertion failed"),
            Self::InvalidAsn(asn) => write!(f, "invalid ASN {asn:#x}"),
        }
    }
}

impl std::error::Error for EmuError {}

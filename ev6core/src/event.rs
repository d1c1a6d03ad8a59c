// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Architectural fault construction.
//!
//! The translation engine never delivers faults; it builds a
//! [`PendingEvent`] and hands it to the run loop's [`FaultSink`].  Delivery
//! (the jump into PALcode) happens later, at a point the run loop chooses,
//! possibly after coalescing several events raised in one cycle.

use axparch::pal::PalVector;

use crate::address::VirtAddr;
use crate::error::{MemError, TranslateError};
use crate::types::{AccessKind, Realm};

/// A fault or exception waiting for delivery into PALcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingEvent {
    MachineCheck {
        /// BIU/bus address when the check came from a memory error.
        addr: Option<VirtAddr>,
    },
    ItbMiss {
        va: VirtAddr,
    },
    DtbMiss {
        va: VirtAddr,
        access: AccessKind,
    },
    ItbAcv {
        va: VirtAddr,
    },
    DtbAcv {
        va: VirtAddr,
        access: AccessKind,
    },
    FaultOnRead {
        va: VirtAddr,
    },
    FaultOnWrite {
        va: VirtAddr,
    },
    FaultOnExecute {
        va: VirtAddr,
    },
    /// Non-canonical VA presented to the data stream.
    DtbFault {
        va: VirtAddr,
    },
    Unaligned {
        va: VirtAddr,
        access: AccessKind,
    },
    /// Reserved or privilege-violating instruction (including CALL_PAL
    /// misuse and illegal IPR access).
    Opcdec,
    /// Floating-point instruction with FEN clear.
    Fen,
    /// Arithmetic trap; the EXC_SUM image travels with the event.
    Arith {
        exc_sum: u64,
    },
    Interrupt,
}

impl PendingEvent {
    /// Coalescing priority: higher wins when several events arrive in the
    /// same cycle.
    pub fn priority(self) -> u8 {
        match self {
            Self::MachineCheck { .. } => 6,
            Self::ItbMiss { .. } | Self::DtbMiss { .. } => 5,
            Self::ItbAcv { .. } | Self::DtbAcv { .. } | Self::DtbFault { .. } => 4,
            Self::FaultOnRead { .. } | Self::FaultOnWrite { .. } | Self::FaultOnExecute { .. } => 3,
            Self::Unaligned { .. } => 2,
            Self::Opcdec | Self::Fen | Self::Arith { .. } => 1,
            Self::Interrupt => 0,
        }
    }

    /// The PAL entry this event vectors through.
    pub fn vector(self) -> PalVector {
        match self {
            Self::MachineCheck { .. } => PalVector::Mchk,
            Self::ItbMiss { .. } => PalVector::ItbMiss,
            Self::DtbMiss { .. } => PalVector::DtbMiss,
            Self::ItbAcv { .. } => PalVector::ItbAcv,
            Self::DtbAcv { .. } => PalVector::DtbAcv,
            // FOE is an instruction-stream fault; FOR/FOW and non-canonical
            // VAs take the data fault vector.
            Self::FaultOnExecute { .. } => PalVector::ItbAcv,
            Self::FaultOnRead { .. } | Self::FaultOnWrite { .. } | Self::DtbFault { .. } => {
                PalVector::DtbFault
            }
            Self::Unaligned { .. } => PalVector::Unalign,
            Self::Opcdec => PalVector::Opcdec,
            Self::Fen => PalVector::Fen,
            Self::Arith { .. } => PalVector::Arith,
            Self::Interrupt => PalVector::Interrupt,
        }
    }

    /// Builds the event matching a failed translation.
    pub fn from_translate_error(
        err: TranslateError,
        va: VirtAddr,
        realm: Realm,
        access: AccessKind,
    ) -> Self {
        match err {
            TranslateError::TlbMiss(Realm::Instruction) => Self::ItbMiss { va },
            TranslateError::TlbMiss(Realm::Data) => Self::DtbMiss { va, access },
            TranslateError::AccessViolation => match realm {
                Realm::Instruction => Self::ItbAcv { va },
                Realm::Data => Self::DtbAcv { va, access },
            },
            TranslateError::FaultOnRead => Self::FaultOnRead { va },
            TranslateError::FaultOnWrite => Self::FaultOnWrite { va },
            TranslateError::FaultOnExecute => Self::FaultOnExecute { va },
            TranslateError::NonCanonical => Self::DtbFault { va },
            TranslateError::Unaligned => Self::Unaligned { va, access },
            TranslateError::Bus(MemError::OutOfRange(pa) | MemError::Rejected(pa)) => {
                Self::MachineCheck {
                    addr: Some(VirtAddr::new(pa.bits())),
                }
            }
        }
    }
}

/// The run loop's fault queue.
pub trait FaultSink {
    fn set_pending(&mut self, event: PendingEvent);
}

/// Priority-coalescing sink: keeps the highest-priority event per cycle and
/// counts what it discarded.
#[derive(Debug, Default)]
pub struct EventQueue {
    current: Option<PendingEvent>,
    coalesced: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the pending event, if any.
    pub fn take(&mut self) -> Option<PendingEvent> {
        self.current.take()
    }

    pub fn peek(&self) -> Option<PendingEvent> {
        self.current
    }

    /// Number of events dropped in favour of higher-priority ones.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}

impl FaultSink for EventQueue {
    fn set_pending(&mut self, event: PendingEvent) {
        match self.current {
            Some(cur) if cur.priority() >= event.priority() => {
                self.coalesced += 1;
            }
            Some(_) => {
                self.coalesced += 1;
                self.current = Some(event);
            }
            None => self.current = Some(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_mapping() {
        let va = VirtAddr::new(0x2000);
        assert_eq!(PendingEvent::ItbMiss { va }.vector(), PalVector::ItbMiss);
        assert_eq!(
            PendingEvent::DtbMiss {
                va,
                access: AccessKind::Read
            }
            .vector(),
            PalVector::DtbMiss
        );
        assert_eq!(PendingEvent::FaultOnWrite { va }.vector(), PalVector::DtbFault);
        assert_eq!(
            PendingEvent::Unaligned {
                va,
                access: AccessKind::Write
            }
            .vector(),
            PalVector::Unalign
        );
    }

    #[test]
    fn queue_keeps_highest_priority() {
        let va = VirtAddr::new(0x4000);
        let mut q = EventQueue::new();
        q.set_pending(PendingEvent::Unaligned {
            va,
            access: AccessKind::Read,
        });
        q.set_pending(PendingEvent::MachineCheck { addr: None });
        q.set_pending(PendingEvent::DtbMiss {
            va,
            access: AccessKind::Read,
        });
        assert_eq!(q.take(), Some(PendingEvent::MachineCheck { addr: None }));
        assert_eq!(q.coalesced(), 2);
        assert_eq!(q.take(), None);
    }

    #[test]
    fn translate_error_classification() {
        let va = VirtAddr::new(0x6000);
        assert_eq!(
            PendingEvent::from_translate_error(
                TranslateError::TlbMiss(Realm::Data),
                va,
                Realm::Data,
                AccessKind::Write
            ),
            PendingEvent::DtbMiss {
                va,
                access: AccessKind::Write
            }
        );
        assert_eq!(
            PendingEvent::from_translate_error(
                TranslateError::AccessViolation,
                va,
                Realm::Instruction,
                AccessKind::Execute
            ),
            PendingEvent::ItbAcv { va }
        );
    }
}

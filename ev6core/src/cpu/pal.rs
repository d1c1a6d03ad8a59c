// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Native PALcode services: the TB miss handlers, CALL_PAL entry
//! computation, architectural fault delivery and the HWPCB context switch.
//!
//! The run loop vectors here instead of executing real PALcode for the
//! memory-management paths.  Faults are constructed, never delivered: every
//! failure becomes a [`PendingEvent`] for the sink and the run loop decides
//! when to take it.

use axparch::pal::{PalFunction, PalVector, TbiSelector};
use axparch::pte::{AccessKind, CpuMode};
use axparch::regs::MmStat;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::address::PhysAddr;
use crate::error::{EmuError, TranslateError};
use crate::event::{FaultSink, PendingEvent};
use crate::guestmem::GuestMemoryExt;
use crate::mm::translate::AccessRequest;
use crate::mm::walk::{classify_leaf, walk, WalkError};
use crate::types::{Realm, RealmSel};

use super::Cpu;

/// Loads the Mbox/Ibox fault-argument registers the way the hardware does
/// before vectoring: the faulting VA and an MM_STAT image describing the
/// access.
pub(super) fn load_fault_iprs(
    iprs: &mut super::ipr::IprFile,
    req: &AccessRequest,
    err: TranslateError,
) {
    iprs.va = req.va.bits();
    let stat = MmStat::new()
        .with_wr(req.access == AccessKind::Write)
        .with_acv(err == TranslateError::AccessViolation || err == TranslateError::NonCanonical)
        .with_fo_r(err == TranslateError::FaultOnRead)
        .with_fo_w(err == TranslateError::FaultOnWrite);
    iprs.load_mm_stat(stat);
}

impl Cpu {
    /// The DTB/ITB miss service (the work real PALcode does at the
    /// DTBMISS/ITBMISS vectors): walk the page tables for the faulting VA,
    /// refill the TLB on success, or construct the architectural fault.
    ///
    /// Returns true when the TLB was refilled and the faulting access can
    /// be replayed.
    pub fn service_tb_miss(
        &mut self,
        realm: Realm,
        va: u64,
        access: AccessKind,
        sink: &mut dyn FaultSink,
    ) -> bool {
        let asn = self.iprs.asn();
        let mode = self.iprs.mode();
        let leaf = match walk(self.machine().memory(), self.iprs.ptbr, va) {
            Ok(ok) => ok,
            Err(err) => {
                self.post_walk_failure(realm, va, access, err, sink);
                return false;
            }
        };

        if let Err(err) = classify_leaf(leaf.pte, access, mode) {
            let event = PendingEvent::from_translate_error(
                err,
                crate::address::VirtAddr::new(va),
                realm,
                access,
            );
            load_fault_iprs(
                &mut self.iprs,
                &AccessRequest {
                    va: crate::address::VirtAddr::new(va),
                    realm,
                    access,
                    mode,
                    asn,
                    size: crate::types::AccessSize::Byte,
                },
                err,
            );
            sink.set_pending(event);
            return false;
        }

        match self.shared().spam.insert(realm, va, asn, leaf.pte) {
            Ok(()) => {
                if self.machine().config().coherent_insert {
                    // Optional coherent-fill mode: tell the peers about the
                    // VA we just mapped so stale entries cannot linger.  The
                    // freshly filled local entry is left alone.
                    self.broadcast(
                        super::ipi::ShootdownKind::InvalidateVa,
                        RealmSel::from(realm),
                        va,
                        asn,
                    );
                }
                true
            }
            Err(EmuError::TlbInsertionFailed) => {
                sink.set_pending(PendingEvent::MachineCheck { addr: None });
                false
            }
            Err(_) => false,
        }
    }

    fn post_walk_failure(
        &mut self,
        realm: Realm,
        va: u64,
        access: AccessKind,
        err: WalkError,
        sink: &mut dyn FaultSink,
    ) {
        let vaddr = crate::address::VirtAddr::new(va);
        self.iprs.va = va;
        let event = match err {
            // A missing level means the OS has not mapped the page: the
            // translation-not-valid fault.  The instruction stream has no
            // separate TNV vector, so it reports as an access fault.
            WalkError::Invalid { .. } => match realm {
                Realm::Instruction => PendingEvent::ItbAcv { va: vaddr },
                Realm::Data => PendingEvent::DtbFault { va: vaddr },
            },
            WalkError::Bus(e) => {
                self.iprs.biu_addr = va;
                log::error!(
                    "cpu{}: page-table walk hit a bus error at va {:#x}: {:?}",
                    self.index(),
                    va,
                    e
                );
                PendingEvent::MachineCheck { addr: Some(vaddr) }
            }
        };
        self.iprs.load_mm_stat(
            MmStat::new().with_wr(access == AccessKind::Write),
        );
        sink.set_pending(event);
    }

    /// CALL_PAL dispatch: privilege-checks the function field and computes
    /// the PALmode entry point.  `return_pc` is the PC of the instruction
    /// after the CALL_PAL; the linkage (with the prior PALmode flag in bit
    /// 0) is stashed in the R23 shadow.
    pub fn call_pal(&mut self, func: u8, return_pc: u64) -> Result<u64, PendingEvent> {
        let classified = PalFunction::classify(func);
        if matches!(classified, PalFunction::Privileged(_))
            && self.iprs.mode() != CpuMode::Kernel
        {
            return Err(PendingEvent::Opcdec);
        }
        let Some(entry) = classified.entry(self.iprs.pal_base()) else {
            return Err(PendingEvent::Opcdec);
        };
        let was_pal = self.iprs.pal_mode;
        self.iprs.shadow_r23 = (return_pc & !1) | u64::from(was_pal);
        self.iprs.pal_mode = true;
        Ok(entry)
    }

    /// The OSF tbi CALL_PAL body: selector in R16, VA in R17.
    pub fn tbi(&self, selector: i64, va: u64) {
        match TbiSelector::from_operand(selector) {
            Some(TbiSelector::Tbia) => self.tbia(),
            Some(TbiSelector::Tbiap) => self.tbiap(),
            Some(TbiSelector::Tbis) => self.tbis(RealmSel::Both, va),
            Some(TbiSelector::Tbisd) => self.tbis(RealmSel::Data, va),
            Some(TbiSelector::Tbisi) => self.tbis(RealmSel::Instruction, va),
            // Unrecognized selectors are architecturally a no-op.
            None => {}
        }
    }

    // --- Natively serviced OSF CALL_PAL bodies --------------------------
    //
    // The simple register-shuffling functions are emulated directly rather
    // than by running guest PALcode; the run loop moves the results into
    // the architectural registers.

    /// swpipl: returns the old IPL, installs the new one.
    pub fn osf_swpipl(&mut self, new_ipl: u8) -> u64 {
        let ps = self.iprs.ps();
        let old = ps.ipl();
        self.iprs.set_ps(ps.with_ipl(new_ipl & 0x1F));
        self.shared().cbox.set_ipl(new_ipl & 0x1F);
        old as u64
    }

    /// rdps: the current PS image.
    pub fn osf_rdps(&self) -> u64 {
        self.iprs.ps().into()
    }

    /// rdusp/wrusp: the user stack pointer, whatever the current mode.
    pub fn osf_rdusp(&self) -> u64 {
        self.iprs.sp[CpuMode::User as usize]
    }

    pub fn osf_wrusp(&mut self, usp: u64) {
        self.iprs.sp[CpuMode::User as usize] = usp;
    }

    /// rdunique/wrunique: the process unique value.
    pub fn osf_rdunique(&self) -> u64 {
        self.iprs.unique
    }

    pub fn osf_wrunique(&mut self, value: u64) {
        self.iprs.unique = value;
    }

    /// wrvptptr: installs the virtual page-table base.
    pub fn osf_wrvptptr(&mut self, vptb: u64) {
        self.iprs.vptb = vptb;
    }

    /// Delivers `event`: stamps EXC_ADDR, enters PALmode and returns the
    /// vector PC.  The caller (the run loop) transfers control there.
    pub fn deliver_event(&mut self, event: PendingEvent, faulting_pc: u64) -> u64 {
        self.iprs.exc_addr = faulting_pc;
        if let PendingEvent::Arith { exc_sum } = event {
            self.iprs.write_exc_sum(exc_sum);
        }
        if matches!(event, PendingEvent::MachineCheck { .. }) {
            self.iprs.mces |= 1; // machine check in progress
        }
        self.iprs.pal_mode = true;
        let vector = event.vector();
        log::debug!(
            "cpu{}: delivering {:?} via {:?}",
            self.index(),
            event,
            vector
        );
        vector.entry(self.iprs.pal_base())
    }

    /// The RESET entry PC.
    pub fn reset_entry(&self) -> u64 {
        PalVector::Reset.entry(self.iprs.pal_base())
    }

    /// OSF swpctx: saves the live context to the outgoing HWPCB, loads the
    /// incoming one and retargets the TLB.  Returns the previous PCBB.
    pub fn swap_context(&mut self, new_pcbb: u64) -> Result<u64, EmuError> {
        let mem = self.machine().memory();
        let old_pcbb = self.iprs.pcbb();

        if old_pcbb != 0 {
            let mut save = Hwpcb::default();
            save.ksp = self.iprs.sp[CpuMode::Kernel as usize];
            save.esp = self.iprs.sp[CpuMode::Executive as usize];
            save.ssp = self.iprs.sp[CpuMode::Supervisor as usize];
            save.usp = self.iprs.sp[CpuMode::User as usize];
            save.ptbr = self.iprs.ptbr;
            save.asn = self.iprs.asn() as u64;
            save.ast_state = self.shared().cbox.astsr() | (self.shared().cbox.asten() << 4);
            save.fen = u64::from(self.iprs.fen);
            save.cc = self.iprs.cc();
            save.unique = self.iprs.unique;
            mem.write_struct(PhysAddr::new(old_pcbb), &save)?;
        }

        let next: Hwpcb = mem.read_struct(PhysAddr::new(new_pcbb))?;
        self.iprs.set_asn(next.asn)?;
        self.iprs.set_pcbb(new_pcbb);
        self.iprs.sp[CpuMode::Kernel as usize] = next.ksp;
        self.iprs.sp[CpuMode::Executive as usize] = next.esp;
        self.iprs.sp[CpuMode::Supervisor as usize] = next.ssp;
        self.iprs.sp[CpuMode::User as usize] = next.usp;
        self.iprs.ptbr = next.ptbr;
        self.iprs.fen = next.fen & 1 != 0;
        self.iprs.unique = next.unique;
        let cbox = &self.shared().cbox;
        cbox.write_astrr(next.ast_state & 0xF);
        cbox.write_asten((next.ast_state >> 4) & 0xF);

        // Without ASNs every switch must retire the outgoing process's
        // translations; with them the ASN tag does the isolation.
        if !self.machine().config().asn_enabled {
            self.tbiap();
        }
        Ok(old_pcbb)
    }
}

/// The 128-byte hardware process control block, as PALcode lays it out in
/// guest memory.
#[derive(Clone, Copy, Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Hwpcb {
    pub ksp: u64,
    pub esp: u64,
    pub ssp: u64,
    pub usp: u64,
    /// Page frame of the root page table.
    pub ptbr: u64,
    pub asn: u64,
    /// ASTSR in 3:0, ASTEN in 7:4.
    pub ast_state: u64,
    pub fen: u64,
    pub cc: u64,
    pub unique: u64,
    /// PALcode scratch area.
    pub scratch: [u64; 6],
}

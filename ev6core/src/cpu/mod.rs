// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Per-CPU state and the operations the run loop drives: translation, IPR
//! access, the TBI family with its SMP broadcast, and the
//! instruction-boundary interconnect poll.

pub mod cbox;
pub mod ipi;
pub mod ipr;
pub mod pal;

use std::sync::Arc;

use axparch::pte::{CpuMode, Pte};
use axparch::regs::{index, HwIntClr, Iccsr, Pctx, isum, DTB_ASN_SHIFT, WHAMI_MASK};
use axparch::va::va_form;

use crate::address::PhysAddr;
use crate::config::TbchkScope;
use crate::error::{EmuError, TranslateError};
use crate::event::{FaultSink, PendingEvent};
use crate::machine::{CpuShared, Machine};
use crate::mm::translate::{translate, AccessRequest, Translation};
use crate::types::{Realm, RealmSel};

use ipi::{ShootdownKind, ShootdownMsg};
use ipr::IprFile;

/// The run-loop-owned view of one emulated CPU.  Lives on that CPU's host
/// thread; everything shared with other threads is reached through
/// [`Machine`].
#[derive(Debug)]
pub struct Cpu {
    index: usize,
    pub iprs: IprFile,
    machine: Arc<Machine>,
}

impl Cpu {
    pub(crate) fn new(index: usize, machine: Arc<Machine>) -> Self {
        Self {
            index,
            iprs: IprFile::new(),
            machine,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn shared(&self) -> &CpuShared {
        self.machine.shared(self.index)
    }

    /// WHAMI: the CPU number in bits 7:0.
    pub fn whami(&self) -> u64 {
        self.index as u64 & WHAMI_MASK
    }

    /// Fast-path translation against this CPU's shard and registers.
    pub fn translate(&self, req: &AccessRequest) -> Result<Translation, TranslateError> {
        translate(
            &self.shared().spam,
            self.machine.superpages(),
            self.iprs.va_width(),
            req,
        )
    }

    /// Translation for the run loop: a failure loads the fault IPRs,
    /// constructs the PendingEvent and hands it to the sink.
    pub fn translate_or_fault(
        &mut self,
        req: &AccessRequest,
        sink: &mut dyn FaultSink,
    ) -> Option<PhysAddr> {
        match self.translate(req) {
            Ok(t) => Some(t.pa),
            Err(err) => {
                pal::load_fault_iprs(&mut self.iprs, req, err);
                sink.set_pending(PendingEvent::from_translate_error(
                    err, req.va, req.realm, req.access,
                ));
                None
            }
        }
    }

    /// Builds a data-stream request that checks protection against
    /// DTB_ALTMODE instead of the live mode (the HW_LD/HW_ST ALT path
    /// PALcode uses to probe user buffers from kernel context).
    pub fn alt_mode_request(&self, va: u64, access: axparch::pte::AccessKind) -> AccessRequest {
        AccessRequest {
            va: crate::address::VirtAddr::new(va),
            realm: Realm::Data,
            access,
            mode: self.iprs.dtb_alt_mode,
            asn: self.iprs.asn(),
            size: crate::types::AccessSize::Quad,
        }
    }

    /// PTBR retarget outside a context switch.  The architectural hook
    /// applies: a new root table makes every cached translation on this CPU
    /// suspect, so both local buffers are flushed (no broadcast; peers have
    /// their own PTBR).
    pub fn write_ptbr(&mut self, pfn: u64) {
        self.iprs.ptbr = pfn;
        let spam = &self.shared().spam;
        spam.invalidate_all(Realm::Instruction);
        spam.invalidate_all(Realm::Data);
    }

    /// TBCHK: does any live entry translate `va`?  Scope per machine
    /// configuration.
    pub fn tbchk(&self, va: u64) -> bool {
        let spam = &self.shared().spam;
        let asn = self.iprs.asn();
        match self.machine.config().tbchk_scope {
            TbchkScope::BothRealms => {
                spam.probe(Realm::Data, va, asn) || spam.probe(Realm::Instruction, va, asn)
            }
            TbchkScope::DataOnly => spam.probe(Realm::Data, va, asn),
        }
    }

    // --- TBI family: local invalidation plus SMP broadcast -------------

    fn broadcast(&self, kind: ShootdownKind, realm: RealmSel, va: u64, asn: u8) {
        if self.machine.cpu_count() <= 1 {
            return;
        }
        let wants_ack = self.machine.config().ack_shootdowns;
        self.machine.broadcast_shootdown(
            self.index,
            ShootdownMsg {
                kind,
                realm,
                va,
                asn,
                sender: self.index as u32,
                wants_ack,
            },
        );
        if wants_ack {
            self.shared()
                .ack
                .wait(self.index as u32, self.machine.config().ack_watchdog_spins);
        }
    }

    /// TBIA: flush everything, everywhere.
    pub fn tbia(&self) {
        let spam = &self.shared().spam;
        spam.invalidate_all(Realm::Instruction);
        spam.invalidate_all(Realm::Data);
        self.broadcast(ShootdownKind::InvalidateAll, RealmSel::Both, 0, 0);
    }

    /// TBIAP: flush all process-private entries.
    pub fn tbiap(&self) {
        self.shared().spam.invalidate_global();
        self.broadcast(ShootdownKind::InvalidateAllProcess, RealmSel::Both, 0, 0);
    }

    /// TBIS/TBISD/TBISI: precise single-VA flush under the current ASN.
    pub fn tbis(&self, realm: RealmSel, va: u64) {
        let asn = self.iprs.asn();
        let spam = &self.shared().spam;
        if realm.covers(Realm::Instruction) {
            spam.invalidate_va(Realm::Instruction, va, asn);
        }
        if realm.covers(Realm::Data) {
            spam.invalidate_va(Realm::Data, va, asn);
        }
        self.broadcast(ShootdownKind::InvalidateVa, realm, va, asn);
    }

    /// ASN retirement (context-teardown path): O(1) locally, broadcast to
    /// peers.
    pub fn invalidate_asn(&self, realm: RealmSel, asn: u8) {
        let spam = &self.shared().spam;
        if realm.covers(Realm::Instruction) {
            spam.invalidate_asn(Realm::Instruction, asn);
        }
        if realm.covers(Realm::Data) {
            spam.invalidate_asn(Realm::Data, asn);
        }
        self.broadcast(ShootdownKind::InvalidateAsn, realm, 0, asn);
    }

    // --- Interconnect receive side -------------------------------------

    /// Instruction-boundary poll: drains shootdowns, surfaces machine
    /// checks and deliverable interrupts.  Cheap when nothing is pending
    /// (one acquire load).
    pub fn poll_interconnect(&mut self, sink: &mut dyn FaultSink) {
        let Some(word) = self.shared().cbox.take_pending_event() else {
            return;
        };

        if word.tb_flush_all() {
            // A sender found our ring full; coarsen to a full flush.
            self.shared().spam.wrap_flush();
        }
        while let Some(msg) = self.shared().ipi.pop() {
            self.apply_shootdown(msg);
        }

        if word.mchk_pending() {
            self.shared().cbox.clear_mchk_pending();
            sink.set_pending(PendingEvent::MachineCheck { addr: None });
        }
        // Software inter-processor doorbell (distinct from TLB shootdown).
        if self.shared().cbox.take_ipi_request() != 0 {
            sink.set_pending(PendingEvent::Interrupt);
        }
        if let Some(level) = self.pending_interrupt_level() {
            if level > self.iprs.ps().ipl() {
                sink.set_pending(PendingEvent::Interrupt);
            }
        }
    }

    fn apply_shootdown(&self, msg: ShootdownMsg) {
        let spam = &self.shared().spam;
        match msg.kind {
            ShootdownKind::InvalidateAll => {
                spam.invalidate_all(Realm::Instruction);
                spam.invalidate_all(Realm::Data);
            }
            ShootdownKind::InvalidateAllProcess => spam.invalidate_global(),
            ShootdownKind::InvalidateAsn => {
                if msg.realm.covers(Realm::Instruction) {
                    spam.invalidate_asn(Realm::Instruction, msg.asn);
                }
                if msg.realm.covers(Realm::Data) {
                    spam.invalidate_asn(Realm::Data, msg.asn);
                }
            }
            ShootdownKind::InvalidateVa => {
                if msg.realm.covers(Realm::Instruction) {
                    spam.invalidate_va(Realm::Instruction, msg.va, msg.asn);
                }
                if msg.realm.covers(Realm::Data) {
                    spam.invalidate_va(Realm::Data, msg.va, msg.asn);
                }
            }
        }
        if msg.wants_ack {
            self.machine.shared(msg.sender as usize).ack.complete_one();
        }
    }

    /// Highest interrupt priority level currently requesting service.
    /// Device interrupts are gated by IER; software levels are gated only
    /// by the IPL comparison the caller applies.
    fn pending_interrupt_level(&self) -> Option<u8> {
        let cbox = &self.shared().cbox;
        if cbox.irq_summary() & self.iprs.ier != 0 {
            return Some(20); // device interrupt band
        }
        let sisr = cbox.sisr() as u16;
        if sisr != 0 {
            return Some((15 - sisr.leading_zeros()) as u8);
        }
        if cbox.ctl().ast_pending() {
            return Some(2);
        }
        None
    }

    // --- HW_MFPR / HW_MTPR ----------------------------------------------

    fn check_ipr_privilege(&self) -> Result<(), EmuError> {
        if self.iprs.pal_mode || self.iprs.mode() == CpuMode::Kernel {
            Ok(())
        } else {
            Err(EmuError::IllegalIpr)
        }
    }

    pub fn mfpr(&self, idx: u16) -> Result<u64, EmuError> {
        self.check_ipr_privilege()?;
        let iprs = &self.iprs;
        let cbox = &self.shared().cbox;
        let value = match idx {
            index::ITB_PTE => axparch::pte::encode_itb_pte_read(iprs.itb_pte),
            index::EXC_ADDR => iprs.exc_addr,
            index::IVA_FORM => va_form(iprs.vptb, iprs.exc_addr, iprs.va_width()),
            index::VA => iprs.va,
            index::VA_FORM => va_form(iprs.vptb, iprs.va, iprs.va_width()),
            index::VA_CTL => iprs.va_ctl,
            index::CM => (iprs.mode() as u64) << 3,
            index::IER => iprs.ier,
            index::IER_CM => iprs.ier | ((iprs.mode() as u64) << 3),
            index::SIRR => cbox.sisr(),
            index::ISUM => cbox.irq_summary() | (cbox.sisr() << 3) | cbox.astsr(),
            index::EXC_SUM => iprs.exc_sum(),
            index::PAL_BASE => iprs.pal_base(),
            index::I_CTL => iprs.i_ctl,
            index::I_STAT => iprs.i_stat,
            index::MM_STAT => iprs.mm_stat().into(),
            index::M_CTL => iprs.m_ctl,
            index::DC_CTL => iprs.dc_ctl,
            index::DC_STAT => iprs.dc_stat,
            index::C_DATA => iprs.c_data,
            index::C_SHFT => iprs.c_shft,
            index::PCTX..=0x5F => u64::from(
                Pctx::new()
                    .with_asn(iprs.asn())
                    .with_fpe(iprs.fen)
                    .with_astrr(cbox.astrr() as u8)
                    .with_aster(cbox.asten() as u8),
            ),
            index::CC => iprs.cc(),
            _ => return Err(EmuError::IllegalIpr),
        };
        Ok(value)
    }

    pub fn mtpr(&mut self, idx: u16, value: u64) -> Result<(), EmuError> {
        self.check_ipr_privilege()?;
        match idx {
            // ITB fill sequence: the tag write stages the VA, the PTE write
            // commits the entry.
            index::ITB_TAG => self.iprs.itb_tag = value,
            index::ITB_PTE => {
                let pte = axparch::pte::decode_itb_pte_write(value);
                self.iprs.itb_pte = pte;
                let (va, asn) = (self.iprs.itb_tag, self.iprs.asn());
                self.shared().spam.insert(Realm::Instruction, va, asn, pte)?;
            }
            index::ITB_IAP => self.shared().spam.invalidate_all_process(Realm::Instruction),
            index::ITB_IA => self.shared().spam.invalidate_all(Realm::Instruction),
            index::ITB_IS => {
                let asn = self.iprs.asn();
                self.shared().spam.invalidate_va(Realm::Instruction, value, asn);
            }

            // DTB fill sequence, bank 0 and bank 1 aliases.
            index::DTB_TAG0 | index::DTB_TAG1 => self.iprs.dtb_tag0 = value,
            index::DTB_PTE0 | index::DTB_PTE1 => {
                let pte = Pte::new(value);
                let (va, asn) = (self.iprs.dtb_tag0, self.iprs.dtb_asn0);
                self.shared().spam.insert(Realm::Data, va, asn, pte)?;
            }
            index::DTB_ASN0 | index::DTB_ASN1 => {
                self.iprs.dtb_asn0 = (value >> DTB_ASN_SHIFT) as u8;
            }
            index::DTB_IAP => self.shared().spam.invalidate_all_process(Realm::Data),
            index::DTB_IA => self.shared().spam.invalidate_all(Realm::Data),
            index::DTB_IS0 | index::DTB_IS1 => {
                let asn = self.iprs.asn();
                self.shared().spam.invalidate_va(Realm::Data, value, asn);
            }
            index::DTB_ALTMODE => self.iprs.dtb_alt_mode = CpuMode::from_bits(value),

            index::CM => self.iprs.set_mode(CpuMode::from_bits(value >> 3)),
            index::IER => self.iprs.ier = value,
            index::IER_CM => {
                self.iprs.ier = value & !0x18;
                self.iprs.set_mode(CpuMode::from_bits(value >> 3));
            }
            index::SIRR => self.shared().cbox.write_sirr(value),
            index::HW_INT_CLR => self.write_hw_int_clr(value),
            index::EXC_SUM => self.iprs.write_exc_sum(value),
            index::PAL_BASE => self.iprs.set_pal_base(value),
            index::I_CTL => {
                self.iprs.i_ctl = value;
                // The VA_48 selection is mirrored so the translation path
                // only ever consults VA_CTL.
                self.iprs.va_ctl = (self.iprs.va_ctl & !2) | (value & 2);
            }
            index::VA_CTL => self.iprs.va_ctl = value,
            index::M_CTL => self.iprs.m_ctl = value,
            index::DC_CTL => self.iprs.dc_ctl = value,
            // Write-one-to-clear status registers.
            index::I_STAT => self.iprs.i_stat &= !value,
            index::DC_STAT => self.iprs.dc_stat &= !value,
            index::C_DATA => self.iprs.c_data = value,
            index::C_SHFT => self.iprs.c_shft = value,

            index::PCTX..=0x5F => {
                let pctx = Pctx::from(value);
                self.iprs.set_asn(pctx.asn() as u64)?;
                self.iprs.fen = pctx.fpe();
                self.iprs.iccsr = Iccsr::from(self.iprs.iccsr)
                    .with_fpe(pctx.fpe())
                    .with_asn(pctx.asn() & 0x3F)
                    .into();
                let cbox = &self.shared().cbox;
                cbox.write_astrr(pctx.astrr() as u64);
                cbox.write_asten(pctx.aster() as u64);
            }

            index::CC => self.iprs.write_cc(value),
            index::CC_CTL => self.iprs.write_cc_ctl(value),

            // Cache maintenance and sleep hooks: cache data is not
            // modelled, coherence is implicit.
            index::IC_FLUSH | index::IC_FLUSH_ASM | index::CLR_MAP | index::SLEEP
            | index::PCTR_CTL => {}

            _ => return Err(EmuError::IllegalIpr),
        }
        Ok(())
    }

    /// HW_INT_CLR: W1C bits retire interrupt-summary bits; MCHK_D toggles
    /// machine-check disable.
    fn write_hw_int_clr(&self, value: u64) {
        let clr = HwIntClr::from(value);
        let cbox = &self.shared().cbox;
        let mut bits = 0u64;
        if clr.sl() {
            bits |= isum::SL;
        }
        if clr.cr() {
            bits |= isum::CR;
        }
        if clr.pc0() {
            bits |= isum::PC0;
        }
        if clr.pc1() {
            bits |= isum::PC1;
        }
        if clr.pc2() {
            bits |= isum::PC2;
        }
        if bits != 0 {
            cbox.clear_interrupt(bits);
        }
        if clr.mchk_d() {
            cbox.toggle_mchk_disable();
        }
    }
}

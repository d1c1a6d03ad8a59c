// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! The CBox tier of the IPR bank: the only processor state other threads
//! may touch.  Interrupt sources, AST posters and shootdown senders flip
//! bits here with release ordering; the owning run loop reads them with
//! acquire ordering at instruction boundaries.  The struct is line-aligned
//! so cross-CPU traffic does not false-share with anything else.

use core::sync::atomic::{AtomicU64, Ordering};

use axparch::pte::CpuMode;
use axparch::regs::{ast_bit, CboxCtl, AST_MODE_MASK};

#[derive(Debug, Default)]
#[repr(align(128))]
pub struct CBox {
    /// Packed control word ([`CboxCtl`] layout).
    ctl: AtomicU64,
    /// ISUM-format pending-interrupt summary.
    irq_summary: AtomicU64,
    /// Raw doorbell words for inter-processor requests.
    ipi_request: AtomicU64,
    ipi_data: AtomicU64,
    /// AST request and enable masks (4-bit K/E/S/U each).
    astrr: AtomicU64,
    asten: AtomicU64,
    /// Software interrupt summary and request.
    sisr: AtomicU64,
    sirr: AtomicU64,
}

impl CBox {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_ctl(&self, f: impl Fn(CboxCtl) -> CboxCtl) -> CboxCtl {
        let mut cur = self.ctl.load(Ordering::Acquire);
        loop {
            let next = u64::from(f(CboxCtl::from(cur)));
            match self
                .ctl
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return CboxCtl::from(next),
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn ctl(&self) -> CboxCtl {
        CboxCtl::from(self.ctl.load(Ordering::Acquire))
    }

    /// Raises the pending-event master flag; called by any thread that has
    /// posted work for this CPU.
    pub fn raise_pending_event(&self) {
        self.update_ctl(|c| c.with_pending_event(true));
    }

    /// Consumes the master flag.  Returns the control word exactly as it
    /// was when the flags were cleared, so no sticky bit set by a racing
    /// sender can be dropped unobserved.
    pub fn take_pending_event(&self) -> Option<CboxCtl> {
        let mut cur = self.ctl.load(Ordering::Acquire);
        loop {
            let word = CboxCtl::from(cur);
            if !word.pending_event() {
                return None;
            }
            let next = u64::from(word.with_pending_event(false).with_tb_flush_all(false));
            match self
                .ctl
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(word),
                Err(observed) => cur = observed,
            }
        }
    }

    /// Marks the shootdown ring as overflowed; the owner's next drain must
    /// flush everything.
    pub fn mark_tb_flush_all(&self) {
        self.update_ctl(|c| c.with_tb_flush_all(true).with_pending_event(true));
    }

    pub fn set_ipl(&self, ipl: u8) {
        self.update_ctl(|c| c.with_ipl(ipl & 0x1F));
    }

    pub fn ipl(&self) -> u8 {
        self.ctl().ipl()
    }

    pub fn set_mchk_pending(&self) {
        self.update_ctl(|c| c.with_mchk_pending(true).with_pending_event(true));
    }

    pub fn clear_mchk_pending(&self) {
        self.update_ctl(|c| c.with_mchk_pending(false));
    }

    pub fn toggle_mchk_disable(&self) {
        self.update_ctl(|c| c.with_mchk_disable(!c.mchk_disable()));
    }

    /// Posts interrupt-summary bits (ISUM layout) and raises the master
    /// flag.
    pub fn post_interrupt(&self, bits: u64) {
        self.irq_summary.fetch_or(bits, Ordering::Release);
        self.raise_pending_event();
    }

    /// Retires interrupt-summary bits (HW_INT_CLR path).
    pub fn clear_interrupt(&self, bits: u64) {
        self.irq_summary.fetch_and(!bits, Ordering::Release);
    }

    pub fn irq_summary(&self) -> u64 {
        self.irq_summary.load(Ordering::Acquire)
    }

    /// Posts an AST request for `mode`.  The request becomes visible in
    /// ASTSR once the matching enable bit is set.
    pub fn post_ast(&self, mode: CpuMode) {
        self.astrr.fetch_or(ast_bit(mode), Ordering::Release);
        let deliverable = self.astrr.load(Ordering::Acquire)
            & self.asten.load(Ordering::Acquire)
            & AST_MODE_MASK;
        if deliverable != 0 {
            self.update_ctl(|c| c.with_ast_pending(true).with_pending_event(true));
        }
    }

    pub fn write_astrr(&self, value: u64) {
        self.astrr.store(value & AST_MODE_MASK, Ordering::Release);
        self.refresh_ast_pending();
    }

    pub fn write_asten(&self, value: u64) {
        self.asten.store(value & AST_MODE_MASK, Ordering::Release);
        self.refresh_ast_pending();
    }

    fn refresh_ast_pending(&self) {
        let deliverable = self.astrr.load(Ordering::Acquire)
            & self.asten.load(Ordering::Acquire)
            & AST_MODE_MASK;
        self.update_ctl(|c| {
            let c = c.with_ast_pending(deliverable != 0);
            if deliverable != 0 {
                c.with_pending_event(true)
            } else {
                c
            }
        });
    }

    pub fn astrr(&self) -> u64 {
        self.astrr.load(Ordering::Acquire) & AST_MODE_MASK
    }

    pub fn asten(&self) -> u64 {
        self.asten.load(Ordering::Acquire) & AST_MODE_MASK
    }

    /// ASTSR: the requests that are currently deliverable.
    pub fn astsr(&self) -> u64 {
        self.astrr() & self.asten()
    }

    /// Consumes one deliverable AST for `mode`, as the AST dispatch does.
    pub fn take_ast(&self, mode: CpuMode) -> bool {
        let bit = ast_bit(mode);
        let prev = self.astrr.fetch_and(!bit, Ordering::AcqRel);
        let taken = prev & bit != 0 && self.asten() & bit != 0;
        self.refresh_ast_pending();
        taken
    }

    /// SIRR write: request software interrupt levels 15:1.
    pub fn write_sirr(&self, value: u64) {
        let bits = value & 0xFFFE;
        self.sirr.store(bits, Ordering::Release);
        if bits != 0 {
            self.sisr.fetch_or(bits, Ordering::Release);
            self.raise_pending_event();
        }
    }

    pub fn sisr(&self) -> u64 {
        self.sisr.load(Ordering::Acquire)
    }

    pub fn clear_sisr(&self, bits: u64) {
        self.sisr.fetch_and(!bits, Ordering::Release);
    }

    pub fn write_ipi_request(&self, value: u64) {
        self.ipi_request.store(value, Ordering::Release);
        self.raise_pending_event();
    }

    pub fn take_ipi_request(&self) -> u64 {
        self.ipi_request.swap(0, Ordering::AcqRel)
    }

    pub fn write_ipi_data(&self, value: u64) {
        self.ipi_data.store(value, Ordering::Release);
    }

    pub fn ipi_data(&self) -> u64 {
        self.ipi_data.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_event_is_sticky_until_taken() {
        let cbox = CBox::new();
        assert!(cbox.take_pending_event().is_none());
        cbox.raise_pending_event();
        let word = cbox.take_pending_event().unwrap();
        assert!(word.pending_event());
        assert!(cbox.take_pending_event().is_none());
    }

    #[test]
    fn flush_all_travels_with_the_event() {
        let cbox = CBox::new();
        cbox.mark_tb_flush_all();
        let word = cbox.take_pending_event().unwrap();
        assert!(word.tb_flush_all());
        // Cleared along with the event.
        assert!(!cbox.ctl().tb_flush_all());
    }

    #[test]
    fn asts_need_both_request_and_enable() {
        let cbox = CBox::new();
        cbox.post_ast(CpuMode::User);
        assert_eq!(cbox.astsr(), 0);
        assert!(!cbox.ctl().ast_pending());

        cbox.write_asten(ast_bit(CpuMode::User));
        cbox.post_ast(CpuMode::User);
        assert_eq!(cbox.astsr(), ast_bit(CpuMode::User));
        assert!(cbox.ctl().ast_pending());

        assert!(cbox.take_ast(CpuMode::User));
        assert_eq!(cbox.astsr(), 0);
        assert!(!cbox.ctl().ast_pending());
    }

    #[test]
    fn interrupt_summary_accumulates() {
        let cbox = CBox::new();
        cbox.post_interrupt(1 << 31);
        cbox.post_interrupt(1 << 28);
        assert_eq!(cbox.irq_summary(), (1 << 31) | (1 << 28));
        cbox.clear_interrupt(1 << 31);
        assert_eq!(cbox.irq_summary(), 1 << 28);
    }

    #[test]
    fn sirr_posts_into_sisr() {
        let cbox = CBox::new();
        cbox.write_sirr(0x8006);
        assert_eq!(cbox.sisr(), 0x8006);
        cbox.clear_sisr(0x0006);
        assert_eq!(cbox.sisr(), 0x8000);
        // Bit 0 is never writable.
        cbox.write_sirr(0x1);
        assert_eq!(cbox.sisr(), 0x8000);
    }
}

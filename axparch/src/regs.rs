// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! EV6 internal processor register encodings.
//!
//! The index space is the HW_MFPR/HW_MTPR operand encoding of the 21264:
//! Ibox registers in 0x00..=0x1B, Mbox bank 0 at 0x20..=0x2C, the process
//! context block at 0x40..=0x5F, Mbox bank 1 at 0xA0..=0xA5 and the Cbox
//! window at 0xC0..=0xC4.  Packed layouts below are the fields PALcode
//! actually reads and writes; unlisted bits read as zero.

use bitfield_struct::bitfield;

use crate::pte::CpuMode;

/// HW_MFPR/HW_MTPR index values.
pub mod index {
    pub const ITB_TAG: u16 = 0x00;
    pub const ITB_PTE: u16 = 0x01;
    pub const ITB_IAP: u16 = 0x02;
    pub const ITB_IA: u16 = 0x03;
    pub const ITB_IS: u16 = 0x04;
    pub const EXC_ADDR: u16 = 0x06;
    pub const IVA_FORM: u16 = 0x07;
    pub const CM: u16 = 0x09;
    pub const IER: u16 = 0x0A;
    pub const IER_CM: u16 = 0x0B;
    pub const SIRR: u16 = 0x10;
    pub const ISUM: u16 = 0x11;
    pub const HW_INT_CLR: u16 = 0x12;
    pub const EXC_SUM: u16 = 0x13;
    pub const PAL_BASE: u16 = 0x14;
    pub const I_CTL: u16 = 0x15;
    pub const IC_FLUSH_ASM: u16 = 0x16;
    pub const IC_FLUSH: u16 = 0x17;
    pub const PCTR_CTL: u16 = 0x18;
    pub const CLR_MAP: u16 = 0x19;
    pub const I_STAT: u16 = 0x1A;
    pub const SLEEP: u16 = 0x1B;

    pub const DTB_TAG0: u16 = 0x20;
    pub const DTB_PTE0: u16 = 0x21;
    pub const DTB_IS0: u16 = 0x24;
    pub const DTB_ASN0: u16 = 0x25;
    pub const DTB_ALTMODE: u16 = 0x26;
    pub const MM_STAT: u16 = 0x27;
    pub const M_CTL: u16 = 0x28;
    pub const DC_CTL: u16 = 0x29;
    pub const DC_STAT: u16 = 0x2A;
    pub const C_DATA: u16 = 0x2B;
    pub const C_SHFT: u16 = 0x2C;

    pub const PCTX: u16 = 0x40;

    pub const DTB_TAG1: u16 = 0xA0;
    pub const DTB_PTE1: u16 = 0xA1;
    pub const DTB_IAP: u16 = 0xA2;
    pub const DTB_IA: u16 = 0xA3;
    pub const DTB_IS1: u16 = 0xA4;
    pub const DTB_ASN1: u16 = 0xA5;

    pub const CC: u16 = 0xC0;
    pub const CC_CTL: u16 = 0xC1;
    pub const VA: u16 = 0xC2;
    pub const VA_FORM: u16 = 0xC3;
    pub const VA_CTL: u16 = 0xC4;
}

/// ASN position in the DTB_ASN0/DTB_ASN1 write image.
pub const DTB_ASN_SHIFT: u32 = 56;

/// PAL_BASE must stay 16-byte aligned within the physical address space;
/// the low four bits of a write are silently dropped.
pub const PAL_BASE_MASK: u64 = crate::va::PA_MASK & !0xF;

/// PCBB carries a 128-byte-aligned physical address in bits 43:7.
pub const PCBB_MASK: u64 = 0x0000_0FFF_FFFF_FF80;

/// WHAMI carries the CPU number in bits 7:0.
pub const WHAMI_MASK: u64 = 0xFF;

/// Largest valid address space number (8-bit ASNs).
pub const MAX_ASN: u64 = 0xFF;

/// Per-mode AST masks (ASTRR/ASTER/ASTSR) keep one bit per mode in 3:0,
/// kernel in bit 0 through user in bit 3.
pub const AST_MODE_MASK: u64 = 0xF;

pub const fn ast_bit(mode: CpuMode) -> u64 {
    1 << mode as u32
}

#[bitfield(u64)]
pub struct VaCtl {
    pub b_endian: bool,
    pub va_48: bool,
    pub va_form_32: bool,
    #[bits(61)]
    rsvd_63_3: u64,
}

#[bitfield(u64)]
pub struct ICtl {
    pub spce: bool,
    pub va_48: bool,
    /// PAL shadow register enable.
    #[bits(2)]
    pub sde: u8,
    #[bits(2)]
    pub sbe: u8,
    #[bits(2)]
    pub bp_mode: u8,
    pub hwe: bool,
    pub sl_xmit: bool,
    pub sl_rcv: bool,
    #[bits(53)]
    rsvd_63_11: u64,
}

#[bitfield(u64)]
pub struct MCtl {
    rsvd_0: bool,
    /// Superpage enable for the data stream.
    #[bits(3)]
    pub spe: u8,
    #[bits(60)]
    rsvd_63_4: u64,
}

/// Memory-management fault summary, loaded on DTB miss and fault entries.
#[bitfield(u64)]
pub struct MmStat {
    pub wr: bool,
    pub acv: bool,
    pub fo_r: bool,
    pub fo_w: bool,
    #[bits(6)]
    pub opcode: u8,
    #[bits(5)]
    pub ra: u8,
    pub dc_tag_perr: bool,
    #[bits(48)]
    rsvd_63_16: u64,
}

/// Arithmetic exception summary.  The register accumulates across the
/// speculative window; bits 63:48 always replicate SET_IOV.
#[bitfield(u64)]
pub struct ExcSum {
    pub swc: bool,
    pub inv: bool,
    pub dze: bool,
    pub fov: bool,
    pub unf: bool,
    pub ine: bool,
    pub iov: bool,
    rsvd_7: bool,
    #[bits(5)]
    pub reg: u8,
    pub bad_iva: bool,
    #[bits(33)]
    rsvd_46_14: u64,
    pub set_iov_bit: bool,
    #[bits(16)]
    pub sext_set_iov: u16,
}

impl ExcSum {
    /// Applies the architectural write transform: bits 63:48 replicate the
    /// SET_IOV bit regardless of what the writer supplied there.
    pub const fn normalized(self) -> Self {
        let sext = if self.set_iov_bit() { 0xFFFF } else { 0 };
        self.with_sext_set_iov(sext)
    }
}

/// Write-1-to-clear interrupt clear register.  Each named bit retires the
/// matching interrupt-summary bit; MCHK_D toggles machine-check disable.
#[bitfield(u64)]
pub struct HwIntClr {
    #[bits(26)]
    rsvd_25_0: u64,
    pub mchk_d: bool,
    rsvd_27: bool,
    pub pc0: bool,
    pub pc1: bool,
    pub pc2: bool,
    pub cr: bool,
    pub sl: bool,
    #[bits(31)]
    rsvd_63_33: u64,
}

/// Interrupt-summary bit positions shared by ISUM and HW_INT_CLR.
pub mod isum {
    pub const PC0: u64 = 1 << 28;
    pub const PC1: u64 = 1 << 29;
    pub const PC2: u64 = 1 << 30;
    pub const CR: u64 = 1 << 31;
    pub const SL: u64 = 1 << 32;
    /// External device interrupts occupy 23:20 (IRQ lines 3:0).
    pub const EI_SHIFT: u32 = 20;
    pub const EI_MASK: u64 = 0xF << EI_SHIFT;
}

/// EV4-compatible ICCSR image; only the fields PALcode still consults.
#[bitfield(u64)]
pub struct Iccsr {
    #[bits(40)]
    rsvd_39_0: u64,
    pub fpe: bool,
    #[bits(6)]
    rsvd_46_41: u64,
    #[bits(6)]
    pub asn: u8,
    #[bits(11)]
    rsvd_63_53: u64,
}

/// Process-context register (the 0x40..0x5F block; low index bits select
/// which fields a write updates).
#[bitfield(u64)]
pub struct Pctx {
    rsvd_0: bool,
    pub ppce: bool,
    pub fpe: bool,
    #[bits(2)]
    rsvd_4_3: u64,
    #[bits(4)]
    pub aster: u8,
    #[bits(4)]
    pub astrr: u8,
    #[bits(26)]
    rsvd_38_13: u64,
    pub asn: u8,
    #[bits(17)]
    rsvd_63_47: u64,
}

/// The packed cross-thread control word: the bits an interrupt source or a
/// peer CPU may flip underneath the run loop.
#[bitfield(u64)]
pub struct CboxCtl {
    #[bits(5)]
    pub ipl: u8,
    /// Master flag: something is waiting at the next instruction boundary.
    pub pending_event: bool,
    pub mchk_pending: bool,
    pub ast_pending: bool,
    /// Sticky shootdown-ring overflow: drain must flush everything.
    pub tb_flush_all: bool,
    pub mchk_disable: bool,
    #[bits(54)]
    rsvd_63_10: u64,
}

/// Processor status: current mode in 25:24, IPL in 20:16.
#[bitfield(u64)]
pub struct Ps {
    #[bits(16)]
    rsvd_15_0: u64,
    #[bits(5)]
    pub ipl: u8,
    #[bits(3)]
    rsvd_23_21: u64,
    #[bits(2)]
    pub cm: CpuMode,
    #[bits(38)]
    rsvd_63_26: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exc_sum_sign_extension() {
        let raw = ExcSum::new().with_iov(true).with_set_iov_bit(true);
        let norm = raw.normalized();
        assert_eq!(u64::from(norm) >> 48, 0xFFFF);
        assert!(norm.iov());

        let cleared = ExcSum::from(u64::from(norm) & !(1 << 47)).normalized();
        assert_eq!(u64::from(cleared) >> 48, 0);
    }

    #[test]
    fn hw_int_clr_positions() {
        assert_eq!(u64::from(HwIntClr::new().with_sl(true)), 1 << 32);
        assert_eq!(u64::from(HwIntClr::new().with_cr(true)), 1 << 31);
        assert_eq!(u64::from(HwIntClr::new().with_pc2(true)), 1 << 30);
        assert_eq!(u64::from(HwIntClr::new().with_pc1(true)), 1 << 29);
        assert_eq!(u64::from(HwIntClr::new().with_pc0(true)), 1 << 28);
        assert_eq!(u64::from(HwIntClr::new().with_mchk_d(true)), 1 << 26);
    }

    #[test]
    fn pctx_fields() {
        let p = Pctx::new().with_asn(0x5A).with_fpe(true).with_astrr(0xF);
        assert_eq!(p.asn(), 0x5A);
        assert_eq!((u64::from(p) >> 39) & 0xFF, 0x5A);
        assert_eq!((u64::from(p) >> 9) & 0xF, 0xF);
    }

    #[test]
    fn ps_mode_field() {
        let ps = Ps::new().with_cm(CpuMode::User).with_ipl(31);
        assert_eq!((u64::from(ps) >> 24) & 3, 3);
        assert_eq!((u64::from(ps) >> 16) & 0x1F, 31);
        assert_eq!(ps.cm(), CpuMode::User);
    }

    #[test]
    fn pal_base_alignment_mask() {
        assert_eq!(0xFFFF_FFFF_FFFF_FFFFu64 & PAL_BASE_MASK, (1 << 44) - 16);
    }
}

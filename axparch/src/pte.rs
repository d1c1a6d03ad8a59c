// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Page-table entry encoding for the EV6.
//!
//! The architectural PTE is a single quadword:
//!
//! ```text
//!  63      52 51       32 31          16 15  12 11   8 7 6 5 4   3   2   1   0
//! +----------+-----------+--------------+------+------+-+---+-+---+---+---+---+
//! | reserved |    PFN    |  SW (opaque) | xWE  | xRE  |r|GH |r|ASM|FOE|FOW|FOR|V|
//! +----------+-----------+--------------+------+------+-+---+-+---+---+---+---+
//! ```
//!
//! Protection bits are per-mode (Kernel/Executive/Supervisor/User); the GH
//! field selects a 1/8/64/512-page translation granularity.  The layout is
//! guest-visible and must stay bit-exact, so all field access goes through
//! explicit shifts and masks rather than compiler-packed structures.

use bitflags::bitflags;

/// PFN field position and width (20 bits at 51:32).
pub const PTE_PFN_SHIFT: u32 = 32;
pub const PTE_PFN_MASK: u64 = 0xF_FFFF;

/// OS software field position and width (16 opaque bits at 31:16).
pub const PTE_SW_SHIFT: u32 = 16;
pub const PTE_SW_MASK: u64 = 0xFFFF;

/// GH field position and width.
pub const PTE_GH_SHIFT: u32 = 5;
pub const PTE_GH_MASK: u64 = 0x3;

bitflags! {
    /// The single-bit PTE fields.  GH is a two-bit field and is accessed
    /// through [`Pte::gh`] instead.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        const VALID = 1 << 0;
        const FOR = 1 << 1;
        const FOW = 1 << 2;
        const FOE = 1 << 3;
        const ASM = 1 << 4;
        const KRE = 1 << 8;
        const ERE = 1 << 9;
        const SRE = 1 << 10;
        const URE = 1 << 11;
        const KWE = 1 << 12;
        const EWE = 1 << 13;
        const SWE = 1 << 14;
        const UWE = 1 << 15;
    }
}

/// Granularity hint: the number of contiguous base pages this entry spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum GranularityHint {
    Page8K = 0,
    Page64K = 1,
    Page512K = 2,
    Page4M = 3,
}

impl GranularityHint {
    pub const ALL: [Self; 4] = [Self::Page8K, Self::Page64K, Self::Page512K, Self::Page4M];

    pub const fn from_bits(bits: u64) -> Self {
        match bits & PTE_GH_MASK {
            1 => Self::Page64K,
            2 => Self::Page512K,
            3 => Self::Page4M,
            _ => Self::Page8K,
        }
    }

    /// Number of base pages covered (1, 8, 64 or 512).
    pub const fn pages(self) -> u64 {
        1 << (3 * self as u32)
    }

    /// VA shift producing the VPN at this granularity.
    pub const fn va_shift(self) -> u32 {
        super::va::PAGE_SHIFT + 3 * self as u32
    }

    /// Byte span of one translation at this granularity.
    pub const fn span(self) -> u64 {
        1 << self.va_shift()
    }
}

/// Processor access modes, most privileged first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum CpuMode {
    Kernel = 0,
    Executive = 1,
    Supervisor = 2,
    User = 3,
}

impl CpuMode {
    pub const fn from_bits(bits: u64) -> Self {
        match bits & 3 {
            1 => Self::Executive,
            2 => Self::Supervisor,
            3 => Self::User,
            _ => Self::Kernel,
        }
    }

    pub const fn into_bits(self) -> u64 {
        self as u64
    }
}

/// The kind of memory access being checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

/// Outcome of a protection check against a PTE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    /// The access is permitted.
    Grant,
    /// A fault-on bit matching the access kind is set; the OS wants a trap
    /// even though the enable bit may grant the access.
    FaultOnRead,
    FaultOnWrite,
    FaultOnExecute,
    /// The mode's enable bit denies the access.
    Deny,
}

/// An architectural PTE quadword.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pte(u64);

impl Pte {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub const fn is_valid(self) -> bool {
        self.0 & PteFlags::VALID.bits() != 0
    }

    pub const fn is_global(self) -> bool {
        self.0 & PteFlags::ASM.bits() != 0
    }

    pub const fn gh(self) -> GranularityHint {
        GranularityHint::from_bits(self.0 >> PTE_GH_SHIFT)
    }

    pub const fn pfn(self) -> u64 {
        (self.0 >> PTE_PFN_SHIFT) & PTE_PFN_MASK
    }

    /// Base physical address of the mapped frame.
    pub const fn pa(self) -> u64 {
        self.pfn() << super::va::PAGE_SHIFT
    }

    /// The opaque OS software field.
    pub const fn software_bits(self) -> u64 {
        (self.0 >> PTE_SW_SHIFT) & PTE_SW_MASK
    }

    pub const fn with_pfn(self, pfn: u64) -> Self {
        let cleared = self.0 & !(PTE_PFN_MASK << PTE_PFN_SHIFT);
        Self(cleared | ((pfn & PTE_PFN_MASK) << PTE_PFN_SHIFT))
    }

    /// Read-enable bit for `mode`.
    pub const fn read_enable(self, mode: CpuMode) -> bool {
        self.0 & (PteFlags::KRE.bits() << mode as u32) != 0
    }

    /// Write-enable bit for `mode`.
    pub const fn write_enable(self, mode: CpuMode) -> bool {
        self.0 & (PteFlags::KWE.bits() << mode as u32) != 0
    }

    /// Checks `access` from `mode` against this PTE.
    ///
    /// The fault-on bits are evaluated before the enable bits, so a set FOW
    /// reports `FaultOnWrite` even when the mode's write-enable would grant
    /// the store.  Execute requires the mode's read enable with FOE clear;
    /// there is no separate execute enable on Alpha.
    pub const fn check_access(self, access: AccessKind, mode: CpuMode) -> AccessDecision {
        let f = self.0;
        match access {
            AccessKind::Read => {
                if f & PteFlags::FOR.bits() != 0 {
                    AccessDecision::FaultOnRead
                } else if self.read_enable(mode) {
                    AccessDecision::Grant
                } else {
                    AccessDecision::Deny
                }
            }
            AccessKind::Write => {
                if f & PteFlags::FOW.bits() != 0 {
                    AccessDecision::FaultOnWrite
                } else if self.write_enable(mode) {
                    AccessDecision::Grant
                } else {
                    AccessDecision::Deny
                }
            }
            AccessKind::Execute => {
                if f & PteFlags::FOE.bits() != 0 {
                    AccessDecision::FaultOnExecute
                } else if self.read_enable(mode) {
                    AccessDecision::Grant
                } else {
                    AccessDecision::Deny
                }
            }
        }
    }
}

impl From<u64> for Pte {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Pte> for u64 {
    fn from(pte: Pte) -> Self {
        pte.0
    }
}

/// The subset of PTE fields carried by the ITB_PTE IPR image: ASM, GH, the
/// four read enables and the PFN.  Write enables are meaningless for the
/// instruction stream and the valid bit is implied by the fill itself.
pub const ITB_PTE_IMAGE_MASK: u64 = PteFlags::ASM.bits()
    | (PTE_GH_MASK << PTE_GH_SHIFT)
    | PteFlags::KRE.bits()
    | PteFlags::ERE.bits()
    | PteFlags::SRE.bits()
    | PteFlags::URE.bits()
    | (PTE_PFN_MASK << PTE_PFN_SHIFT);

/// Produces the ITB_PTE read image from an architectural PTE.
pub const fn encode_itb_pte_read(pte: Pte) -> u64 {
    pte.raw() & ITB_PTE_IMAGE_MASK
}

/// Reconstructs the architectural PTE fields from an ITB_PTE write image.
pub const fn decode_itb_pte_write(raw: u64) -> Pte {
    Pte::new(raw & ITB_PTE_IMAGE_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pte(bits: u64) -> Pte {
        Pte::new(bits)
    }

    #[test]
    fn field_extraction() {
        let p = pte((0x12345 << PTE_PFN_SHIFT) | (0xBEEF << PTE_SW_SHIFT) | 0x3F);
        assert_eq!(p.pfn(), 0x12345);
        assert_eq!(p.software_bits(), 0xBEEF);
        assert!(p.is_valid());
        assert!(p.is_global());
        assert_eq!(p.gh(), GranularityHint::Page64K);
        assert_eq!(p.pa(), 0x12345 << 13);
    }

    #[test]
    fn granularity_spans() {
        assert_eq!(GranularityHint::Page8K.pages(), 1);
        assert_eq!(GranularityHint::Page64K.pages(), 8);
        assert_eq!(GranularityHint::Page512K.pages(), 64);
        assert_eq!(GranularityHint::Page4M.pages(), 512);
        assert_eq!(GranularityHint::Page4M.span(), 512 * 8192);
    }

    #[test]
    fn per_mode_enables() {
        let p = pte(PteFlags::KRE.bits() | PteFlags::KWE.bits() | PteFlags::URE.bits());
        assert!(p.read_enable(CpuMode::Kernel));
        assert!(p.write_enable(CpuMode::Kernel));
        assert!(p.read_enable(CpuMode::User));
        assert!(!p.write_enable(CpuMode::User));
        assert!(!p.read_enable(CpuMode::Executive));
        assert!(!p.read_enable(CpuMode::Supervisor));
    }

    #[test]
    fn fault_on_precedes_enable() {
        // KWE granted but FOW set: the store must fault.
        let p = pte(PteFlags::KWE.bits() | PteFlags::FOW.bits() | PteFlags::VALID.bits());
        assert_eq!(
            p.check_access(AccessKind::Write, CpuMode::Kernel),
            AccessDecision::FaultOnWrite
        );
    }

    #[test]
    fn execute_uses_read_enable() {
        let p = pte(PteFlags::KRE.bits() | PteFlags::VALID.bits());
        assert_eq!(
            p.check_access(AccessKind::Execute, CpuMode::Kernel),
            AccessDecision::Grant
        );
        let foe = pte(PteFlags::KRE.bits() | PteFlags::FOE.bits());
        assert_eq!(
            foe.check_access(AccessKind::Execute, CpuMode::Kernel),
            AccessDecision::FaultOnExecute
        );
        let no_re = pte(PteFlags::KWE.bits());
        assert_eq!(
            no_re.check_access(AccessKind::Execute, CpuMode::Kernel),
            AccessDecision::Deny
        );
    }

    #[test]
    fn denied_modes_stay_denied() {
        // No enable bit grants an access for a mode whose bit is clear.
        let p = pte(PteFlags::KRE.bits() | PteFlags::KWE.bits() | PteFlags::VALID.bits());
        for mode in [CpuMode::Executive, CpuMode::Supervisor, CpuMode::User] {
            assert_eq!(p.check_access(AccessKind::Read, mode), AccessDecision::Deny);
            assert_eq!(p.check_access(AccessKind::Write, mode), AccessDecision::Deny);
        }
    }

    #[test]
    fn itb_image_round_trip() {
        let masked = pte(
            PteFlags::ASM.bits()
                | (3 << PTE_GH_SHIFT)
                | PteFlags::KRE.bits()
                | PteFlags::URE.bits()
                | (0xABCDE << PTE_PFN_SHIFT),
        );
        let image = encode_itb_pte_read(masked);
        assert_eq!(decode_itb_pte_write(image), masked);
    }

    #[test]
    fn itb_image_strips_non_carried_fields() {
        let p = pte(PteFlags::VALID.bits() | PteFlags::KWE.bits() | (0xFFFF << PTE_SW_SHIFT));
        assert_eq!(encode_itb_pte_read(p), 0);
    }
}

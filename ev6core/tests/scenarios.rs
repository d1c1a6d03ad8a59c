// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! End-to-end translation scenarios through the public machine API.

use std::sync::Arc;

use axparch::pte::{AccessKind, CpuMode, Pte, PteFlags, PTE_PFN_SHIFT};
use axparch::va::VaWidth;
use ev6core::mm::translate::{translate, AccessRequest, TranslationSource};
use ev6core::platform::SuperpageTable;
use ev6core::types::{Realm, RealmSel};
use ev6core::{
    DenseMemory, Machine, MachineConfig, PhysAddr, TranslateError, VirtAddr,
};

fn machine(cpus: usize) -> Arc<Machine> {
    let mem = Arc::new(DenseMemory::new(0x10_0000));
    Machine::new(MachineConfig::with_cpus(cpus), mem)
}

fn kernel_read(va: u64, asn: u8) -> AccessRequest {
    AccessRequest::data_read(VirtAddr::new(va), CpuMode::Kernel, asn)
}

fn pte(pfn: u64, flags: PteFlags) -> Pte {
    Pte::new((pfn << PTE_PFN_SHIFT) | flags.bits())
}

/// S1: kseg VAs map by identity for kernel mode, without touching the TLB.
#[test]
fn s1_kseg_translation() {
    let machine = machine(1);
    let cpu = machine.attach_cpu(0);
    let t = cpu.translate(&kernel_read(0xFFFF_FC00_0000_1000, 0)).unwrap();
    assert_eq!(t.pa, PhysAddr::new(0x0000_0C00_0000_1000));
    assert_eq!(t.source, TranslationSource::KSeg);

    // Any non-kernel mode faults instead of translating.
    for mode in [CpuMode::Executive, CpuMode::Supervisor, CpuMode::User] {
        let mut req = kernel_read(0xFFFF_FC00_0000_1000, 0);
        req.mode = mode;
        assert_eq!(cpu.translate(&req), Err(TranslateError::AccessViolation));
    }
}

/// S2: a DTB fill is visible to lookup with the PA recomposed from the PFN.
#[test]
fn s2_tlb_hit() {
    let machine = machine(1);
    let cpu = machine.attach_cpu(0);
    cpu.shared()
        .spam
        .insert(
            Realm::Data,
            0x2000,
            7,
            pte(0x12345, PteFlags::VALID | PteFlags::KRE),
        )
        .unwrap();
    let t = cpu.translate(&kernel_read(0x2000, 7)).unwrap();
    assert_eq!(t.pa, PhysAddr::new(0x2468_A000));
}

/// S3: after invalidate_asn the same lookup misses.
#[test]
fn s3_miss_after_asn_invalidation() {
    let machine = machine(1);
    let cpu = machine.attach_cpu(0);
    cpu.shared()
        .spam
        .insert(
            Realm::Data,
            0x2000,
            7,
            pte(0x12345, PteFlags::VALID | PteFlags::KRE),
        )
        .unwrap();
    cpu.invalidate_asn(RealmSel::Data, 7);
    assert_eq!(
        cpu.translate(&kernel_read(0x2000, 7)),
        Err(TranslateError::TlbMiss(Realm::Data))
    );
}

/// S4: ASM entries survive ASN invalidation and match any ASN.
#[test]
fn s4_global_survives_asn_invalidation() {
    let machine = machine(1);
    let cpu = machine.attach_cpu(0);
    cpu.shared()
        .spam
        .insert(
            Realm::Data,
            0x2000,
            7,
            pte(0x12345, PteFlags::VALID | PteFlags::KRE | PteFlags::ASM),
        )
        .unwrap();
    cpu.invalidate_asn(RealmSel::Data, 7);
    for asn in [0u8, 7, 255] {
        let t = cpu.translate(&kernel_read(0x2000, asn)).unwrap();
        assert_eq!(t.pa, PhysAddr::new(0x2468_A000));
    }
}

/// S5: FOW wins over a granting write enable.
#[test]
fn s5_fault_on_write() {
    let machine = machine(1);
    let cpu = machine.attach_cpu(0);
    cpu.shared()
        .spam
        .insert(
            Realm::Data,
            0x2000,
            7,
            pte(
                0x12345,
                PteFlags::VALID | PteFlags::KRE | PteFlags::KWE | PteFlags::FOW,
            ),
        )
        .unwrap();
    let req = AccessRequest::data_write(VirtAddr::new(0x2000), CpuMode::Kernel, 7);
    assert_eq!(cpu.translate(&req), Err(TranslateError::FaultOnWrite));
}

/// S6: a shootdown from CPU 0 reaches CPU 1 at its next instruction
/// boundary (single-threaded deterministic version; the threaded version
/// lives in the concurrency tests).
#[test]
fn s6_cross_cpu_shootdown() {
    let machine = machine(2);
    let cpu0 = machine.attach_cpu(0);
    let mut cpu1 = machine.attach_cpu(1);

    let p = pte(0x40, PteFlags::VALID | PteFlags::KRE);
    cpu0.shared().spam.insert(Realm::Data, 0x2000, 3, p).unwrap();
    cpu1.shared().spam.insert(Realm::Data, 0x2000, 3, p).unwrap();
    assert!(cpu1.translate(&kernel_read(0x2000, 3)).is_ok());

    cpu0.invalidate_asn(RealmSel::Data, 3);

    // CPU 1 has not polled yet; its entry is still live.
    assert!(cpu1.translate(&kernel_read(0x2000, 3)).is_ok());

    let mut sink = ev6core::event::EventQueue::new();
    cpu1.poll_interconnect(&mut sink);
    assert_eq!(
        cpu1.translate(&kernel_read(0x2000, 3)),
        Err(TranslateError::TlbMiss(Realm::Data))
    );
    // CPU 0's own shard was invalidated immediately.
    assert_eq!(
        cpu0.translate(&kernel_read(0x2000, 3)),
        Err(TranslateError::TlbMiss(Realm::Data))
    );
}

/// Property 2 generalized: kseg identity across a spread of addresses and
/// both VA widths.
#[test]
fn kseg_identity_both_widths() {
    let shard = ev6core::mm::spam::SpamShard::new(16, 2);
    let superpages = SuperpageTable::none();
    for (width, kseg_base) in [
        (VaWidth::Bits43, 0xFFFF_FC00_0000_0000u64),
        (VaWidth::Bits48, 0xFFFF_8000_0000_0000u64),
    ] {
        for offset in [0u64, 0x2000, 0x7_FFFF_E000] {
            let va = kseg_base + offset;
            let req = AccessRequest::data_read(VirtAddr::new(va), CpuMode::Kernel, 0);
            let t = translate(&shard, &superpages, width, &req).unwrap();
            assert_eq!(t.pa.bits(), va & ((1 << 44) - 1));
        }
    }
}

/// Property 7: clearing a single enable bit denies exactly that mode and
/// access; no wider mode leaks through.
#[test]
fn p7_permission_monotonicity() {
    let machine = machine(1);
    let cpu = machine.attach_cpu(0);

    // User read+write only.
    cpu.shared()
        .spam
        .insert(
            Realm::Data,
            0x4000,
            1,
            pte(0x9, PteFlags::VALID | PteFlags::URE | PteFlags::UWE),
        )
        .unwrap();

    for (mode, expect_ok) in [
        (CpuMode::Kernel, false),
        (CpuMode::Executive, false),
        (CpuMode::Supervisor, false),
        (CpuMode::User, true),
    ] {
        let mut read = kernel_read(0x4000, 1);
        read.mode = mode;
        let mut write = AccessRequest::data_write(VirtAddr::new(0x4000), mode, 1);
        write.asn = 1;
        assert_eq!(cpu.translate(&read).is_ok(), expect_ok, "read as {mode:?}");
        assert_eq!(cpu.translate(&write).is_ok(), expect_ok, "write as {mode:?}");
    }
}

/// The coherent-insert option broadcasts a precise flush for filled VAs.
#[test]
fn coherent_insert_notifies_peers() {
    let mem = Arc::new(DenseMemory::new(0x10_0000));
    let mut config = MachineConfig::with_cpus(2);
    config.coherent_insert = true;
    let machine = Machine::new(config, mem);
    let mut cpu0 = machine.attach_cpu(0);
    let mut cpu1 = machine.attach_cpu(1);

    // CPU 1 holds a stale mapping for the VA CPU 0 is about to fill.
    cpu1.shared()
        .spam
        .insert(Realm::Data, 0x4000, 0, pte(0x1, PteFlags::VALID | PteFlags::KRE))
        .unwrap();

    // Wire a page table so CPU 0's miss service succeeds.
    let mem = machine.memory();
    let (l1, l2, l3) = (0x20000u64, 0x22000u64, 0x24000u64);
    let table = |pfn: u64| (pfn << PTE_PFN_SHIFT) | (PteFlags::VALID | PteFlags::KRE).bits();
    mem.write_quad(PhysAddr::new(l1 + axparch::va::l1_index(0x4000) * 8), table(l2 >> 13))
        .unwrap();
    mem.write_quad(PhysAddr::new(l2 + axparch::va::l2_index(0x4000) * 8), table(l3 >> 13))
        .unwrap();
    mem.write_quad(
        PhysAddr::new(l3 + axparch::va::l3_index(0x4000) * 8),
        (0x99u64 << PTE_PFN_SHIFT) | (PteFlags::VALID | PteFlags::KRE).bits(),
    )
    .unwrap();

    cpu0.iprs.ptbr = 0x10;
    let mut sink = ev6core::event::EventQueue::new();
    assert!(cpu0.service_tb_miss(Realm::Data, 0x4000, AccessKind::Read, &mut sink));

    cpu1.poll_interconnect(&mut sink);
    assert!(!cpu1.shared().spam.probe(Realm::Data, 0x4000, 0));
}

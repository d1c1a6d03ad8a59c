// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! The explicit system context: per-CPU shared-state arena, guest memory
//! handle and machine configuration.  There are no hidden globals; every
//! CPU finds its own and its peers' state through indices into this
//! structure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::MachineConfig;
use crate::cpu::cbox::CBox;
use crate::cpu::ipi::{AckTracker, IpiRing, ShootdownMsg};
use crate::cpu::Cpu;
use crate::guestmem::GuestMemory;
use crate::mm::spam::SpamShard;
use crate::platform::SuperpageTable;

/// Shootdown ring depth per CPU.
const IPI_RING_CAPACITY: usize = 64;

/// The cross-thread-visible state of one CPU.  The run-loop-owned remainder
/// (hot/cold IPRs) lives in [`Cpu`].
#[derive(Debug)]
pub struct CpuShared {
    pub cbox: CBox,
    pub spam: SpamShard,
    pub ipi: IpiRing,
    pub ack: AckTracker,
    attached: AtomicBool,
}

impl CpuShared {
    fn new(config: &MachineConfig) -> Self {
        Self {
            cbox: CBox::new(),
            spam: SpamShard::new(config.tlb_buckets, config.tlb_ways),
            ipi: IpiRing::new(IPI_RING_CAPACITY),
            ack: AckTracker::new(),
            attached: AtomicBool::new(false),
        }
    }
}

pub struct Machine {
    config: MachineConfig,
    shared: Box<[CpuShared]>,
    mem: Arc<dyn GuestMemory>,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("cpus", &self.shared.len())
            .finish()
    }
}

impl Machine {
    pub fn new(config: MachineConfig, mem: Arc<dyn GuestMemory>) -> Arc<Self> {
        assert!(config.cpus >= 1, "a machine needs at least one CPU");
        let mut shared = Vec::with_capacity(config.cpus);
        for _ in 0..config.cpus {
            shared.push(CpuShared::new(&config));
        }
        log::info!(
            "machine: {} cpu(s), {}x{}-way TLB shards",
            config.cpus,
            config.tlb_buckets,
            config.tlb_ways
        );
        Arc::new(Self {
            config,
            shared: shared.into_boxed_slice(),
            mem,
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn superpages(&self) -> &SuperpageTable {
        &self.config.superpages
    }

    pub fn cpu_count(&self) -> usize {
        self.shared.len()
    }

    pub fn shared(&self, cpu: usize) -> &CpuShared {
        &self.shared[cpu]
    }

    pub fn memory(&self) -> &dyn GuestMemory {
        &*self.mem
    }

    /// Creates the run-loop view of CPU `index`.  Each CPU may be attached
    /// once; the returned [`Cpu`] is moved onto that CPU's host thread.
    pub fn attach_cpu(self: &Arc<Self>, index: usize) -> Cpu {
        let was = self.shared[index].attached.swap(true, Ordering::AcqRel);
        assert!(!was, "cpu {index} attached twice");
        Cpu::new(index, Arc::clone(self))
    }

    /// Posts a software inter-processor interrupt to `target` (the WRIPIR
    /// path).  The doorbell word and payload land in the target's CBox and
    /// surface as an Interrupt event at its next instruction boundary.
    pub fn post_soft_ipi(&self, sender: usize, target: usize, data: u64) {
        let cbox = &self.shared[target].cbox;
        cbox.write_ipi_data(data);
        cbox.write_ipi_request(1 << sender);
    }

    /// F4 sender half: posts `msg` to every peer of `sender`, raising each
    /// peer's pending flag.  Ring overflow degrades the peer to a sticky
    /// full-flush instead of blocking or dropping.  Returns the number of
    /// peers that will acknowledge.
    pub(crate) fn broadcast_shootdown(&self, sender: usize, msg: ShootdownMsg) -> u32 {
        let mut acked = 0;
        for (index, peer) in self.shared.iter().enumerate() {
            if index == sender {
                continue;
            }
            if msg.wants_ack {
                self.shared[sender].ack.expect_one();
            }
            match peer.ipi.push(msg) {
                Ok(()) => {
                    if msg.wants_ack {
                        acked += 1;
                    }
                    peer.cbox.raise_pending_event();
                }
                Err(_) => {
                    if msg.wants_ack {
                        self.shared[sender].ack.forget_one();
                    }
                    log::warn!(
                        "cpu{sender}: shootdown ring full on cpu{index}, degrading to full flush"
                    );
                    peer.cbox.mark_tb_flush_all();
                }
            }
        }
        acked
    }
}

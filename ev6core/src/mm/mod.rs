// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2026 The AXP emulator project developers
//
// Author: Alex Moreau <amoreau@axp-emu.dev>

//! Virtual-memory translation: the SPAM software TLB, its generation-counter
//! invalidation machinery, the page-table walker and the fast-path
//! translation engine.

pub mod bucket;
pub mod epoch;
pub mod spam;
pub mod translate;
pub mod walk;

pub use epoch::EpochTable;
pub use spam::{LookupHit, SpamShard};
pub use translate::{translate, AccessRequest, Translation};
pub use walk::{classify_leaf, walk, WalkError, WalkOk};

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Broker maintenance jobs.

pub mod config_sync;
pub mod reaper;
pub mod request_gc;

pub use config_sync::spawn_config_sync;
pub use reaper::ReaperJob;
pub use request_gc::RequestGcJob;

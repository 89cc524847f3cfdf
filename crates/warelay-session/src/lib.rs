// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session supervision for the Warelay bridge: one platform client per
//! `(account, label)`, a unified normalized event stream, and the short-TTL
//! media cache.

pub mod media_cache;
pub mod supervisor;

pub use media_cache::{MediaCache, MediaKey};
pub use supervisor::{RunningSession, SessionSupervisor};

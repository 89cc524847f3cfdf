// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits that define Warelay's external collaborator boundaries.

pub mod identity;
pub mod media;
pub mod platform;
pub mod store;

// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock collaborators and shared scaffolding for Warelay tests.

pub mod harness;
pub mod mock_identity;
pub mod mock_media;
pub mod mock_platform;

pub use harness::temp_store;
pub use mock_identity::MockIdentity;
pub use mock_media::MockMedia;
pub use mock_platform::{MockPlatform, MockPlatformFactory, SentRecord};

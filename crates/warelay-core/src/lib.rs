// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core types, errors, and adapter traits for the Warelay bridge.
//!
//! Every other crate in the workspace depends on this one. It holds the
//! shared domain model (events, turns, policy views), the normalization
//! helpers, and the traits behind which the external collaborators live:
//! the chat-platform client, the document store, the identity provider,
//! and the media blob store.

pub mod error;
pub mod normalize;
pub mod paths;
pub mod traits;
pub mod types;

pub use error::WarelayError;
pub use traits::identity::{IdentityVerifier, VerifiedUser};
pub use traits::media::{InboundVoiceRef, MediaStore, SavedVoice};
pub use traits::platform::{
    ClientEvent, DownloadedMedia, MediaPayload, PlatformClient, PlatformFactory,
    PlatformMessage, SendOptions,
};
pub use traits::store::{DocChange, Document, DocumentStore, FieldFilter, TxDecision, TxFn};

// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WS gateway for the Warelay bridge: the per-subscriber filtered
//! live stream with live-updated ACL, plus the admin surface.

pub mod auth;
pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::WsHub;
pub use protocol::{ClientMessage, ServerMessage, SubscribeFilters, CLOSE_ACL_EMPTY};
pub use server::{router, start_server, GatewayState};

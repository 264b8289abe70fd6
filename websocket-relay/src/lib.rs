/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! WebSocket to TCP relay.
//!
//! Browser clients can only open WebSockets, while the upstream service (a
//! validator node) speaks a raw binary protocol over TCP. Every WebSocket
//! accepted on a relay route is paired with a freshly opened TCP connection to
//! that route's upstream, and bytes are copied both ways until either side goes
//! away.
//!
//! ```text
//!  browser ──ws──▶ [server] ──▶ RelaySession actor ◀──▶ TcpBridge ──tcp──▶ upstream
//!                     │
//!                     └── any other request ──▶ fallback redirect
//! ```

pub mod actors;
pub mod config;
pub mod constants;
pub mod error;
pub mod fallback;
pub mod messages;
pub mod metrics;
pub mod server;
pub mod upstream;

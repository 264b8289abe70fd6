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

//! Per-connection relay actors.
//!
//! A `RelaySession` owns the WebSocket side of one session and a `TcpBridge`
//! owns the upstream side; together they form the two copy loops.

pub mod relay_session;
pub mod session_state;
pub mod tcp_bridge;

pub use relay_session::{RelaySession, RouteSettings};
pub use session_state::SessionState;
pub use tcp_bridge::{PendingWrites, TcpBridge};

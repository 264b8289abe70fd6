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

use std::time::Duration;

/// Size of the buffer each upstream read is performed into. A single read
/// becomes a single binary WebSocket message.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// How long the writer task may keep flushing already-queued payloads to the
/// upstream once the session is closing.
pub const UPSTREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Client bytes that may wait for the upstream writer. Once reached, the
/// session stops reading from its WebSocket until the upstream catches up.
pub const MAX_PENDING_UPSTREAM_BYTES: usize = 1024 * 1024;

pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_ROUTE_PATH: &str = "/ton";
pub const DEFAULT_UPSTREAM_HOST: &str = "127.0.0.1";
pub const DEFAULT_UPSTREAM_PORT: u16 = 9999;
pub const DEFAULT_REDIRECT_URL: &str = "https://ton.madelineproto.xyz";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_000_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;

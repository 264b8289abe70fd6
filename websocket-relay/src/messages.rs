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

//! Messages exchanged between a relay session actor and its TCP bridge tasks.

use crate::error::{Direction, RelayError};
use actix::Message as ActixMessage;
use bytes::Bytes;

/// A chunk read from the upstream, to be sent as one binary WebSocket message.
#[derive(ActixMessage, Debug)]
#[rtype(result = "()")]
pub struct UpstreamChunk(pub Bytes);

/// One of the two copy loops has terminated.
#[derive(ActixMessage, Debug)]
#[rtype(result = "()")]
pub struct LoopFinished {
    pub direction: Direction,
    pub reason: RelayError,
}

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

//! Error taxonomy for relay sessions.
//!
//! Every variant is local to the session that produced it. None of them
//! reaches a sibling session or the acceptor; the only thing a WebSocket client
//! ever observes is the connection closing.

use std::fmt;
use std::io;
use std::time::Duration;

/// One of the two ends of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    WebSocket,
    Upstream,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::WebSocket => write!(f, "websocket"),
            Peer::Upstream => write!(f, "upstream"),
        }
    }
}

/// Direction of a copy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// WebSocket messages written to the upstream TCP connection.
    Inbound,
    /// Upstream TCP chunks sent as WebSocket binary messages.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "websocket->upstream"),
            Direction::Outbound => write!(f, "upstream->websocket"),
        }
    }
}

/// Failure to open the upstream TCP connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("{target} resolved to no addresses")]
    NoAddresses { target: String },
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("connecting to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a relay session ended.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream connect failed: {0}")]
    UpstreamConnect(#[from] ConnectError),
    #[error("{peer} read failed: {source}")]
    PeerRead {
        peer: Peer,
        #[source]
        source: BoxError,
    },
    #[error("{peer} write failed: {source}")]
    PeerWrite {
        peer: Peer,
        #[source]
        source: BoxError,
    },
    #[error("{0} closed the connection")]
    PeerClosed(Peer),
}

impl RelayError {
    pub fn read(peer: Peer, source: impl Into<BoxError>) -> Self {
        RelayError::PeerRead {
            peer,
            source: source.into(),
        }
    }

    pub fn write(peer: Peer, source: impl Into<BoxError>) -> Self {
        RelayError::PeerWrite {
            peer,
            source: source.into(),
        }
    }

    /// An orderly end-of-stream rather than a failure.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, RelayError::PeerClosed(_))
    }

    /// The peer the error was observed on.
    pub fn peer(&self) -> Peer {
        match self {
            RelayError::UpstreamConnect(_) => Peer::Upstream,
            RelayError::PeerRead { peer, .. }
            | RelayError::PeerWrite { peer, .. }
            | RelayError::PeerClosed(peer) => *peer,
        }
    }

    /// Short label used for the termination metric.
    pub fn cause(&self) -> &'static str {
        match self {
            RelayError::UpstreamConnect(_) => "upstream_connect",
            RelayError::PeerRead { .. } => "read_error",
            RelayError::PeerWrite { .. } => "write_error",
            RelayError::PeerClosed(_) => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_peer_closed_is_clean() {
        assert!(RelayError::PeerClosed(Peer::Upstream).is_clean_close());
        assert!(!RelayError::read(Peer::WebSocket, "protocol error").is_clean_close());
        assert!(!RelayError::write(
            Peer::Upstream,
            io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")
        )
        .is_clean_close());
    }

    #[test]
    fn connect_error_is_attributed_to_upstream() {
        let err: RelayError = ConnectError::NoAddresses {
            target: "nowhere:1".to_string(),
        }
        .into();
        assert_eq!(err.peer(), Peer::Upstream);
        assert_eq!(err.cause(), "upstream_connect");
        assert_eq!(
            err.to_string(),
            "upstream connect failed: nowhere:1 resolved to no addresses"
        );
    }

    #[test]
    fn display_names_the_peer() {
        let err = RelayError::write(
            Peer::Upstream,
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        );
        assert_eq!(err.to_string(), "upstream write failed: reset");
        assert_eq!(
            RelayError::PeerClosed(Peer::WebSocket).to_string(),
            "websocket closed the connection"
        );
    }
}

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

//! Upstream connector: opens one fresh TCP connection per relay session.
//!
//! No retries happen here. A failed connect is reported to the session, which
//! closes its WebSocket and never starts relaying.

use crate::error::ConnectError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Fixed host/port an upstream connection is opened to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
}

impl UpstreamTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    target: UpstreamTarget,
    timeout: Duration,
}

impl UpstreamConnector {
    pub fn new(target: UpstreamTarget, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Resolve the target and connect to the first address that accepts.
    ///
    /// The whole operation, resolution included, is bounded by the connect
    /// timeout.
    pub async fn connect(&self) -> Result<TcpStream, ConnectError> {
        match tokio::time::timeout(self.timeout, self.connect_inner()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout {
                target: self.target.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn connect_inner(&self) -> Result<TcpStream, ConnectError> {
        let target = self.target.to_string();
        let addrs = lookup_host((self.target.host.as_str(), self.target.port))
            .await
            .map_err(|source| ConnectError::Resolve {
                target: target.clone(),
                source,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    // Relayed traffic is latency sensitive request/response.
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} ({}) failed: {}", target, addr, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(source) => Err(ConnectError::Connect { target, source }),
            None => Err(ConnectError::NoAddresses { target }),
        }
    }
}

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

//! Relay Session Actor
//!
//! Owns the WebSocket side of one session and the `TcpBridge` holding the
//! upstream side. The actor is created the moment a handshake is accepted; it
//! opens the upstream connection before handling any WebSocket frame, then
//! copies traffic both ways until either direction ends. Whatever ends first,
//! `close_session` tears down both peers, exactly once.

use crate::actors::session_state::SessionState;
use crate::actors::tcp_bridge::{PendingWrites, TcpBridge};
use crate::error::{Direction, Peer, RelayError};
use crate::messages::{LoopFinished, UpstreamChunk};
use crate::metrics::{
    RELAY_BYTES_TOTAL, RELAY_SESSIONS_ACTIVE, RELAY_SESSIONS_TOTAL,
    RELAY_SESSION_TERMINATIONS_TOTAL,
};
use crate::upstream::UpstreamConnector;
use actix::{
    clock::Instant, Actor, ActorContext, ActorFutureExt, AsyncContext, Handler, Running,
    StreamHandler, WrapFuture,
};
use actix_http::ws::Item;
use actix_web_actors::ws::{self, WebsocketContext};
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a session needs to know about the route it was accepted on.
#[derive(Debug, Clone)]
pub struct RouteSettings {
    pub path: String,
    pub connector: UpstreamConnector,
    pub max_message_size: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

pub struct RelaySession {
    id: Uuid,
    route: Arc<RouteSettings>,
    state: SessionState,

    /// Upstream side; present only while relaying.
    bridge: Option<TcpBridge>,

    /// Client bytes not yet written upstream, shared with the acceptor's
    /// frame gate.
    pending: PendingWrites,

    /// Last time anything arrived from the client
    heartbeat: Instant,

    /// Fragmented message being reassembled
    fragments: Option<BytesMut>,

    /// Close reason sent by the client, echoed back when we close
    client_close: Option<ws::CloseReason>,
}

impl RelaySession {
    pub fn new(route: Arc<RouteSettings>, pending: PendingWrites) -> Self {
        RelaySession {
            id: Uuid::new_v4(),
            route,
            state: SessionState::Connecting,
            bridge: None,
            pending,
            heartbeat: Instant::now(),
            fragments: None,
            client_close: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            debug!("Session {}: {} -> {}", self.id, self.state, next);
            self.state = next;
        }
    }

    fn start_relaying(&mut self, stream: TcpStream, ctx: &mut WebsocketContext<Self>) {
        let addr = ctx.address();
        self.bridge = Some(TcpBridge::start(
            stream,
            self.id,
            self.pending.clone(),
            addr.clone().recipient(),
            addr.recipient(),
        ));
        self.transition(SessionState::Relaying);
        info!(
            "Session {}: relaying {} <-> {}",
            self.id,
            self.route.path,
            self.route.connector.target()
        );

        self.heartbeat = Instant::now();
        self.start_heartbeat(ctx);
    }

    /// Ping the client periodically and give up on it once it has been
    /// silent for longer than the client timeout.
    ///
    /// Frames are not read while the upstream is behind, so that time does
    /// not count as silence.
    fn start_heartbeat(&self, ctx: &mut WebsocketContext<Self>) {
        let client_timeout = self.route.client_timeout;
        ctx.run_interval(self.route.heartbeat_interval, move |act, ctx| {
            if act.pending.is_full() {
                act.heartbeat = Instant::now();
            }
            if Instant::now().duration_since(act.heartbeat) > client_timeout {
                let timed_out = io::Error::new(io::ErrorKind::TimedOut, "heartbeat timed out");
                act.close_session(
                    Some(Direction::Inbound),
                    RelayError::read(Peer::WebSocket, timed_out),
                    ctx,
                );
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Hand one complete client message to the upstream writer.
    fn forward_inbound(&mut self, payload: Bytes, ctx: &mut WebsocketContext<Self>) {
        if payload.is_empty() {
            return;
        }
        let Some(bridge) = self.bridge.as_ref() else {
            return;
        };
        let len = payload.len() as u64;
        match bridge.send(payload) {
            Ok(()) => RELAY_BYTES_TOTAL
                .with_label_values(&[&self.route.path, "inbound"])
                .inc_by(len),
            Err(reason) => self.close_session(Some(Direction::Inbound), reason, ctx),
        }
    }

    fn handle_continuation(&mut self, item: Item, ctx: &mut WebsocketContext<Self>) {
        let (data, last) = match item {
            Item::FirstText(data) | Item::FirstBinary(data) => {
                if self.fragments.is_some() {
                    let err = RelayError::read(
                        Peer::WebSocket,
                        "new fragmented message before the last one finished",
                    );
                    self.close_session(Some(Direction::Inbound), err, ctx);
                    return;
                }
                self.fragments = Some(BytesMut::new());
                (data, false)
            }
            Item::Continue(data) => (data, false),
            Item::Last(data) => (data, true),
        };

        let Some(buf) = self.fragments.as_mut() else {
            let err =
                RelayError::read(Peer::WebSocket, "continuation frame without a first frame");
            self.close_session(Some(Direction::Inbound), err, ctx);
            return;
        };
        if buf.len() + data.len() > self.route.max_message_size {
            let err = RelayError::read(
                Peer::WebSocket,
                format!(
                    "fragmented message exceeds {} bytes",
                    self.route.max_message_size
                ),
            );
            self.close_session(Some(Direction::Inbound), err, ctx);
            return;
        }
        buf.extend_from_slice(&data);

        if last {
            if let Some(message) = self.fragments.take() {
                self.forward_inbound(message.freeze(), ctx);
            }
        }
    }

    /// Tear the session down. Runs once; later calls are ignored.
    ///
    /// `direction` is the copy loop that ended, or `None` if relaying never
    /// started.
    fn close_session(
        &mut self,
        direction: Option<Direction>,
        reason: RelayError,
        ctx: &mut WebsocketContext<Self>,
    ) {
        if self.state.is_terminating() {
            debug!(
                "Session {}: already {}, ignoring: {}",
                self.id, self.state, reason
            );
            return;
        }

        if let Some(direction) = direction {
            warn!("Session {}: {} loop finished", self.id, direction);
        }
        if reason.is_clean_close() {
            info!("Session {}: closing, {}", self.id, reason);
        } else {
            error!("Session {}: closing, {}", self.id, reason);
        }
        RELAY_SESSION_TERMINATIONS_TOTAL
            .with_label_values(&[
                &self.route.path,
                reason.cause(),
                &reason.peer().to_string(),
            ])
            .inc();

        self.transition(SessionState::Closing);
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown();
        }

        let close_reason = self
            .client_close
            .take()
            .unwrap_or_else(|| close_reason_for(&reason));
        ctx.close(Some(close_reason));
        ctx.stop();
    }
}

/// Close frame sent to the client for a given termination cause.
pub fn close_reason_for(reason: &RelayError) -> ws::CloseReason {
    let (code, description) = match reason {
        RelayError::UpstreamConnect(_) => (ws::CloseCode::Error, "upstream unavailable"),
        RelayError::PeerClosed(Peer::Upstream) => (ws::CloseCode::Normal, "upstream closed"),
        RelayError::PeerClosed(Peer::WebSocket) => (ws::CloseCode::Normal, "closed"),
        RelayError::PeerRead {
            peer: Peer::WebSocket,
            ..
        } => (ws::CloseCode::Protocol, "websocket error"),
        RelayError::PeerRead { .. } | RelayError::PeerWrite { .. } => {
            (ws::CloseCode::Error, "upstream error")
        }
    };
    ws::CloseReason {
        code,
        description: Some(description.to_string()),
    }
}

// =============================================================================
// Actor Implementation
// =============================================================================

impl Actor for RelaySession {
    type Context = WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        RELAY_SESSIONS_ACTIVE.inc();
        RELAY_SESSIONS_TOTAL
            .with_label_values(&[&self.route.path])
            .inc();
        info!(
            "Session {}: accepted on {}, connecting to {}",
            self.id,
            self.route.path,
            self.route.connector.target()
        );

        // `wait` holds back WebSocket frames until the upstream is connected,
        // so nothing the client sends early is lost or reordered.
        let connector = self.route.connector.clone();
        ctx.wait(
            async move { connector.connect().await }
                .into_actor(self)
                .map(|result, act, ctx| match result {
                    Ok(stream) => act.start_relaying(stream, ctx),
                    Err(e) => act.close_session(None, RelayError::UpstreamConnect(e), ctx),
                }),
        );
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.transition(SessionState::Closing);
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown();
        }
        Running::Stop
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.transition(SessionState::Closed);
        RELAY_SESSIONS_ACTIVE.dec();
        info!("Session {}: closed", self.id);
    }
}

// =============================================================================
// Message Handlers
// =============================================================================

/// Outbound loop: one upstream chunk becomes one binary message.
impl Handler<UpstreamChunk> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: UpstreamChunk, ctx: &mut Self::Context) -> Self::Result {
        if self.state != SessionState::Relaying {
            return;
        }
        RELAY_BYTES_TOTAL
            .with_label_values(&[&self.route.path, "outbound"])
            .inc_by(msg.0.len() as u64);
        ctx.binary(msg.0);
    }
}

impl Handler<LoopFinished> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: LoopFinished, ctx: &mut Self::Context) -> Self::Result {
        self.close_session(Some(msg.direction), msg.reason, ctx);
    }
}

// =============================================================================
// WebSocket Stream Handler
// =============================================================================

/// Inbound loop: every client message is written to the upstream verbatim.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(err) => {
                self.close_session(
                    Some(Direction::Inbound),
                    RelayError::read(Peer::WebSocket, err),
                    ctx,
                );
                return;
            }
        };
        self.heartbeat = Instant::now();

        match msg {
            ws::Message::Binary(data) => self.forward_inbound(data, ctx),
            ws::Message::Text(text) => self.forward_inbound(text.into_bytes(), ctx),
            ws::Message::Continuation(item) => self.handle_continuation(item, ctx),
            ws::Message::Ping(msg) => ctx.pong(&msg),
            ws::Message::Pong(_) => {}
            ws::Message::Close(reason) => {
                self.client_close = reason;
                self.close_session(
                    Some(Direction::Inbound),
                    RelayError::PeerClosed(Peer::WebSocket),
                    ctx,
                );
            }
            ws::Message::Nop => {}
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        self.close_session(
            Some(Direction::Inbound),
            RelayError::PeerClosed(Peer::WebSocket),
            ctx,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;

    #[test]
    fn close_reasons_follow_the_cause() {
        let connect = RelayError::UpstreamConnect(ConnectError::NoAddresses {
            target: "x:1".to_string(),
        });
        assert_eq!(close_reason_for(&connect).code, ws::CloseCode::Error);

        let upstream_eof = RelayError::PeerClosed(Peer::Upstream);
        let reason = close_reason_for(&upstream_eof);
        assert_eq!(reason.code, ws::CloseCode::Normal);
        assert_eq!(reason.description.as_deref(), Some("upstream closed"));

        let protocol = RelayError::read(Peer::WebSocket, "bad frame");
        assert_eq!(close_reason_for(&protocol).code, ws::CloseCode::Protocol);

        let write = RelayError::write(
            Peer::Upstream,
            io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"),
        );
        assert_eq!(close_reason_for(&write).code, ws::CloseCode::Error);
    }

    #[test]
    fn new_session_starts_connecting() {
        let route = Arc::new(RouteSettings {
            path: "/ton".to_string(),
            connector: UpstreamConnector::new(
                crate::upstream::UpstreamTarget::new("127.0.0.1", 9999),
                Duration::from_secs(1),
            ),
            max_message_size: 1024,
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        });
        let a = RelaySession::new(route.clone(), PendingWrites::new(1024));
        let b = RelaySession::new(route, PendingWrites::new(1024));
        assert_eq!(a.state(), SessionState::Connecting);
        assert_ne!(a.id(), b.id());
    }
}

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

//! TCP Bridge
//!
//! Owns the upstream TCP connection of one relay session. The connection is
//! split into its read and write halves and each half is driven by its own
//! tokio task, so neither direction ever waits on the other.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          TcpBridge                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │   RelaySession ──send(Bytes)──▶ ┌──────────────┐             │
//! │   (websocket frames)            │ Writer Task  │──▶ upstream │
//! │                                 │  write_all   │             │
//! │                                 └──────────────┘             │
//! │                                 ┌──────────────┐             │
//! │   RelaySession ◀─UpstreamChunk──│ Reader Task  │◀── upstream │
//! │                                 │  read_buf    │             │
//! │                                 └──────────────┘             │
//! │   either task ends ──LoopFinished──▶ RelaySession            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Client payloads waiting for the writer are counted in `PendingWrites`; the
//! acceptor stops feeding WebSocket frames to the session while the count is at
//! its limit, so a stalled upstream stalls the client instead of the relay
//! buffering for it.
//!
//! Shutting the bridge down aborts the reader and lets the writer flush what
//! is already queued (bounded by `UPSTREAM_DRAIN_TIMEOUT`) before it closes
//! the write half. Dropping the bridge shuts it down.

use crate::constants::{READ_BUFFER_SIZE, UPSTREAM_DRAIN_TIMEOUT};
use crate::error::{Direction, Peer, RelayError};
use crate::messages::{LoopFinished, UpstreamChunk};
use actix::Recipient;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bytes handed to the upstream writer that have not been written yet.
#[derive(Debug, Clone)]
pub struct PendingWrites {
    inner: Arc<PendingInner>,
}

#[derive(Debug)]
struct PendingInner {
    bytes: AtomicUsize,
    limit: usize,
    drained: Notify,
}

impl PendingWrites {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(PendingInner {
                bytes: AtomicUsize::new(0),
                limit,
                drained: Notify::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.bytes.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.inner.limit
    }

    fn add(&self, n: usize) {
        self.inner.bytes.fetch_add(n, Ordering::AcqRel);
    }

    fn release(&self, n: usize) {
        self.inner.bytes.fetch_sub(n, Ordering::AcqRel);
        self.inner.drained.notify_waiters();
    }

    /// Resolves once the pending bytes are below the limit.
    pub async fn wait_for_room(&self) {
        loop {
            // Registered before the check so a release in between is not missed.
            let drained = self.inner.drained.notified();
            if !self.is_full() {
                return;
            }
            drained.await;
        }
    }
}

pub struct TcpBridge {
    session_id: Uuid,
    pending: PendingWrites,
    inbound_tx: Option<mpsc::UnboundedSender<Bytes>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl TcpBridge {
    /// Split `stream` and start both I/O tasks.
    ///
    /// Upstream chunks are delivered to `chunks` in read order; the end of
    /// either task is reported once to `finished`. Bytes passed to `send` are
    /// counted in `pending` until they have been written.
    pub fn start(
        stream: TcpStream,
        session_id: Uuid,
        pending: PendingWrites,
        chunks: Recipient<UpstreamChunk>,
        finished: Recipient<LoopFinished>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_upstream(
            read_half,
            session_id,
            chunks,
            finished.clone(),
        ));
        let writer = tokio::spawn(write_upstream(
            write_half,
            session_id,
            pending.clone(),
            inbound_rx,
            finished,
        ));

        Self {
            session_id,
            pending,
            inbound_tx: Some(inbound_tx),
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// Queue a payload for the upstream. Payloads are written in queue order.
    pub fn send(&self, payload: Bytes) -> Result<(), RelayError> {
        let tx = self
            .inbound_tx
            .as_ref()
            .ok_or_else(|| RelayError::write(Peer::Upstream, "bridge is shut down"))?;
        let len = payload.len();
        self.pending.add(len);
        tx.send(payload).map_err(|_| {
            self.pending.release(len);
            RelayError::write(Peer::Upstream, "upstream writer has stopped")
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.inbound_tx.is_none()
    }

    /// Release the upstream connection. Calling this more than once is a no-op.
    pub fn shutdown(&mut self) {
        if self.inbound_tx.take().is_none() {
            return;
        }
        debug!("Session {}: shutting down upstream bridge", self.session_id);

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let session_id = self.session_id;
                    handle.spawn(async move {
                        if tokio::time::timeout(UPSTREAM_DRAIN_TIMEOUT, &mut writer)
                            .await
                            .is_err()
                        {
                            warn!(
                                "Session {}: upstream did not drain within {:?}, aborting writer",
                                session_id, UPSTREAM_DRAIN_TIMEOUT
                            );
                            writer.abort();
                        }
                    });
                }
                Err(_) => writer.abort(),
            }
        }
    }
}

impl Drop for TcpBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Outbound loop: upstream bytes → session actor.
async fn read_upstream(
    mut read_half: OwnedReadHalf,
    session_id: Uuid,
    chunks: Recipient<UpstreamChunk>,
    finished: Recipient<LoopFinished>,
) {
    warn!("Session {}: entered {} loop", session_id, Direction::Outbound);
    let reason = loop {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        match read_half.read_buf(&mut buf).await {
            Ok(0) => break RelayError::PeerClosed(Peer::Upstream),
            Ok(_) => {
                // Awaiting the mailbox keeps chunks ordered and stops the loop
                // once the session actor is gone.
                if chunks.send(UpstreamChunk(buf.freeze())).await.is_err() {
                    break RelayError::PeerClosed(Peer::WebSocket);
                }
            }
            Err(e) => break RelayError::read(Peer::Upstream, e),
        }
    };
    warn!(
        "Session {}: exited {} loop: {}",
        session_id,
        Direction::Outbound,
        reason
    );
    finished.do_send(LoopFinished {
        direction: Direction::Outbound,
        reason,
    });
}

/// Inbound loop tail: queued WebSocket payloads → upstream.
async fn write_upstream(
    mut write_half: OwnedWriteHalf,
    session_id: Uuid,
    pending: PendingWrites,
    mut inbound_rx: mpsc::UnboundedReceiver<Bytes>,
    finished: Recipient<LoopFinished>,
) {
    warn!("Session {}: entered {} loop", session_id, Direction::Inbound);
    while let Some(payload) = inbound_rx.recv().await {
        let written = write_half.write_all(&payload).await;
        pending.release(payload.len());
        if let Err(e) = written {
            let reason = RelayError::write(Peer::Upstream, e);
            warn!(
                "Session {}: exited {} loop: {}",
                session_id,
                Direction::Inbound,
                reason
            );
            finished.do_send(LoopFinished {
                direction: Direction::Inbound,
                reason,
            });
            return;
        }
    }
    // Channel closed: the session is tearing down. Everything queued has been
    // written, so close our side of the stream.
    if let Err(e) = write_half.shutdown().await {
        debug!("Session {}: upstream shutdown failed: {}", session_id, e);
    }
    warn!("Session {}: exited {} loop", session_id, Direction::Inbound);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::{Actor, Context, Handler};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[derive(Debug)]
    enum Event {
        Chunk(Bytes),
        Finished(Direction, RelayError),
    }

    struct Collector {
        events: mpsc::UnboundedSender<Event>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<UpstreamChunk> for Collector {
        type Result = ();

        fn handle(&mut self, msg: UpstreamChunk, _ctx: &mut Self::Context) {
            let _ = self.events.send(Event::Chunk(msg.0));
        }
    }

    impl Handler<LoopFinished> for Collector {
        type Result = ();

        fn handle(&mut self, msg: LoopFinished, _ctx: &mut Self::Context) {
            let _ = self.events.send(Event::Finished(msg.direction, msg.reason));
        }
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    fn start_bridge(stream: TcpStream) -> (TcpBridge, mpsc::UnboundedReceiver<Event>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let collector = Collector { events: events_tx }.start();
        let bridge = TcpBridge::start(
            stream,
            Uuid::new_v4(),
            PendingWrites::new(1024),
            collector.clone().recipient(),
            collector.recipient(),
        );
        (bridge, events_rx)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for bridge event")
            .expect("collector stopped")
    }

    #[actix_rt::test]
    async fn forwards_upstream_bytes_then_reports_eof() {
        let (local, mut upstream) = connected_pair().await;
        let (_bridge, mut events) = start_bridge(local);

        upstream.write_all(b"PONG").await.unwrap();
        upstream.shutdown().await.unwrap();

        let mut received = Vec::new();
        loop {
            match next_event(&mut events).await {
                Event::Chunk(chunk) => received.extend_from_slice(&chunk),
                Event::Finished(direction, reason) => {
                    assert_eq!(direction, Direction::Outbound);
                    assert!(matches!(reason, RelayError::PeerClosed(Peer::Upstream)));
                    break;
                }
            }
        }
        assert_eq!(received, b"PONG");
    }

    #[actix_rt::test]
    async fn writes_payloads_in_order() {
        let (local, mut upstream) = connected_pair().await;
        let (bridge, _events) = start_bridge(local);

        let payloads: [&[u8]; 5] = [b"one", b"-", b"two", b"-", b"three"];
        for payload in payloads {
            bridge.send(Bytes::copy_from_slice(payload)).unwrap();
        }

        let mut buf = vec![0u8; b"one-two-three".len()];
        tokio::time::timeout(Duration::from_secs(5), upstream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf, b"one-two-three");
    }

    #[actix_rt::test]
    async fn shutdown_flushes_queue_and_closes_upstream() {
        let (local, mut upstream) = connected_pair().await;
        let (mut bridge, _events) = start_bridge(local);

        bridge.send(Bytes::from_static(b"last words")).unwrap();
        bridge.shutdown();
        bridge.shutdown();
        assert!(bridge.is_shut_down());
        assert!(bridge.send(Bytes::from_static(b"too late")).is_err());

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), upstream.read_to_end(&mut received))
            .await
            .expect("upstream was not closed")
            .unwrap();
        assert_eq!(received, b"last words");
    }

    #[actix_rt::test]
    async fn dropping_the_bridge_closes_upstream() {
        let (local, mut upstream) = connected_pair().await;
        let (bridge, _events) = start_bridge(local);
        drop(bridge);

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), upstream.read_to_end(&mut received))
            .await
            .expect("upstream was not closed")
            .unwrap();
        assert!(received.is_empty());
    }

    #[actix_rt::test]
    async fn pending_bytes_are_released_once_written() {
        let (local, mut upstream) = connected_pair().await;
        let (bridge, _events) = start_bridge(local);

        bridge.send(Bytes::from(vec![7u8; 4096])).unwrap();
        assert!(bridge.pending.is_full());

        let mut buf = vec![0u8; 4096];
        tokio::time::timeout(Duration::from_secs(5), upstream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), bridge.pending.wait_for_room())
            .await
            .expect("writer never released its pending bytes");
    }

    #[tokio::test]
    async fn wait_for_room_blocks_until_released() {
        let pending = PendingWrites::new(10);
        pending.add(10);
        assert!(pending.is_full());

        let waiter = tokio::spawn({
            let pending = pending.clone();
            async move { pending.wait_for_room().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pending.release(4);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter was not woken")
            .unwrap();
        assert_eq!(pending.len(), 6);

        pending.release(6);
        assert!(pending.is_empty());
    }
}

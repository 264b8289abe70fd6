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

//! Connection acceptor.
//!
//! Builds the actix-web server: one resource per configured relay route, each
//! accepting only `GET` WebSocket upgrades, and the fallback redirect for
//! everything else. Every accepted upgrade starts an independent
//! `RelaySession`; the only state shared between sessions is the immutable
//! per-route settings.

use crate::actors::{PendingWrites, RelaySession, RouteSettings};
use crate::config::RelayConfig;
use crate::constants::MAX_PENDING_UPSTREAM_BYTES;
use crate::fallback::{self, RedirectTarget};
use crate::metrics::metrics_handler;
use crate::upstream::UpstreamConnector;
use actix::{prelude::Stream, Actor, StreamHandler};
use actix_http::{
    error::PayloadError,
    ws::{Codec, Message, ProtocolError},
};
use actix_web::{
    dev::Server,
    guard::{self, GuardContext},
    http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL, UPGRADE},
    web::{self, Bytes},
    App, Error, HttpRequest, HttpResponse, HttpServer,
};
use actix_web_actors::ws::{handshake, WebsocketContext};
use futures::StreamExt;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, info};

/// A bound, not yet running, relay server.
pub struct RelayServer {
    pub server: Server,
    /// Addresses actually bound (useful when the config asked for port 0).
    pub addrs: Vec<SocketAddr>,
}

/// Bind every configured listen address. Fails if any of them cannot be bound.
pub fn build(config: &RelayConfig) -> io::Result<RelayServer> {
    let routes: Vec<web::Data<RouteSettings>> = config
        .routes
        .iter()
        .map(|route| {
            web::Data::new(RouteSettings {
                path: route.path.clone(),
                connector: UpstreamConnector::new(
                    route.upstream.clone(),
                    config.connect_timeout(),
                ),
                max_message_size: config.max_message_size,
                heartbeat_interval: config.heartbeat_interval(),
                client_timeout: config.client_timeout(),
            })
        })
        .collect();
    let redirect = web::Data::new(RedirectTarget::new(config.redirect_url.clone()));

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(redirect.clone())
            .configure(|cfg| relay_routes(cfg, &routes))
            .default_service(web::to(fallback::redirect))
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }
    for addr in &config.listen {
        server = server.bind(*addr)?;
        info!("Listening on {}", addr);
    }
    let addrs = server.addrs();

    Ok(RelayServer {
        server: server.run(),
        addrs,
    })
}

/// Separate listener exposing Prometheus metrics on `GET /metrics`.
pub fn build_metrics_server(addr: SocketAddr) -> io::Result<Server> {
    let server = HttpServer::new(|| App::new().route("/metrics", web::get().to(metrics_handler)))
        .workers(1)
        .bind(addr)?;
    info!("Serving metrics on {}", addr);
    Ok(server.run())
}

/// Register one resource per relay route.
///
/// A route only answers `GET` requests carrying `Upgrade: websocket`; anything
/// else on the same path gets the fallback redirect.
pub fn relay_routes(cfg: &mut web::ServiceConfig, routes: &[web::Data<RouteSettings>]) {
    for route in routes {
        cfg.service(
            web::resource(route.path.as_str())
                .app_data(route.clone())
                .route(
                    web::get()
                        .guard(guard::fn_guard(is_websocket_upgrade))
                        .to(relay_connect),
                )
                .default_service(web::to(fallback::redirect)),
        );
    }
}

fn is_websocket_upgrade(ctx: &GuardContext<'_>) -> bool {
    ctx.head()
        .headers()
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("websocket"))
        .unwrap_or(false)
}

/// First sub-protocol offered by the client, if any.
fn first_offered_protocol(req: &HttpRequest) -> Option<HeaderValue> {
    let offered = req.headers().get(SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    let first = offered.split(',').map(str::trim).find(|p| !p.is_empty())?;
    HeaderValue::from_str(first).ok()
}

fn start_with_codec<A, S>(
    actor: A,
    req: &HttpRequest,
    stream: S,
    codec: Codec,
) -> Result<HttpResponse, Error>
where
    A: Actor<Context = WebsocketContext<A>> + StreamHandler<Result<Message, ProtocolError>>,
    S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
{
    let mut res = handshake(req)?;
    // The handshake is accepted whatever the client asks for; echoing its
    // first sub-protocol keeps browsers that offer one from aborting.
    if let Some(protocol) = first_offered_protocol(req) {
        res.insert_header((SEC_WEBSOCKET_PROTOCOL, protocol));
    }
    Ok(res.streaming(WebsocketContext::with_codec(actor, stream, codec)))
}

/// Stop pulling request bytes (and so WebSocket frames) while the session's
/// upstream writer is at its pending limit.
fn throttled<S>(payload: S, pending: PendingWrites) -> impl Stream<Item = S::Item> + 'static
where
    S: Stream + 'static,
{
    let payload = Box::pin(payload);
    futures::stream::unfold((payload, pending), |(mut payload, pending)| async move {
        pending.wait_for_room().await;
        let item = payload.next().await?;
        Some((item, (payload, pending)))
    })
}

pub async fn relay_connect(
    req: HttpRequest,
    stream: web::Payload,
    route: web::Data<RouteSettings>,
) -> Result<HttpResponse, Error> {
    debug!(
        "WebSocket upgrade on {} from {:?}",
        route.path,
        req.peer_addr()
    );
    let codec = Codec::new().max_size(route.max_message_size);
    let pending = PendingWrites::new(MAX_PENDING_UPSTREAM_BYTES);
    let session = RelaySession::new(route.into_inner(), pending.clone());
    start_with_codec(session, &req, throttled(stream, pending), codec)
}

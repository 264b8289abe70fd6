use tracing::{error, info};
use ws_relay::config::RelayConfig;
use ws_relay::server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = RelayConfig::from_env_or_default()?;
    for route in &config.routes {
        info!("Relaying {} to {}", route.path, route.upstream);
    }

    if let Some(metrics_addr) = config.metrics_listen {
        let metrics = server::build_metrics_server(metrics_addr)?;
        actix_rt::spawn(async move {
            if let Err(e) = metrics.await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let relay = server::build(&config)?;
    info!("Started WebSocket relay on {:?}", relay.addrs);
    relay.server.await?;
    info!("Stopped WebSocket relay");
    Ok(())
}

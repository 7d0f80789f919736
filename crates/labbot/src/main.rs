mod app;
mod server;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use labbot_core::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    labbot_core::logging::init(&cfg.logger.level)?;
    info!(bot = %cfg.bot.name, "starting labbot");

    let app = app::build(&cfg).await?;

    let listener = TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.bind_addr))?;
    info!(addr = %cfg.server.bind_addr, "http api listening");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                on_signal.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    let shutdown = cancel.clone();
    axum::serve(listener, server::router(app.state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server failed")?;

    if let Err(e) = app.checkpointer.close().await {
        error!(error = %e, "failed to close checkpointer");
    }
    info!("labbot stopped");
    Ok(())
}

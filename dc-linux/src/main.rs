// IMS data-channel daemon: hosts the session engine behind a TCP socket bridge.

mod bridge;
mod config;

use std::path::PathBuf;

use anyhow::Context;
use dc_core::EngineContext;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_SEND_LABEL: &str = "adc_file";

/// Command-line options beyond the config file.
#[derive(Debug, Default)]
struct Args {
    send_file: Option<PathBuf>,
    label: Option<String>,
    to: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Option<Args>> {
    let mut out = Args::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("dc-linux {}", VERSION);
                return Ok(None);
            }
            "--send-file" => out.send_file = Some(it.next().context("--send-file needs a path")?.into()),
            "--label" => out.label = Some(it.next().context("--label needs a value")?),
            "--to" => out.to = Some(it.next().context("--to needs a number")?),
            other => anyhow::bail!("unknown argument {other:?}"),
        }
    }
    Ok(Some(out))
}

fn main() -> anyhow::Result<()> {
    let Some(args) = parse_args(std::env::args().skip(1))? else {
        return Ok(());
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    let ctx = EngineContext::new(cfg.engine_config()).with_catalog(cfg.catalog_store());
    tracing::info!(role = ?cfg.role, addr = %cfg.address(), cache_dir = %cfg.cache_dir.display(), "dc-linux starting");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let bridge = bridge::Bridge::new(ctx).await?;
        if let Some(path) = &args.send_file {
            let label = args.label.as_deref().unwrap_or(DEFAULT_SEND_LABEL);
            let to = args.to.as_deref().unwrap_or("");
            bridge.queue_file(path, label, &cfg.phone_number, to).await?;
        }
        let runner = tokio::spawn(bridge::run(bridge.clone(), cfg.role, cfg.address()));
        tokio::select! {
            res = runner => match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "bridge stopped"),
                Err(e) => tracing::error!(error = %e, "bridge task failed"),
            },
            res = shutdown_signal() => res?,
        }
        bridge.shutdown().await;
        tracing::info!("dc-linux stopped");
        Ok::<_, anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

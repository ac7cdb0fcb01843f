// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dd_livestream::QueryResponse;
use dd_livestream::config::load_config;
use log::{LevelFilter, info};
use tokio::signal::unix::{SignalKind, signal};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

mod cli;

use cli::Args;

/// Write one event as a JSON line on stdout.
fn write_event(event: &QueryResponse) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, event).context("Failed to serialize event")?;
    out.write_all(b"\n")?;
    out.flush().context("Failed to flush stdout")
}

/// Install the logger before the config is read. The logger passes every
/// record and the global max level does the filtering: `info` until the
/// configured level is applied.
fn init_logger() -> Result<()> {
    simple_logger::init_with_level(log::Level::Trace)?;
    log::set_max_level(LevelFilter::Info);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger()?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    let log_level = config.log_level()?;
    log::set_max_level(log_level.to_level_filter());
    info!(
        "dd-livestream starting (version {}, log level {log_level})",
        env!("CARGO_PKG_VERSION")
    );

    let dispatcher = config.dispatcher(Arc::new(args.variables()))?;
    let shutdown = CancellationToken::new();
    let reaper = config
        .idle_timeout()
        .map(|idle| dispatcher.spawn_reaper(config.reap_interval(), idle, shutdown.clone()));

    let mut events = dispatcher
        .query(&args.queries())
        .context("Failed to start query")?;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => write_event(&event)?,
                None => {
                    info!("all streams ended");
                    break;
                }
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                break;
            }
        }
    }

    if args.info {
        write_event(&dispatcher.available_streams())?;
    }

    shutdown.cancel();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    dispatcher.shutdown();
    info!("dd-livestream shutting down");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use log::{Level, log_enabled};

    #[test]
    fn test_logger_is_ready_before_config_and_follows_its_level() {
        init_logger().unwrap();
        assert!(log_enabled!(Level::Warn));
        assert!(log_enabled!(Level::Info));
        assert!(!log_enabled!(Level::Debug));

        log::set_max_level(Level::Debug.to_level_filter());
        assert!(log_enabled!(Level::Debug));

        log::set_max_level(Level::Error.to_level_filter());
        assert!(!log_enabled!(Level::Warn));
    }
}

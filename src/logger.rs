// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cfg!(debug_assertions) {
            "debug"
        } else {
            "info"
        })
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact();
    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);
    match tracing_journald::layer() {
        Ok(journald) => registry.with(journald).init(),
        Err(_) => registry.init(),
    }
    log_panics::init();

    info!("Version: {}", std::env!("CARGO_PKG_VERSION"));
    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use cgw::GatewayConfig;

#[tokio::main]
async fn main() {
    let config = GatewayConfig::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    if let Err(e) = cgw::run::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

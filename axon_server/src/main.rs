// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axon::api::{ApiServer, OpenAccess, PermissionOracle, TokenPermissions};
use axon::Axon;
use clap::{Arg, Command};
use tokio::io::AsyncReadExt;

use crate::config::{AuthConfig, Config};

pub mod config;
mod infra;
mod logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("axon_server")
        .arg(
            Arg::new("config")
                .short('c')
                .required(true)
                .value_name("FILE"),
        )
        .get_matches();

    let config_filename = matches.get_one::<String>("config").unwrap();
    let mut file = tokio::fs::File::open(config_filename).await?;
    let mut config_str = String::new();
    file.read_to_string(&mut config_str).await?;
    let config = Config::from_str(&config_str)?;
    config.validate()?;

    logging::setup_logging();
    log::info!("Axon server config: {config:?}");

    let axon = Axon::open(&config.base_path, config.axon_opts())?;

    // Setup infra endpoints.
    let mut shutdown_receiver =
        infra::setup_infra_endpoints(config.infra.clone().unwrap_or_default(), axon.clone())?;

    let oracle: Arc<dyn PermissionOracle> = match config.auth.clone().unwrap_or(AuthConfig::Open) {
        AuthConfig::Open => Arc::new(OpenAccess),
        AuthConfig::Tokens(tokens) => Arc::new(TokenPermissions::new(tokens)),
    };

    let address: SocketAddr = config.listen_address.parse()?;
    let server = ApiServer::new(axon.clone(), oracle);
    server
        .serve(address, async move {
            while shutdown_receiver.changed().await.is_ok() {}
        })
        .await;

    axon.flush().await?;
    log::info!("Axon server shut down cleanly.");

    Ok(())
}

// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::convert::Infallible;
use std::net::SocketAddr;

use axon::Axon;
use futures::FutureExt;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::runtime::Builder;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use warp::Filter;

use crate::config::InfraConfig;

/// Setup metrics collection and scraping endpoint.
fn setup_metrics_handler() -> Result<PrometheusHandle, String> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_boxed_recorder(Box::new(recorder))
        .map_err(|err| format!("Failed to install Prometheus metrics recorder: {err}"))?;
    Ok(handle)
}

/// Setup infra endpoints for use by devops systems: a health endpoint
/// reporting the axon's counter snapshot, and a Prometheus scrape endpoint.
///
/// Returns a `sync::watch` receiver that should be used by the API server
/// as a signal for when it should shut down, by looking for RecvError when
/// calling `.changed()`.
pub fn setup_infra_endpoints(config: InfraConfig, axon: Axon) -> Result<watch::Receiver<()>, String> {
    let metrics_handle = setup_metrics_handler()?;

    let metricsz_bind_addr: SocketAddr = config
        .metricsz_bind_addr
        .parse()
        .map_err(|err| format!("Failed to parse metricsz bind address: {err}"))?;

    let bind_addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|err| format!("Failed to parse infra bind address: {err}"))?;

    // Setup shutdown signal handler.
    let (shutdown_sender, shutdown_receiver) = watch::channel(());

    // Spawn a thread for all admin tasks to isolate them from the main event loop.
    std::thread::spawn(move || {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name("admin")
            .build()
            .expect("initialize admin event loop");

        runtime.block_on(async move {
            let mut sigint_stream = signal(SignalKind::interrupt())
                .map_err(|err| format!("Failed to create SIGINT handler: {err}"))
                .expect("attach SIGINT handler");
            let mut sigterm_stream = signal(SignalKind::terminate())
                .map_err(|err| format!("Failed to create SIGTERM handler: {err}"))
                .expect("attach SIGTERM handler");
            tokio::spawn(async move {
                futures::future::select(
                    sigint_stream.recv().boxed(),
                    sigterm_stream.recv().boxed(),
                )
                .await;
                log::info!("Received shutdown signal. Starting graceful shutdown ...");
                // This will cause all receivers to get RecvError when calling `.changed()`.
                drop(shutdown_sender);
            });

            // Setup health endpoint reporting the counter snapshot.
            let healthz = warp::path!("healthz").and(warp::get()).and_then(move || {
                let axon = axon.clone();
                async move {
                    let reply = match axon.metrics().await {
                        Ok(snapshot) => warp::reply::json(&serde_json::json!({
                            "status": "nominal",
                            "metrics": snapshot,
                        })),
                        Err(err) => warp::reply::json(&serde_json::json!({
                            "status": "failed",
                            "mesg": format!("{err}"),
                        })),
                    };
                    Ok::<_, Infallible>(reply)
                }
            });
            let server_fut = warp::serve(healthz).bind(bind_addr);

            // Build the handler to render the metrics.
            let metricsz = warp::path!("metricsz")
                .and(warp::get())
                .map(move || metrics_handle.render());
            let metrics_fut = warp::serve(metricsz).bind(metricsz_bind_addr);

            // Join on both admin servers.
            futures::future::join(server_fut, metrics_fut).await
        });
    });

    Ok(shutdown_receiver)
}

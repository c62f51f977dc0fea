// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use tracing_subscriber::filter::targets::Targets;
use tracing_subscriber::prelude::*;

/// Configure logging for the server binary.
pub fn setup_logging() {
    // Note: This cannot use `EnvFilter` because EnvFilter filters globally even if it only
    // used in a tracing stack!
    let filter_layer = {
        let directive = std::env::var("RUST_LOG")
            .ok()
            .unwrap_or_else(|| "info".to_owned());
        directive
            .parse::<Targets>()
            .expect("Failed to parse RUST_LOG")
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_filter(filter_layer);

    tracing_subscriber::registry().with(fmt_layer).init();
}

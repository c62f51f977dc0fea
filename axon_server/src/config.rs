// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::str::FromStr;

use axon::AxonOpts;
use serde::Deserialize;

/// Admin endpoints configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct InfraConfig {
    /// Bind address for the metricsz endpoint.
    #[serde(default = "default_metricsz_bind_addr")]
    pub metricsz_bind_addr: String,

    /// Bind address for the health endpoint.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for InfraConfig {
    fn default() -> Self {
        InfraConfig {
            metricsz_bind_addr: default_metricsz_bind_addr(),
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_metricsz_bind_addr() -> String {
    "0.0.0.0:8010".to_owned()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_owned()
}

/// Permission oracle configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthConfig {
    /// Every caller may perform every operation.
    Open,

    /// Bearer tokens mapped to the operation names they may perform.
    /// `"*"` allows everything.
    Tokens(HashMap<String, Vec<String>>),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// IP address and port on which to listen for API connections.
    pub listen_address: String,

    /// Directory under which the axon stores live.
    pub base_path: String,

    /// The maximum number of bytes that can be stored in the Axon.
    #[serde(rename = "max:bytes")]
    pub max_bytes: Option<u64>,

    /// The maximum number of files that can be stored in the Axon.
    #[serde(rename = "max:count")]
    pub max_count: Option<u64>,

    /// A SOCKS/HTTP proxy URL to use in the wget API.
    #[serde(rename = "http:proxy")]
    pub http_proxy: Option<String>,

    /// Admin endpoints configuration.
    pub infra: Option<InfraConfig>,

    /// Permission oracle configuration. Defaults to open access.
    pub auth: Option<AuthConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_bytes == Some(0) {
            return Err("max:bytes must be at least 1".to_owned());
        }
        if self.max_count == Some(0) {
            return Err("max:count must be at least 1".to_owned());
        }
        Ok(())
    }

    pub fn axon_opts(&self) -> AxonOpts {
        AxonOpts {
            max_bytes: self.max_bytes,
            max_count: self.max_count,
            http_proxy: self.http_proxy.clone(),
        }
    }
}

impl FromStr for Config {
    type Err = String;

    fn from_str(raw_config: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(raw_config).map_err(|e| format!("config parse error: {e}"))
    }
}

// Copyright 2022 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use digest::MultiHasher;
use futures::StreamExt;
use serde::Serialize;

use crate::engine::Axon;
use crate::error::AxonError;
use crate::CHUNK_SIZE;

/// Parameters for a `wget` fetch. Only `url` is required.
#[derive(Clone, Debug)]
pub struct WgetRequest {
    pub url: String,

    /// Additional query parameters to add to the URL.
    pub params: Vec<(String, String)>,

    /// Additional HTTP headers to add to the request.
    pub headers: Vec<(String, String)>,

    /// A JSON body to include with the request.
    pub json_body: Option<serde_json::Value>,

    /// A raw body to include with the request.
    pub raw_body: Option<Bytes>,

    /// The HTTP method to use.
    pub method: String,

    /// Perform TLS certificate verification.
    pub verify_tls: bool,

    /// Total-request timeout.
    pub timeout: Option<Duration>,
}

impl WgetRequest {
    pub fn get(url: impl Into<String>) -> Self {
        WgetRequest {
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            json_body: None,
            raw_body: None,
            method: "GET".to_owned(),
            verify_tls: true,
            timeout: None,
        }
    }
}

/// Digests of a fetched response body, as lowercase hex.
#[derive(Clone, Debug, Serialize, Eq, PartialEq)]
pub struct WgetHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

/// The result of a `wget` fetch. `ok` is false only for transport-level
/// failures; a non-2xx status still stores the body and reports `ok: true`.
#[derive(Clone, Debug, Serialize)]
pub struct WgetInfo {
    pub ok: bool,

    /// The URL retrieved, after any redirects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// The response status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,

    /// The response headers as a flat mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    /// The size in bytes of the stored response body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Digests of the stored response body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<WgetHashes>,

    /// The failure message when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesg: Option<String>,
}

impl WgetInfo {
    fn failed(err: AxonError) -> Self {
        WgetInfo {
            ok: false,
            url: None,
            code: None,
            headers: None,
            size: None,
            hashes: None,
            mesg: Some(format!("{err}")),
        }
    }
}

/// Stream a URL's response body directly into the Axon, accumulating every
/// supported digest along the way. The body is persisted before the caller
/// sees its hashes, so `get(sha256)` afterwards retrieves the same bytes.
pub(crate) async fn wget(axon: &Axon, request: WgetRequest) -> Result<WgetInfo, AxonError> {
    let mut builder = reqwest::Client::builder();

    if let Some(proxy_url) = axon.http_proxy() {
        let proxy = match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => proxy,
            Err(err) => {
                return Ok(WgetInfo::failed(AxonError::Transport(format!(
                    "bad proxy url: {err}"
                ))))
            }
        };
        builder = builder.proxy(proxy);
    }

    if !request.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }

    let client = match builder.build() {
        Ok(client) => client,
        Err(err) => {
            return Ok(WgetInfo::failed(AxonError::Transport(format!(
                "client setup failed: {err}"
            ))))
        }
    };

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| AxonError::BadRequest(format!("invalid method: {}", request.method)))?;

    let mut req = client.request(method, &request.url);
    if !request.params.is_empty() {
        req = req.query(&request.params);
    }
    for (name, value) in &request.headers {
        req = req.header(name.as_str(), value.as_str());
    }
    if let Some(json_body) = &request.json_body {
        req = req.json(json_body);
    }
    if let Some(raw_body) = &request.raw_body {
        req = req.body(raw_body.clone());
    }

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(err) => return Ok(WgetInfo::failed(AxonError::Transport(err.to_string()))),
    };

    let url = resp.url().to_string();
    let code = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            (name.to_string(), value)
        })
        .collect::<HashMap<_, _>>();

    let mut upfd = axon.upload();
    let mut hashset = MultiHasher::new();

    // Re-batch the transport's frames into full chunks before feeding the
    // session and the hash accumulator.
    let mut buffer = BytesMut::new();
    let mut body = resp.bytes_stream();
    while let Some(chunk_result) = body.next().await {
        let mut frame = match chunk_result {
            Ok(frame) => frame,
            Err(err) => return Ok(WgetInfo::failed(AxonError::Transport(err.to_string()))),
        };

        while frame.has_remaining() {
            let take = (CHUNK_SIZE - buffer.len()).min(frame.len());
            buffer.extend_from_slice(&frame[..take]);
            frame.advance(take);

            if buffer.len() >= CHUNK_SIZE {
                let chunk = buffer.split().freeze();
                upfd.write(&chunk).await?;
                hashset.update(&chunk);
            }
        }
    }

    if !buffer.is_empty() {
        let chunk = buffer.split().freeze();
        upfd.write(&chunk).await?;
        hashset.update(&chunk);
    }

    let (size, _) = upfd.save().await?;
    let digests = hashset.finalize();

    Ok(WgetInfo {
        ok: true,
        url: Some(url),
        code: Some(code),
        headers: Some(headers),
        size: Some(size),
        hashes: Some(WgetHashes {
            md5: digests.md5,
            sha1: digests.sha1,
            sha256: digests.sha256,
            sha512: digests.sha512,
        }),
        mesg: None,
    })
}

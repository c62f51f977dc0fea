// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Buf;
use digest::{Digest, MultiHasher};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::engine::Axon;
use crate::error::AxonError;
use crate::MAX_HTTP_UPLOAD_SIZE;

mod oracle;

pub use oracle::{Identity, OpenAccess, PermissionOracle, TokenPermissions};


struct InnerServer {
    axon: Axon,
    oracle: Arc<dyn PermissionOracle>,
}

impl InnerServer {
    async fn allowed(&self, ident: &Identity, op: &str) -> Result<(), AxonError> {
        if self.oracle.allowed(ident, ("axon", op)).await {
            Ok(())
        } else {
            Err(AxonError::Unauthorized(format!(
                "permission denied: (axon, {op})"
            )))
        }
    }
}

/// The HTTP surface of the Axon: streaming upload and download plus the
/// has / del endpoints, wrapped in the uniform `{status, result}` /
/// `{status, code, mesg}` envelope.
pub struct ApiServer {
    inner: Arc<InnerServer>,
}

impl ApiServer {
    pub fn new(axon: Axon, oracle: Arc<dyn PermissionOracle>) -> Self {
        ApiServer {
            inner: Arc::new(InnerServer { axon, oracle }),
        }
    }

    pub fn routes(&self) -> warp::filters::BoxedFilter<(impl Reply,)> {
        let upload = {
            let inner = self.inner.clone();
            let filter = warp::path!("api" / "v1" / "axon" / "files" / "put")
                .and(identity())
                .and(warp::body::stream())
                .and_then(move |ident, body| put_handler(inner.clone(), ident, body));
            warp::post()
                .and(filter.clone())
                .or(warp::put().and(filter))
        };

        let has = {
            let inner = self.inner.clone();
            warp::get()
                .and(warp::path!("api" / "v1" / "axon" / "files" / "has" / "sha256" / String))
                .and(identity())
                .and_then(move |sha256, ident| has_handler(inner.clone(), sha256, ident))
        };

        let get = {
            let inner = self.inner.clone();
            warp::get()
                .and(warp::path!("api" / "v1" / "axon" / "files" / "by" / "sha256" / String))
                .and(identity())
                .and_then(move |sha256, ident| get_handler(inner.clone(), sha256, ident))
        };

        let delete = {
            let inner = self.inner.clone();
            warp::delete()
                .and(warp::path!("api" / "v1" / "axon" / "files" / "by" / "sha256" / String))
                .and(identity())
                .and_then(move |sha256, ident| delete_handler(inner.clone(), sha256, ident))
        };

        let dels = {
            let inner = self.inner.clone();
            warp::post()
                .and(warp::path!("api" / "v1" / "axon" / "files" / "del"))
                .and(identity())
                .and(warp::body::json())
                .and_then(move |ident, body| dels_handler(inner.clone(), ident, body))
        };

        upload
            .or(has)
            .or(get)
            .or(delete)
            .or(dels)
            .recover(handle_rejection)
            .boxed()
    }

    /// Serve the API until the shutdown future resolves.
    pub async fn serve(self, addr: SocketAddr, shutdown: impl Future<Output = ()> + Send + 'static) {
        let (bound, server) = warp::serve(self.routes()).bind_with_graceful_shutdown(addr, shutdown);
        log::info!("Serving axon API on {bound}");
        server.await;
    }
}

fn identity() -> impl Filter<Extract = (Identity,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").map(Identity::from_authorization)
}

fn parse_sha256(hex: &str) -> Result<Digest, AxonError> {
    if hex.len() != 64 {
        return Err(AxonError::BadDigest(format!(
            "expected 64 hex characters, got {}",
            hex.len()
        )));
    }
    Digest::new(hex).map_err(AxonError::BadDigest)
}

fn rest_retn<T: serde::Serialize>(result: T) -> warp::reply::Response {
    warp::reply::json(&json!({ "status": "ok", "result": result })).into_response()
}

fn rest_err(err: &AxonError) -> warp::reply::Response {
    let status = match err {
        AxonError::NoSuchBlob(_) => StatusCode::NOT_FOUND,
        AxonError::Unauthorized(_) => StatusCode::FORBIDDEN,
        AxonError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    let body = warp::reply::json(&json!({
        "status": "err",
        "code": err.kind(),
        "mesg": format!("{err}"),
    }));
    warp::reply::with_status(body, status).into_response()
}

async fn put_handler<S, B>(
    inner: Arc<InnerServer>,
    ident: Identity,
    body: S,
) -> Result<warp::reply::Response, Infallible>
where
    S: Stream<Item = Result<B, warp::Error>> + Send,
    B: Buf + Send,
{
    let result = async {
        inner.allowed(&ident, "upload").await?;

        let mut upfd = inner.axon.upload();
        let mut hashset = MultiHasher::new();

        futures::pin_mut!(body);
        while let Some(chunk_result) = body.next().await {
            let mut chunk = chunk_result
                .map_err(|err| AxonError::Aborted(format!("upload stream failed: {err}")))?;
            let byts = chunk.copy_to_bytes(chunk.remaining());
            if hashset.size() + byts.len() as u64 > MAX_HTTP_UPLOAD_SIZE {
                return Err(AxonError::BadRequest(
                    "upload exceeds the maximum size".to_owned(),
                ));
            }
            upfd.write(&byts).await?;
            hashset.update(&byts);
            tokio::task::yield_now().await;
        }

        let (size, sha256) = upfd.save().await?;
        let digests = hashset.finalize();
        debug_assert_eq!(digests.sha256, sha256.hex());

        Ok(rest_retn(json!({
            "size": size,
            "md5": digests.md5,
            "sha1": digests.sha1,
            "sha256": digests.sha256,
            "sha512": digests.sha512,
        })))
    }
    .await;

    Ok(result.unwrap_or_else(|err| rest_err(&err)))
}

async fn has_handler(
    inner: Arc<InnerServer>,
    sha256_hex: String,
    ident: Identity,
) -> Result<warp::reply::Response, Infallible> {
    let result = async {
        inner.allowed(&ident, "has").await?;
        let sha256 = parse_sha256(&sha256_hex)?;
        Ok(rest_retn(inner.axon.has(sha256).await?))
    }
    .await;

    Ok(result.unwrap_or_else(|err| rest_err(&err)))
}

async fn get_handler(
    inner: Arc<InnerServer>,
    sha256_hex: String,
    ident: Identity,
) -> Result<warp::reply::Response, Infallible> {
    let result = async {
        inner.allowed(&ident, "get").await?;
        let sha256 = parse_sha256(&sha256_hex)?;
        let stream = inner.axon.get(sha256).await?;

        warp::http::Response::builder()
            .header(warp::http::header::CONTENT_TYPE, "application/octet-stream")
            .header(warp::http::header::CONTENT_DISPOSITION, "attachment")
            .body(hyper::Body::wrap_stream(stream))
            .map_err(|err| AxonError::Internal(format!("response build failed: {err}")))
    }
    .await;

    Ok(result.unwrap_or_else(|err| rest_err(&err)))
}

async fn delete_handler(
    inner: Arc<InnerServer>,
    sha256_hex: String,
    ident: Identity,
) -> Result<warp::reply::Response, Infallible> {
    let result = async {
        inner.allowed(&ident, "del").await?;
        let sha256 = parse_sha256(&sha256_hex)?;
        if !inner.axon.has(sha256).await? {
            return Err(AxonError::NoSuchBlob(sha256));
        }
        Ok(rest_retn(inner.axon.del(sha256).await?))
    }
    .await;

    Ok(result.unwrap_or_else(|err| rest_err(&err)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DelRequest {
    sha256s: Vec<String>,
}

async fn dels_handler(
    inner: Arc<InnerServer>,
    ident: Identity,
    body: DelRequest,
) -> Result<warp::reply::Response, Infallible> {
    let result = async {
        inner.allowed(&ident, "del").await?;

        let mut sha256s = Vec::with_capacity(body.sha256s.len());
        for hex in &body.sha256s {
            sha256s.push(parse_sha256(hex)?);
        }

        let flags = inner.axon.dels(sha256s).await?;
        let result = body
            .sha256s
            .iter()
            .cloned()
            .zip(flags)
            .collect::<Vec<(String, bool)>>();
        Ok(rest_retn(result))
    }
    .await;

    Ok(result.unwrap_or_else(|err| rest_err(&err)))
}

async fn handle_rejection(rejection: Rejection) -> Result<warp::reply::Response, Infallible> {
    if rejection.is_not_found() {
        let body = warp::reply::json(&json!({
            "status": "err",
            "code": "NoSuchPath",
            "mesg": "no such API endpoint",
        }));
        return Ok(warp::reply::with_status(body, StatusCode::NOT_FOUND).into_response());
    }

    let err = if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        AxonError::BadRequest(err.to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        AxonError::BadRequest("method not allowed".to_owned())
    } else {
        AxonError::Internal(format!("unhandled rejection: {rejection:?}"))
    };

    Ok(rest_err(&err))
}

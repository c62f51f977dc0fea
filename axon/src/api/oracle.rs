// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

/// The caller identity presented with a request: the bearer token, if any.
#[derive(Clone, Debug, Default)]
pub struct Identity {
    pub token: Option<String>,
}

impl Identity {
    pub fn from_authorization(header: Option<String>) -> Self {
        let token = header.and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .map(|token| token.trim().to_owned())
        });
        Identity { token }
    }
}

/// Decides whether a caller may perform the operation named by a
/// `(scope, op)` pair such as `("axon", "upload")`. The API layer treats
/// this as opaque; implementations may consult anything they like.
#[async_trait]
pub trait PermissionOracle: Send + Sync + 'static {
    async fn allowed(&self, ident: &Identity, perm: (&str, &str)) -> bool;
}

/// Grants every permission to every caller.
pub struct OpenAccess;

#[async_trait]
impl PermissionOracle for OpenAccess {
    async fn allowed(&self, _ident: &Identity, _perm: (&str, &str)) -> bool {
        true
    }
}

/// Grants permissions to bearer tokens from a static allowlist. Each token
/// maps to the operation names it may perform; `"*"` allows everything.
pub struct TokenPermissions {
    tokens: HashMap<String, HashSet<String>>,
}

impl TokenPermissions {
    pub fn new(tokens: HashMap<String, Vec<String>>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|(token, ops)| (token, ops.into_iter().collect()))
            .collect();
        TokenPermissions { tokens }
    }
}

#[async_trait]
impl PermissionOracle for TokenPermissions {
    async fn allowed(&self, ident: &Identity, perm: (&str, &str)) -> bool {
        let token = match &ident.token {
            Some(token) => token,
            None => return false,
        };
        match self.tokens.get(token) {
            Some(ops) => ops.contains("*") || ops.contains(perm.1),
            None => false,
        }
    }
}

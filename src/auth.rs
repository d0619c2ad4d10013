//! API Key 认证：可替换的凭据校验与请求中间件。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::Request;
use axum::{middleware, response::Response};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

use crate::config::API_KEY_HEADER;
use crate::error::ApiError;

/// Decides whether a presented credential grants access.
pub trait CredentialVerifier: Send + Sync + Debug {
    fn verify(&self, presented: &str) -> bool;
}

pub type SharedVerifier = Arc<dyn CredentialVerifier>;

/// Accepts exactly one shared key.
#[derive(Debug)]
pub struct StaticKeyVerifier {
    key: String,
}

impl StaticKeyVerifier {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl CredentialVerifier for StaticKeyVerifier {
    fn verify(&self, presented: &str) -> bool {
        presented == self.key
    }
}

/// 认证中间件：校验 `X-API-Key`，失败时直接返回 401，不进入处理器。
pub async fn auth_middleware(
    Extension(verifier): Extension<SharedVerifier>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    if is_auth_exempt_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Some(key) = presented
        && verifier.verify(key)
    {
        return Ok(next.run(req).await);
    }

    warn!(
        path = req.uri().path(),
        header_present = presented.is_some(),
        "rejected request with invalid api key"
    );
    Err(ApiError::Unauthorized("Unauthorized: Invalid API Key".into()))
}

fn is_auth_exempt_path(path: &str) -> bool {
    path == "/api/version"
}

//! Test helpers: an isolated storage root behind the real router.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, header};
use axum::response::Response;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::auth::StaticKeyVerifier;
use crate::config::{DEFAULT_API_KEY, DEFAULT_CORS_ORIGIN};
use crate::locking::LockManager;
use crate::router::{AppState, build_router};
use crate::storage::Storage;

const BOUNDARY: &str = "shelf-test-boundary";

pub struct TestApp {
    _temp: TempDir,
    state: AppState,
}

impl TestApp {
    pub const KEY: &'static str = DEFAULT_API_KEY;

    pub fn new() -> Self {
        Self::with_locks(LockManager::new(Duration::from_secs(5)))
    }

    pub fn with_locks(locks: LockManager) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("uploads");
        std::fs::create_dir_all(&root).expect("create storage root");
        let state = AppState {
            storage: Arc::new(Storage::new(root)),
            verifier: Arc::new(StaticKeyVerifier::new(DEFAULT_API_KEY)),
            locks: Arc::new(locks),
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
        };
        Self { _temp: temp, state }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn root(&self) -> &Path {
        self.state.storage.root_path()
    }

    pub fn locks(&self) -> &LockManager {
        &self.state.locks
    }

    /// Sorted names directly under the storage root.
    pub fn entries(&self) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(self.root())
            .expect("read storage root")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    pub async fn upload(&self, body: MultipartBody, key: Option<&str>) -> Response {
        let mut request = Request::post("/upload").header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(key) = key {
            request = request.header("x-api-key", key);
        }
        let request = request
            .body(Body::from(body.finish()))
            .expect("upload request");
        self.router().oneshot(request).await.expect("response")
    }

    pub async fn get(&self, uri: &str, key: Option<&str>) -> Response {
        let mut request = Request::get(uri);
        if let Some(key) = key {
            request = request.header("x-api-key", key);
        }
        let request = request.body(Body::empty()).expect("get request");
        self.router().oneshot(request).await.expect("response")
    }
}

/// Hand-built `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartBody {
    bytes: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content: &[u8]) -> Self {
        self.bytes.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        self.bytes.extend_from_slice(content);
        self.bytes.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.bytes
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.bytes
    }
}

pub async fn read_json(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json body")
}

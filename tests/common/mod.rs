//! Test utilities and common setup.

#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Method, Request, Response},
};
use tagserve::{AppState, Config, routes};
use tempfile::TempDir;
use tower::ServiceExt;

/// A router over a fresh temporary root. The directory lives as long as
/// the returned guard.
pub struct TestApp {
    pub dir: TempDir,
    pub router: Router,
}

impl TestApp {
    pub fn root(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Create a file under the root, including parent directories.
    pub fn seed(&self, relative: &str, content: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> Option<Vec<u8>> {
        std::fs::read(self.dir.path().join(relative)).ok()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(request(Method::GET, uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn put(&self, uri: &str, content: &'static str) -> Response<Body> {
        self.send(request(Method::PUT, uri).body(Body::from(content)).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(request(Method::DELETE, uri).body(Body::empty()).unwrap())
            .await
    }
}

/// Configuration with writes enabled; everything else at its default.
pub fn writable_config() -> Config {
    Config {
        read_only: false,
        ..Config::default()
    }
}

/// Create a writable test application.
pub fn test_app() -> TestApp {
    test_app_with_config(writable_config())
}

/// Create a test application with the given configuration.
pub fn test_app_with_config(config: Config) -> TestApp {
    let dir = TempDir::new().unwrap();
    let state = AppState::with_config(dir.path(), config).unwrap();
    TestApp {
        dir,
        router: routes::build_router(state),
    }
}

pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub fn etag_of(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(axum::http::header::ETAG)
        .map(|value| value.to_str().unwrap().to_string())
}

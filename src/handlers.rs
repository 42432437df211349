use std::borrow::Cow;
use std::future::Future;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error};

use crate::AppState;
use crate::conditional::{Outcome, Preconditions};
use crate::error::FileServerError;
use crate::etag::ETag;
use crate::store::{EntryKind, ResolvedPath, ResourceState};

/// Response body for a successful PUT
#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub path: String,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Fallback handler for every path and method.
///
/// Errors never escape: each one becomes a status code and a small JSON
/// body, and server-side failures are logged.
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle(&state, &method, &uri, &headers, body).await {
        Ok(response) => response,
        Err(err) => {
            if err.status().is_server_error() {
                error!("{} {} failed: {:?}", method, uri.path(), err);
            } else {
                debug!("{} {} rejected: {}", method, uri.path(), err);
            }
            err.into_response()
        }
    }
}

async fn handle(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, FileServerError> {
    check_method(state, method)?;

    let request_path = decode_path(uri.path())?;
    let target = state.store.resolve(&request_path).await?;

    let preconditions = if state.config.etags {
        Preconditions::from_headers(headers)
    } else {
        Preconditions::default()
    };

    if method == Method::GET || method == Method::HEAD {
        get_resource(state, method, target, &preconditions).await
    } else if method == Method::PUT {
        put_resource(state, target, &preconditions, headers, body).await
    } else {
        delete_resource(state, target, &preconditions).await
    }
}

/// Reject verbs the current mode does not serve, before touching any path.
fn check_method(state: &AppState, method: &Method) -> Result<(), FileServerError> {
    let mutating = method == Method::PUT || method == Method::DELETE;
    if mutating && state.config.read_only {
        return Err(FileServerError::ReadOnly);
    }
    if mutating || method == Method::GET || method == Method::HEAD {
        return Ok(());
    }
    Err(FileServerError::MethodNotAllowed {
        allow: state.config.allowed_methods(),
    })
}

/// Percent-decode the request path. Undecodable paths cannot be checked
/// for containment and are refused.
fn decode_path(raw: &str) -> Result<String, FileServerError> {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .map_err(|_| FileServerError::Forbidden)
}

// ============================================================================
// Method handlers
// ============================================================================

/// GET / HEAD
///
/// Without preconditions a GET reads the content once and tags what it
/// read. With preconditions, or for HEAD, the file is hashed first so a 304
/// never reads the body.
async fn get_resource(
    state: &AppState,
    method: &Method,
    target: ResolvedPath,
    preconditions: &Preconditions,
) -> Result<Response, FileServerError> {
    let target = state.store.locate(target).await?;
    let etags = state.config.etags;
    let head_only = method == Method::HEAD;

    if head_only || !preconditions.is_empty() {
        let current = state.store.stat(&target, etags).await?;
        if !current.exists() {
            return Err(FileServerError::NotFound(target.request_path));
        }

        match preconditions.evaluate(method, current.etag.as_ref()) {
            Outcome::Proceed => {}
            Outcome::NotModified => {
                return Ok(metadata_response(StatusCode::NOT_MODIFIED, &current, false));
            }
            Outcome::PreconditionFailed => return Err(FileServerError::PreconditionFailed),
        }

        if head_only {
            return Ok(metadata_response(StatusCode::OK, &current, true));
        }
    }

    let resource = state.store.read(&target).await?;

    let mut response_headers = HeaderMap::new();
    insert_header(&mut response_headers, header::CONTENT_TYPE, &resource.content_type);
    if etags {
        insert_etag(&mut response_headers, &resource.etag);
    }
    if let Some(modified) = resource.last_modified {
        insert_header(
            &mut response_headers,
            header::LAST_MODIFIED,
            &httpdate::fmt_http_date(modified),
        );
    }

    Ok((StatusCode::OK, response_headers, Body::from(resource.content)).into_response())
}

/// PUT - atomically create or replace a file
async fn put_resource(
    state: &AppState,
    target: ResolvedPath,
    preconditions: &Preconditions,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, FileServerError> {
    if target.request_path.ends_with('/') {
        return Err(FileServerError::InvalidOperation(format!(
            "cannot write to directory path {}",
            target.request_path
        )));
    }

    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        debug!(
            "PUT {} declared Content-Type {:?}",
            target.request_path, content_type
        );
    }

    let guard = state.locks.lock(&target.path).await;
    let task_state = state.clone();
    let task_target = target.clone();
    let task_preconditions = preconditions.clone();
    let outcome = run_locked(guard, async move {
        if !task_preconditions.is_empty() {
            let current = task_state.store.stat(&task_target, true).await?;
            check_mutation(&Method::PUT, &task_target, &current, &task_preconditions)?;
        }
        task_state.store.write(&task_target, body).await
    })
    .await?;

    let etags = state.config.etags;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let mut response_headers = HeaderMap::new();
    if etags {
        insert_etag(&mut response_headers, &outcome.etag);
    }

    let body = WriteResponse {
        path: target.request_path,
        created: outcome.created,
        etag: etags.then(|| outcome.etag.to_string()),
    };

    Ok((status, response_headers, Json(body)).into_response())
}

/// DELETE - remove a single file
async fn delete_resource(
    state: &AppState,
    target: ResolvedPath,
    preconditions: &Preconditions,
) -> Result<Response, FileServerError> {
    let guard = state.locks.lock(&target.path).await;
    let task_state = state.clone();
    let task_preconditions = preconditions.clone();
    run_locked(guard, async move {
        if !task_preconditions.is_empty() {
            let current = task_state.store.stat(&target, true).await?;
            check_mutation(&Method::DELETE, &target, &current, &task_preconditions)?;
        }
        task_state.store.delete(&target).await
    })
    .await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Run a check-and-mutate step on its own task, holding `guard` until it
/// finishes. A dropped request cannot release the path lock while its
/// write is still in flight.
async fn run_locked<T, F>(guard: OwnedMutexGuard<()>, work: F) -> Result<T, FileServerError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, FileServerError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = work.await;
        drop(guard);
        result
    })
    .await
    .map_err(|err| FileServerError::Io(std::io::Error::other(err)))?
}

/// Evaluate preconditions for PUT/DELETE against the current state. No
/// mutation may start unless this returns `Ok`.
fn check_mutation(
    method: &Method,
    target: &ResolvedPath,
    current: &ResourceState,
    preconditions: &Preconditions,
) -> Result<(), FileServerError> {
    if current.kind == EntryKind::Directory {
        return Err(FileServerError::InvalidOperation(format!(
            "{} is a directory",
            target.request_path
        )));
    }

    match preconditions.evaluate(method, current.etag.as_ref()) {
        Outcome::Proceed => Ok(()),
        Outcome::NotModified | Outcome::PreconditionFailed => {
            Err(FileServerError::PreconditionFailed)
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Body-less response carrying a resource's metadata headers.
fn metadata_response(status: StatusCode, current: &ResourceState, with_length: bool) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, &current.content_type);
    if with_length {
        insert_header(&mut headers, header::CONTENT_LENGTH, &current.len.to_string());
    }
    if let Some(etag) = &current.etag {
        insert_etag(&mut headers, etag);
    }
    if let Some(modified) = current.last_modified {
        insert_header(
            &mut headers,
            header::LAST_MODIFIED,
            &httpdate::fmt_http_date(modified),
        );
    }

    (status, headers).into_response()
}

fn insert_etag(headers: &mut HeaderMap, etag: &ETag) {
    insert_header(headers, header::ETAG, etag.as_str());
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!("Dropping unrepresentable {} header: {:?}", name, value),
    }
}

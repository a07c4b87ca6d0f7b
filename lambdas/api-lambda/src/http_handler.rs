use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use feed_block::{FeedView, PostComposer, Resolution, Route, RouteTree};
use feedline_atoms::media::PendingImage;
use feedline_atoms::users::{Credentials, Session};
use feedline_atoms::{AuthError, FeedError, StoreError};
use feedline_shared::AppState;
use lambda_http::http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, LOCATION, VARY};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, Response,
};
use serde::Deserialize;
use serde_json::json;

fn with_cors_headers(mut resp: Response<Body>, allow_origin: &str) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_str(allow_origin).unwrap_or_else(|_| HeaderValue::from_static("*")),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization"),
    );
    headers.append(VARY, HeaderValue::from_static("Origin"));

    resp
}

fn finalize_response(
    resp: Result<Response<Body>, Error>,
    allow_origin: &str,
) -> Result<Response<Body>, Error> {
    resp.map(|r| with_cors_headers(r, allow_origin))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    let mut resp = Response::new(Body::from(value.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response<Body> {
    json_response(status, json!({"error": message.to_string()}))
}

fn redirect(to: &'static str) -> Response<Body> {
    let mut resp = Response::new(Body::Empty);
    *resp.status_mut() = StatusCode::FOUND;
    resp.headers_mut().insert(LOCATION, HeaderValue::from_static(to));
    resp
}

fn method_not_allowed() -> Response<Body> {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

fn not_found() -> Response<Body> {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn body_bytes(body: &Body) -> &[u8] {
    match body {
        Body::Empty => &[],
        Body::Text(text) => text.as_bytes(),
        Body::Binary(bytes) => bytes,
    }
}

#[derive(Deserialize)]
struct AddPostRequest {
    #[serde(default)]
    text: String,
    image: Option<ImageUpload>,
}

#[derive(Deserialize)]
struct ImageUpload {
    file_name: String,
    content_type: Option<String>,
    // base64
    data: String,
}

fn bearer_token(event: &Request) -> Option<&str> {
    event
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Resolve the bearer token, if any. A token that fails verification is
/// the same as no token.
async fn authenticate(event: &Request, state: &AppState) -> Option<Session> {
    let token = bearer_token(event)?;

    match state.identity.verify_token(token).await {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!("bearer token rejected: {}", e);
            None
        }
    }
}

/// Main Lambda handler: gates the request by session, then dispatches
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method().clone();
    let path = event.uri().path().to_string();
    let allow_origin = state.config.cors_allow_origin.clone();
    tracing::info!("{} {}", method, path);

    if method == Method::OPTIONS {
        return Ok(with_cors_headers(Response::new(Body::Empty), &allow_origin));
    }

    let session = authenticate(&event, &state).await;
    let tree = RouteTree::for_session(session.as_ref());

    let resp = match (tree.resolve(&path), session) {
        (Resolution::Redirect(to), _) => Ok(redirect(to)),
        (Resolution::Render(route), None) => public_route(route, &method, &event, &state).await,
        (Resolution::Render(route), Some(session)) => {
            session_route(route, &method, &path, &event, &state, session).await
        }
    };

    finalize_response(resp, &allow_origin)
}

async fn public_route(
    route: Route,
    method: &Method,
    event: &Request,
    state: &AppState,
) -> Result<Response<Body>, Error> {
    match (route, method) {
        (Route::Welcome, &Method::GET) => Ok(json_response(
            StatusCode::OK,
            json!({
                "message": "Welcome. Sign in to post and see the feed.",
                "sign_in": Route::SignIn.path(),
            }),
        )),
        (Route::SignIn, &Method::POST) => sign_in(event, state).await,
        _ => Ok(method_not_allowed()),
    }
}

async fn session_route(
    route: Route,
    method: &Method,
    path: &str,
    event: &Request,
    state: &AppState,
    session: Session,
) -> Result<Response<Body>, Error> {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (route, method, parts.as_slice()) {
        // POST /add-post - submit a post
        (Route::AddPost, &Method::POST, ["add-post"]) => add_post(event, state, &session).await,
        // GET /home - live feed, newest first
        (Route::Home, &Method::GET, ["home"]) => list_posts(state).await,
        // GET /home/{id} - detail overlay
        (Route::Home, &Method::GET, ["home", post_id]) => post_detail(state, post_id).await,
        // DELETE /home/{id} - owner-only delete
        (Route::Home, &Method::DELETE, ["home", post_id]) => {
            delete_post(state, &session, post_id).await
        }
        // GET /profile - the signed-in session
        (Route::Profile, &Method::GET, ["profile"]) => Ok(json_response(
            StatusCode::OK,
            json!({ "session": serde_json::to_value(&session)? }),
        )),
        // POST /profile/signout - revoke the caller's own token
        (Route::Profile, &Method::POST, ["profile", "signout"]) => sign_out(event, state, &session).await,
        (Route::Home, _, ["home", _]) => Ok(method_not_allowed()),
        (Route::Profile, _, ["profile", "signout"]) => Ok(method_not_allowed()),
        (_, _, [_, _, ..]) => Ok(not_found()),
        _ => Ok(method_not_allowed()),
    }
}

async fn sign_in(event: &Request, state: &AppState) -> Result<Response<Body>, Error> {
    let credentials: Credentials = match serde_json::from_slice(body_bytes(event.body())) {
        Ok(c) => c,
        Err(e) => return Ok(error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e))),
    };

    match state.identity.sign_in(credentials).await {
        Ok(signed_in) => Ok(json_response(StatusCode::OK, serde_json::to_value(&signed_in)?)),
        Err(AuthError::InvalidCredentials) => Ok(error_response(
            StatusCode::UNAUTHORIZED,
            AuthError::InvalidCredentials,
        )),
        Err(e) => {
            tracing::error!("sign-in failed: {}", e);
            Ok(error_response(StatusCode::BAD_GATEWAY, e))
        }
    }
}

async fn sign_out(event: &Request, state: &AppState, session: &Session) -> Result<Response<Body>, Error> {
    let Some(token) = bearer_token(event) else {
        return Ok(error_response(StatusCode::UNAUTHORIZED, AuthError::InvalidToken));
    };

    match state.identity.revoke_token(token).await {
        Ok(()) => {
            tracing::info!("signed out {}", session.user_id);
            let mut resp = Response::new(Body::Empty);
            *resp.status_mut() = StatusCode::NO_CONTENT;
            Ok(resp)
        }
        Err(AuthError::InvalidToken) => Ok(error_response(StatusCode::UNAUTHORIZED, AuthError::InvalidToken)),
        Err(e) => {
            tracing::error!("sign-out failed for {}: {}", session.user_id, e);
            Ok(error_response(StatusCode::BAD_GATEWAY, e))
        }
    }
}

async fn add_post(
    event: &Request,
    state: &AppState,
    session: &Session,
) -> Result<Response<Body>, Error> {
    let payload: AddPostRequest = match serde_json::from_slice(body_bytes(event.body())) {
        Ok(p) => p,
        Err(e) => return Ok(error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e))),
    };

    let mut composer = PostComposer::new();
    composer.set_text(payload.text);

    if let Some(upload) = payload.image {
        let bytes = match STANDARD.decode(upload.data.as_bytes()) {
            Ok(b) => b,
            Err(e) => {
                return Ok(error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid image data: {}", e),
                ))
            }
        };
        let mut image = PendingImage::new(&upload.file_name, bytes);
        image.content_type = upload.content_type;
        composer.select_files(vec![image]);
    }

    match state.submission_flow().submit(Some(session), &mut composer).await {
        Ok(submitted) => {
            let mut resp = json_response(StatusCode::CREATED, serde_json::to_value(&submitted.post)?);
            resp.headers_mut().insert(
                LOCATION,
                HeaderValue::from_static(submitted.navigate_to.path()),
            );
            Ok(resp)
        }
        Err(e) => Ok(feed_error_response(e)),
    }
}

/// Mount a feed view and wait for its first live snapshot.
async fn mount_live_feed(state: &AppState) -> Result<FeedView, Response<Body>> {
    let feed = state.mount_feed();

    let outcome = tokio::time::timeout(state.config.snapshot_timeout, feed.wait_live()).await;
    match outcome {
        Ok(Ok(_)) => Ok(feed),
        Ok(Err(e)) => {
            feed.unmount().await;
            Err(feed_error_response(e))
        }
        Err(_) => {
            let status = feed.status();
            feed.unmount().await;
            tracing::warn!("feed not live after {:?}: {:?}", state.config.snapshot_timeout, status);
            Err(json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "Feed is not available", "status": status}),
            ))
        }
    }
}

async fn list_posts(state: &AppState) -> Result<Response<Body>, Error> {
    let feed = match mount_live_feed(state).await {
        Ok(feed) => feed,
        Err(resp) => return Ok(resp),
    };
    let feed_state = feed.state().borrow().clone();
    feed.unmount().await;

    Ok(json_response(StatusCode::OK, serde_json::to_value(&feed_state)?))
}

async fn post_detail(state: &AppState, post_id: &str) -> Result<Response<Body>, Error> {
    let mut feed = match mount_live_feed(state).await {
        Ok(feed) => feed,
        Err(resp) => return Ok(resp),
    };
    let post = feed.open_detail(post_id);
    feed.unmount().await;

    match post {
        Some(post) => Ok(json_response(StatusCode::OK, serde_json::to_value(&post)?)),
        None => Ok(not_found()),
    }
}

async fn delete_post(
    state: &AppState,
    session: &Session,
    post_id: &str,
) -> Result<Response<Body>, Error> {
    let feed = match mount_live_feed(state).await {
        Ok(feed) => feed,
        Err(resp) => return Ok(resp),
    };
    let result = feed.delete_own_post(Some(session), post_id).await;
    feed.unmount().await;

    match result {
        Ok(()) => {
            let mut resp = Response::new(Body::Empty);
            *resp.status_mut() = StatusCode::NO_CONTENT;
            Ok(resp)
        }
        Err(e) => Ok(feed_error_response(e)),
    }
}

fn feed_error_response(err: FeedError) -> Response<Body> {
    let status = match &err {
        FeedError::AuthAbsent => StatusCode::UNAUTHORIZED,
        FeedError::NotOwner(_) | FeedError::Write(StoreError::PermissionDenied(_)) => {
            StatusCode::FORBIDDEN
        }
        FeedError::UnknownPost(_) | FeedError::Write(StoreError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        FeedError::Upload(_) => StatusCode::BAD_GATEWAY,
        FeedError::Subscription(_) => StatusCode::SERVICE_UNAVAILABLE,
        FeedError::Write(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err)
}

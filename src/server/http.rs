//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo. Each route runs its gate pipeline against a
//! fresh [`RequestContext`] before the handler sees the request.
//!
//! | route                          | gates                                                     |
//! |--------------------------------|-----------------------------------------------------------|
//! | `POST /users`                  | none                                                      |
//! | `POST /sessions`               | basic, token, authenticated, scope `full_access`          |
//! | `DELETE /sessions`             | token                                                     |
//! | `POST /spaces`                 | basic, token, authenticated, scope `create_space`         |
//! | `GET /spaces/{id}`             | basic, token, scope `read_message`, permission `r`        |
//! | `POST /spaces/{id}/members`    | basic, token, scope `add_member`, permission `rwd`        |

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Duration;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{
    is_valid_username, register_user, BasicAuthenticator, Pipeline, RequireAuthentication,
    RequirePermission, RequireScope, TokenController, TokenValidator,
};
use crate::config::{Args, MAX_TOKEN_TTL_SECONDS};
use crate::context::{Rejection, RequestContext};
use crate::db::{PermissionRepository, UserRepository};
use crate::token::TokenStore;
use crate::types::{GateError, Result};

type FullBody = Full<Bytes>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

const MAX_BODY_BYTES: usize = 10_240;

/// Per-route gate chains
struct Routes {
    login: Pipeline,
    logout: Pipeline,
    create_space: Pipeline,
    read_space: Pipeline,
    add_member: Pipeline,
}

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn TokenStore>,
    pub users: Arc<dyn UserRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
    controller: TokenController,
    routes: Routes,
}

impl AppState {
    pub fn new(
        args: Args,
        store: Arc<dyn TokenStore>,
        users: Arc<dyn UserRepository>,
        permissions: Arc<dyn PermissionRepository>,
    ) -> Self {
        let basic = Arc::new(BasicAuthenticator::new(users.clone()));
        let token = Arc::new(TokenValidator::new(store.clone(), args.token_transport));
        let authenticate = Pipeline::new().then_shared(basic).then_shared(token.clone());

        let routes = Routes {
            login: authenticate
                .clone()
                .then(RequireAuthentication)
                .then(RequireScope::new(Method::POST, "full_access")),
            logout: Pipeline::new().then_shared(token),
            create_space: authenticate
                .clone()
                .then(RequireAuthentication)
                .then(RequireScope::new(Method::POST, "create_space")),
            read_space: authenticate
                .clone()
                .then(RequireScope::new(Method::GET, "read_message"))
                .then(RequirePermission::new(Method::GET, "r", permissions.clone())),
            add_member: authenticate
                .then(RequireScope::new(Method::POST, "add_member"))
                .then(RequirePermission::new(Method::POST, "rwd", permissions.clone())),
        };

        let ttl = Duration::from_std(args.token_ttl())
            .unwrap_or_else(|_| Duration::seconds(MAX_TOKEN_TTL_SECONDS as i64));
        let controller = TokenController::new(
            store.clone(),
            args.token_transport,
            ttl,
            args.default_scope.clone(),
        );

        Self {
            args,
            store,
            users,
            permissions,
            controller,
            routes,
        }
    }
}

// =============================================================================
// Server loop
// =============================================================================

pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("natter-gate listening on {}", state.args.listen);
    if state.args.dev_mode {
        warn!("Development mode enabled - keys may be ephemeral");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, hyper::Error>(handle(state, req).await) }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route one request. Generic over the body so tests can drive it directly.
pub async fn handle<B>(state: Arc<AppState>, req: Request<B>) -> Response<FullBody>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let mut params = HashMap::new();
    if let ["spaces", space_id, ..] = segments.as_slice() {
        params.insert("space_id".to_string(), space_id.to_string());
    }

    let mut ctx = RequestContext::new(parts.method.clone(), parts.headers)
        .with_path_params(params)
        .with_query(parts.uri.query());

    debug!(request_id = %ctx.request_id(), method = %parts.method, path = %path, "Request");

    let result = match (&parts.method, segments.as_slice()) {
        (&Method::POST, ["users"]) => create_user(&state, body).await,
        (&Method::POST, ["sessions"]) => login(&state, &mut ctx).await,
        (&Method::DELETE, ["sessions"]) => logout(&state, &mut ctx).await,
        (&Method::POST, ["spaces"]) => create_space(&state, &mut ctx, body).await,
        (&Method::GET, ["spaces", _]) => read_space(&state, &mut ctx).await,
        (&Method::POST, ["spaces", _, "members"]) => add_member(&state, &mut ctx, body).await,
        _ => Err(Rejection::new(StatusCode::NOT_FOUND, "Not found")),
    };

    let mut response = match result {
        Ok(response) => response,
        Err(rejection) => rejection.into_response(),
    };
    response.headers_mut().extend(ctx.take_response_headers());
    response
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Deserialize)]
struct CreateUser {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct CreateSpace {
    name: String,
}

#[derive(Deserialize)]
struct AddMember {
    username: String,
    permissions: String,
}

#[derive(Serialize)]
struct SpaceCreated {
    name: String,
    uri: String,
}

type HandlerResult = std::result::Result<Response<FullBody>, Rejection>;

async fn create_user<B>(state: &AppState, body: B) -> HandlerResult
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let request: CreateUser = parse_json_body(body).await?;
    register_user(state.users.as_ref(), &request.username, &request.password).await?;

    Ok(json_response(
        StatusCode::CREATED,
        &serde_json::json!({ "username": request.username }),
    ))
}

async fn login(state: &AppState, ctx: &mut RequestContext) -> HandlerResult {
    state.routes.login.run(ctx).await?;
    let issued = state.controller.login(ctx).await?;
    Ok(json_response(StatusCode::CREATED, &issued))
}

async fn logout(state: &AppState, ctx: &mut RequestContext) -> HandlerResult {
    state.routes.logout.run(ctx).await?;
    state.controller.logout(ctx).await?;
    Ok(json_response(StatusCode::OK, &serde_json::json!({})))
}

async fn create_space<B>(state: &AppState, ctx: &mut RequestContext, body: B) -> HandlerResult
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    state.routes.create_space.run(ctx).await?;
    let request: CreateSpace = parse_json_body(body).await?;
    let owner = ctx.subject().unwrap_or_default().to_string();

    let space_id = uuid::Uuid::new_v4().to_string();
    state.permissions.grant(&space_id, &owner, "rwd").await?;

    info!(space_id = %space_id, owner = %owner, "Space created");
    Ok(json_response(
        StatusCode::CREATED,
        &SpaceCreated {
            name: request.name,
            uri: format!("/spaces/{space_id}"),
        },
    ))
}

async fn read_space(state: &AppState, ctx: &mut RequestContext) -> HandlerResult {
    state.routes.read_space.run(ctx).await?;
    let space_id = ctx.path_param("space_id").unwrap_or_default();
    let subject = ctx.subject().unwrap_or_default();
    let permissions = state
        .permissions
        .lookup(space_id, subject)
        .await?
        .unwrap_or_default();

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "space_id": space_id, "subject": subject, "permissions": permissions }),
    ))
}

async fn add_member<B>(state: &AppState, ctx: &mut RequestContext, body: B) -> HandlerResult
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    state.routes.add_member.run(ctx).await?;
    let request: AddMember = parse_json_body(body).await?;

    if !is_valid_username(&request.username) {
        return Err(GateError::BadRequest("invalid username".into()).into());
    }
    if request.permissions.is_empty() || !request.permissions.chars().all(|c| "rwd".contains(c)) {
        return Err(GateError::BadRequest("invalid permissions".into()).into());
    }

    let space_id = ctx.path_param("space_id").unwrap_or_default();
    state
        .permissions
        .grant(space_id, &request.username, &request.permissions)
        .await?;

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "username": request.username, "permissions": request.permissions }),
    ))
}

// =============================================================================
// Helpers
// =============================================================================

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

async fn parse_json_body<T, B>(body: B) -> std::result::Result<T, Rejection>
where
    T: DeserializeOwned,
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                GateError::BadRequest("Request body too large".into())
            } else {
                GateError::BadRequest(format!("Failed to read body: {}", e))
            }
        })?
        .to_bytes();

    Ok(serde_json::from_slice(&bytes).map_err(GateError::from)?)
}

use super::auth::{CallerAuthenticator, CALLER_HEADER};
use super::PearNode;
use crate::error::{PearError, PearResult};
use crate::grantee::Did;
use crate::network::XrpcVerb;
use crate::rpc::{self, XrpcMethod};
use crate::{log_http_info, log_http_warn};
use actix_web::http::header::{AUTHORIZATION, CONTENT_TYPE};
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer as ActixHttpServer};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// HTTP server for a Pear node.
///
/// Serves every orchestrator operation under `/xrpc/{method}` (GET for
/// queries, POST for procedures) and a liveness probe at `/health`.
pub struct PearHttpServer {
    node: PearNode,
    bind_address: String,
}

/// Shared application state for the HTTP server.
pub struct AppState {
    pub node: PearNode,
    pub auth: CallerAuthenticator,
}

impl AppState {
    pub fn new(node: PearNode) -> Self {
        let auth = node.authenticator();
        Self { node, auth }
    }

    async fn caller(&self, req: &HttpRequest, method: XrpcMethod) -> PearResult<Did> {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
        };
        self.auth
            .authenticate(header(AUTHORIZATION.as_str()), header(CALLER_HEADER), method)
            .await
    }
}

impl PearHttpServer {
    pub fn new(node: PearNode, bind_address: &str) -> Self {
        Self {
            node,
            bind_address: bind_address.to_string(),
        }
    }

    /// Runs the server until it is stopped.
    pub async fn run(&self) -> PearResult<()> {
        log_http_info!("HTTP server running on {}", self.bind_address);
        let app_state = web::Data::new(AppState::new(self.node.clone()));
        let server =
            ActixHttpServer::new(move || App::new().app_data(app_state.clone()).configure(configure))
                .bind(&self.bind_address)
                .map_err(|e| {
                    PearError::Config(format!("Failed to bind {}: {}", self.bind_address, e))
                })?
                .run();

        let retry = self.node.spawn_outbox_retry();
        let result = server
            .await
            .map_err(|e| PearError::Config(format!("HTTP server failed: {}", e)));
        retry.abort();
        self.node.flush()?;
        result
    }
}

/// Registers the node's routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/xrpc/{method}", web::get().to(xrpc_query))
        .route("/xrpc/{method}", web::post().to(xrpc_procedure));
}

fn error_response(error: &PearError) -> HttpResponse {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        log_http_warn!("request failed: {}", error);
    }
    HttpResponse::build(status).json(rpc::error_body(error))
}

fn method_for(name: &str, verb: XrpcVerb) -> PearResult<XrpcMethod> {
    let method = XrpcMethod::parse(name)?;
    if method.verb() != verb {
        let expected = match method.verb() {
            XrpcVerb::Query => "GET",
            XrpcVerb::Procedure => "POST",
        };
        return Err(PearError::InvalidInput(format!(
            "{} must be called with {}",
            name, expected
        )));
    }
    Ok(method)
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    match state.node.pear().list_identities() {
        Ok(identities) => {
            HttpResponse::Ok().json(json!({"status": "ok", "identities": identities.len()}))
        }
        Err(e) => error_response(&e),
    }
}

async fn xrpc_query(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let method = match method_for(&path, XrpcVerb::Query) {
        Ok(method) => method,
        Err(e) => return error_response(&e),
    };
    let caller = match state.caller(&req, method).await {
        Ok(caller) => caller,
        Err(e) => return error_response(&e),
    };
    log_http_info!("GET {} as {}", method.name(), caller);

    if method == XrpcMethod::GetBlob {
        return get_blob(&state, &caller, query.into_inner()).await;
    }

    let params: Map<String, Value> = query
        .into_inner()
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();
    match rpc::dispatch(state.node.pear(), &caller, method.name(), Value::Object(params)).await {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => error_response(&e),
    }
}

async fn xrpc_procedure(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let method = match method_for(&path, XrpcVerb::Procedure) {
        Ok(method) => method,
        Err(e) => return error_response(&e),
    };
    let caller = match state.caller(&req, method).await {
        Ok(caller) => caller,
        Err(e) => return error_response(&e),
    };
    log_http_info!("POST {} as {}", method.name(), caller);

    if method == XrpcMethod::UploadBlob {
        let mime_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream");
        return match state.node.pear().upload_blob(&caller, &body, mime_type) {
            Ok(blob) => HttpResponse::Ok().json(json!({ "blob": blob })),
            Err(e) => error_response(&e),
        };
    }

    let params = if body.is_empty() {
        Value::Object(Map::new())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => value,
            Err(e) => {
                return error_response(&PearError::InvalidInput(format!("invalid JSON body: {}", e)))
            }
        }
    };
    match rpc::dispatch(state.node.pear(), &caller, method.name(), params).await {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => error_response(&e),
    }
}

async fn get_blob(state: &AppState, caller: &Did, query: HashMap<String, String>) -> HttpResponse {
    let params: rpc::GetBlobParams = match serde_json::to_value(query)
        .map_err(PearError::from)
        .and_then(|value| {
            serde_json::from_value(value).map_err(|e| {
                PearError::InvalidInput(format!("bad parameters for pear.getBlob: {}", e))
            })
        }) {
        Ok(params) => params,
        Err(e) => return error_response(&e),
    };
    match state
        .node
        .pear()
        .get_blob(caller, &params.owner, &params.cid)
        .await
    {
        Ok((blob, bytes)) => HttpResponse::Ok()
            .content_type(blob.mime_type.as_str())
            .body(bytes),
        Err(e) => error_response(&e),
    }
}

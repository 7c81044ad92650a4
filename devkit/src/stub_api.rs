/*!
Backend REST simulé de la plateforme PlantWatch

Sert les routes consommées par la console (auth, devices, monitoring) sur
127.0.0.1 avec un port éphémère. Chaque requête est journalisée avec son
header Authorization pour que les tests vérifient l'injection du token.

Interrupteurs de test :
- `revoke_tokens()` : tout token devient invalide (401)
- `set_delay()` : latence ajoutée avant chaque réponse
*/

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

#[derive(Debug, Clone)]
struct StubUser {
    id: i64,
    email: String,
    password: String,
    is_admin: bool,
}

/// Requête reçue par le stub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
}

impl RecordedRequest {
    pub fn bearer(&self) -> Option<&str> {
        self.authorization.as_deref()?.strip_prefix("Bearer ")
    }
}

#[derive(Default)]
struct Backend {
    users: Vec<StubUser>,
    devices: Vec<Value>,
    history: HashMap<String, Vec<Value>>,
    weather: Option<Value>,
    journal: Vec<RecordedRequest>,
    revoked: bool,
    delay: Option<Duration>,
    next_user_id: i64,
    next_device_id: i64,
}

type Shared = Arc<Mutex<Backend>>;

#[derive(Debug, Clone)]
struct CurrentUser {
    id: i64,
    is_admin: bool,
}

/// Handle sur un backend simulé en cours d'exécution
#[derive(Clone)]
pub struct StubApi {
    addr: SocketAddr,
    backend: Shared,
}

impl StubApi {
    /// Démarre le serveur sur un port libre
    pub async fn spawn() -> Result<Self> {
        let backend: Shared = Arc::new(Mutex::new(Backend {
            next_user_id: 1,
            next_device_id: 1,
            ..Default::default()
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = build_router(backend.clone());

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                log::error!("stub API stopped: {}", e);
            }
        });

        log::info!("🧪 Stub API listening on {}", addr);
        Ok(Self { addr, backend })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Enregistre un compte ; retourne son id
    pub fn add_user(&self, email: &str, password: &str, is_admin: bool) -> i64 {
        let mut backend = self.backend.lock();
        let id = backend.next_user_id;
        backend.next_user_id += 1;
        backend.users.push(StubUser {
            id,
            email: email.to_string(),
            password: password.to_string(),
            is_admin,
        });
        id
    }

    /// Token que le stub délivre à `user_id`
    pub fn token_for(user_id: i64) -> String {
        format!("stub-token-{user_id}")
    }

    /// Provisionne un device ; retourne son id
    pub fn add_device(&self, owner_id: i64, name: &str, category: &str, device_type: &str) -> String {
        let mut backend = self.backend.lock();
        let id = backend.next_device_id;
        backend.next_device_id += 1;
        backend.devices.push(json!({
            "id": id,
            "name": name,
            "category": category,
            "type": device_type,
            "status": "online",
            "owner_id": owner_id,
            "last_seen": Utc::now().to_rfc3339(),
            "configuration": null,
        }));
        id.to_string()
    }

    /// Ajoute un document d'historique (tel que stocké côté monitoring)
    pub fn push_history(&self, device_id: &str, document: Value) {
        self.backend
            .lock()
            .history
            .entry(device_id.to_string())
            .or_default()
            .push(document);
    }

    pub fn set_weather(&self, report: Value) {
        self.backend.lock().weather = Some(report);
    }

    /// Invalide tous les tokens délivrés jusqu'ici
    pub fn revoke_tokens(&self) {
        self.backend.lock().revoked = true;
    }

    pub fn restore_tokens(&self) {
        self.backend.lock().revoked = false;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.backend.lock().delay = delay;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.backend.lock().journal.clone()
    }

    /// Requêtes reçues sur un chemin donné
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }

    pub fn device_count(&self) -> usize {
        self.backend.lock().devices.len()
    }

    pub fn device(&self, id: &str) -> Option<Value> {
        self.backend.lock().devices.iter().find(|d| id_matches(d, id)).cloned()
    }

    pub fn clear_journal(&self) {
        self.backend.lock().journal.clear();
    }
}

fn build_router(backend: Shared) -> Router {
    Router::new()
        .route("/users/auth", post(authenticate))
        .route("/users/add", post(register))
        .route("/users/", get(list_users))
        .route("/devices/my-devices", get(my_devices))
        .route("/devices/admin/all", get(all_devices))
        .route("/devices/add", post(add_device))
        .route("/devices/{id}", put(update_device).delete(delete_device))
        .route("/monitoring/history/{id}", get(history))
        .route("/monitoring/filter/{id}", get(filter))
        .route("/monitoring/weather/current", get(weather))
        .layer(middleware::from_fn_with_state(backend.clone(), require_bearer))
        .with_state(backend)
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn id_matches(device: &Value, id: &str) -> bool {
    match device.get("id") {
        Some(Value::Number(n)) => n.to_string() == id,
        Some(Value::String(s)) => s == id,
        _ => false,
    }
}

async fn require_bearer(State(backend): State<Shared>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let delay = {
        let mut state = backend.lock();
        state.journal.push(RecordedRequest {
            method: req.method().clone(),
            path: path.clone(),
            authorization: authorization.clone(),
        });
        state.delay
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    // Routes publiques
    if path == "/users/auth" || path == "/users/add" {
        return next.run(req).await;
    }

    let user = {
        let state = backend.lock();
        let token = authorization.as_deref().and_then(|v| v.strip_prefix("Bearer "));
        match token {
            Some(token) if !state.revoked => state
                .users
                .iter()
                .find(|u| StubApi::token_for(u.id) == token)
                .map(|u| CurrentUser { id: u.id, is_admin: u.is_admin }),
            _ => None,
        }
    };

    match user {
        Some(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        None => {
            log::warn!("🔒 Rejected {} (no valid token)", path);
            (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Token expired" }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

// POST /users/auth
async fn authenticate(State(backend): State<Shared>, Json(creds): Json<Credentials>) -> Response {
    let state = backend.lock();
    match state
        .users
        .iter()
        .find(|u| u.email == creds.email && u.password == creds.password)
    {
        Some(user) => Json(json!({
            "token": StubApi::token_for(user.id),
            "payload": { "user_id": user.id, "sub": user.email, "role": user.is_admin },
        }))
        .into_response(),
        None => detail(StatusCode::UNAUTHORIZED, "Invalid email or password"),
    }
}

// POST /users/add
async fn register(State(backend): State<Shared>, Json(creds): Json<Credentials>) -> Response {
    let mut state = backend.lock();
    if state.users.iter().any(|u| u.email == creds.email) {
        return detail(StatusCode::BAD_REQUEST, "Email already registered");
    }
    let id = state.next_user_id;
    state.next_user_id += 1;
    state.users.push(StubUser {
        id,
        email: creds.email.clone(),
        password: creds.password,
        is_admin: false,
    });
    (StatusCode::CREATED, Json(json!({ "email": creds.email, "is_admin": false }))).into_response()
}

// GET /users/
async fn list_users(State(backend): State<Shared>, Extension(user): Extension<CurrentUser>) -> Response {
    if !user.is_admin {
        return detail(StatusCode::FORBIDDEN, "Admin privileges required");
    }
    let users: Vec<Value> = backend
        .lock()
        .users
        .iter()
        .map(|u| json!({ "email": u.email, "is_admin": u.is_admin, "created_at": null }))
        .collect();
    Json(users).into_response()
}

// GET /devices/my-devices
async fn my_devices(State(backend): State<Shared>, Extension(user): Extension<CurrentUser>) -> Json<Vec<Value>> {
    let devices = backend
        .lock()
        .devices
        .iter()
        .filter(|d| d.get("owner_id").and_then(Value::as_i64) == Some(user.id))
        .cloned()
        .collect();
    Json(devices)
}

// GET /devices/admin/all
async fn all_devices(State(backend): State<Shared>, Extension(user): Extension<CurrentUser>) -> Response {
    if !user.is_admin {
        return detail(StatusCode::FORBIDDEN, "Admin privileges required");
    }
    Json(backend.lock().devices.clone()).into_response()
}

// POST /devices/add
async fn add_device(
    State(backend): State<Shared>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<Value>,
) -> Response {
    let Some(name) = body.get("name").and_then(Value::as_str).filter(|n| !n.is_empty()) else {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, "name is required");
    };

    let mut state = backend.lock();
    let id = state.next_device_id;
    state.next_device_id += 1;
    let device = json!({
        "id": id,
        "name": name,
        "category": body.get("category").cloned().unwrap_or(json!("iot_device")),
        "type": body.get("type").cloned().unwrap_or(json!("other")),
        "status": "online",
        "owner_id": user.id,
        "last_seen": null,
        "configuration": body.get("configuration").cloned().unwrap_or(Value::Null),
    });
    state.devices.push(device.clone());
    (StatusCode::CREATED, Json(device)).into_response()
}

// PUT /devices/{id}
async fn update_device(
    State(backend): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = backend.lock();
    let Some(device) = state.devices.iter_mut().find(|d| id_matches(d, &id)) else {
        return detail(StatusCode::NOT_FOUND, "Device not found");
    };
    if let (Some(target), Some(changes)) = (device.as_object_mut(), body.as_object()) {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
    Json(device.clone()).into_response()
}

// DELETE /devices/{id}
async fn delete_device(State(backend): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = backend.lock();
    let before = state.devices.len();
    state.devices.retain(|d| !id_matches(d, &id));
    if state.devices.len() == before {
        return detail(StatusCode::NOT_FOUND, "Device not found");
    }
    Json(json!({ "message": "Device deleted" })).into_response()
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

// GET /monitoring/history/{id} - réponse enveloppée
async fn history(
    State(backend): State<Shared>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Json<Value> {
    let documents = backend.lock().history.get(&id).cloned().unwrap_or_default();
    let limit = params.limit.unwrap_or(100);
    let skip = documents.len().saturating_sub(limit);
    // plus récent d'abord, comme le service réel
    let latest: Vec<Value> = documents.into_iter().skip(skip).rev().collect();
    Json(json!({ "history": latest }))
}

#[derive(Debug, Deserialize)]
struct FilterParams {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

// GET /monitoring/filter/{id} - tableau nu
async fn filter(
    State(backend): State<Shared>,
    Path(id): Path<String>,
    Query(params): Query<FilterParams>,
) -> Json<Vec<Value>> {
    let documents = backend.lock().history.get(&id).cloned().unwrap_or_default();
    let in_range = |doc: &Value| {
        let Some(ts) = doc
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        else {
            return true;
        };
        let ts = ts.with_timezone(&Utc);
        params.start.map_or(true, |start| ts >= start) && params.end.map_or(true, |end| ts <= end)
    };
    let mut matching: Vec<Value> = documents.into_iter().filter(|d| in_range(d)).collect();
    if let Some(limit) = params.limit {
        matching.truncate(limit);
    }
    Json(matching)
}

// GET /monitoring/weather/current
async fn weather(State(backend): State<Shared>) -> Json<Value> {
    let report = backend.lock().weather.clone();
    Json(report.unwrap_or_else(|| {
        json!({ "status": "waiting", "message": "Weather data not yet available" })
    }))
}

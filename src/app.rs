#![cfg(feature = "web")]
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::{AdminSettings, Config};
use crate::equipment::{EquipmentRecord, UploadSession};
use crate::error::{ApiError, ApiResult};
use crate::graph::{ChartKind, ChartOptions, render_chart};
use crate::history::list_recent;
use crate::loader::{check_filename, from_csv_bytes};
use crate::login::{
    AdminAccount, Authenticator, LoginRequest, RegisterRequest, UserProfile, UserStore,
    parse_authorization,
};
use crate::report;
use crate::saving::{EquipmentStore, SessionData, SessionSelector};
use crate::summary::{SummaryStatistics, summarize};

/// Name of the multipart field carrying the CSV file
pub const UPLOAD_FIELD: &str = "file";

// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state handed to every handler
pub struct AppState {
    pub store: EquipmentStore,
    pub auth: Authenticator,
    pub config: Config,
}

impl AppState {
    /// Open the session store and user database under `config.data_dir`
    pub fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let store = EquipmentStore::open(&config.data_dir)?;
        let users = UserStore::open(&config.data_dir)?;
        Ok(AppState {
            store,
            auth: Authenticator::new(users, config.token_ttl),
            config,
        })
    }

    /// Create the configured admin account, if one is configured
    pub fn bootstrap_admin(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(admin) = &self.config.admin {
            self.auth.ensure_admin(&admin_account(admin))?;
        }
        Ok(())
    }
}

fn admin_account(settings: &AdminSettings) -> AdminAccount {
    AdminAccount {
        username: settings.username.clone(),
        password: settings.password.clone(),
        email: settings.email.clone(),
    }
}

/// The authenticated caller, inserted into request extensions by [`require_auth`]
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    session_id: Option<String>,
}

impl SessionQuery {
    /// Which session the request targets; absent or empty means the latest
    pub fn selector(&self) -> ApiResult<SessionSelector> {
        match self.session_id.as_deref().map(str::trim) {
            None | Some("") => Ok(SessionSelector::Latest),
            Some(raw) => raw
                .parse::<u64>()
                .map(SessionSelector::Id)
                .map_err(|_| ApiError::validation(format!("Invalid session_id: {raw:?}"))),
        }
    }
}

#[derive(Serialize)]
struct AuthResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    token: String,
    user: UserProfile,
}

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    session_id: u64,
    record_count: usize,
    skipped_rows: usize,
    summary: SummaryStatistics,
}

#[derive(Serialize)]
struct SummaryResponse {
    session_id: Option<u64>,
    filename: Option<String>,
    uploaded_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    summary: SummaryStatistics,
}

#[derive(Serialize)]
struct HistoryEntry {
    id: u64,
    filename: String,
    uploaded_at: DateTime<Utc>,
    equipment_count: usize,
    summary: SummaryStatistics,
}

impl From<UploadSession> for HistoryEntry {
    fn from(session: UploadSession) -> Self {
        HistoryEntry {
            id: session.id,
            filename: session.filename,
            uploaded_at: session.uploaded_at,
            equipment_count: session.equipment_count,
            summary: session.summary,
        }
    }
}

/// Build the application router
///
/// Everything except login and registration sits behind [`require_auth`].
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    let protected = Router::new()
        .route("/auth/logout/", post(logout))
        .route("/upload/", post(upload))
        .route("/equipment/", get(list_equipment))
        .route("/summary/", get(get_summary))
        .route("/history/", get(get_history))
        .route("/report/pdf/", get(report_pdf))
        .route("/chart/:kind/", get(chart))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/auth/login/", post(login))
        .route("/auth/register/", post(register))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Open the state for `config` and serve until the process is stopped
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let bind = config.bind;
    let state = Arc::new(AppState::new(config)?);
    state.bootstrap_admin()?;

    let listener = TcpListener::bind(bind).await?;
    info!("listening on http://{}", listener.local_addr()?);
    serve(listener, state).await?;
    Ok(())
}

/// Serve the router on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

/// Authentication middleware
///
/// Resolves the `Authorization: Token <value>` header to a user and stores an
/// [`AuthUser`] in the request extensions; anything else is answered with 401.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match state.auth.authenticate(auth_header.as_deref()) {
        Ok(username) => {
            let token = auth_header
                .as_deref()
                .and_then(parse_authorization)
                .unwrap_or_default()
                .to_string();
            request.extensions_mut().insert(AuthUser { username, token });
            next.run(request).await
        }
        Err(e) => {
            warn!("rejected {} {}: {}", request.method(), request.uri().path(), e);
            ApiError::from(e).into_response()
        }
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    info!(
        "{} {} -> {} ({} ms)",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

// Run password hashing and disk writes off the async worker threads
async fn blocking<T, F>(state: &Arc<AppState>, work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> ApiResult<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|e| ApiError::internal(format!("blocking task failed: {e}")))?
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let (token, user) = blocking(&state, move |state| {
        Ok(state
            .auth
            .login(&credentials.username, &credentials.password)?)
    })
    .await?;
    Ok(Json(AuthResponse {
        message: None,
        token,
        user: UserProfile::from(&user),
    }))
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let (token, user) = blocking(&state, move |state| Ok(state.auth.register(&request)?)).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: Some("User registered successfully"),
            token,
            user: UserProfile::from(&user),
        }),
    ))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<StatusCode> {
    state.auth.logout(&user.token)?;
    info!("user {} logged out", user.username);
    Ok(StatusCode::NO_CONTENT)
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("Could not read uploaded file: {e}")))?;
        file = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = file.ok_or_else(|| ApiError::validation("No file provided"))?;

    check_filename(&filename)?;
    let owner = user.username.clone();
    let name = filename.clone();
    let (session, skipped_rows) = blocking(&state, move |state| {
        let parsed = from_csv_bytes(&bytes, state.config.max_upload_bytes)?;
        let skipped_rows = parsed.skipped_count();
        let session = state.store.create_session(&owner, &name, parsed.records)?;
        Ok((session, skipped_rows))
    })
    .await?;
    info!(
        "{} uploaded {}: {} records accepted, {} skipped",
        user.username, filename, session.equipment_count, skipped_rows
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "File uploaded successfully",
            session_id: session.id,
            record_count: session.equipment_count,
            skipped_rows,
            summary: session.summary,
        }),
    ))
}

async fn list_equipment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<Vec<EquipmentRecord>>> {
    let records = state.store.records(&user.username, query.selector()?)?;
    Ok(Json(records))
}

async fn get_summary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Json<SummaryResponse>> {
    let response = match state.store.resolve(&user.username, query.selector()?)? {
        Some(SessionData { session, records }) => SummaryResponse {
            session_id: Some(session.id),
            filename: Some(session.filename),
            uploaded_at: Some(session.uploaded_at),
            summary: summarize(&records),
        },
        None => SummaryResponse {
            session_id: None,
            filename: None,
            uploaded_at: None,
            summary: SummaryStatistics::default(),
        },
    };
    Ok(Json(response))
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let sessions = list_recent(&state.store, &user.username, state.config.history_limit)?;
    Ok(Json(sessions.into_iter().map(HistoryEntry::from).collect()))
}

async fn report_pdf(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Response> {
    let data = resolve_existing(&state, &user, &query)?;
    let pdf = report::render(Some(&data.session), &data.records, Utc::now())?;
    info!(
        "rendered report for session {} ({} bytes)",
        data.session.id,
        pdf.len()
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"equipment_report_{}.pdf\"",
                data.session.id
            ),
        )
        .body(Body::from(pdf))
        .map_err(|e| ApiError::internal(e.to_string()))
}

async fn chart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<String>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Response> {
    let kind: ChartKind = kind.parse()?;
    let data = resolve_existing(&state, &user, &query)?;
    let png = render_chart(
        kind,
        &data.records,
        &summarize(&data.records),
        &ChartOptions::default(),
    )?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

// Like `EquipmentStore::resolve`, but having no sessions at all is a 404
fn resolve_existing(
    state: &AppState,
    user: &AuthUser,
    query: &SessionQuery,
) -> ApiResult<SessionData> {
    state
        .store
        .resolve(&user.username, query.selector()?)?
        .ok_or_else(|| ApiError::not_found("No upload sessions found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(raw: Option<&str>) -> SessionQuery {
        SessionQuery {
            session_id: raw.map(str::to_string),
        }
    }

    #[test]
    fn session_query_selects_latest_by_default() {
        assert_eq!(query(None).selector(), Ok(SessionSelector::Latest));
        assert_eq!(query(Some("")).selector(), Ok(SessionSelector::Latest));
        assert_eq!(query(Some(" 12 ")).selector(), Ok(SessionSelector::Id(12)));
    }

    #[test]
    fn non_numeric_session_ids_are_rejected() {
        let err = query(Some("abc")).selector().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(query(Some("-1")).selector().is_err());
    }
}

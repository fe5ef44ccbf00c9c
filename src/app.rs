use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use serde_json::json;
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatch::{ApplicationForm, Backends, Notice, QuoteForm, SubmitOutcome};
use crate::error::AppError;
use crate::record::{AVAILABILITY, ApplicationRecord, EDUCATION_LEVELS, EXPERIENCE_LEVELS, QuoteRecord, SERVICES};
use crate::rate_limit::prune_expired;
use crate::sink::{FormRelay, RestTableSink};
use crate::storage::{FileStore, KeyValueStore, ScopedStore};
use crate::validation::FieldError;

/// Cookie identifying a browser, standing in for its local storage
pub const CLIENT_COOKIE: &str = "client";

/// How often expired cooldowns are pruned and the store is written out
pub const STORE_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

pub struct AppState {
    /// Shared backends; `store` is the root of every client's scoped store
    pub backends: Backends,
    /// Clients with a submission in flight
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a client as submitting until dropped
struct ClientSlot<'a> {
    state: &'a AppState,
    client: String,
}

impl Drop for ClientSlot<'_> {
    fn drop(&mut self) {
        self.state.in_flight().remove(&self.client);
    }
}

impl AppState {
    /// Create the shared state.
    ///
    /// # Arguments
    /// * `backends` - Backends shared by all clients. The store is scoped per
    ///   client before any form sees it.
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        // the set stays consistent even if a holder panicked
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve `client` for one submission, or `None` if it already has one in flight.
    fn claim(&self, client: &str) -> Option<ClientSlot<'_>> {
        if !self.in_flight().insert(client.to_string()) {
            return None;
        }
        Some(ClientSlot {
            state: self,
            client: client.to_string(),
        })
    }

    /// Backends whose store only sees keys belonging to `client`.
    fn backends_for(&self, client: &str) -> Backends {
        Backends {
            store: Arc::new(ScopedStore::new(self.backends.store.clone(), client)),
            ..self.backends.clone()
        }
    }
}

#[derive(Serialize)]
struct SubmitResponse<'a> {
    status: &'static str,
    message: Option<&'a str>,
    errors: &'a [FieldError],
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<i64>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/services", get(list_services))
        .route("/api/options", get(list_options))
        .route("/api/quote", post(submit_quote))
        .route("/api/applications", post(submit_application))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP service and block until it shuts down.
///
/// # Errors
/// * Returns an error if the store cannot be opened
/// * Returns an error if the sinks cannot be built or the address cannot be bound
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let backends = Backends {
        primary: Arc::new(RestTableSink::new(&config.supabase_url, &config.supabase_key)?),
        relay: Arc::new(FormRelay::new(&config.relay_url)?),
        store: Arc::new(FileStore::open(&config.store_path)?),
        clock: Arc::new(SystemClock),
        relay_policy: config.relay_policy,
    };
    let store = backends.store.clone();
    let maintenance = tokio::spawn(maintain_store(store.clone(), backends.clock.clone()));
    let app = router(Arc::new(AppState::new(backends)));

    let listener = TcpListener::bind(config.addr).await?;
    info!("Listening on http://{}", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    tokio::task::spawn_blocking(move || store.flush()).await??;

    info!("Server shut down");
    Ok(())
}

/// Periodically drop expired cooldowns and write the store, off the async workers.
async fn maintain_store(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) {
    let mut interval = tokio::time::interval(STORE_MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;

        let store = store.clone();
        let now = clock.now_millis();
        let result = tokio::task::spawn_blocking(move || {
            prune_expired(store.as_ref(), now)?;
            store.flush()
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Store maintenance failed: {e}"),
            Err(e) => warn!("Store maintenance task failed: {e}"),
        }
    }
}

async fn list_services() -> impl IntoResponse {
    Json(SERVICES)
}

async fn list_options() -> impl IntoResponse {
    Json(json!({
        "education": EDUCATION_LEVELS,
        "experience": EXPERIENCE_LEVELS,
        "availability": AVAILABILITY,
    }))
}

/// Reuse the client id from the cookie, or issue a new one.
fn client_id(jar: CookieJar) -> (CookieJar, String) {
    if let Some(cookie) = jar.get(CLIENT_COOKIE) {
        if Uuid::parse_str(cookie.value()).is_ok() {
            let id = cookie.value().to_string();
            return (jar, id);
        }
    }

    let id = Uuid::new_v4().to_string();
    let mut cookie = Cookie::new(CLIENT_COOKIE, id.clone());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);

    (jar.add(cookie), id)
}

fn respond(outcome: &SubmitOutcome, notice: Option<&Notice>) -> Response {
    let message = notice.map(|n| n.message.as_str());
    let none: &[FieldError] = &[];

    let (code, status, errors, retry_after_ms) = match outcome {
        SubmitOutcome::Submitted => (StatusCode::OK, "submitted", none, None),
        SubmitOutcome::Busy => (StatusCode::CONFLICT, "busy", none, None),
        SubmitOutcome::RateLimited(limited) => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            none,
            Some(limited.retry_after_ms),
        ),
        SubmitOutcome::Invalid(report) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid",
            report.errors.as_slice(),
            None,
        ),
        SubmitOutcome::Failed => (StatusCode::BAD_GATEWAY, "failed", none, None),
    };

    let body = SubmitResponse {
        status,
        message,
        errors,
        retry_after_ms,
    };

    (code, Json(body)).into_response()
}

async fn submit_quote(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<QuoteRecord>, JsonRejection>,
) -> Result<(CookieJar, Response), AppError> {
    let Json(record) = payload?;
    let (jar, client) = client_id(jar);

    let Some(_slot) = state.claim(&client) else {
        info!("Quote request refused, client already submitting");
        return Ok((jar, respond(&SubmitOutcome::Busy, None)));
    };

    let mut form = QuoteForm::with_record(state.backends_for(&client), record);
    let outcome = form.submit().await;

    Ok((jar, respond(&outcome, form.notice())))
}

async fn submit_application(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<ApplicationRecord>, JsonRejection>,
) -> Result<(CookieJar, Response), AppError> {
    let Json(record) = payload?;
    let (jar, client) = client_id(jar);

    let Some(_slot) = state.claim(&client) else {
        info!("Application refused, client already submitting");
        return Ok((jar, respond(&SubmitOutcome::Busy, None)));
    };

    let mut form = ApplicationForm::with_record(state.backends_for(&client), record);
    let outcome = form.submit().await;

    Ok((jar, respond(&outcome, form.notice())))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

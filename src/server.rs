//! Hint Unlocks Server
//!
//! HTTP endpoints for purchasing hints and listing unlocks. The gateway in
//! front of this service authenticates callers and forwards the principal in
//! `X-User-Id`, `X-Team-Id` and `X-Admin` headers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{error, info, info_span};
use uuid::Uuid;

use crate::config::CompetitionConfig;
use crate::error::UnlockError;
use crate::models::{Principal, UnlockRequest};
use crate::transactor::UnlockTransactor;

const USER_HEADER: &str = "x-user-id";
const TEAM_HEADER: &str = "x-team-id";
const ADMIN_HEADER: &str = "x-admin";

pub struct AppState {
    pub transactor: Arc<UnlockTransactor>,
    pub competition: CompetitionConfig,
    pub started_at: std::time::Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/v1/unlocks",
            get(list_unlocks_handler).post(create_unlock_handler),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiResponse = (StatusCode, Json<Value>);

fn success(data: impl Serialize) -> ApiResponse {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": data })),
    )
}

fn failure(status: StatusCode, errors: BTreeMap<String, String>) -> ApiResponse {
    (
        status,
        Json(json!({ "success": false, "errors": errors })),
    )
}

fn failure_one(status: StatusCode, field: &str, message: &str) -> ApiResponse {
    let mut errors = BTreeMap::new();
    errors.insert(field.to_string(), message.to_string());
    failure(status, errors)
}

fn internal_error() -> ApiResponse {
    failure_one(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "Internal server error",
    )
}

/// Caller identity as forwarded by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Caller {
    user_id: i64,
    team_id: Option<i64>,
    is_admin: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn caller_from_headers(headers: &HeaderMap) -> Option<Caller> {
    let user_id = header_str(headers, USER_HEADER)?.parse().ok()?;
    let team_id = match header_str(headers, TEAM_HEADER) {
        Some(raw) => Some(raw.parse().ok()?),
        None => None,
    };
    let is_admin = header_str(headers, ADMIN_HEADER)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);
    Some(Caller {
        user_id,
        team_id,
        is_admin,
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "healthy": true,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// POST /api/v1/unlocks - spend points on a hint
// ============================================================================

async fn create_unlock_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<UnlockRequest>, JsonRejection>,
) -> ApiResponse {
    let now = Utc::now();
    if !state.competition.is_active(now) {
        let message = match state.competition.start {
            Some(start) if now < start => "The competition has not started yet",
            _ => "The competition has ended",
        };
        return failure_one(StatusCode::FORBIDDEN, "ctf", message);
    }

    let caller = match caller_from_headers(&headers) {
        Some(c) => c,
        None => return failure_one(StatusCode::UNAUTHORIZED, "auth", "Authentication required"),
    };

    let principal = match Principal::for_mode(
        state.transactor.mode(),
        caller.user_id,
        caller.team_id,
    ) {
        Some(p) => p,
        None => return failure_one(StatusCode::FORBIDDEN, "team", "You must join a team"),
    };

    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => return failure_one(StatusCode::BAD_REQUEST, "json", &e.body_text()),
    };

    let span = info_span!(
        "unlock",
        request_id = %Uuid::new_v4(),
        account_id = principal.account_id
    );
    let transactor = state.transactor.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        transactor.purchase(&principal, &request)
    })
    .await;

    match result {
        Ok(Ok(unlock)) => success(unlock),
        Ok(Err(e)) => {
            if let UnlockError::Storage(ref inner) = e {
                error!("Unlock failed on storage: {}", inner);
            }
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            failure(status, e.field_errors())
        }
        Err(e) => {
            error!("Unlock task panicked: {}", e);
            internal_error()
        }
    }
}

// ============================================================================
// GET /api/v1/unlocks - every unlock, admins only
// ============================================================================

async fn list_unlocks_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResponse {
    match caller_from_headers(&headers) {
        Some(caller) if caller.is_admin => {}
        Some(_) => return failure_one(StatusCode::FORBIDDEN, "auth", "Admins only"),
        None => return failure_one(StatusCode::UNAUTHORIZED, "auth", "Authentication required"),
    }

    let storage = state.transactor.storage().clone();
    match tokio::task::spawn_blocking(move || storage.list_unlocks()).await {
        Ok(Ok(unlocks)) => success(unlocks),
        Ok(Err(e)) => {
            error!("Failed to list unlocks: {:#}", e);
            internal_error()
        }
        Err(e) => {
            error!("Unlock listing task panicked: {}", e);
            internal_error()
        }
    }
}

/// Run the server
pub async fn run_server(
    host: &str,
    port: u16,
    transactor: Arc<UnlockTransactor>,
    competition: CompetitionConfig,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        transactor,
        competition,
        started_at: std::time::Instant::now(),
    });

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Hint Unlocks server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompetitionMode;
    use crate::models::NewAward;
    use crate::registry::ItemRegistry;
    use crate::standings::MemoryStandings;
    use crate::storage::Storage;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        user: i64,
        team: i64,
        loner: i64,
        cheap: i64,
        pricey: i64,
    }

    fn app_with(competition: CompetitionConfig) -> TestApp {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let team = storage.create_team("red").unwrap();
        let user = storage.create_user("alice", Some(team)).unwrap();
        let loner = storage.create_user("solo", None).unwrap();
        let challenge = storage.create_challenge("Crypto 1", "crypto").unwrap();
        let cheap = storage.create_hint(challenge.id, "xor", 50).unwrap();
        let pricey = storage.create_hint(challenge.id, "key is 0x42", 100).unwrap();
        storage
            .grant_award(&NewAward {
                user_id: Some(user),
                team_id: Some(team),
                name: "seed".to_string(),
                description: String::new(),
                category: String::new(),
                value: 500,
            })
            .unwrap();

        let transactor = Arc::new(UnlockTransactor::new(
            storage,
            ItemRegistry::default(),
            Arc::new(MemoryStandings::new()),
            CompetitionMode::Teams,
        ));
        let state = Arc::new(AppState {
            transactor,
            competition,
            started_at: std::time::Instant::now(),
        });

        TestApp {
            router: create_router(state),
            user,
            team,
            loner,
            cheap,
            pricey,
        }
    }

    fn app() -> TestApp {
        app_with(CompetitionConfig::default())
    }

    fn post(user: Option<i64>, team: Option<i64>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/unlocks")
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user.to_string());
        }
        if let Some(team) = team {
            builder = builder.header(TEAM_HEADER, team.to_string());
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn unlock_body(target: i64) -> String {
        json!({ "type": "hints", "target": target }).to_string()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_purchase_flow() {
        let app = app();

        let (status, body) = send(
            &app.router,
            post(Some(app.user), Some(app.team), &unlock_body(app.pricey)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(
            body["errors"]["score"],
            "Hints have to be unlocked in cost order"
        );

        let (status, body) = send(
            &app.router,
            post(Some(app.user), Some(app.team), &unlock_body(app.cheap)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["target"], app.cheap);
        assert_eq!(body["data"]["type"], "hints");
        assert_eq!(body["data"]["team_id"], app.team);

        let (status, body) = send(
            &app.router,
            post(Some(app.user), Some(app.team), &unlock_body(app.cheap)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"]["score"], "You have already unlocked this hint");
    }

    #[tokio::test]
    async fn test_not_found_and_malformed() {
        let app = app();

        let (status, body) = send(
            &app.router,
            post(Some(app.user), Some(app.team), &unlock_body(9_999)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["errors"]["target"].is_string());

        let (status, _) = send(
            &app.router,
            post(
                Some(app.user),
                Some(app.team),
                &json!({ "type": "awards", "target": app.cheap }).to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app.router,
            post(Some(app.user), Some(app.team), r#"{"target": 1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["type"].is_string());

        let (status, body) = send(
            &app.router,
            post(Some(app.user), Some(app.team), "not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["json"].is_string());
    }

    #[tokio::test]
    async fn test_requires_authenticated_team_member() {
        let app = app();

        let (status, _) = send(&app.router, post(None, None, &unlock_body(app.cheap))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            send(&app.router, post(Some(app.loner), None, &unlock_body(app.cheap))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["errors"]["team"], "You must join a team");
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let app = app();

        let (status, body) = send(
            &app.router,
            post(Some(9_999), Some(app.team), &unlock_body(app.cheap)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["errors"]["user"], "User 9999 not found");
    }

    #[tokio::test]
    async fn test_outside_competition_window() {
        let app = app_with(CompetitionConfig {
            mode: CompetitionMode::Teams,
            start: Some(Utc::now() + Duration::hours(1)),
            end: None,
        });

        let (status, body) = send(
            &app.router,
            post(Some(app.user), Some(app.team), &unlock_body(app.cheap)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["errors"]["ctf"], "The competition has not started yet");
    }

    #[tokio::test]
    async fn test_listing_is_admin_only() {
        let app = app();
        send(
            &app.router,
            post(Some(app.user), Some(app.team), &unlock_body(app.cheap)),
        )
        .await;

        let request = Request::builder()
            .uri("/api/v1/unlocks")
            .header(USER_HEADER, app.user.to_string())
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let request = Request::builder()
            .uri("/api/v1/unlocks")
            .header(USER_HEADER, app.user.to_string())
            .header(ADMIN_HEADER, "true")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["target"], app.cheap);
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], true);
    }

    #[test]
    fn test_caller_headers() {
        let mut headers = HeaderMap::new();
        assert!(caller_from_headers(&headers).is_none());

        headers.insert(USER_HEADER, "12".parse().unwrap());
        let caller = caller_from_headers(&headers).unwrap();
        assert_eq!(caller.user_id, 12);
        assert_eq!(caller.team_id, None);
        assert!(!caller.is_admin);

        headers.insert(TEAM_HEADER, "abc".parse().unwrap());
        assert!(caller_from_headers(&headers).is_none());

        headers.insert(TEAM_HEADER, "3".parse().unwrap());
        headers.insert(ADMIN_HEADER, "TRUE".parse().unwrap());
        let caller = caller_from_headers(&headers).unwrap();
        assert_eq!(caller.team_id, Some(3));
        assert!(caller.is_admin);
    }
}

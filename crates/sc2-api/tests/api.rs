#![allow(unused_crate_dependencies)]

//! Exercises the API client against a local mock of the Battle.net endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use ladder_store::{GameResult, League, ProfileId, Race, Server};
use sc2_api::{ApiConf, ApiError, ConfigProvider, RetryPolicy, Sc2Api};
use serde_json::json;
use url::Url;

const PROFILE: ProfileId = ProfileId {
    server: Server::Europe,
    realm: 1,
    player_id: 221986,
};

#[derive(Default)]
struct MemoryConfig {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryConfig {
    fn with_credentials() -> Arc<Self> {
        let config = Self::default();
        {
            let mut values = config.values.lock().unwrap();
            values.insert("api_key".to_owned(), "key".to_owned());
            values.insert("api_secret".to_owned(), "secret".to_owned());
        }
        Arc::new(config)
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ConfigProvider for MemoryConfig {
    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.lock().unwrap().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct MockState {
    issued_tokens: AtomicU32,
    metadata_calls: AtomicU32,
}

type SharedState = Arc<MockState>;

fn require_token(query: &HashMap<String, String>) -> Result<(), Response> {
    let locale_ok = query.get("locale").map(String::as_str) == Some("en_US");
    let token_ok = query.get("access_token").is_some_and(|token| token.starts_with("token-"));

    if locale_ok && token_ok {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response())
    }
}

async fn token(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let has_basic_auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Basic "));

    if !has_basic_auth || form.get("grant_type").map(String::as_str) != Some("client_credentials") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_client"}))).into_response();
    }

    let n = state.issued_tokens.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"access_token": format!("token-{n}"), "token_type": "bearer"})).into_response()
}

async fn check_token(Query(query): Query<HashMap<String, String>>) -> StatusCode {
    match query.get("token").map(String::as_str) {
        Some("token-valid") => StatusCode::OK,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn season(Path(region): Path<i64>, Query(query): Query<HashMap<String, String>>) -> Response {
    if let Err(response) = require_token(&query) {
        return response;
    }

    Json(json!({
        "seasonId": 58 + region,
        "number": "1",
        "year": 2024,
        "startDate": "1700000000",
        "endDate": "1710000000",
    }))
    .into_response()
}

async fn metadata(State(state): State<SharedState>, Query(query): Query<HashMap<String, String>>) -> Response {
    if let Err(response) = require_token(&query) {
        return response;
    }

    match state.metadata_calls.fetch_add(1, Ordering::SeqCst) {
        0 => StatusCode::GATEWAY_TIMEOUT.into_response(),
        1 => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        _ => Json(json!({"name": "Serral", "profileId": "221986"})).into_response(),
    }
}

async fn ladder_summary(Query(query): Query<HashMap<String, String>>) -> Response {
    if let Err(response) = require_token(&query) {
        return response;
    }

    Json(json!({
        "allLadderMemberships": [
            {"ladderId": "292783", "localizedGameMode": "1v1 Grandmaster"},
            {"ladderId": "292784", "localizedGameMode": "2v2 Master"},
            {"ladderId": 292790, "localizedGameMode": "1v1 Master"},
            {"ladderId": "292783", "localizedGameMode": "1v1 Grandmaster"},
        ]
    }))
    .into_response()
}

fn member(id: &str, race: &str) -> serde_json::Value {
    json!({"id": id, "realm": 1, "region": 2, "displayName": "Serral", "favoriteRace": race})
}

async fn ladder(
    Path((_region, _realm, _id, ladder_id)): Path<(i64, i64, i64, i64)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(response) = require_token(&query) {
        return response;
    }

    match ladder_id {
        // Ranks are accurate for the first entry and stale for the second.
        292783 => Json(json!({
            "league": "GRANDMASTER",
            "ranksAndPools": [
                {"rank": 1, "mmr": 7200, "bonusPool": 0},
                {"rank": 2, "mmr": 6000, "bonusPool": 0},
            ],
            "ladderTeams": [
                {"teamMembers": [member("221986", "zerg")], "mmr": 7200, "wins": 50, "losses": 10,
                 "joinTimestamp": 1700000100},
                {"teamMembers": [member("1", "terran")], "mmr": 7000, "wins": 5, "losses": 5,
                 "joinTimestamp": 1700000200},
                {"teamMembers": [member("221986", "protoss")], "mmr": 6100, "wins": 7, "losses": 3,
                 "joinTimestamp": 1700000300},
            ],
        }))
        .into_response(),
        _ => Json(json!({
            "league": "MASTER",
            "ranksAndPools": [{"rank": 1, "mmr": 5000}],
            "ladderTeams": [
                {"teamMembers": [member("999", "zerg")], "mmr": 5000, "wins": 1, "losses": 1,
                 "joinTimestamp": 1700000000},
            ],
        }))
        .into_response(),
    }
}

async fn match_history(Query(query): Query<HashMap<String, String>>) -> Response {
    if let Err(response) = require_token(&query) {
        return response;
    }

    Json(json!({
        "matches": [
            {"map": "Alcyone", "type": "1v1", "decision": "WIN", "speed": "FASTER", "date": 1700001000},
            {"map": "Goldenaura", "type": "2v2", "decision": "LOSS", "speed": "FASTER", "date": 1700000900},
            {"map": "Oceanborn", "type": "1v1", "decision": "LOSS", "speed": "FASTER", "date": 1700000800},
        ]
    }))
    .into_response()
}

async fn spawn_mock() -> (SocketAddr, SharedState) {
    let state = SharedState::default();

    let router = Router::new()
        .route("/oauth/token", post(token))
        .route("/oauth/check_token", get(check_token))
        .route("/sc2/ladder/season/{region}", get(season))
        .route("/sc2/metadata/profile/{region}/{realm}/{id}", get(metadata))
        .route("/sc2/profile/{region}/{realm}/{id}/ladder/summary", get(ladder_summary))
        .route("/sc2/profile/{region}/{realm}/{id}/ladder/{ladder_id}", get(ladder))
        .route("/sc2/legacy/profile/{region}/{realm}/{id}/matches", get(match_history))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, state)
}

fn api_conf(addr: SocketAddr) -> ApiConf {
    ApiConf {
        api_base_url: Url::parse(&format!("http://{addr}")).unwrap(),
        oauth_base_url: Url::parse(&format!("http://{addr}/oauth/")).unwrap(),
        retry: RetryPolicy {
            max_attempts: 10,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
        },
        timeout: Duration::from_secs(5),
    }
}

async fn new_api(addr: SocketAddr, config: Arc<MemoryConfig>) -> Sc2Api {
    let api = Sc2Api::new(api_conf(addr), config).unwrap();
    api.read_config().await.unwrap();
    api
}

#[tokio::test]
async fn access_token_is_requested_once_and_stored() {
    let (addr, state) = spawn_mock().await;
    let config = MemoryConfig::with_credentials();
    let api = new_api(addr, Arc::clone(&config)).await;

    let token = api.get_access_token().await.unwrap();
    assert_eq!(token, "token-1");
    assert_eq!(config.get("access_token").as_deref(), Some("token-1"));

    // The fresh token is considered checked.
    assert_eq!(api.get_access_token().await.unwrap(), "token-1");
    assert_eq!(state.issued_tokens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stored_token_is_checked_before_use() {
    let (addr, state) = spawn_mock().await;
    let config = MemoryConfig::with_credentials();
    config.set_config("access_token", "token-valid").await.unwrap();

    let api = new_api(addr, Arc::clone(&config)).await;
    assert_eq!(api.get_access_token().await.unwrap(), "token-valid");
    assert_eq!(state.issued_tokens.load(Ordering::SeqCst), 0);
    assert_eq!(api.request_count(), 1);

    // An expired token is replaced.
    config.set_config("access_token", "token-expired").await.unwrap();
    api.read_config().await.unwrap();
    assert_eq!(api.get_access_token().await.unwrap(), "token-1");
    assert_eq!(state.issued_tokens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_attempts_yield_invalid_response() {
    let (addr, _state) = spawn_mock().await;

    // The mock has no such route and answers with an empty body, which is retried.
    let conf = ApiConf {
        oauth_base_url: Url::parse(&format!("http://{addr}/nowhere")).unwrap(),
        retry: RetryPolicy {
            max_attempts: 2,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
        },
        ..api_conf(addr)
    };
    let api = Sc2Api::new(conf, MemoryConfig::with_credentials()).unwrap();
    api.read_config().await.unwrap();

    let error = api.get_access_token().await.unwrap_err();
    assert!(matches!(error, ApiError::InvalidResponse { status: 0, .. }), "{error:?}");
    assert_eq!(api.retry_count(), 2);
    assert_eq!(api.request_count(), 2);
}

#[tokio::test]
async fn season_is_parsed() {
    let (addr, _state) = spawn_mock().await;
    let api = new_api(addr, MemoryConfig::with_credentials()).await;

    let season = api.get_season(Server::Europe).await.unwrap();
    assert_eq!(season.season_id, 60);
    assert_eq!(season.number, 1);
    assert_eq!(season.year, 2024);
    assert_eq!(season.server, Server::Europe);
    assert_eq!(season.start.unix_timestamp(), 1_700_000_000);
    assert_eq!(season.end.unix_timestamp(), 1_710_000_000);
}

#[tokio::test]
async fn timeouts_and_garbage_are_retried() {
    let (addr, state) = spawn_mock().await;
    let api = new_api(addr, MemoryConfig::with_credentials()).await;

    let metadata = api.get_metadata(PROFILE).await.unwrap();
    assert_eq!(metadata["name"], "Serral");
    assert_eq!(state.metadata_calls.load(Ordering::SeqCst), 3);
    assert_eq!(api.retry_count(), 2);
    // token + 3 metadata attempts
    assert_eq!(api.request_count(), 4);
}

#[tokio::test]
async fn only_one_vs_one_ladders_are_listed() {
    let (addr, _state) = spawn_mock().await;
    let api = new_api(addr, MemoryConfig::with_credentials()).await;

    let ladders = api.get_ladders(PROFILE).await.unwrap();
    assert_eq!(ladders.into_iter().collect::<Vec<_>>(), [292783, 292790]);
}

#[tokio::test]
async fn ladder_teams_are_matched_to_the_profile() {
    let (addr, _state) = spawn_mock().await;
    let api = new_api(addr, MemoryConfig::with_credentials()).await;

    let entries = api.get_ladder_data(PROFILE, 292783).await.unwrap();
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0].race, Race::Zerg);
    assert_eq!(entries[0].mmr, 7200);
    assert_eq!(entries[0].games, 60);
    assert_eq!(entries[0].league, League::Grandmaster);
    assert_eq!(entries[0].name, "Serral");
    assert_eq!(entries[0].joined.unix_timestamp(), 1_700_000_100);

    // Found through the fallback search; the team MMR wins over the pool MMR.
    assert_eq!(entries[1].race, Race::Protoss);
    assert_eq!(entries[1].mmr, 6100);
    assert_eq!(entries[1].wins, 7);
    assert_eq!(entries[1].losses, 3);
    assert_eq!(entries[1].ladder_id, 292783);
}

#[tokio::test]
async fn foreign_ladder_is_rejected() {
    let (addr, _state) = spawn_mock().await;
    let api = new_api(addr, MemoryConfig::with_credentials()).await;

    let error = api.get_ladder_data(PROFILE, 1).await.unwrap_err();
    assert!(matches!(error, ApiError::TeamNotFound { ladder_id: 1, .. }), "{error:?}");
}

#[tokio::test]
async fn match_history_keeps_one_vs_one_games() {
    let (addr, _state) = spawn_mock().await;
    let api = new_api(addr, MemoryConfig::with_credentials()).await;

    let history = api.get_match_history(PROFILE).await.unwrap();
    let results: Vec<_> = history.iter().map(|m| m.result).collect();
    assert_eq!(results, [GameResult::Win, GameResult::Loss]);
    assert_eq!(history[1].datetime.unix_timestamp(), 1_700_000_800);
}

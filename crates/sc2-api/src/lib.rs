//! Client for the Battle.net StarCraft II community API.

#[macro_use]
extern crate tracing;

mod payload;
mod profile_url;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff as _;
use ladder_store::{GameResult, League, ModelError, ProfileId, Race, Season, Server};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use url::Url;

pub use profile_url::parse_profile_url;

use crate::payload::{LadderPayload, LadderSummaryPayload, MatchHistoryPayload, SeasonPayload, TokenPayload};

pub const DEFAULT_API_BASE_URL: &str = "https://eu.api.blizzard.com";
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://eu.battle.net/oauth";

pub const API_KEY_CONFIG: &str = "api_key";
pub const API_SECRET_CONFIG: &str = "api_secret";
pub const ACCESS_TOKEN_CONFIG: &str = "access_token";

const LOCALE: &str = "en_US";
const ONE_VS_ONE: &str = "1v1";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid profile URL `{0}`")]
    InvalidProfileUrl(String),
    #[error("invalid API response from `{url}` (status {status})")]
    InvalidResponse { url: String, status: u16 },
    #[error("unexpected payload from `{url}`")]
    Payload {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no ladder team of profile {profile} found in ladder {ladder_id}")]
    TeamNotFound { profile: ProfileId, ladder_id: i64 },
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("failed to access the API configuration: {0:#}")]
    Config(anyhow::Error),
    #[error("HTTP client failure")]
    Http(#[from] reqwest::Error),
}

/// Storage of the API credentials and of the cached access token.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Retry behavior of [`Sc2Api`] requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoffBuilder::default()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[derive(Debug, Clone)]
pub struct ApiConf {
    pub api_base_url: Url,
    pub oauth_base_url: Url,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Default for ApiConf {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_BASE_URL).expect("valid default API URL"),
            oauth_base_url: Url::parse(DEFAULT_OAUTH_BASE_URL).expect("valid default OAuth URL"),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// One race entry of a profile in a 1v1 ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderEntry {
    pub mmr: i64,
    pub race: Race,
    pub games: i64,
    pub wins: i64,
    pub losses: i64,
    pub name: String,
    pub joined: OffsetDateTime,
    pub ladder_id: i64,
    pub league: League,
}

/// A 1v1 game listed in the legacy match history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryMatch {
    pub result: GameResult,
    pub datetime: OffsetDateTime,
}

#[derive(Default)]
struct Credentials {
    key: String,
    secret: String,
    access_token: String,
    checked: bool,
}

struct ApiResponse {
    status: u16,
    body: serde_json::Value,
}

pub struct Sc2Api {
    client: reqwest::Client,
    conf: ApiConf,
    provider: Arc<dyn ConfigProvider>,
    // Also serializes the access token renewal.
    credentials: tokio::sync::Mutex<Credentials>,
    request_count: AtomicU64,
    retry_count: AtomicU64,
}

impl Sc2Api {
    pub fn new(conf: ApiConf, provider: Arc<dyn ConfigProvider>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(conf.timeout)
            .user_agent(concat!("sc2monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            conf,
            provider,
            credentials: tokio::sync::Mutex::new(Credentials::default()),
            request_count: AtomicU64::new(0),
            retry_count: AtomicU64::new(0),
        })
    }

    /// Number of HTTP exchanges performed so far.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Number of attempts that had to be retried so far.
    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// Reloads the credentials and the cached access token from the configuration provider.
    ///
    /// A token that changed since the last read will be checked before its next use.
    pub async fn read_config(&self) -> Result<(), ApiError> {
        let key = self.config_value(API_KEY_CONFIG).await?;
        let secret = self.config_value(API_SECRET_CONFIG).await?;
        let access_token = self.config_value(ACCESS_TOKEN_CONFIG).await?;

        let mut credentials = self.credentials.lock().await;

        credentials.key = key;
        credentials.secret = secret;

        if credentials.access_token != access_token {
            credentials.access_token = access_token;
            credentials.checked = false;
        }

        Ok(())
    }

    async fn config_value(&self, key: &str) -> Result<String, ApiError> {
        self.provider
            .get_config(key)
            .await
            .map(Option::unwrap_or_default)
            .map_err(ApiError::Config)
    }

    /// Returns a valid access token, requesting a new one when required.
    pub async fn get_access_token(&self) -> Result<String, ApiError> {
        let mut credentials = self.credentials.lock().await;

        let needs_renewal = if credentials.access_token.is_empty() {
            true
        } else if credentials.checked {
            false
        } else {
            let valid = self.check_access_token(&credentials.access_token).await?;
            credentials.checked = valid;
            !valid
        };

        if needs_renewal {
            self.receive_new_access_token(&mut credentials).await?;
        }

        Ok(credentials.access_token.clone())
    }

    async fn check_access_token(&self, token: &str) -> Result<bool, ApiError> {
        let url = self.oauth_url("check_token");

        let response = self.client.get(&url).query(&[("token", token)]).send().await?;
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let valid = response.status() == StatusCode::OK;

        debug!(valid, "Checked cached access token");

        Ok(valid)
    }

    async fn receive_new_access_token(&self, credentials: &mut Credentials) -> Result<(), ApiError> {
        let url = self.oauth_url("token");

        let response = self
            .perform_request(|| {
                self.client
                    .post(&url)
                    .basic_auth(&credentials.key, Some(&credentials.secret))
                    .form(&[("grant_type", "client_credentials")])
            })
            .await;

        let token: TokenPayload = response.into_payload(&url)?;

        credentials.access_token = token.access_token;
        credentials.checked = true;

        self.provider
            .set_config(ACCESS_TOKEN_CONFIG, &credentials.access_token)
            .await
            .map_err(ApiError::Config)?;

        info!("New access token received");

        Ok(())
    }

    pub async fn get_season(&self, server: Server) -> Result<Season, ApiError> {
        let url = self.api_url(&format!("ladder/season/{}", server.id()));
        let payload: SeasonPayload = self.get_json(&url).await?;

        Ok(Season {
            id: 0,
            season_id: payload.season_id,
            server,
            year: payload.year,
            number: payload.number,
            start: timestamp(payload.start_date)?,
            end: timestamp(payload.end_date)?,
        })
    }

    /// Returns the raw profile metadata.
    pub async fn get_metadata(&self, profile: ProfileId) -> Result<serde_json::Value, ApiError> {
        let url = self.api_url(&format!("metadata/profile/{}", profile_path(profile)));
        self.get_json(&url).await
    }

    /// Returns the ids of the 1v1 ladders the profile is a member of.
    pub async fn get_ladders(&self, profile: ProfileId) -> Result<BTreeSet<i64>, ApiError> {
        let url = self.api_url(&format!("profile/{}/ladder/summary", profile_path(profile)));
        let payload: LadderSummaryPayload = self.get_json(&url).await?;

        Ok(payload
            .all_ladder_memberships
            .into_iter()
            .filter(|membership| membership.localized_game_mode.contains(ONE_VS_ONE))
            .map(|membership| membership.ladder_id)
            .collect())
    }

    /// Returns one entry per race the profile plays in the given ladder.
    pub async fn get_ladder_data(&self, profile: ProfileId, ladder_id: i64) -> Result<Vec<LadderEntry>, ApiError> {
        let url = self.api_url(&format!("profile/{}/ladder/{ladder_id}", profile_path(profile)));
        let payload: LadderPayload = self.get_json(&url).await?;

        let league = League::parse(&payload.league)?;
        let teams = &payload.ladder_teams;

        let mut used = Vec::new();
        let mut last_found: Option<usize> = None;
        let mut entries = Vec::with_capacity(payload.ranks_and_pools.len());

        for pool in &payload.ranks_and_pools {
            let ranked = usize::try_from(pool.rank - 1)
                .ok()
                .and_then(|idx| teams.get(idx).map(|team| (idx, team)))
                .filter(|(_, team)| team.is_led_by(profile.player_id, profile.realm));

            let team = match ranked {
                Some((idx, team)) => {
                    used.push(idx);
                    team
                }
                None => {
                    // The rank is stale, look for the next unused team of this profile.
                    let start = last_found.map_or(0, |idx| idx + 1);

                    let (idx, team) = teams
                        .iter()
                        .enumerate()
                        .skip(start)
                        .find(|(idx, team)| !used.contains(idx) && team.is_led_by(profile.player_id, profile.realm))
                        .ok_or(ApiError::TeamNotFound { profile, ladder_id })?;

                    last_found = Some(idx);
                    used.push(idx);
                    team
                }
            };

            let mmr = match (pool.mmr, team.mmr) {
                (Some(pool_mmr), Some(team_mmr)) if pool_mmr != team_mmr => {
                    warn!(%url, pool_mmr, team_mmr, "MMR in ladder request does not match");
                    team_mmr
                }
                (_, Some(team_mmr)) => team_mmr,
                (Some(pool_mmr), None) => pool_mmr,
                (None, None) => return Err(ApiError::InvalidResponse { url, status: 200 }),
            };

            // Teams are never empty here, `is_led_by` checked the first member.
            let Some(member) = team.team_members.first() else {
                return Err(ApiError::TeamNotFound { profile, ladder_id });
            };

            entries.push(LadderEntry {
                mmr,
                race: Race::parse(&member.favorite_race)?,
                games: team.wins + team.losses,
                wins: team.wins,
                losses: team.losses,
                name: member.display_name.clone(),
                joined: timestamp(team.join_timestamp)?,
                ladder_id,
                league,
            });
        }

        Ok(entries)
    }

    /// Returns the 1v1 games of the legacy match history, newest first.
    pub async fn get_match_history(&self, profile: ProfileId) -> Result<Vec<HistoryMatch>, ApiError> {
        let url = self.api_url(&format!("legacy/profile/{}/matches", profile_path(profile)));
        let payload: MatchHistoryPayload = self.get_json(&url).await?;

        payload
            .matches
            .into_iter()
            .filter(|item| item.kind == ONE_VS_ONE)
            .map(|item| {
                Ok(HistoryMatch {
                    result: GameResult::from_name(&item.decision),
                    datetime: timestamp(item.date)?,
                })
            })
            .collect()
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let access_token = self.get_access_token().await?;

        let response = self
            .perform_request(|| {
                self.client
                    .get(url)
                    .query(&[("locale", LOCALE), ("access_token", access_token.as_str())])
            })
            .await;

        response.into_payload(url)
    }

    /// Sends the request until a JSON answer is received, or the attempts are exhausted.
    ///
    /// Gateway timeouts, undecodable bodies and transport failures are retried.
    /// Exhausted attempts yield a zero status with an empty object.
    async fn perform_request<F>(&self, build_request: F) -> ApiResponse
    where
        F: Fn() -> RequestBuilder,
    {
        let mut backoff = self.conf.retry.backoff();
        let mut last_error = String::new();

        for attempt in 1..=self.conf.retry.max_attempts {
            match build_request().send().await {
                Ok(response) => {
                    self.request_count.fetch_add(1, Ordering::Relaxed);

                    let status = response.status();

                    if status == StatusCode::GATEWAY_TIMEOUT {
                        last_error = "API timeout".to_owned();
                    } else {
                        match response.json::<serde_json::Value>().await {
                            Ok(body) => {
                                return ApiResponse {
                                    status: status.as_u16(),
                                    body,
                                };
                            }
                            Err(error) => last_error = format!("unable to decode JSON: {error}"),
                        }
                    }
                }
                Err(error) => last_error = format!("request failed: {error}"),
            }

            self.retry_count.fetch_add(1, Ordering::Relaxed);

            if attempt < self.conf.retry.max_attempts {
                if let Some(duration) = backoff.next_backoff() {
                    debug!(attempt, error = %last_error, retry_after = ?duration, "Retrying API request");
                    tokio::time::sleep(duration).await;
                }
            }
        }

        warn!(error = %last_error, "API request failed");

        ApiResponse {
            status: 0,
            body: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/sc2/{path}", self.conf.api_base_url.as_str().trim_end_matches('/'))
    }

    fn oauth_url(&self, path: &str) -> String {
        format!("{}/{path}", self.conf.oauth_base_url.as_str().trim_end_matches('/'))
    }
}

impl ApiResponse {
    fn into_payload<T: DeserializeOwned>(self, url: &str) -> Result<T, ApiError> {
        if self.status != 200 {
            return Err(ApiError::InvalidResponse {
                url: url.to_owned(),
                status: self.status,
            });
        }

        serde_json::from_value(self.body).map_err(|source| ApiError::Payload {
            url: url.to_owned(),
            source,
        })
    }
}

fn profile_path(profile: ProfileId) -> String {
    format!("{}/{}/{}", profile.server.id(), profile.realm, profile.player_id)
}

fn timestamp(unix: i64) -> Result<OffsetDateTime, ApiError> {
    OffsetDateTime::from_unix_timestamp(unix).map_err(|_| ApiError::InvalidTimestamp(unix))
}

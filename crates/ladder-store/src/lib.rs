//! Domain model of the ladder monitor and the storage-agnostic repository trait.

mod kinds;

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

pub use kinds::{GameResult, League, Race, Server};

/// Default upper bound for the length of a game, in seconds, when nothing better is known.
pub const DEFAULT_MAX_LENGTH_SECS: i64 = 180;

pub const CONFIG_KEY_MAX_LEN: usize = 128;
pub const CONFIG_VALUE_MAX_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown race `{0}`")]
    UnknownRace(String),
    #[error("unknown league `{0}`")]
    UnknownLeague(String),
    #[error("unsupported region id {0}")]
    UnsupportedRegion(i64),
    #[error("invalid {kind} value stored in database: {value}")]
    InvalidDiscriminant { kind: &'static str, value: i64 },
}

/// Identity of a Battle.net profile (shared by all race rows of a player).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId {
    pub server: Server,
    pub realm: i64,
    pub player_id: i64,
}

impl core::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{}", self.server.id(), self.realm, self.player_id)
    }
}

/// A ladder season as announced for a given server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Season {
    /// Database row ID (0 when not persisted yet)
    pub id: i64,
    pub season_id: i64,
    pub server: Server,
    pub year: i64,
    pub number: i64,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// A tracked player, one row per profile and race.
#[derive(Clone, Debug, PartialEq)]
pub struct Player {
    pub id: i64,
    pub player_id: i64,
    pub realm: i64,
    pub server: Server,
    pub name: String,
    pub race: Race,
    pub ladder_id: i64,
    pub league: League,
    pub mmr: i64,
    pub wins: i64,
    pub losses: i64,
    pub refreshed: OffsetDateTime,
    pub last_played: Option<OffsetDateTime>,
    pub ladder_joined: Option<OffsetDateTime>,
    pub last_active_season: i64,
}

impl Player {
    pub fn profile(&self) -> ProfileId {
        ProfileId {
            server: self.server,
            realm: self.realm,
            player_id: self.player_id,
        }
    }

    pub fn games(&self) -> i64 {
        self.wins + self.losses
    }
}

/// Values needed to create a new player row; everything else takes its default.
#[derive(Clone, Debug, PartialEq)]
pub struct NewPlayer {
    pub profile: ProfileId,
    pub race: Race,
    pub name: String,
    pub ladder_id: i64,
    pub league: League,
    pub mmr: i64,
    pub wins: i64,
    pub losses: i64,
    pub ladder_joined: Option<OffsetDateTime>,
    pub last_active_season: i64,
}

impl NewPlayer {
    pub fn new(profile: ProfileId, race: Race) -> Self {
        Self {
            profile,
            race,
            name: String::new(),
            ladder_id: 0,
            league: League::Unranked,
            mmr: 0,
            wins: 0,
            losses: 0,
            ladder_joined: None,
            last_active_season: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    pub id: i64,
    /// Row ID of the owning [`Player`]
    pub player_id: i64,
    pub result: GameResult,
    pub datetime: OffsetDateTime,
    pub mmr: i64,
    pub mmr_change: i64,
    /// The match was inferred and not confirmed by the match history
    pub guess: bool,
    /// Upper bound of the game duration, in seconds
    pub max_length: i64,
    pub ema_mmr: f64,
    pub emvar_mmr: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewMatch {
    pub player_id: i64,
    pub result: GameResult,
    pub datetime: OffsetDateTime,
    pub mmr: i64,
    pub mmr_change: i64,
    pub guess: bool,
    pub max_length: i64,
    /// Defaults to `mmr` when not provided
    pub ema_mmr: Option<f64>,
    pub emvar_mmr: f64,
}

/// Aggregated statistics of a player over the current season.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statistics {
    /// Row ID of the owning [`Player`]
    pub player_id: i64,
    pub winrate: f64,
    pub games: i64,
    pub current_mmr: i64,
    pub wma_mmr: i64,
    pub max_mmr: i64,
    pub min_mmr: i64,
    pub wins: i64,
    pub losses: i64,
    pub longest_winning_streak: i64,
    pub longest_losing_streak: i64,
    pub guessed_games: i64,
    pub lr_mmr_slope: f64,
    pub lr_mmr_intercept: f64,
    pub sd_mmr: f64,
    pub avg_mmr: f64,
    pub instant_left_games: i64,
}

/// A log record mirrored into the database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub id: i64,
    pub logger: String,
    pub level: String,
    pub trace: Option<String>,
    pub msg: String,
    pub datetime: OffsetDateTime,
}

impl LogRecord {
    pub const LOGGER_MAX_LEN: usize = 64;
    pub const LEVEL_MAX_LEN: usize = 64;
    pub const TRACE_MAX_LEN: usize = 1024;
    pub const MSG_MAX_LEN: usize = 255;

    /// Builds a record stamped with the current time, truncating every column to its storage size.
    pub fn new(logger: &str, level: &str, msg: &str, trace: Option<&str>) -> Self {
        Self {
            id: 0,
            logger: truncate(logger, Self::LOGGER_MAX_LEN).to_owned(),
            level: truncate(level, Self::LEVEL_MAX_LEN).to_owned(),
            trace: trace.map(|trace| truncate(trace, Self::TRACE_MAX_LEN).to_owned()),
            msg: truncate(msg, Self::MSG_MAX_LEN).to_owned(),
            datetime: OffsetDateTime::now_utc(),
        }
    }
}

/// Truncates `value` to at most `max_chars` characters.
///
/// ```
/// assert_eq!(ladder_store::truncate("protoss", 3), "pro");
/// assert_eq!(ladder_store::truncate("zerg", 10), "zerg");
/// ```
pub fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

pub type DynLadderRepo = Arc<dyn LadderRepo>;

/// Storage-agnostic trait for the ladder monitor persistence.
#[async_trait]
pub trait LadderRepo: Send + Sync {
    /// Performs initial setup required before using the repository.
    ///
    /// This function should be called first, before using any of the other functions.
    /// It handles database migrations, PRAGMA setup, and other initialization tasks.
    async fn setup(&self) -> anyhow::Result<()>;

    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Inserts or replaces a configuration value.
    ///
    /// Keys and values longer than the column sizes are rejected.
    async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Inserts the season, or updates the existing row with the same `season_id` and server.
    async fn upsert_season(&self, season: &Season) -> anyhow::Result<Season>;

    /// Returns the most recent season known for the given server.
    async fn current_season(&self, server: Server) -> anyhow::Result<Option<Season>>;

    /// Inserts a new player row.
    ///
    /// Fails if a row already exists for the same profile and race.
    async fn insert_player(&self, player: NewPlayer) -> anyhow::Result<Player>;

    async fn find_player(&self, profile: ProfileId, race: Race) -> anyhow::Result<Option<Player>>;

    async fn players(&self) -> anyhow::Result<Vec<Player>>;

    async fn players_of_profile(&self, profile: ProfileId) -> anyhow::Result<Vec<Player>>;

    /// Persists every mutable field of the player and bumps `refreshed`.
    async fn update_player(&self, player: &Player) -> anyhow::Result<()>;

    /// Deletes a player along with its matches and statistics.
    ///
    /// Returns `false` if no such player exists.
    async fn delete_player(&self, id: i64) -> anyhow::Result<bool>;

    async fn insert_match(&self, new_match: NewMatch) -> anyhow::Result<Match>;

    /// Returns the matches of a player, newest first.
    ///
    /// When `since` is provided, only matches played at or after this date are returned.
    async fn matches_of(&self, player_id: i64, since: Option<OffsetDateTime>) -> anyhow::Result<Vec<Match>>;

    async fn latest_match(&self, player_id: i64) -> anyhow::Result<Option<Match>>;

    async fn upsert_statistics(&self, statistics: &Statistics) -> anyhow::Result<()>;

    async fn statistics_of(&self, player_id: i64) -> anyhow::Result<Option<Statistics>>;

    /// Stores the outcome of a refresh in a single transaction.
    ///
    /// Inserts `new_matches`, persists every mutable field of `player` and upserts `statistics`.
    /// Nothing is written if any of these steps fails.
    async fn record_update(
        &self,
        player: &Player,
        new_matches: Vec<NewMatch>,
        statistics: &Statistics,
    ) -> anyhow::Result<Vec<Match>>;

    async fn push_log(&self, record: LogRecord) -> anyhow::Result<()>;

    /// Returns at most `limit` log records, newest first.
    async fn logs(&self, limit: usize) -> anyhow::Result<Vec<LogRecord>>;

    /// Removes log records older than the cutoff.
    ///
    /// # Returns
    /// Number of records purged from the repository
    async fn purge_logs(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64>;
}

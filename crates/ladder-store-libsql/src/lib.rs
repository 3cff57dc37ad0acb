#[macro_use]
extern crate tracing;

use anyhow::Context as _;
use async_trait::async_trait;
use ladder_store::{
    CONFIG_KEY_MAX_LEN, CONFIG_VALUE_MAX_LEN, GameResult, LadderRepo, League, LogRecord, Match, NewMatch, NewPlayer,
    Player, ProfileId, Race, Season, Server, Statistics,
};
use libsql::{Connection, Row};
use time::OffsetDateTime;

pub use libsql;

// Migrations are append-only: never modify an entry once released.
const MIGRATIONS: &[&str] = &[
    // Migration 0 - Initial schema
    include_str!("../migrations/01_ladder.sql"),
];

const PLAYER_COLUMNS: &str = "id, player_id, realm, server, name, race, ladder_id, league, mmr, wins, losses,
    refreshed, last_played, ladder_joined, last_active_season";

const MATCH_COLUMNS: &str = "id, player_id, result, datetime, mmr, mmr_change, guess, max_length, ema_mmr, emvar_mmr";

const SEASON_COLUMNS: &str = "id, season_id, server, year, number, start_at, end_at";

/// Implementation of [`LadderRepo`] using libSQL as the backend.
///
/// We use the 'user_version' value to store the migration state.
/// - <https://sqlite.org/pragma.html#pragma_user_version>
pub struct LibSqlLadderRepo {
    conn: Connection,
    // Transactions are connection-wide, so multi-statement operations must not interleave.
    tx_lock: tokio::sync::Mutex<()>,
}

impl LibSqlLadderRepo {
    /// Opens a new libSQL connection and creates a repository instance.
    ///
    /// The path can be:
    /// - A file path for local SQLite (e.g., "/path/to/sc2monitor.db")
    /// - ":memory:" for in-memory database
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let conn = libsql::Builder::new_local(path)
            .build()
            .await
            .context("failed to open libSQL database")?
            .connect()
            .context("failed to connect to libSQL")?;

        Ok(Self {
            conn,
            tx_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn apply_pragmas(&self) -> anyhow::Result<()> {
        const PRAGMAS: &str = "
            -- https://www.sqlite.org/pragma.html#pragma_journal_mode
            -- Write-ahead log, so that readers (e.g.: the stats command) do not block the monitor.
            PRAGMA journal_mode = WAL;

            -- https://www.sqlite.org/pragma.html#pragma_synchronous
            -- WAL mode is safe from corruption with synchronous=NORMAL.
            PRAGMA synchronous = NORMAL;

            -- https://www.sqlite.org/pragma.html#pragma_busy_timeout
            -- The CLI commands may run while the service holds the database.
            PRAGMA busy_timeout = 15000;

            -- https://www.sqlite.org/pragma.html#pragma_foreign_keys
            -- Matches and statistics are deleted along with their player.
            PRAGMA foreign_keys = ON;

            -- https://www.sqlite.org/pragma.html#pragma_temp_store
            PRAGMA temp_store = MEMORY;
        ";

        trace!(sql_query = %PRAGMAS, "PRAGMAs query");

        let mut batch_rows = self
            .conn
            .execute_batch(PRAGMAS)
            .await
            .context("failed to batch execute SQL query")?;

        while let Some(rows) = batch_rows.next_stmt_row() {
            let Some(mut rows) = rows else {
                continue;
            };

            while let Ok(Some(row)) = rows.next().await {
                trace!(?row, "PRAGMA row");
            }
        }

        Ok(())
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let user_version = self.query_user_version().await?;

        match MIGRATIONS.get(user_version..) {
            Some(remaining) if !remaining.is_empty() => {
                info!(
                    user_version,
                    migration_count = MIGRATIONS.len() - user_version,
                    "Start migration"
                );

                for (sql_query, migration_id) in remaining.iter().zip(user_version..MIGRATIONS.len()) {
                    trace!(migration_id, %sql_query, "Apply migration");

                    self.conn
                        .execute_batch(sql_query)
                        .await
                        .with_context(|| format!("failed to execute migration {migration_id}"))?;

                    self.update_user_version(migration_id + 1)
                        .await
                        .context("failed to update user version")?;
                }

                info!("Migration complete");
            }
            None => {
                warn!(user_version, "user_version is set to an unexpected value");
            }
            _ => {
                debug!(user_version, "Database is already up to date");
            }
        }

        Ok(())
    }

    async fn query_user_version(&self) -> anyhow::Result<usize> {
        let row = self
            .conn
            .query("PRAGMA user_version", ())
            .await
            .context("failed to execute SQL query")?
            .next()
            .await
            .context("failed to read the row")?
            .context("no row returned")?;

        let value = row.get::<i64>(0).context("failed to read user_version value")?;

        usize::try_from(value).context("user_version out of range")
    }

    async fn update_user_version(&self, value: usize) -> anyhow::Result<()> {
        let sql_query = format!("PRAGMA user_version = {value}");

        trace!(%sql_query, "Update user_version");

        self.conn
            .execute(&sql_query, ())
            .await
            .context("failed to execute SQL query")?;

        Ok(())
    }

    async fn begin_immediate(&self) -> anyhow::Result<()> {
        self.conn
            .execute("BEGIN IMMEDIATE", ())
            .await
            .context("failed to begin transaction")?;
        Ok(())
    }

    /// Commits when `result` is `Ok`, rolls back otherwise.
    ///
    /// The original error is returned even when the rollback itself fails.
    async fn finish_transaction<T>(&self, result: anyhow::Result<T>) -> anyhow::Result<T> {
        match result {
            Ok(value) => {
                self.conn
                    .execute("COMMIT", ())
                    .await
                    .context("failed to commit transaction")?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.conn.execute("ROLLBACK", ()).await {
                    warn!(
                        error = format!("{rollback_error:#}"),
                        "Failed to roll back transaction"
                    );
                }
                Err(error)
            }
        }
    }

    async fn query_players(
        &self,
        sql_query: &str,
        params: impl libsql::params::IntoParams,
    ) -> anyhow::Result<Vec<Player>> {
        let mut rows = self
            .conn
            .query(sql_query, params)
            .await
            .context("failed to execute SQL query")?;

        let mut players = Vec::new();

        while let Some(row) = rows.next().await.context("failed to read player row")? {
            players.push(player_from_row(&row)?);
        }

        Ok(players)
    }

    async fn query_matches(
        &self,
        sql_query: &str,
        params: impl libsql::params::IntoParams,
    ) -> anyhow::Result<Vec<Match>> {
        let mut rows = self
            .conn
            .query(sql_query, params)
            .await
            .context("failed to execute SQL query")?;

        let mut matches = Vec::new();

        while let Some(row) = rows.next().await.context("failed to read match row")? {
            matches.push(match_from_row(&row)?);
        }

        Ok(matches)
    }
}

#[async_trait]
impl LadderRepo for LibSqlLadderRepo {
    async fn setup(&self) -> anyhow::Result<()> {
        self.apply_pragmas().await?;
        self.migrate().await?;
        Ok(())
    }

    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM config WHERE key = ?", [key])
            .await
            .context("failed to execute SQL query")?;

        match rows.next().await.context("failed to read config row")? {
            Some(row) => Ok(Some(row.get::<String>(0).context("failed to read config value")?)),
            None => Ok(None),
        }
    }

    async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            key.chars().count() <= CONFIG_KEY_MAX_LEN,
            "config key is longer than {CONFIG_KEY_MAX_LEN} characters"
        );
        anyhow::ensure!(
            value.chars().count() <= CONFIG_VALUE_MAX_LEN,
            "config value for {key} is longer than {CONFIG_VALUE_MAX_LEN} characters"
        );

        let sql_query = "INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value";

        trace!(%sql_query, key, "Set config value");

        self.conn
            .execute(sql_query, (key, value))
            .await
            .context("failed to execute SQL query")?;

        Ok(())
    }

    async fn upsert_season(&self, season: &Season) -> anyhow::Result<Season> {
        let sql_query = format!(
            "INSERT INTO season (season_id, server, year, number, start_at, end_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (season_id, server) DO UPDATE SET
                year = excluded.year,
                number = excluded.number,
                start_at = excluded.start_at,
                end_at = excluded.end_at
            RETURNING {SEASON_COLUMNS}"
        );

        let params = (
            season.season_id,
            season.server.id(),
            season.year,
            season.number,
            season.start.unix_timestamp(),
            season.end.unix_timestamp(),
        );

        trace!(season_id = season.season_id, server = %season.server, "Upsert season");

        let row = self
            .conn
            .query(&sql_query, params)
            .await
            .context("failed to execute SQL query")?
            .next()
            .await
            .context("failed to read the row")?
            .context("no row returned")?;

        season_from_row(&row)
    }

    async fn current_season(&self, server: Server) -> anyhow::Result<Option<Season>> {
        let sql_query = format!("SELECT {SEASON_COLUMNS} FROM season WHERE server = ? ORDER BY season_id DESC LIMIT 1");

        let mut rows = self
            .conn
            .query(&sql_query, [server.id()])
            .await
            .context("failed to execute SQL query")?;

        match rows.next().await.context("failed to read season row")? {
            Some(row) => season_from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn insert_player(&self, player: NewPlayer) -> anyhow::Result<Player> {
        let sql_query = format!(
            "INSERT INTO player
            (player_id, realm, server, name, race, ladder_id, league, mmr, wins, losses,
             refreshed, ladder_joined, last_active_season)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {PLAYER_COLUMNS}"
        );

        let params = (
            player.profile.player_id,
            player.profile.realm,
            player.profile.server.id(),
            player.name.clone(),
            player.race.to_db(),
            player.ladder_id,
            player.league.id(),
            player.mmr,
            player.wins,
            player.losses,
            now_unix(),
            player.ladder_joined.map(OffsetDateTime::unix_timestamp),
            player.last_active_season,
        );

        trace!(profile = %player.profile, race = %player.race, "Insert player");

        let row = self
            .conn
            .query(&sql_query, params)
            .await
            .with_context(|| format!("failed to insert player {} ({})", player.profile, player.race))?
            .next()
            .await
            .context("failed to read the row")?
            .context("no row returned")?;

        player_from_row(&row)
    }

    async fn find_player(&self, profile: ProfileId, race: Race) -> anyhow::Result<Option<Player>> {
        let sql_query = format!(
            "SELECT {PLAYER_COLUMNS} FROM player
            WHERE player_id = ? AND realm = ? AND server = ? AND race = ?"
        );

        let params = (profile.player_id, profile.realm, profile.server.id(), race.to_db());

        Ok(self.query_players(&sql_query, params).await?.into_iter().next())
    }

    async fn players(&self) -> anyhow::Result<Vec<Player>> {
        let sql_query = format!("SELECT {PLAYER_COLUMNS} FROM player ORDER BY server, realm, player_id, race");
        self.query_players(&sql_query, ()).await
    }

    async fn players_of_profile(&self, profile: ProfileId) -> anyhow::Result<Vec<Player>> {
        let sql_query = format!(
            "SELECT {PLAYER_COLUMNS} FROM player
            WHERE player_id = ? AND realm = ? AND server = ?
            ORDER BY race"
        );

        self.query_players(&sql_query, (profile.player_id, profile.realm, profile.server.id()))
            .await
    }

    async fn update_player(&self, player: &Player) -> anyhow::Result<()> {
        let sql_query = "UPDATE player SET
                name = ?,
                ladder_id = ?,
                league = ?,
                mmr = ?,
                wins = ?,
                losses = ?,
                refreshed = ?,
                last_played = ?,
                ladder_joined = ?,
                last_active_season = ?
            WHERE id = ?";

        let params = (
            player.name.clone(),
            player.ladder_id,
            player.league.id(),
            player.mmr,
            player.wins,
            player.losses,
            now_unix(),
            player.last_played.map(OffsetDateTime::unix_timestamp),
            player.ladder_joined.map(OffsetDateTime::unix_timestamp),
            player.last_active_season,
            player.id,
        );

        trace!(id = player.id, mmr = player.mmr, "Update player");

        let updated_count = self
            .conn
            .execute(sql_query, params)
            .await
            .context("failed to execute SQL query")?;

        anyhow::ensure!(updated_count == 1, "player {} does not exist", player.id);

        Ok(())
    }

    async fn delete_player(&self, id: i64) -> anyhow::Result<bool> {
        let _guard = self.tx_lock.lock().await;

        self.begin_immediate().await?;

        let result = async {
            self.conn
                .execute("DELETE FROM matches WHERE player_id = ?", [id])
                .await
                .context("failed to delete matches")?;
            self.conn
                .execute("DELETE FROM statistics WHERE player_id = ?", [id])
                .await
                .context("failed to delete statistics")?;
            self.conn
                .execute("DELETE FROM player WHERE id = ?", [id])
                .await
                .context("failed to delete player")
        }
        .await;

        let deleted_count = self.finish_transaction(result).await?;

        debug!(id, deleted_count, "Deleted player");

        Ok(deleted_count > 0)
    }

    async fn record_update(
        &self,
        player: &Player,
        new_matches: Vec<NewMatch>,
        statistics: &Statistics,
    ) -> anyhow::Result<Vec<Match>> {
        let _guard = self.tx_lock.lock().await;

        self.begin_immediate().await?;

        let result = async {
            let mut inserted = Vec::with_capacity(new_matches.len());

            for new_match in new_matches {
                inserted.push(self.insert_match(new_match).await?);
            }

            self.update_player(player).await?;
            self.upsert_statistics(statistics).await?;

            Ok::<_, anyhow::Error>(inserted)
        }
        .await;

        let inserted = self.finish_transaction(result).await?;

        trace!(id = player.id, match_count = inserted.len(), "Recorded player update");

        Ok(inserted)
    }

    async fn insert_match(&self, new_match: NewMatch) -> anyhow::Result<Match> {
        let sql_query = format!(
            "INSERT INTO matches
            (player_id, result, datetime, mmr, mmr_change, guess, max_length, ema_mmr, emvar_mmr)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {MATCH_COLUMNS}"
        );

        #[allow(clippy::cast_precision_loss)] // MMR values are far below 2^52.
        let ema_mmr = new_match.ema_mmr.unwrap_or(new_match.mmr as f64);

        let params = (
            new_match.player_id,
            new_match.result.to_db(),
            new_match.datetime.unix_timestamp(),
            new_match.mmr,
            new_match.mmr_change,
            i64::from(new_match.guess),
            new_match.max_length,
            ema_mmr,
            new_match.emvar_mmr,
        );

        trace!(player_id = new_match.player_id, result = %new_match.result, "Insert match");

        let row = self
            .conn
            .query(&sql_query, params)
            .await
            .context("failed to insert match")?
            .next()
            .await
            .context("failed to read the row")?
            .context("no row returned")?;

        match_from_row(&row)
    }

    async fn matches_of(&self, player_id: i64, since: Option<OffsetDateTime>) -> anyhow::Result<Vec<Match>> {
        let sql_query = format!(
            "SELECT {MATCH_COLUMNS} FROM matches
            WHERE player_id = ? AND datetime >= ?
            ORDER BY datetime DESC, id DESC"
        );

        let since = since.map_or(i64::MIN, OffsetDateTime::unix_timestamp);

        self.query_matches(&sql_query, (player_id, since)).await
    }

    async fn latest_match(&self, player_id: i64) -> anyhow::Result<Option<Match>> {
        let sql_query = format!(
            "SELECT {MATCH_COLUMNS} FROM matches
            WHERE player_id = ?
            ORDER BY datetime DESC, id DESC
            LIMIT 1"
        );

        Ok(self.query_matches(&sql_query, [player_id]).await?.into_iter().next())
    }

    async fn upsert_statistics(&self, statistics: &Statistics) -> anyhow::Result<()> {
        let sql_query = "INSERT INTO statistics
            (player_id, winrate, games, current_mmr, wma_mmr, max_mmr, min_mmr, wins, losses,
             longest_winning_streak, longest_losing_streak, guessed_games, lr_mmr_slope,
             lr_mmr_intercept, sd_mmr, avg_mmr, instant_left_games)
            VALUES (:player_id, :winrate, :games, :current_mmr, :wma_mmr, :max_mmr, :min_mmr, :wins, :losses,
             :longest_winning_streak, :longest_losing_streak, :guessed_games, :lr_mmr_slope,
             :lr_mmr_intercept, :sd_mmr, :avg_mmr, :instant_left_games)
            ON CONFLICT (player_id) DO UPDATE SET
                winrate = excluded.winrate,
                games = excluded.games,
                current_mmr = excluded.current_mmr,
                wma_mmr = excluded.wma_mmr,
                max_mmr = excluded.max_mmr,
                min_mmr = excluded.min_mmr,
                wins = excluded.wins,
                losses = excluded.losses,
                longest_winning_streak = excluded.longest_winning_streak,
                longest_losing_streak = excluded.longest_losing_streak,
                guessed_games = excluded.guessed_games,
                lr_mmr_slope = excluded.lr_mmr_slope,
                lr_mmr_intercept = excluded.lr_mmr_intercept,
                sd_mmr = excluded.sd_mmr,
                avg_mmr = excluded.avg_mmr,
                instant_left_games = excluded.instant_left_games";

        let params = libsql::named_params! {
            ":player_id": statistics.player_id,
            ":winrate": statistics.winrate,
            ":games": statistics.games,
            ":current_mmr": statistics.current_mmr,
            ":wma_mmr": statistics.wma_mmr,
            ":max_mmr": statistics.max_mmr,
            ":min_mmr": statistics.min_mmr,
            ":wins": statistics.wins,
            ":losses": statistics.losses,
            ":longest_winning_streak": statistics.longest_winning_streak,
            ":longest_losing_streak": statistics.longest_losing_streak,
            ":guessed_games": statistics.guessed_games,
            ":lr_mmr_slope": statistics.lr_mmr_slope,
            ":lr_mmr_intercept": statistics.lr_mmr_intercept,
            ":sd_mmr": statistics.sd_mmr,
            ":avg_mmr": statistics.avg_mmr,
            ":instant_left_games": statistics.instant_left_games,
        };

        trace!(player_id = statistics.player_id, "Upsert statistics");

        self.conn
            .execute(sql_query, params)
            .await
            .context("failed to execute SQL query")?;

        Ok(())
    }

    async fn statistics_of(&self, player_id: i64) -> anyhow::Result<Option<Statistics>> {
        let sql_query = "SELECT player_id, winrate, games, current_mmr, wma_mmr, max_mmr, min_mmr, wins, losses,
                longest_winning_streak, longest_losing_streak, guessed_games, lr_mmr_slope,
                lr_mmr_intercept, sd_mmr, avg_mmr, instant_left_games
            FROM statistics WHERE player_id = ?";

        let mut rows = self
            .conn
            .query(sql_query, [player_id])
            .await
            .context("failed to execute SQL query")?;

        let Some(row) = rows.next().await.context("failed to read statistics row")? else {
            return Ok(None);
        };

        Ok(Some(Statistics {
            player_id: row.get(0).context("player_id")?,
            winrate: row.get(1).context("winrate")?,
            games: row.get(2).context("games")?,
            current_mmr: row.get(3).context("current_mmr")?,
            wma_mmr: row.get(4).context("wma_mmr")?,
            max_mmr: row.get(5).context("max_mmr")?,
            min_mmr: row.get(6).context("min_mmr")?,
            wins: row.get(7).context("wins")?,
            losses: row.get(8).context("losses")?,
            longest_winning_streak: row.get(9).context("longest_winning_streak")?,
            longest_losing_streak: row.get(10).context("longest_losing_streak")?,
            guessed_games: row.get(11).context("guessed_games")?,
            lr_mmr_slope: row.get(12).context("lr_mmr_slope")?,
            lr_mmr_intercept: row.get(13).context("lr_mmr_intercept")?,
            sd_mmr: row.get(14).context("sd_mmr")?,
            avg_mmr: row.get(15).context("avg_mmr")?,
            instant_left_games: row.get(16).context("instant_left_games")?,
        }))
    }

    async fn push_log(&self, record: LogRecord) -> anyhow::Result<()> {
        let sql_query = "INSERT INTO logs (logger, level, trace, msg, datetime) VALUES (?, ?, ?, ?, ?)";

        let params = (
            record.logger,
            record.level,
            record.trace,
            record.msg,
            record.datetime.unix_timestamp(),
        );

        self.conn
            .execute(sql_query, params)
            .await
            .context("failed to insert log record")?;

        Ok(())
    }

    async fn logs(&self, limit: usize) -> anyhow::Result<Vec<LogRecord>> {
        let sql_query = "SELECT id, logger, level, trace, msg, datetime FROM logs ORDER BY id DESC LIMIT ?";

        let mut rows = self
            .conn
            .query(sql_query, [i64::try_from(limit).unwrap_or(i64::MAX)])
            .await
            .context("failed to execute SQL query")?;

        let mut records = Vec::new();

        while let Some(row) = rows.next().await.context("failed to read log row")? {
            records.push(LogRecord {
                id: row.get(0).context("id")?,
                logger: row.get(1).context("logger")?,
                level: row.get(2).context("level")?,
                trace: row.get(3).context("trace")?,
                msg: row.get(4).context("msg")?,
                datetime: timestamp(row.get(5).context("datetime")?)?,
            });
        }

        Ok(records)
    }

    async fn purge_logs(&self, cutoff: OffsetDateTime) -> anyhow::Result<u64> {
        let deleted_count = self
            .conn
            .execute("DELETE FROM logs WHERE datetime < ?", [cutoff.unix_timestamp()])
            .await
            .context("failed to purge old log records")?;

        if deleted_count > 0 {
            debug!(deleted_count, %cutoff, "Purged old log records");
        }

        Ok(deleted_count)
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn timestamp(value: i64) -> anyhow::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(value).with_context(|| format!("invalid UNIX timestamp: {value}"))
}

fn optional_timestamp(value: Option<i64>) -> anyhow::Result<Option<OffsetDateTime>> {
    value.map(timestamp).transpose()
}

fn season_from_row(row: &Row) -> anyhow::Result<Season> {
    Ok(Season {
        id: row.get(0).context("id")?,
        season_id: row.get(1).context("season_id")?,
        server: Server::from_db(row.get(2).context("server")?)?,
        year: row.get(3).context("year")?,
        number: row.get(4).context("number")?,
        start: timestamp(row.get(5).context("start_at")?)?,
        end: timestamp(row.get(6).context("end_at")?)?,
    })
}

fn player_from_row(row: &Row) -> anyhow::Result<Player> {
    Ok(Player {
        id: row.get(0).context("id")?,
        player_id: row.get(1).context("player_id")?,
        realm: row.get(2).context("realm")?,
        server: Server::from_db(row.get(3).context("server")?)?,
        name: row.get(4).context("name")?,
        race: Race::from_db(row.get(5).context("race")?)?,
        ladder_id: row.get(6).context("ladder_id")?,
        league: League::from_db(row.get(7).context("league")?)?,
        mmr: row.get(8).context("mmr")?,
        wins: row.get(9).context("wins")?,
        losses: row.get(10).context("losses")?,
        refreshed: timestamp(row.get(11).context("refreshed")?)?,
        last_played: optional_timestamp(row.get(12).context("last_played")?)?,
        ladder_joined: optional_timestamp(row.get(13).context("ladder_joined")?)?,
        last_active_season: row.get(14).context("last_active_season")?,
    })
}

fn match_from_row(row: &Row) -> anyhow::Result<Match> {
    Ok(Match {
        id: row.get(0).context("id")?,
        player_id: row.get(1).context("player_id")?,
        result: GameResult::from_db(row.get(2).context("result")?)?,
        datetime: timestamp(row.get(3).context("datetime")?)?,
        mmr: row.get(4).context("mmr")?,
        mmr_change: row.get(5).context("mmr_change")?,
        guess: row.get::<i64>(6).context("guess")? != 0,
        max_length: row.get(7).context("max_length")?,
        ema_mmr: row.get(8).context("ema_mmr")?,
        emvar_mmr: row.get(9).context("emvar_mmr")?,
    })
}

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use ladder_store::{
    DEFAULT_MAX_LENGTH_SECS, DynLadderRepo, GameResult, LadderRepo as _, Match, NewMatch, NewPlayer, Player, ProfileId,
    Race, Season, Server,
};
use sc2_api::{ApiConf, ConfigProvider, HistoryMatch, LadderEntry, Sc2Api};
use sc2monitor_task::ShutdownSignal;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::stats::{compute_statistics, ema_step};

/// Exposes the configuration table of the repository to the API client.
pub struct RepoConfig(pub DynLadderRepo);

#[async_trait]
impl ConfigProvider for RepoConfig {
    async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.0.get_config(key).await
    }

    async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.0.set_config(key, value).await
    }
}

/// Outcome of a polling cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub profiles_updated: usize,
    pub profiles_failed: usize,
    pub new_matches: usize,
    pub requests: u64,
    pub retries: u64,
}

/// A game deduced from the ladder counters.
///
/// The date is known when a match history entry could be attributed to the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InferredGame {
    pub(crate) result: GameResult,
    pub(crate) datetime: Option<OffsetDateTime>,
}

/// Keeps the tracked players and their matches in sync with the ladder.
pub struct Monitor {
    repo: DynLadderRepo,
    api: Arc<Sc2Api>,
}

impl Monitor {
    pub fn new(repo: DynLadderRepo, api: Arc<Sc2Api>) -> Self {
        Self { repo, api }
    }

    /// Builds the API client on top of the configuration table of the repository.
    pub fn with_api_conf(repo: DynLadderRepo, api_conf: ApiConf) -> anyhow::Result<Self> {
        let provider = Arc::new(RepoConfig(Arc::clone(&repo)));
        let api = Sc2Api::new(api_conf, provider).context("failed to build the API client")?;
        Ok(Self::new(repo, Arc::new(api)))
    }

    pub fn repo(&self) -> &DynLadderRepo {
        &self.repo
    }

    /// Stores the API credentials in the configuration table.
    pub async fn set_credentials(&self, key: &str, secret: &str) -> anyhow::Result<()> {
        self.repo.set_config(sc2_api::API_KEY_CONFIG, key).await?;
        self.repo.set_config(sc2_api::API_SECRET_CONFIG, secret).await?;
        self.api.read_config().await?;
        Ok(())
    }

    /// Starts tracking the profile behind `url`, one row per race it plays.
    ///
    /// Existing rows are kept as is.
    pub async fn add_player(&self, url: &str) -> anyhow::Result<Vec<Player>> {
        let profile = sc2_api::parse_profile_url(url)?;

        self.api.read_config().await?;

        let season = self.season_of(profile.server).await?;
        let entries = self.ladder_entries(profile).await?;

        let mut players = Vec::with_capacity(entries.len().max(1));

        if entries.is_empty() {
            let player = match self.repo.find_player(profile, Race::Random).await? {
                Some(player) => player,
                None => {
                    let metadata = self.api.get_metadata(profile).await?;
                    let name = metadata
                        .get("name")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default();

                    let mut new_player = NewPlayer::new(profile, Race::Random);
                    new_player.name = name.to_owned();

                    let player = self.repo.insert_player(new_player).await?;
                    info!(%profile, name = %player.name, "Added unranked player");
                    player
                }
            };

            players.push(player);
        } else {
            for entry in &entries {
                let player = match self.repo.find_player(profile, entry.race).await? {
                    Some(player) => player,
                    None => self.create_player(profile, entry, season.as_ref()).await?,
                };

                players.push(player);
            }
        }

        for player in &players {
            self.refresh_statistics(player, season.as_ref()).await?;
        }

        Ok(players)
    }

    /// Adds every profile, logging the failures.
    pub async fn add_players(&self, urls: &[String]) -> usize {
        let mut added = 0;

        for url in urls {
            match self.add_player(url).await {
                Ok(players) => added += players.len(),
                Err(error) => error!(%url, error = format!("{error:#}"), "Failed to add player"),
            }
        }

        added
    }

    /// Stops tracking the profile behind `url`.
    ///
    /// Returns the number of deleted rows.
    pub async fn remove_player(&self, url: &str) -> anyhow::Result<usize> {
        let profile = sc2_api::parse_profile_url(url)?;

        let mut deleted = 0;

        for player in self.repo.players_of_profile(profile).await? {
            if self.repo.delete_player(player.id).await? {
                deleted += 1;
            }
        }

        info!(%profile, deleted, "Removed player");

        Ok(deleted)
    }

    /// Refreshes the current season of every server with tracked players.
    pub async fn update_seasons(&self) -> anyhow::Result<Vec<Season>> {
        let servers: BTreeSet<Server> = self
            .repo
            .players()
            .await?
            .iter()
            .map(|player| player.server)
            .filter(|server| *server != Server::Unknown)
            .collect();

        let mut seasons = Vec::with_capacity(servers.len());

        for server in servers {
            seasons.push(self.fetch_season(server).await?);
        }

        Ok(seasons)
    }

    /// Runs one polling cycle over all the tracked profiles.
    ///
    /// A failing profile does not interrupt the cycle.
    pub async fn update_all(&self) -> anyhow::Result<UpdateReport> {
        self.run_cycle(|| false).await
    }

    /// Same as [`Monitor::update_all`], but stops before the next profile once shutdown is signaled.
    ///
    /// A profile being updated is always finished.
    pub async fn update_all_until(&self, shutdown_signal: &ShutdownSignal) -> anyhow::Result<UpdateReport> {
        self.run_cycle(|| shutdown_signal.is_signaled()).await
    }

    async fn run_cycle(&self, interrupted: impl Fn() -> bool) -> anyhow::Result<UpdateReport> {
        let requests_before = self.api.request_count();
        let retries_before = self.api.retry_count();

        self.api.read_config().await?;

        if let Err(error) = self.update_seasons().await {
            warn!(error = format!("{error:#}"), "Failed to update seasons");
        }

        let profiles: BTreeSet<ProfileId> = self.repo.players().await?.iter().map(Player::profile).collect();

        let mut report = UpdateReport::default();

        for profile in profiles {
            if interrupted() {
                debug!("Polling cycle interrupted");
                break;
            }

            match self.update_profile(profile).await {
                Ok(new_matches) => {
                    report.profiles_updated += 1;
                    report.new_matches += new_matches;
                }
                Err(error) => {
                    report.profiles_failed += 1;
                    error!(%profile, error = format!("{error:#}"), "Failed to update profile");
                }
            }
        }

        report.requests = self.api.request_count() - requests_before;
        report.retries = self.api.retry_count() - retries_before;

        info!(
            updated = report.profiles_updated,
            failed = report.profiles_failed,
            new_matches = report.new_matches,
            requests = report.requests,
            retries = report.retries,
            "Update cycle complete"
        );

        Ok(report)
    }

    /// Synchronizes every race row of a profile with the ladder, recording the new matches.
    ///
    /// Returns the number of recorded matches.
    pub async fn update_profile(&self, profile: ProfileId) -> anyhow::Result<usize> {
        let entries = self.ladder_entries(profile).await?;

        if entries.is_empty() {
            debug!(%profile, "Profile is not ranked in any 1v1 ladder");
            return Ok(0);
        }

        let history = self.api.get_match_history(profile).await?;
        let season = self.repo.current_season(profile.server).await?;
        let now = OffsetDateTime::now_utc();

        // History entries are shared by all the races of the profile.
        let mut used = vec![false; history.len()];
        let mut new_matches = 0;

        for entry in &entries {
            match self.repo.find_player(profile, entry.race).await? {
                Some(player) => {
                    new_matches += self
                        .apply_entry(player, entry, &history, &mut used, season.as_ref(), now)
                        .await?;
                }
                None => {
                    let player = self.create_player(profile, entry, season.as_ref()).await?;
                    self.refresh_statistics(&player, season.as_ref()).await?;
                }
            }
        }

        Ok(new_matches)
    }

    /// Players with their statistics, in a form suitable for display.
    pub async fn report(&self) -> anyhow::Result<serde_json::Value> {
        let mut players = Vec::new();

        for player in self.repo.players().await? {
            let statistics = self.repo.statistics_of(player.id).await?;

            let last_played = player
                .last_played
                .map(|datetime| datetime.format(&Rfc3339))
                .transpose()
                .context("failed to format date")?;

            players.push(serde_json::json!({
                "profile": player.profile().to_string(),
                "server": player.server.short(),
                "name": player.name,
                "race": player.race.describe(),
                "league": player.league.describe(),
                "mmr": player.mmr,
                "wins": player.wins,
                "losses": player.losses,
                "lastPlayed": last_played,
                "statistics": statistics.map(|statistics| serde_json::json!({
                    "games": statistics.games,
                    "winrate": statistics.winrate,
                    "wmaMmr": statistics.wma_mmr,
                    "maxMmr": statistics.max_mmr,
                    "minMmr": statistics.min_mmr,
                    "avgMmr": statistics.avg_mmr,
                    "sdMmr": statistics.sd_mmr,
                    "longestWinningStreak": statistics.longest_winning_streak,
                    "longestLosingStreak": statistics.longest_losing_streak,
                    "guessedGames": statistics.guessed_games,
                    "instantLeftGames": statistics.instant_left_games,
                    "lrMmrSlope": statistics.lr_mmr_slope,
                    "lrMmrIntercept": statistics.lr_mmr_intercept,
                })),
            }));
        }

        Ok(serde_json::Value::Array(players))
    }

    async fn apply_entry(
        &self,
        mut player: Player,
        entry: &LadderEntry,
        history: &[HistoryMatch],
        used: &mut [bool],
        season: Option<&Season>,
        now: OffsetDateTime,
    ) -> anyhow::Result<usize> {
        let wins_delta = entry.wins - player.wins;
        let losses_delta = entry.losses - player.losses;

        let mut planned = Vec::new();

        if player.ladder_id != entry.ladder_id || wins_delta < 0 || losses_delta < 0 {
            info!(
                profile = %player.profile(),
                race = %player.race,
                old_ladder = player.ladder_id,
                new_ladder = entry.ladder_id,
                "Ladder changed or counters reset, rebasing without inferring matches"
            );
        } else if wins_delta > 0 || losses_delta > 0 {
            let threshold = player.last_played.unwrap_or(player.refreshed);
            let games = infer_games(wins_delta, losses_delta, history, used, threshold);

            let previous = self.repo.latest_match(player.id).await?;
            planned = plan_matches(&player, previous.as_ref(), &games, entry.mmr, now);

            info!(
                profile = %player.profile(),
                race = %player.race,
                wins = wins_delta,
                losses = losses_delta,
                mmr_change = entry.mmr - player.mmr,
                "New matches"
            );
        }

        if let Some(latest) = planned.iter().map(|new_match| new_match.datetime).max() {
            player.last_played = Some(player.last_played.map_or(latest, |last| last.max(latest)));
        }

        player.mmr = entry.mmr;
        player.wins = entry.wins;
        player.losses = entry.losses;
        player.league = entry.league;
        player.name.clone_from(&entry.name);
        player.ladder_id = entry.ladder_id;
        player.ladder_joined = Some(entry.joined);

        if let Some(season) = season {
            player.last_active_season = season.season_id;
        }

        let since = season.map(|season| season.start);
        let stored = self.repo.matches_of(player.id, since).await?;
        let matches = with_planned_matches(stored, &planned, since);
        let statistics = compute_statistics(&player, &matches);

        let recorded = self.repo.record_update(&player, planned, &statistics).await?;

        for stored in &recorded {
            debug!(
                profile = %player.profile(),
                race = %player.race,
                result = %stored.result,
                mmr = stored.mmr,
                guess = stored.guess,
                "Recorded match"
            );
        }

        Ok(recorded.len())
    }

    async fn create_player(
        &self,
        profile: ProfileId,
        entry: &LadderEntry,
        season: Option<&Season>,
    ) -> anyhow::Result<Player> {
        let new_player = NewPlayer {
            profile,
            race: entry.race,
            name: entry.name.clone(),
            ladder_id: entry.ladder_id,
            league: entry.league,
            mmr: entry.mmr,
            wins: entry.wins,
            losses: entry.losses,
            ladder_joined: Some(entry.joined),
            last_active_season: season.map_or(0, |season| season.season_id),
        };

        let player = self.repo.insert_player(new_player).await?;

        info!(
            %profile,
            race = %player.race,
            name = %player.name,
            league = %player.league,
            mmr = player.mmr,
            "Tracking new player"
        );

        Ok(player)
    }

    async fn refresh_statistics(&self, player: &Player, season: Option<&Season>) -> anyhow::Result<()> {
        let matches = self
            .repo
            .matches_of(player.id, season.map(|season| season.start))
            .await?;

        let statistics = compute_statistics(player, &matches);

        self.repo.upsert_statistics(&statistics).await
    }

    /// Returns the stored season of the server, fetching it when unknown.
    async fn season_of(&self, server: Server) -> anyhow::Result<Option<Season>> {
        if let Some(season) = self.repo.current_season(server).await? {
            return Ok(Some(season));
        }

        match self.fetch_season(server).await {
            Ok(season) => Ok(Some(season)),
            Err(error) => {
                warn!(%server, error = format!("{error:#}"), "Failed to fetch current season");
                Ok(None)
            }
        }
    }

    async fn fetch_season(&self, server: Server) -> anyhow::Result<Season> {
        let season = self.api.get_season(server).await?;
        let season = self.repo.upsert_season(&season).await?;

        debug!(%server, season_id = season.season_id, "Season updated");

        Ok(season)
    }

    /// Returns one 1v1 ladder entry per race, the most recently joined ladder wins.
    async fn ladder_entries(&self, profile: ProfileId) -> anyhow::Result<Vec<LadderEntry>> {
        let mut by_race: BTreeMap<Race, LadderEntry> = BTreeMap::new();

        for ladder_id in self.api.get_ladders(profile).await? {
            for entry in self.api.get_ladder_data(profile, ladder_id).await? {
                match by_race.entry(entry.race) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(entry);
                    }
                    Entry::Occupied(mut occupied) => {
                        if entry.joined > occupied.get().joined {
                            occupied.insert(entry);
                        }
                    }
                }
            }
        }

        Ok(by_race.into_values().collect())
    }
}

/// Deduces the games behind the counter deltas, oldest first.
///
/// Each game takes the date of the oldest unused history entry with the same result played after
/// `threshold`. Games without such an entry come last and have no date.
pub(crate) fn infer_games(
    wins: i64,
    losses: i64,
    history: &[HistoryMatch],
    used: &mut [bool],
    threshold: OffsetDateTime,
) -> Vec<InferredGame> {
    let mut games = Vec::new();

    for (result, count) in [(GameResult::Win, wins), (GameResult::Loss, losses)] {
        for _ in 0..count {
            // History is newest first.
            let found = history
                .iter()
                .enumerate()
                .rev()
                .find(|(idx, item)| !used[*idx] && item.result == result && item.datetime > threshold)
                .map(|(idx, item)| (idx, item.datetime));

            let datetime = found.map(|(idx, datetime)| {
                used[idx] = true;
                datetime
            });

            games.push(InferredGame { result, datetime });
        }
    }

    games.sort_by_key(|game| (game.datetime.is_none(), game.datetime));

    games
}

/// Turns inferred games into matches.
///
/// The MMR change is attributed to the last game. A dated game bounds the length of the next
/// one, while undated games share the window since the last known game.
pub(crate) fn plan_matches(
    player: &Player,
    previous: Option<&Match>,
    games: &[InferredGame],
    new_mmr: i64,
    now: OffsetDateTime,
) -> Vec<NewMatch> {
    let mut window_start = player.last_played.or(previous.map(|m| m.datetime));
    let mut ema_state = previous.map(|m| (m.ema_mmr, m.emvar_mmr));

    games
        .iter()
        .enumerate()
        .map(|(idx, game)| {
            let is_last = idx + 1 == games.len();

            let (mmr, mmr_change) = if is_last {
                (new_mmr, new_mmr - player.mmr)
            } else {
                (player.mmr, 0)
            };

            let datetime = game.datetime.unwrap_or(now);

            let max_length = window_start.map_or(DEFAULT_MAX_LENGTH_SECS, |start| {
                (datetime - start).whole_seconds().max(0)
            });

            let (ema_mmr, emvar_mmr) = match ema_state {
                Some((ema, emvar)) => ema_step(ema, emvar, mmr),
                None => (mmr as f64, 0.0),
            };

            ema_state = Some((ema_mmr, emvar_mmr));

            if game.datetime.is_some() {
                window_start = Some(datetime);
            }

            NewMatch {
                player_id: player.id,
                result: game.result,
                datetime,
                mmr,
                mmr_change,
                guess: game.datetime.is_none(),
                max_length,
                ema_mmr: Some(ema_mmr),
                emvar_mmr,
            }
        })
        .collect()
}

/// Adds the planned matches to the stored ones, keeping the newest first order.
///
/// Planned matches get provisional ids above the stored ones.
#[allow(clippy::cast_precision_loss)] // MMR values are far below 2^52.
pub(crate) fn with_planned_matches(
    mut matches: Vec<Match>,
    planned: &[NewMatch],
    since: Option<OffsetDateTime>,
) -> Vec<Match> {
    let next_id = matches.iter().map(|m| m.id).max().unwrap_or(0) + 1;

    let provisional = planned
        .iter()
        .zip(next_id..)
        .filter(|(new_match, _)| since.is_none_or(|since| new_match.datetime >= since))
        .map(|(new_match, id)| Match {
            id,
            player_id: new_match.player_id,
            result: new_match.result,
            datetime: new_match.datetime,
            mmr: new_match.mmr,
            mmr_change: new_match.mmr_change,
            guess: new_match.guess,
            max_length: new_match.max_length,
            ema_mmr: new_match.ema_mmr.unwrap_or(new_match.mmr as f64),
            emvar_mmr: new_match.emvar_mmr,
        });

    matches.extend(provisional);
    matches.sort_by(|a, b| b.datetime.cmp(&a.datetime).then(b.id.cmp(&a.id)));

    matches
}

#[cfg(test)]
mod tests {
    use ladder_store::League;

    use super::*;

    fn at(unix: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(unix).unwrap()
    }

    fn history_item(result: GameResult, unix: i64) -> HistoryMatch {
        HistoryMatch {
            result,
            datetime: at(unix),
        }
    }

    fn player() -> Player {
        Player {
            id: 1,
            player_id: 221986,
            realm: 1,
            server: Server::Europe,
            name: "Serral".to_owned(),
            race: Race::Zerg,
            ladder_id: 292783,
            league: League::Grandmaster,
            mmr: 7000,
            wins: 10,
            losses: 5,
            refreshed: at(1_000),
            last_played: Some(at(1_000)),
            ladder_joined: Some(at(0)),
            last_active_season: 58,
        }
    }

    #[test]
    fn games_take_dates_from_history() {
        // Newest first, like the API.
        let history = [
            history_item(GameResult::Win, 1_900),
            history_item(GameResult::Loss, 1_600),
            history_item(GameResult::Win, 1_300),
            history_item(GameResult::Win, 900),
        ];
        let mut used = vec![false; history.len()];

        let games = infer_games(2, 1, &history, &mut used, at(1_000));

        assert_eq!(
            games,
            [
                InferredGame {
                    result: GameResult::Win,
                    datetime: Some(at(1_300))
                },
                InferredGame {
                    result: GameResult::Loss,
                    datetime: Some(at(1_600))
                },
                InferredGame {
                    result: GameResult::Win,
                    datetime: Some(at(1_900))
                },
            ]
        );
        assert_eq!(used, [true, true, true, false]);
    }

    #[test]
    fn missing_history_yields_undated_games_last() {
        let history = [history_item(GameResult::Loss, 1_500)];
        let mut used = vec![false; history.len()];

        let games = infer_games(2, 1, &history, &mut used, at(1_000));

        assert_eq!(games.len(), 3);
        assert_eq!(games[0].result, GameResult::Loss);
        assert_eq!(games[0].datetime, Some(at(1_500)));
        assert!(games[1..].iter().all(|game| game.datetime.is_none()));
        assert!(games[1..].iter().all(|game| game.result == GameResult::Win));

        // Already attributed entries are not reused.
        let games = infer_games(0, 1, &history, &mut used, at(1_000));
        assert_eq!(games[0].datetime, None);
    }

    #[test]
    fn mmr_change_goes_to_the_last_match() {
        let games = [
            InferredGame {
                result: GameResult::Win,
                datetime: Some(at(1_300)),
            },
            InferredGame {
                result: GameResult::Loss,
                datetime: Some(at(1_330)),
            },
            InferredGame {
                result: GameResult::Win,
                datetime: None,
            },
        ];

        let matches = plan_matches(&player(), None, &games, 7030, at(2_000));

        assert_eq!(matches.len(), 3);

        assert_eq!(matches[0].mmr, 7000);
        assert_eq!(matches[0].mmr_change, 0);
        assert_eq!(matches[0].max_length, 300);
        assert_eq!(matches[0].ema_mmr, Some(7000.0));
        assert_eq!(matches[0].emvar_mmr, 0.0);
        assert!(!matches[0].guess);

        assert_eq!(matches[1].max_length, 30);
        assert_eq!(matches[1].result, GameResult::Loss);

        assert_eq!(matches[2].mmr, 7030);
        assert_eq!(matches[2].mmr_change, 30);
        assert_eq!(matches[2].datetime, at(2_000));
        assert_eq!(matches[2].max_length, 670);
        assert!(matches[2].guess);
        assert_eq!(matches[2].ema_mmr, Some(7003.0));
    }

    #[test]
    fn first_match_without_any_reference_gets_default_length() {
        let mut player = player();
        player.last_played = None;

        let games = [InferredGame {
            result: GameResult::Win,
            datetime: None,
        }];

        let matches = plan_matches(&player, None, &games, 7020, at(2_000));

        assert_eq!(matches[0].max_length, DEFAULT_MAX_LENGTH_SECS);
        assert_eq!(matches[0].ema_mmr, Some(7020.0));
    }

    #[test]
    fn ema_is_seeded_from_the_previous_match() {
        let previous = Match {
            id: 4,
            player_id: 1,
            result: GameResult::Win,
            datetime: at(900),
            mmr: 7000,
            mmr_change: 20,
            guess: false,
            max_length: 600,
            ema_mmr: 6900.0,
            emvar_mmr: 100.0,
        };

        let games = [InferredGame {
            result: GameResult::Loss,
            datetime: Some(at(1_100)),
        }];

        let matches = plan_matches(&player(), Some(&previous), &games, 6980, at(2_000));

        // diff = 80, increment = 8
        assert_eq!(matches[0].ema_mmr, Some(6908.0));
        assert!((matches[0].emvar_mmr - 0.9 * (100.0 + 80.0 * 8.0)).abs() < 1e-9);
        assert_eq!(matches[0].max_length, 100);
    }

    #[test]
    fn planned_matches_join_the_stored_ones() {
        let stored = Match {
            id: 7,
            player_id: 1,
            result: GameResult::Win,
            datetime: at(1_500),
            mmr: 7000,
            mmr_change: 20,
            guess: false,
            max_length: 300,
            ema_mmr: 6990.0,
            emvar_mmr: 10.0,
        };

        let games = [
            InferredGame {
                result: GameResult::Loss,
                datetime: Some(at(900)),
            },
            InferredGame {
                result: GameResult::Win,
                datetime: Some(at(1_800)),
            },
            InferredGame {
                result: GameResult::Loss,
                datetime: None,
            },
        ];
        let planned = plan_matches(&player(), Some(&stored), &games, 6990, at(1_800));

        let matches = with_planned_matches(vec![stored], &planned, Some(at(1_000)));

        // The game before the cutoff is left out, the guess shares its date with the last known game.
        let ids: Vec<_> = matches.iter().map(|m| m.id).collect();
        assert_eq!(ids, [10, 9, 7]);
        assert!(matches[0].guess);
        assert_eq!(matches[0].mmr, 6990);
        assert_eq!(matches[1].result, GameResult::Win);
    }
}

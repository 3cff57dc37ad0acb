//! Per-player statistics over the matches of the current season.

use ladder_store::{GameResult, Match, Player, Statistics};

/// Smoothing factor of the exponential moving average and variance of the MMR.
pub const EMA_ALPHA: f64 = 0.1;

/// Losses shorter than this are counted as instant leaves.
pub const INSTANT_LEFT_MAX_SECS: i64 = 60;

/// Advances the exponentially weighted mean and variance with a new MMR sample.
///
/// Returns the new `(mean, variance)` pair.
pub fn ema_step(ema: f64, emvar: f64, mmr: i64) -> (f64, f64) {
    let diff = mmr as f64 - ema;
    let increment = EMA_ALPHA * diff;
    (ema + increment, (1.0 - EMA_ALPHA) * (emvar + diff * increment))
}

/// Computes the statistics of `player` from its matches, given newest first.
pub fn compute_statistics(player: &Player, matches: &[Match]) -> Statistics {
    if matches.is_empty() {
        return Statistics {
            player_id: player.id,
            current_mmr: player.mmr,
            wma_mmr: player.mmr,
            max_mmr: player.mmr,
            min_mmr: player.mmr,
            avg_mmr: player.mmr as f64,
            ..Statistics::default()
        };
    }

    // Oldest first from here on.
    let matches: Vec<&Match> = matches.iter().rev().collect();
    let mmrs: Vec<f64> = matches.iter().map(|m| m.mmr as f64).collect();

    let games = len_i64(matches.len());
    let wins = count(&matches, |m| m.result == GameResult::Win);
    let losses = count(&matches, |m| m.result == GameResult::Loss);

    let avg_mmr = mean(&mmrs);
    let sd_mmr = (mmrs.iter().map(|mmr| (mmr - avg_mmr).powi(2)).sum::<f64>() / mmrs.len() as f64).sqrt();

    let (lr_mmr_slope, lr_mmr_intercept) = linear_regression(&mmrs);

    Statistics {
        player_id: player.id,
        winrate: wins as f64 / games as f64 * 100.0,
        games,
        current_mmr: player.mmr,
        wma_mmr: weighted_moving_average(&mmrs),
        max_mmr: matches.iter().map(|m| m.mmr).max().unwrap_or(player.mmr),
        min_mmr: matches.iter().map(|m| m.mmr).min().unwrap_or(player.mmr),
        wins,
        losses,
        longest_winning_streak: longest_streak(&matches, GameResult::Win),
        longest_losing_streak: longest_streak(&matches, GameResult::Loss),
        guessed_games: count(&matches, |m| m.guess),
        lr_mmr_slope,
        lr_mmr_intercept,
        sd_mmr,
        avg_mmr,
        instant_left_games: count(&matches, |m| {
            m.result == GameResult::Loss && m.max_length < INSTANT_LEFT_MAX_SECS
        }),
    }
}

fn count(matches: &[&Match], predicate: impl Fn(&Match) -> bool) -> i64 {
    len_i64(matches.iter().filter(|&&m| predicate(m)).count())
}

fn len_i64(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Linearly weighted, the newest sample weighs the most.
#[allow(clippy::cast_possible_truncation)] // MMR values are far within i64 range.
fn weighted_moving_average(mmrs: &[f64]) -> i64 {
    let (weighted_sum, weight_sum) = mmrs
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(weighted_sum, weight_sum), (idx, mmr)| {
            let weight = (idx + 1) as f64;
            (weighted_sum + weight * mmr, weight_sum + weight)
        });

    (weighted_sum / weight_sum).round() as i64
}

fn longest_streak(matches: &[&Match], result: GameResult) -> i64 {
    let mut longest = 0;
    let mut current = 0;

    for m in matches {
        if m.result == result {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }

    longest
}

/// Least squares fit of the MMR over the game index.
fn linear_regression(mmrs: &[f64]) -> (f64, f64) {
    if mmrs.len() < 2 {
        return (0.0, mmrs.first().copied().unwrap_or(0.0));
    }

    let x_mean = (mmrs.len() - 1) as f64 / 2.0;
    let y_mean = mean(mmrs);

    let (covariance, variance) = mmrs
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(covariance, variance), (idx, mmr)| {
            let dx = idx as f64 - x_mean;
            (covariance + dx * (mmr - y_mean), variance + dx * dx)
        });

    let slope = covariance / variance;

    (slope, y_mean - slope * x_mean)
}

#[cfg(test)]
mod tests {
    use ladder_store::{League, Race, Server};
    use time::OffsetDateTime;

    use super::*;

    fn player(mmr: i64) -> Player {
        Player {
            id: 7,
            player_id: 221986,
            realm: 1,
            server: Server::Europe,
            name: "Serral".to_owned(),
            race: Race::Zerg,
            ladder_id: 292783,
            league: League::Grandmaster,
            mmr,
            wins: 0,
            losses: 0,
            refreshed: OffsetDateTime::UNIX_EPOCH,
            last_played: None,
            ladder_joined: None,
            last_active_season: 58,
        }
    }

    /// Builds matches from oldest to newest, returned newest first like the repository does.
    fn history(games: &[(GameResult, i64, i64)]) -> Vec<Match> {
        let mut matches: Vec<Match> = games
            .iter()
            .enumerate()
            .map(|(idx, &(result, mmr, max_length))| Match {
                id: idx as i64 + 1,
                player_id: 7,
                result,
                datetime: OffsetDateTime::UNIX_EPOCH,
                mmr,
                mmr_change: 0,
                guess: idx % 2 == 1,
                max_length,
                ema_mmr: mmr as f64,
                emvar_mmr: 0.0,
            })
            .collect();
        matches.reverse();
        matches
    }

    #[test]
    fn no_matches() {
        let statistics = compute_statistics(&player(4000), &[]);

        assert_eq!(statistics.games, 0);
        assert_eq!(statistics.winrate, 0.0);
        assert_eq!(statistics.current_mmr, 4000);
        assert_eq!(statistics.wma_mmr, 4000);
        assert_eq!(statistics.max_mmr, 4000);
        assert_eq!(statistics.min_mmr, 4000);
        assert_eq!(statistics.avg_mmr, 4000.0);
        assert_eq!(statistics.sd_mmr, 0.0);
        assert_eq!(statistics.lr_mmr_intercept, 0.0);
    }

    #[test]
    fn single_match() {
        let statistics = compute_statistics(&player(4020), &history(&[(GameResult::Win, 4020, 600)]));

        assert_eq!(statistics.games, 1);
        assert_eq!(statistics.winrate, 100.0);
        assert_eq!(statistics.lr_mmr_slope, 0.0);
        assert_eq!(statistics.lr_mmr_intercept, 4020.0);
        assert_eq!(statistics.longest_winning_streak, 1);
        assert_eq!(statistics.longest_losing_streak, 0);
    }

    #[test]
    fn aggregates() {
        let matches = history(&[
            (GameResult::Win, 4000, 600),
            (GameResult::Win, 4020, 700),
            (GameResult::Loss, 4000, 30),
            (GameResult::Tie, 4000, 900),
            (GameResult::Win, 4020, 500),
            (GameResult::Win, 4040, 800),
            (GameResult::Win, 4060, 650),
            (GameResult::Loss, 4040, 720),
        ]);

        let statistics = compute_statistics(&player(4040), &matches);

        assert_eq!(statistics.games, 8);
        assert_eq!(statistics.wins, 5);
        assert_eq!(statistics.losses, 2);
        assert_eq!(statistics.winrate, 62.5);
        assert_eq!(statistics.max_mmr, 4060);
        assert_eq!(statistics.min_mmr, 4000);
        assert_eq!(statistics.avg_mmr, 4022.5);
        assert_eq!(statistics.longest_winning_streak, 3);
        assert_eq!(statistics.longest_losing_streak, 1);
        assert_eq!(statistics.guessed_games, 4);
        assert_eq!(statistics.instant_left_games, 1);
        // (1*4000 + 2*4020 + 3*4000 + 4*4000 + 5*4020 + 6*4040 + 7*4060 + 8*4040) / 36
        assert_eq!(statistics.wma_mmr, 4031);
        assert!(statistics.lr_mmr_slope > 0.0);
        assert!((statistics.sd_mmr - 443.75_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn regression_of_a_straight_line() {
        let matches = history(&[
            (GameResult::Win, 3000, 600),
            (GameResult::Win, 3010, 600),
            (GameResult::Win, 3020, 600),
            (GameResult::Win, 3030, 600),
        ]);

        let statistics = compute_statistics(&player(3030), &matches);

        assert!((statistics.lr_mmr_slope - 10.0).abs() < 1e-9);
        assert!((statistics.lr_mmr_intercept - 3000.0).abs() < 1e-9);
    }

    #[test]
    fn ema_converges_towards_samples() {
        let (ema, emvar) = ema_step(4000.0, 0.0, 4100);
        assert!((ema - 4010.0).abs() < 1e-9);
        assert!((emvar - 900.0).abs() < 1e-9);

        let (ema, emvar) = ema_step(ema, emvar, 4010);
        assert!((ema - 4010.0).abs() < 1e-9);
        assert!((emvar - 810.0).abs() < 1e-9);
    }
}

use std::sync::LazyLock;

use ladder_store::{ProfileId, Server};
use regex::Regex;

use crate::ApiError;

static STARCRAFT2_COM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://starcraft2\.com/(?:\w+-\w+/)?profile/([1-5])/([1-2])/(\d+)/?")
        .expect("valid starcraft2.com profile regex")
});

static LEGACY_BATTLE_NET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(eu|us)\.battle\.net/sc2/\w+/profile/(\d+)/([1-2])/\w+/?")
        .expect("valid battle.net profile regex")
});

/// Extracts the profile identity out of a StarCraft II profile URL.
///
/// Two forms are recognized:
/// - `https://starcraft2.com/en-gb/profile/{region}/{realm}/{id}`
/// - `https://eu.battle.net/sc2/en/profile/{id}/{realm}/{name}/` (legacy)
pub fn parse_profile_url(url: &str) -> Result<ProfileId, ApiError> {
    if let Some(captures) = STARCRAFT2_COM.captures(url) {
        let region = parse_number(url, &captures[1])?;
        let realm = parse_number(url, &captures[2])?;
        let player_id = parse_number(url, &captures[3])?;

        return Ok(ProfileId {
            server: Server::from_id(region)?,
            realm,
            player_id,
        });
    }

    if let Some(captures) = LEGACY_BATTLE_NET.captures(url) {
        let server = if captures[1].eq_ignore_ascii_case("eu") {
            Server::Europe
        } else {
            Server::America
        };
        let player_id = parse_number(url, &captures[2])?;
        let realm = parse_number(url, &captures[3])?;

        return Ok(ProfileId {
            server,
            realm,
            player_id,
        });
    }

    Err(ApiError::InvalidProfileUrl(url.to_owned()))
}

fn parse_number(url: &str, digits: &str) -> Result<i64, ApiError> {
    // Only reachable with ids overflowing i64.
    digits
        .parse()
        .map_err(|_| ApiError::InvalidProfileUrl(url.to_owned()))
}

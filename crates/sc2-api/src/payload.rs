//! Wire format of the community API responses.
//!
//! The API is not consistent about numbers: ids and dates are sometimes sent as strings.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SeasonPayload {
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) season_id: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) number: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) year: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) start_date: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) end_date: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LadderSummaryPayload {
    #[serde(default)]
    pub(crate) all_ladder_memberships: Vec<LadderMembership>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LadderMembership {
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) ladder_id: i64,
    #[serde(default)]
    pub(crate) localized_game_mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LadderPayload {
    #[serde(default)]
    pub(crate) league: String,
    #[serde(default)]
    pub(crate) ranks_and_pools: Vec<RankAndPool>,
    #[serde(default)]
    pub(crate) ladder_teams: Vec<LadderTeam>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RankAndPool {
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) rank: i64,
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub(crate) mmr: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LadderTeam {
    #[serde(default)]
    pub(crate) team_members: Vec<TeamMember>,
    #[serde(default, deserialize_with = "lenient_opt_int")]
    pub(crate) mmr: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) wins: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) losses: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) join_timestamp: i64,
}

impl LadderTeam {
    /// Whether the first member of the team is the given profile.
    pub(crate) fn is_led_by(&self, player_id: i64, realm: i64) -> bool {
        self.team_members
            .first()
            .is_some_and(|member| member.id == player_id && member.realm == realm)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TeamMember {
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) id: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) realm: i64,
    #[serde(default)]
    pub(crate) display_name: String,
    #[serde(default)]
    pub(crate) favorite_race: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MatchHistoryPayload {
    #[serde(default)]
    pub(crate) matches: Vec<HistoryItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryItem {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) decision: String,
    #[serde(deserialize_with = "lenient_int")]
    pub(crate) date: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenPayload {
    pub(crate) access_token: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientInt {
    Int(i64),
    Float(f64),
    Str(String),
}

impl LenientInt {
    fn into_i64<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            LenientInt::Int(value) => Ok(value),
            #[allow(clippy::cast_possible_truncation)] // Timestamps are sometimes sent with a fractional part.
            LenientInt::Float(value) if value.is_finite() => Ok(value.trunc() as i64),
            LenientInt::Float(value) => Err(E::custom(format!("invalid number: {value}"))),
            LenientInt::Str(value) => value
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid integer string: {value}"))),
        }
    }
}

fn lenient_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    LenientInt::deserialize(deserializer)?.into_i64()
}

fn lenient_opt_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<LenientInt>::deserialize(deserializer)?
        .map(LenientInt::into_i64)
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn season_accepts_string_numbers() {
        let payload: SeasonPayload = serde_json::from_str(
            r#"{"seasonId": 58, "number": "1", "year": 2024, "startDate": "1700000000", "endDate": 1710000000.0}"#,
        )
        .unwrap();

        assert_eq!(payload.season_id, 58);
        assert_eq!(payload.number, 1);
        assert_eq!(payload.start_date, 1_700_000_000);
        assert_eq!(payload.end_date, 1_710_000_000);
    }

    #[test]
    fn team_leader_check() {
        let team: LadderTeam = serde_json::from_str(
            r#"{"teamMembers": [{"id": "42", "realm": 1, "displayName": "Foo", "favoriteRace": "zerg"}],
                "mmr": 4000, "wins": 3, "losses": 2, "joinTimestamp": 1700000000}"#,
        )
        .unwrap();

        assert!(team.is_led_by(42, 1));
        assert!(!team.is_led_by(42, 2));
        assert!(!team.is_led_by(43, 1));
    }

    #[test]
    fn missing_team_mmr_is_none() {
        let team: LadderTeam =
            serde_json::from_str(r#"{"teamMembers": [], "wins": 0, "losses": 0, "joinTimestamp": 0}"#).unwrap();

        assert_eq!(team.mmr, None);
        assert!(!team.is_led_by(0, 0));
    }
}

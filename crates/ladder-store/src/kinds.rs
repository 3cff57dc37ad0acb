use core::fmt;

use crate::ModelError;

/// Returns the lowercased first character of `value`, if any.
fn first_letter(value: &str) -> Option<char> {
    value.chars().next().map(|c| c.to_ascii_lowercase())
}

/// Outcome of a single ladder game.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GameResult {
    #[default]
    Unknown = 0,
    Win = 1,
    Loss = 2,
    Tie = 3,
}

impl GameResult {
    const ALL: [GameResult; 4] = [Self::Unknown, Self::Win, Self::Loss, Self::Tie];

    /// Lenient name lookup, only the first letter is significant.
    ///
    /// ```
    /// # use ladder_store::GameResult;
    /// assert_eq!(GameResult::from_name("WIN"), GameResult::Win);
    /// assert_eq!(GameResult::from_name("left"), GameResult::Loss);
    /// assert_eq!(GameResult::from_name("observer"), GameResult::Unknown);
    /// ```
    pub fn from_name(value: &str) -> Self {
        let Some(letter) = first_letter(value) else {
            return Self::Unknown;
        };

        Self::ALL
            .into_iter()
            .find(|result| first_letter(result.describe()) == Some(letter))
            .unwrap_or(Self::Unknown)
    }

    /// Maps the numeric decision used by some API payloads.
    pub fn from_decision(value: i64) -> Self {
        match value {
            1 => Self::Win,
            -1 => Self::Loss,
            0 => Self::Tie,
            _ => Self::Unknown,
        }
    }

    pub fn from_db(value: i64) -> Result<Self, ModelError> {
        Self::ALL
            .into_iter()
            .find(|result| *result as i64 == value)
            .ok_or(ModelError::InvalidDiscriminant { kind: "result", value })
    }

    pub fn to_db(self) -> i64 {
        i64::from(self as u32)
    }

    /// Signed contribution of this result to a win/loss balance.
    pub fn change(self) -> f64 {
        match self {
            Self::Win => 1.0,
            Self::Loss => -1.0,
            Self::Unknown | Self::Tie => 0.0,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Win => "Win",
            Self::Loss => "Loss",
            Self::Tie => "Tie",
        }
    }

    pub fn short(self) -> &'static str {
        match self {
            Self::Unknown => "U",
            Self::Win => "W",
            Self::Loss => "L",
            Self::Tie => "D",
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Race {
    #[default]
    Random = 0,
    Protoss = 1,
    Terran = 2,
    Zerg = 3,
}

impl Race {
    const ALL: [Race; 4] = [Self::Random, Self::Protoss, Self::Terran, Self::Zerg];

    /// Parses the race as reported by the ladder API (`favoriteRace`).
    ///
    /// An empty value means the player has no favorite race, which is reported as random.
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let Some(letter) = first_letter(value) else {
            return Ok(Self::Random);
        };

        Self::ALL
            .into_iter()
            .find(|race| first_letter(race.describe()) == Some(letter))
            .ok_or_else(|| ModelError::UnknownRace(value.to_owned()))
    }

    pub fn from_db(value: i64) -> Result<Self, ModelError> {
        Self::ALL
            .into_iter()
            .find(|race| *race as i64 == value)
            .ok_or(ModelError::InvalidDiscriminant { kind: "race", value })
    }

    pub fn to_db(self) -> i64 {
        i64::from(self as u32)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Random => "Random",
            Self::Protoss => "Protoss",
            Self::Terran => "Terran",
            Self::Zerg => "Zerg",
        }
    }

    pub fn short(self) -> &'static str {
        match self {
            Self::Random => "R",
            Self::Protoss => "P",
            Self::Terran => "T",
            Self::Zerg => "Z",
        }
    }
}

impl fmt::Display for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Battle.net region hosting a profile.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Server {
    Unknown = 0,
    America = 1,
    #[default]
    Europe = 2,
    Korea = 3,
}

impl Server {
    /// Known regions, in region id order.
    pub const KNOWN: [Server; 3] = [Self::America, Self::Europe, Self::Korea];

    /// Resolves a Battle.net region id.
    ///
    /// ```
    /// # use ladder_store::Server;
    /// assert_eq!(Server::from_id(2).unwrap(), Server::Europe);
    /// assert!(Server::from_id(5).is_err());
    /// ```
    pub fn from_id(id: i64) -> Result<Self, ModelError> {
        Self::KNOWN
            .into_iter()
            .find(|server| server.id() == id)
            .ok_or(ModelError::UnsupportedRegion(id))
    }

    pub fn from_db(value: i64) -> Result<Self, ModelError> {
        if value == 0 {
            Ok(Self::Unknown)
        } else {
            Self::from_id(value)
        }
    }

    pub fn id(self) -> i64 {
        i64::from(self as u32)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::America => "America",
            Self::Europe => "Europe",
            Self::Korea => "Korea",
        }
    }

    pub fn short(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::America => "us",
            Self::Europe => "eu",
            Self::Korea => "kr",
        }
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Ladder league, ordered from lowest to highest.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum League {
    #[default]
    Unranked = -1,
    Bronze = 0,
    Silver = 1,
    Gold = 2,
    Platinum = 3,
    Diamond = 4,
    Master = 5,
    Grandmaster = 6,
}

impl League {
    const ALL: [League; 8] = [
        Self::Unranked,
        Self::Bronze,
        Self::Silver,
        Self::Gold,
        Self::Platinum,
        Self::Diamond,
        Self::Master,
        Self::Grandmaster,
    ];

    /// Parses the league name reported by the ladder API.
    ///
    /// Full names win over the first-letter shorthand so that `GRANDMASTER` is not taken for `Gold`.
    ///
    /// ```
    /// # use ladder_store::League;
    /// assert_eq!(League::parse("GRANDMASTER").unwrap(), League::Grandmaster);
    /// assert_eq!(League::parse("g").unwrap(), League::Gold);
    /// assert_eq!(League::parse("").unwrap(), League::Unranked);
    /// ```
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let Some(letter) = first_letter(value) else {
            return Ok(Self::Unranked);
        };

        if let Some(league) = Self::ALL
            .into_iter()
            .find(|league| league.describe().eq_ignore_ascii_case(value))
        {
            return Ok(league);
        }

        Self::ALL
            .into_iter()
            .find(|league| first_letter(league.describe()) == Some(letter))
            .ok_or_else(|| ModelError::UnknownLeague(value.to_owned()))
    }

    pub fn from_db(value: i64) -> Result<Self, ModelError> {
        Self::ALL
            .into_iter()
            .find(|league| league.id() == value)
            .ok_or(ModelError::InvalidDiscriminant { kind: "league", value })
    }

    pub fn id(self) -> i64 {
        i64::from(self as i32)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Unranked => "Unranked",
            Self::Bronze => "Bronze",
            Self::Silver => "Silver",
            Self::Gold => "Gold",
            Self::Platinum => "Platinum",
            Self::Diamond => "Diamond",
            Self::Master => "Master",
            Self::Grandmaster => "Grandmaster",
        }
    }
}

impl fmt::Display for League {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Win", GameResult::Win)]
    #[case("loss", GameResult::Loss)]
    #[case("TIE", GameResult::Tie)]
    #[case("", GameResult::Unknown)]
    #[case("bailer", GameResult::Unknown)]
    fn result_from_name(#[case] input: &str, #[case] expected: GameResult) {
        assert_eq!(GameResult::from_name(input), expected);
    }

    #[rstest]
    #[case(1, GameResult::Win)]
    #[case(-1, GameResult::Loss)]
    #[case(0, GameResult::Tie)]
    #[case(7, GameResult::Unknown)]
    fn result_from_decision(#[case] input: i64, #[case] expected: GameResult) {
        assert_eq!(GameResult::from_decision(input), expected);
    }

    #[test]
    fn result_change_and_labels() {
        assert_eq!(GameResult::Win.change(), 1.0);
        assert_eq!(GameResult::Loss.change(), -1.0);
        assert_eq!(GameResult::Tie.change(), 0.0);
        assert_eq!(GameResult::Tie.short(), "D");
        assert_eq!(GameResult::Unknown.to_string(), "Unknown");
    }

    #[rstest]
    #[case("Protoss", Race::Protoss)]
    #[case("terran", Race::Terran)]
    #[case("ZERG", Race::Zerg)]
    #[case("random", Race::Random)]
    #[case("", Race::Random)]
    fn race_parse(#[case] input: &str, #[case] expected: Race) {
        assert_eq!(Race::parse(input).unwrap(), expected);
    }

    #[test]
    fn race_parse_rejects_unknown() {
        assert!(matches!(Race::parse("xel'naga"), Err(ModelError::UnknownRace(_))));
    }

    #[rstest]
    #[case("BRONZE", League::Bronze)]
    #[case("gold", League::Gold)]
    #[case("grandmaster", League::Grandmaster)]
    #[case("MASTER", League::Master)]
    #[case("d", League::Diamond)]
    fn league_parse(#[case] input: &str, #[case] expected: League) {
        assert_eq!(League::parse(input).unwrap(), expected);
    }

    #[test]
    fn leagues_are_ordered() {
        assert!(League::Grandmaster > League::Master);
        assert!(League::Bronze > League::Unranked);
        assert!(League::Gold <= League::Gold);
    }

    #[test]
    fn db_discriminants_round_trip() {
        for league in League::ALL {
            assert_eq!(League::from_db(league.id()).unwrap(), league);
        }
        assert!(Race::from_db(9).is_err());
        assert_eq!(Server::from_db(0).unwrap(), Server::Unknown);
    }
}

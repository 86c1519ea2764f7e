//! Core data models used throughout checkmate.
//!
//! These types represent the units of work, raw artifacts, and warehouse rows
//! that flow through the ingestion and load pipelines.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Prefix under which raw per-player game archives live in the object store.
pub const PLAYER_PREFIX: &str = "player/";

/// A calendar month. Renders as the `YYYY/MM` token used in API and storage paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, Error> {
        if !(1..=12).contains(&month) || !(1000..=9999).contains(&year) {
            return Err(Error::InvalidPeriod(format!("{}/{}", year, month)));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// First day of the month.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}/{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPeriod(s.to_string());
        let (year, month) = s.split_once('/').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Period::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Period {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One player's one calendar month of games.
///
/// Field order matters: the derived ordering sorts by `(player_handle, period)`,
/// which is the order the ledger diffs and the fetcher walks in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchUnit {
    pub player_handle: String,
    pub period: Period,
}

impl FetchUnit {
    pub fn new(player_handle: &str, period: Period) -> Self {
        Self {
            player_handle: player_handle.trim().to_lowercase(),
            period,
        }
    }

    /// Object-store path of the raw artifact for this unit.
    ///
    /// The ledger recognises prior work by this exact string. Changing the
    /// format orphans every artifact already in the bucket.
    pub fn artifact_path(&self) -> String {
        format!("player/{}/games/{}", self.player_handle, self.period)
    }

    /// Inverse of [`artifact_path`](Self::artifact_path).
    pub fn from_artifact_path(path: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidArtifactPath(path.to_string());
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            ["player", handle, "games", year, month] if !handle.is_empty() => {
                let period: Period = format!("{}/{}", year, month)
                    .parse()
                    .map_err(|_| invalid())?;
                Ok(Self::new(handle, period))
            }
            _ => Err(invalid()),
        }
    }
}

/// One side of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSide {
    /// Absent on older archives.
    #[serde(default)]
    pub uuid: String,
    pub username: String,
    pub rating: i64,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accuracies {
    pub white: Option<f64>,
    pub black: Option<f64>,
}

/// A normalized chess game, serialized with the warehouse column names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRecord {
    pub game_id: i64,
    pub url: String,
    pub game_date: NaiveDate,
    #[serde(rename = "ingested_dt")]
    pub ingested_at: DateTime<Utc>,
    pub time_control: String,
    pub end_time: i64,
    pub rated: bool,
    pub time_class: String,
    #[serde(rename = "rules")]
    pub ruleset: String,
    pub white: PlayerSide,
    pub black: PlayerSide,
    pub accuracies: Option<Accuracies>,
    #[serde(rename = "eco")]
    pub opening_code: String,
    #[serde(rename = "opening")]
    pub opening_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionAction {
    Loaded,
    Deleted,
}

impl fmt::Display for InteractionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionAction::Loaded => f.write_str("Loaded"),
            InteractionAction::Deleted => f.write_str("Deleted"),
        }
    }
}

/// Audit row describing what happened to a raw artifact during a load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactInteraction {
    #[serde(rename = "gcs_endpoint")]
    pub artifact_path: String,
    #[serde(rename = "gcs_game_month")]
    pub artifact_period: NaiveDate,
    #[serde(rename = "gcs_object_interaction_dt")]
    pub interaction_time: DateTime<Utc>,
    #[serde(rename = "action_taken")]
    pub action: InteractionAction,
}

impl ArtifactInteraction {
    pub fn new(
        artifact_path: &str,
        action: InteractionAction,
        interaction_time: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let unit = FetchUnit::from_artifact_path(artifact_path)?;
        Ok(Self {
            artifact_path: artifact_path.to_string(),
            artifact_period: unit.period.first_day(),
            interaction_time,
            action,
        })
    }
}

/// Result of transforming one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// At least one game was found.
    Records(Vec<GameRecord>),
    /// No games; the artifact should be purged after the audit row is committed.
    Empty,
}

impl TransformOutcome {
    pub fn into_records(self) -> Vec<GameRecord> {
        match self {
            TransformOutcome::Records(records) => records,
            TransformOutcome::Empty => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_round_trip_token() {
        let period: Period = "2024/03".parse().unwrap();
        assert_eq!(period, Period::new(2024, 3).unwrap());
        assert_eq!(period.to_string(), "2024/03");
    }

    #[test]
    fn test_period_rejects_bad_tokens() {
        assert!("2024/13".parse::<Period>().is_err());
        assert!("2024-03".parse::<Period>().is_err());
        assert!("24/03".parse::<Period>().is_err());
        assert!("2024/3".parse::<Period>().is_err());
    }

    #[test]
    fn test_period_year_rollover() {
        let dec = Period::new(2024, 12).unwrap();
        assert_eq!(dec.next(), Period::new(2025, 1).unwrap());
        assert_eq!(Period::new(2025, 1).unwrap().previous(), dec);
    }

    #[test]
    fn test_fetch_unit_lowercases_handle() {
        let unit = FetchUnit::new("MagnusCarlsen", Period::new(2025, 2).unwrap());
        assert_eq!(unit.player_handle, "magnuscarlsen");
        assert_eq!(unit.artifact_path(), "player/magnuscarlsen/games/2025/02");
    }

    #[test]
    fn test_fetch_unit_from_artifact_path() {
        let unit = FetchUnit::from_artifact_path("player/hikaru/games/2024/10").unwrap();
        assert_eq!(unit.player_handle, "hikaru");
        assert_eq!(unit.period, Period::new(2024, 10).unwrap());
        assert_eq!(unit.artifact_path(), "player/hikaru/games/2024/10");
    }

    #[test]
    fn test_fetch_unit_rejects_foreign_paths() {
        assert!(FetchUnit::from_artifact_path("leaderboards/2025-01-01/10-00-00").is_err());
        assert!(FetchUnit::from_artifact_path("player//games/2024/10").is_err());
        assert!(FetchUnit::from_artifact_path("player/hikaru/games/2024").is_err());
    }

    #[test]
    fn test_fetch_unit_orders_by_player_then_period() {
        let mut units = vec![
            FetchUnit::new("b", Period::new(2024, 1).unwrap()),
            FetchUnit::new("a", Period::new(2024, 2).unwrap()),
            FetchUnit::new("a", Period::new(2024, 1).unwrap()),
        ];
        units.sort();
        let paths: Vec<String> = units.iter().map(|u| u.artifact_path()).collect();
        assert_eq!(
            paths,
            vec![
                "player/a/games/2024/01",
                "player/a/games/2024/02",
                "player/b/games/2024/01"
            ]
        );
    }

    #[test]
    fn test_interaction_period_from_path() {
        let now = Utc::now();
        let interaction =
            ArtifactInteraction::new("player/x/games/2023/11", InteractionAction::Loaded, now)
                .unwrap();
        assert_eq!(
            interaction.artifact_period,
            NaiveDate::from_ymd_opt(2023, 11, 1).unwrap()
        );
        let row = serde_json::to_value(&interaction).unwrap();
        assert_eq!(row["action_taken"], "Loaded");
        assert_eq!(row["gcs_game_month"], "2023-11-01");
    }
}

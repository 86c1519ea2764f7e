//! Raw artifact → normalized game records.
//!
//! An artifact is the JSON document the upstream API returns for one player
//! and month: `{"games": [ ... ]}`. Every game becomes one [`GameRecord`];
//! the artifact itself yields one [`ArtifactInteraction`] audit row.
//!
//! # Opening resolution
//!
//! The opening code is taken from the first source that has one:
//!
//! 1. the game's structured `eco` field
//! 2. the `[ECOUrl "..."]` tag of its PGN
//! 3. the sentinel [`ECO_NOT_FOUND`]
//!
//! The opening name is the last path segment of the code with `-` replaced by
//! spaces, so `https://www.chess.com/openings/Sicilian-Defense` becomes
//! `Sicilian Defense`.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;
use crate::models::{
    Accuracies, ArtifactInteraction, FetchUnit, GameRecord, InteractionAction, PlayerSide,
    TransformOutcome,
};

pub const ECO_NOT_FOUND: &str = "ECO Not Found";

static ECO_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[ECOUrl\s+"([^"]+)"\]"#).expect("valid ECOUrl pattern"));

/// Game as it appears in an upstream archive. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct RawGame {
    url: String,
    end_time: i64,
    time_control: String,
    rated: bool,
    time_class: String,
    rules: String,
    white: PlayerSide,
    black: PlayerSide,
    #[serde(default)]
    accuracies: Option<Accuracies>,
    #[serde(default)]
    eco: Option<String>,
    #[serde(default)]
    pgn: Option<String>,
}

/// Transform one artifact.
///
/// Returns [`TransformOutcome::Empty`] with a `Deleted` interaction when the
/// artifact has no games, and the records with a `Loaded` interaction
/// otherwise. Malformed content is an error, never an empty outcome.
pub fn transform(
    artifact_path: &str,
    content: &str,
    now: DateTime<Utc>,
) -> Result<(TransformOutcome, ArtifactInteraction), Error> {
    FetchUnit::from_artifact_path(artifact_path)?;

    let root: Value = serde_json::from_str(content)
        .map_err(|e| Error::malformed(artifact_path, format!("invalid JSON: {}", e)))?;
    let root = root
        .as_object()
        .ok_or_else(|| Error::malformed(artifact_path, "root is not an object"))?;

    let games = match root.get("games") {
        None | Some(Value::Null) => &[][..],
        Some(Value::Array(games)) => games.as_slice(),
        Some(_) => return Err(Error::malformed(artifact_path, "'games' is not an array")),
    };

    if games.is_empty() {
        let interaction = ArtifactInteraction::new(artifact_path, InteractionAction::Deleted, now)?;
        return Ok((TransformOutcome::Empty, interaction));
    }

    let records = games
        .iter()
        .enumerate()
        .map(|(index, game)| to_record(artifact_path, index, game, now))
        .collect::<Result<Vec<_>, _>>()?;

    let interaction = ArtifactInteraction::new(artifact_path, InteractionAction::Loaded, now)?;
    Ok((TransformOutcome::Records(records), interaction))
}

fn to_record(
    artifact_path: &str,
    index: usize,
    game: &Value,
    now: DateTime<Utc>,
) -> Result<GameRecord, Error> {
    let raw = RawGame::deserialize(game)
        .map_err(|e| Error::malformed(artifact_path, format!("game #{}: {}", index, e)))?;

    let game_id = game_id_from_url(&raw.url)?;
    let game_date = DateTime::from_timestamp(raw.end_time, 0)
        .ok_or_else(|| {
            Error::malformed(
                artifact_path,
                format!("game #{}: end_time {} out of range", index, raw.end_time),
            )
        })?
        .date_naive();

    let opening_code = resolve_opening(raw.eco.as_deref(), raw.pgn.as_deref());
    let opening_name = opening_name(&opening_code);

    Ok(GameRecord {
        game_id,
        url: raw.url,
        game_date,
        ingested_at: now,
        time_control: raw.time_control,
        end_time: raw.end_time,
        rated: raw.rated,
        time_class: raw.time_class,
        ruleset: raw.rules,
        white: raw.white,
        black: raw.black,
        accuracies: raw.accuracies,
        opening_code,
        opening_name,
    })
}

fn resolve_opening(eco: Option<&str>, pgn: Option<&str>) -> String {
    eco.filter(|code| !code.trim().is_empty())
        .map(str::to_string)
        .or_else(|| pgn.and_then(extract_opening_from_pgn))
        .unwrap_or_else(|| ECO_NOT_FOUND.to_string())
}

/// The value of the `[ECOUrl "..."]` tag, if present.
pub fn extract_opening_from_pgn(pgn: &str) -> Option<String> {
    ECO_URL_RE
        .captures(pgn)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Human-readable opening name derived from an opening code.
pub fn opening_name(opening_code: &str) -> String {
    last_segment(opening_code).replace('-', " ")
}

/// Numeric id from the last segment of a game URL.
pub fn game_id_from_url(url: &str) -> Result<i64, Error> {
    last_segment(url)
        .parse::<i64>()
        .map_err(|_| Error::InvalidGameId {
            url: url.to_string(),
        })
}

fn last_segment(s: &str) -> &str {
    let trimmed = s.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

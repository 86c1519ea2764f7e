//! Endpoint enumeration: the universe of fetch units a run should cover.
//!
//! Only *complete* calendar months are targeted. A month whose games are
//! still accumulating is left for a later run rather than fetched twice.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde_json::Value;

use crate::error::Error;
use crate::models::{FetchUnit, Period};

/// How the ingestion date range is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSelection {
    /// The previous calendar month relative to `today`.
    Default,
    Manual { start: NaiveDate, end: NaiveDate },
}

/// Resolve a [`DateSelection`] into an inclusive `(start, end)` range.
///
/// `Default` yields the 1st of last month for both bounds; because the end
/// falls on the 1st, that month counts as complete.
pub fn select_date_range(selection: &DateSelection, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    match selection {
        DateSelection::Default => {
            let first = last_complete_period(today).first_day();
            (first, first)
        }
        DateSelection::Manual { start, end } => (*start, *end),
    }
}

/// The most recent month that has fully elapsed as of `today`.
pub fn last_complete_period(today: NaiveDate) -> Period {
    Period::of(today).previous()
}

/// Complete months in `[start, end]`, in ascending order.
///
/// If `end` is not the first of its month, that month is dropped.
pub fn complete_periods(start: NaiveDate, end: NaiveDate) -> Vec<Period> {
    let mut current = Period::of(start);
    let last = if end.day() > 1 {
        Period::of(end).previous()
    } else {
        Period::of(end)
    };

    let mut periods = Vec::new();
    while current <= last {
        periods.push(current);
        current = current.next();
    }
    periods
}

/// `YYYY/MM` tokens for every complete month in `[start, end]`.
pub fn generate_year_month_list(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    complete_periods(start, end)
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// Cross product of a roster and a month list.
///
/// Handles are lower-cased and deduplicated; the result is sorted by
/// `(player, period)` so it can be diffed deterministically.
pub fn fetch_units<S: AsRef<str>>(roster: &[S], periods: &[Period]) -> Vec<FetchUnit> {
    let mut units = BTreeSet::new();
    for player in roster {
        let player = player.as_ref().trim();
        if player.is_empty() {
            continue;
        }
        for period in periods {
            units.insert(FetchUnit::new(player, *period));
        }
    }
    units.into_iter().collect()
}

/// Usernames across every leaderboard category, lower-cased and deduplicated.
pub fn top_players(leaderboards_json: &str) -> Result<Vec<String>, Error> {
    let root: Value = serde_json::from_str(leaderboards_json)
        .map_err(|e| Error::malformed("leaderboards", e.to_string()))?;
    let categories = root
        .as_object()
        .ok_or_else(|| Error::malformed("leaderboards", "root is not an object"))?;

    let mut players = BTreeSet::new();
    for (category, entries) in categories {
        let Some(entries) = entries.as_array() else {
            continue;
        };
        for entry in entries {
            let username = entry
                .get("username")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::malformed(
                        "leaderboards",
                        format!("entry in '{}' has no username", category),
                    )
                })?;
            players.insert(username.to_lowercase());
        }
    }
    Ok(players.into_iter().collect())
}

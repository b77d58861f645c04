//! Leaderboard payloads sent with `LEADERBOARD` and
//! `SPEEDRUN_DOT_COM_LEADERBOARD`
//!
//! The server renders Python literals, so strings arrive single-quoted. Rows
//! come either as a list of records or as one object of parallel columns.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(default)]
    pub place: Option<u32>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// Parses a payload after turning single quotes into double quotes.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        let normalized = payload.replace('\'', "\"");
        let value: Value = serde_json::from_str(&normalized)?;

        let entries = match value {
            Value::Object(columns) if !columns.is_empty() => from_columns(columns)?,
            Value::Object(_) => Vec::new(),
            rows => Vec::<LeaderboardEntry>::deserialize(rows)?,
        };

        Ok(Self { entries })
    }

    /// One line per entry, ordered by place.
    pub fn to_text(&self) -> String {
        let mut entries: Vec<&LeaderboardEntry> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.place.unwrap_or(u32::MAX));

        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let place = entry.place.unwrap_or(i as u32 + 1);
                match entry.time {
                    Some(time) => format!("{}. {} - {}", place, entry.name, format_time(time)),
                    None => format!("{}. {}", place, entry.name),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn from_columns(
    columns: serde_json::Map<String, Value>,
) -> Result<Vec<LeaderboardEntry>, serde_json::Error> {
    let rows = columns
        .values()
        .filter_map(Value::as_array)
        .map(Vec::len)
        .max()
        .unwrap_or(0);

    (0..rows)
        .map(|row| {
            let record: serde_json::Map<String, Value> = columns
                .iter()
                .filter_map(|(key, column)| {
                    column
                        .as_array()
                        .and_then(|values| values.get(row))
                        .map(|value| (key.clone(), value.clone()))
                })
                .collect();
            LeaderboardEntry::deserialize(Value::Object(record))
        })
        .collect()
}

/// Seconds as `mm:ss.fff`.
pub fn format_time(secs: f64) -> String {
    let total_ms = (secs * 1000.0).round().max(0.0) as u64;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
}

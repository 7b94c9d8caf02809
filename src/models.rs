use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw attributes of one dog in one race, as delivered by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantRecord {
    pub name: String,
    pub box_no: u8,
    #[serde(default)]
    pub trainer: Option<String>,
    /// Trainer strike rate in percent (0-100)
    #[serde(default)]
    pub trainer_strike_rate: Option<f64>,
    /// Best time at this track/distance in seconds
    #[serde(default)]
    pub best_time: Option<f64>,
    /// First sectional time in seconds
    #[serde(default)]
    pub sectional_time: Option<f64>,
    /// `None` when the dog's career record is unknown
    #[serde(default)]
    pub career_starts: Option<u32>,
    #[serde(default)]
    pub career_wins: u32,
    #[serde(default)]
    pub career_places: u32,
    #[serde(default)]
    pub age_months: Option<u32>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub days_since_last_race: Option<u32>,
    #[serde(default)]
    pub days_since_last_win: Option<u32>,
    /// Lengths behind the winner, most recent run first (0 = won)
    #[serde(default)]
    pub recent_margins: Vec<f64>,
}

impl EntrantRecord {
    /// Minimal record with only identity and box filled in
    pub fn new(name: impl Into<String>, box_no: u8) -> Self {
        Self {
            name: name.into(),
            box_no,
            trainer: None,
            trainer_strike_rate: None,
            best_time: None,
            sectional_time: None,
            career_starts: None,
            career_wins: 0,
            career_places: 0,
            age_months: None,
            weight_kg: None,
            days_since_last_race: None,
            days_since_last_win: None,
            recent_margins: Vec::new(),
        }
    }

    /// Best time if recorded and positive
    pub fn valid_best_time(&self) -> Option<f64> {
        self.best_time.filter(|t| t.is_finite() && *t > 0.0)
    }

    /// Sectional time if recorded and positive
    pub fn valid_sectional_time(&self) -> Option<f64> {
        self.sectional_time.filter(|t| t.is_finite() && *t > 0.0)
    }

    /// True when the entrant carries no usable timing data at all
    pub fn lacks_timing(&self) -> bool {
        self.valid_best_time().is_none() && self.valid_sectional_time().is_none()
    }

    /// Mean of the most recent `window` margins, if any were recorded
    pub fn mean_recent_margin(&self, window: usize) -> Option<f64> {
        let recent: Vec<f64> = self
            .recent_margins
            .iter()
            .take(window.max(1))
            .map(|m| m.max(0.0))
            .collect();

        if recent.is_empty() {
            None
        } else {
            Some(recent.iter().sum::<f64>() / recent.len() as f64)
        }
    }

    fn known_starts(&self) -> Option<f64> {
        self.career_starts.filter(|s| *s > 0).map(f64::from)
    }

    /// (wins + places) / starts, 0 without starts
    pub fn place_rate(&self) -> f64 {
        match self.known_starts() {
            Some(starts) => {
                let placed = (self.career_wins + self.career_places) as f64;
                (placed / starts).clamp(0.0, 1.0)
            }
            None => 0.0,
        }
    }

    /// wins / starts, 0 without starts
    pub fn win_rate(&self) -> f64 {
        match self.known_starts() {
            Some(starts) => (self.career_wins as f64 / starts).clamp(0.0, 1.0),
            None => 0.0,
        }
    }
}

/// One race: metadata plus its entrants in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceCard {
    pub track: String,
    pub race_number: u32,
    pub distance_m: u32,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub entrants: Vec<EntrantRecord>,
}

impl RaceCard {
    pub fn new(track: impl Into<String>, race_number: u32, distance_m: u32) -> Self {
        Self {
            track: track.into(),
            race_number,
            distance_m,
            date: None,
            entrants: Vec::new(),
        }
    }

    pub fn with_entrant(mut self, entrant: EntrantRecord) -> Self {
        self.entrants.push(entrant);
        self
    }

    /// Key used to match races across inputs
    pub fn key(&self) -> RaceKey {
        RaceKey::new(&self.track, self.race_number).on(self.date)
    }
}

/// Flat ingestion row: race metadata repeated on every entrant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRow {
    pub track: String,
    pub race_number: u32,
    pub distance_m: u32,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(flatten)]
    pub entrant: EntrantRecord,
}

/// (track, race number, meeting date) identity of a race
///
/// The date is optional; an undated key stands for that track and race
/// number at any meeting when looked up with [`find_race`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RaceKey {
    pub track: String,
    pub race_number: u32,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl RaceKey {
    pub fn new(track: &str, race_number: u32) -> Self {
        Self {
            track: normalize_track(track),
            race_number,
            date: None,
        }
    }

    pub fn on(mut self, date: Option<NaiveDate>) -> Self {
        self.date = date;
        self
    }

    pub fn undated(&self) -> Self {
        Self {
            date: None,
            ..self.clone()
        }
    }
}

/// Exact match first, then an undated entry for the same track and race
pub fn find_race<'a, V>(map: &'a HashMap<RaceKey, V>, key: &RaceKey) -> Option<&'a V> {
    map.get(key).or_else(|| match key.date {
        Some(_) => map.get(&key.undated()),
        None => None,
    })
}

/// Actual result of a finished race
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceResult {
    pub track: String,
    pub race_number: u32,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub winning_box: u8,
}

impl RaceResult {
    pub fn key(&self) -> RaceKey {
        RaceKey::new(&self.track, self.race_number).on(self.date)
    }
}

/// Track names are compared trimmed and upper-cased
pub fn normalize_track(track: &str) -> String {
    track.trim().to_uppercase()
}

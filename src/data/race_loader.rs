//! Race card loading
//!
//! Ingestion delivers flat entry rows (race metadata repeated on every
//! entrant). They are grouped back into race cards keyed by track, race
//! number and meeting date, keeping first-seen race order and entrant
//! insertion order.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::EngineError;
use crate::models::{EntryRow, RaceCard, RaceKey, RaceResult};

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let content = fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| EngineError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Group entry rows into race cards
pub fn group_entry_rows(rows: Vec<EntryRow>) -> Result<Vec<RaceCard>, EngineError> {
    let mut index: HashMap<RaceKey, usize> = HashMap::new();
    let mut races: Vec<RaceCard> = Vec::new();

    for row in rows {
        let key = RaceKey::new(&row.track, row.race_number).on(row.date);
        match index.get(&key) {
            Some(&i) => {
                let race = &mut races[i];
                if race.distance_m != row.distance_m {
                    return Err(EngineError::MixedRace {
                        track: race.track.clone(),
                        race_number: race.race_number,
                        first: race.distance_m,
                        second: row.distance_m,
                    });
                }
                race.entrants.push(row.entrant);
            }
            None => {
                index.insert(key, races.len());
                let mut race = RaceCard::new(row.track, row.race_number, row.distance_m);
                race.date = row.date;
                race.entrants.push(row.entrant);
                races.push(race);
            }
        }
    }

    Ok(races)
}

/// Load race cards from a JSON array of entry rows
pub fn load_race_cards<P: AsRef<Path>>(path: P) -> Result<Vec<RaceCard>, EngineError> {
    let path = path.as_ref();
    let rows: Vec<EntryRow> = read_json(path)?;
    let row_count = rows.len();
    let races = group_entry_rows(rows)?;
    info!(rows = row_count, races = races.len(), "Loaded race cards from {:?}", path);
    Ok(races)
}

/// Load finished-race results from a JSON array
pub fn load_race_results<P: AsRef<Path>>(path: P) -> Result<Vec<RaceResult>, EngineError> {
    let path = path.as_ref();
    let results: Vec<RaceResult> = read_json(path)?;
    info!(results = results.len(), "Loaded race results from {:?}", path);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntrantRecord;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn row(track: &str, race_number: u32, distance_m: u32, name: &str, box_no: u8) -> EntryRow {
        EntryRow {
            track: track.to_string(),
            race_number,
            distance_m,
            date: None,
            entrant: EntrantRecord::new(name, box_no),
        }
    }

    #[test]
    fn test_group_preserves_order() {
        let rows = vec![
            row("Sandown Park", 2, 515, "A", 1),
            row("Sandown Park", 1, 515, "B", 4),
            row("SANDOWN PARK", 2, 515, "C", 3),
        ];
        let races = group_entry_rows(rows).unwrap();

        assert_eq!(races.len(), 2);
        assert_eq!(races[0].race_number, 2);
        let names: Vec<&str> = races[0].entrants.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(races[1].entrants.len(), 1);
    }

    #[test]
    fn test_group_rejects_mixed_distance() {
        let rows = vec![row("Bendigo", 1, 425, "A", 1), row("Bendigo", 1, 500, "B", 2)];
        assert!(matches!(
            group_entry_rows(rows),
            Err(EngineError::MixedRace { first: 425, second: 500, .. })
        ));
    }

    #[test]
    fn test_load_race_cards_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"track": "Bendigo", "race_number": 1, "distance_m": 425, "date": "2024-03-09",
                  "name": "Dash", "box_no": 1, "best_time": 24.61}},
                {{"track": "Bendigo", "race_number": 1, "distance_m": 425, "date": "2024-03-09",
                  "name": "Dawdle", "box_no": 2}}
            ]"#
        )
        .unwrap();

        let races = load_race_cards(file.path()).unwrap();
        assert_eq!(races.len(), 1);
        assert_eq!(races[0].entrants.len(), 2);
        assert_eq!(races[0].date.map(|d| d.to_string()).as_deref(), Some("2024-03-09"));
    }

    #[test]
    fn test_group_separates_meetings() {
        let dated = |date: &str, name: &str, box_no: u8| {
            let mut r = row("Bendigo", 1, 425, name, box_no);
            r.date = date.parse().ok();
            r
        };
        let rows = vec![
            dated("2024-03-09", "A", 1),
            dated("2024-03-09", "B", 2),
            dated("2024-03-16", "C", 1),
            dated("2024-03-16", "D", 2),
        ];
        let races = group_entry_rows(rows).unwrap();

        assert_eq!(races.len(), 2);
        assert_eq!(races[0].entrants.len(), 2);
        assert_eq!(races[1].entrants.len(), 2);
        assert_ne!(races[0].key(), races[1].key());
        assert!(races
            .iter()
            .all(|r| crate::error::validate_race(r, 8).is_ok()));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_race_cards("/nonexistent/races.json"),
            Err(EngineError::Io { .. })
        ));
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[{{\"track\": 1}}]").unwrap();
        assert!(matches!(
            load_race_cards(file.path()),
            Err(EngineError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_results() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"track": "Bendigo", "race_number": 1, "winning_box": 2}}]"#
        )
        .unwrap();
        let results = load_race_results(file.path()).unwrap();
        assert_eq!(results[0].winning_box, 2);
    }
}

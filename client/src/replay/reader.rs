use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use common::{GameState, MAX_REPLAY_BYTES};
use flate2::read::GzDecoder;

use super::{ReplayEntry, ReplayError};

/// Parse a replay log of `<RFC 3339 time>, <GameState JSON>` lines.
pub fn parse_replay(text: &str) -> Result<Vec<ReplayEntry>, ReplayError> {
    parse_replay_with_limit(text, MAX_REPLAY_BYTES as u64)
}

/// Like [`parse_replay`], rejecting input of `max_bytes` or more before looking at it.
///
/// Blank lines are skipped. Any other line that does not parse fails the whole
/// log. Entries come back sorted by time, equal times keeping file order.
pub fn parse_replay_with_limit(text: &str, max_bytes: u64) -> Result<Vec<ReplayEntry>, ReplayError> {
    check_size(text.len() as u64, max_bytes)?;

    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = parse_line(line).map_err(|reason| ReplayError::MalformedLine {
            line: index + 1,
            reason,
        })?;
        entries.push(entry);
    }

    if entries.is_empty() {
        return Err(ReplayError::Empty);
    }
    entries.sort_by_key(|entry| entry.time);
    Ok(entries)
}

pub(crate) fn check_size(size: u64, max_bytes: u64) -> Result<(), ReplayError> {
    if size >= max_bytes {
        return Err(ReplayError::TooLarge { size, limit: max_bytes });
    }
    Ok(())
}

fn parse_line(line: &str) -> Result<ReplayEntry, String> {
    let (time, state) = line
        .split_once(", ")
        .ok_or_else(|| "expected `<time>, <game state>`".to_string())?;
    let time = DateTime::parse_from_rfc3339(time.trim())
        .map_err(|e| format!("invalid timestamp {time:?}: {e}"))?
        .with_timezone(&Utc);
    let state: GameState = serde_json::from_str(state).map_err(|e| format!("invalid game state: {e}"))?;
    Ok(ReplayEntry { time, state })
}

/// Read and parse a replay log from disk. Files ending in `.gz` are decompressed.
///
/// The size on disk is checked before anything is read.
pub fn load_replay(path: &Path, max_bytes: u64) -> Result<Vec<ReplayEntry>, ReplayError> {
    check_size(fs::metadata(path)?.len(), max_bytes)?;

    let file = File::open(path)?;
    let mut text = String::new();
    if is_gzip(path) {
        // a compressed log may still expand past the limit
        GzDecoder::new(file).take(max_bytes).read_to_string(&mut text)?;
    } else {
        BufReader::new(file).read_to_string(&mut text)?;
    }
    parse_replay_with_limit(&text, max_bytes)
}

fn is_gzip(path: &Path) -> bool {
    path.extension() == Some(OsStr::new("gz"))
}

fn is_replay_file(name: &str) -> bool {
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.ends_with(".csv") || name.ends_with(".replay")
}

/// File names of the replay logs in `dir`, sorted by name. A missing directory has none.
pub fn list_replays(dir: &Path) -> std::io::Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_replay_file(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Index of the entry closest in time to `target`.
///
/// Ties between the entries either side of `target` go to the earlier one.
/// Targets outside the recording clamp to the first or last entry.
pub fn nearest_index(entries: &[ReplayEntry], target: DateTime<Utc>) -> Option<usize> {
    if entries.is_empty() {
        return None;
    }
    let upper = entries.partition_point(|entry| entry.time < target);
    if upper == 0 {
        return Some(0);
    }
    if upper == entries.len() {
        return Some(entries.len() - 1);
    }
    // first of any entries sharing the floor time
    let lower = entries.partition_point(|entry| entry.time < entries[upper - 1].time);
    let below = target - entries[lower].time;
    let above = entries[upper].time - target;
    Some(if above < below { upper } else { lower })
}

pub fn find_nearest(entries: &[ReplayEntry], target: DateTime<Utc>) -> Option<&ReplayEntry> {
    nearest_index(entries, target).map(|index| &entries[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::io::Write;

    const SAMPLE: &str = "\
2024-01-01T00:00:00Z, {\"teams\":[],\"trains\":[]}
2024-01-01T00:00:10Z, {\"teams\":[],\"trains\":[{\"id\":1,\"long\":8.4,\"lat\":49.0,\"line_id\":\"L1\",\"line_name\":\"S1\",\"direction\":\"X\",\"on_train\":null}]}
2024-01-01T00:00:20Z, {\"teams\":[],\"trains\":[]}
";

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc) + TimeDelta::seconds(seconds)
    }

    fn entries_at(seconds: &[i64]) -> Vec<ReplayEntry> {
        seconds
            .iter()
            .map(|&s| ReplayEntry {
                time: at(s),
                state: GameState::default(),
            })
            .collect()
    }

    #[test]
    fn test_parse_sample() {
        let entries = parse_replay(SAMPLE).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].time, at(0));
        assert_eq!(entries[1].state.trains[0].line_id, "L1");
        assert_eq!(entries[2].time - entries[0].time, TimeDelta::milliseconds(20_000));
    }

    #[test]
    fn test_blank_lines_are_skipped_and_entries_sorted() {
        let text = "2024-01-01T00:00:10+00:00, {\"teams\":[],\"trains\":[]}\n\n\
                    2024-01-01T01:00:05+01:00, {\"teams\":[],\"trains\":[]}\r\n";
        let entries = parse_replay(text).unwrap();
        assert_eq!(entries.iter().map(|e| e.time).collect::<Vec<_>>(), vec![at(5), at(10)]);
    }

    #[test]
    fn test_malformed_line_aborts() {
        let text = "2024-01-01T00:00:00Z, {\"teams\":[],\"trains\":[]}\nnot a replay line\n";
        match parse_replay(text) {
            Err(ReplayError::MalformedLine { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }

        let text = "yesterday, {\"teams\":[],\"trains\":[]}";
        assert!(matches!(parse_replay(text), Err(ReplayError::MalformedLine { line: 1, .. })));

        let text = "2024-01-01T00:00:00Z, {\"teams\":[]}";
        assert!(matches!(parse_replay(text), Err(ReplayError::MalformedLine { line: 1, .. })));
    }

    #[test]
    fn test_empty_replay() {
        assert!(matches!(parse_replay(""), Err(ReplayError::Empty)));
        assert!(matches!(parse_replay("\n  \n"), Err(ReplayError::Empty)));
    }

    #[test]
    fn test_size_limit_is_checked_first() {
        // garbage that would fail parsing if it got that far
        let text = "x".repeat(64);
        assert!(matches!(
            parse_replay_with_limit(&text, 64),
            Err(ReplayError::TooLarge { size: 64, limit: 64 })
        ));
        assert!(matches!(
            parse_replay_with_limit(&text, 65),
            Err(ReplayError::MalformedLine { .. })
        ));
    }

    #[test]
    fn test_find_nearest_exact_and_between() {
        let entries = entries_at(&[0, 10, 20, 30]);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(nearest_index(&entries, entry.time), Some(i));
        }
        assert_eq!(nearest_index(&entries, at(4)), Some(0));
        assert_eq!(nearest_index(&entries, at(6)), Some(1));
        assert_eq!(nearest_index(&entries, at(26)), Some(3));
    }

    #[test]
    fn test_find_nearest_prefers_floor_on_ties() {
        let entries = entries_at(&[0, 10]);
        assert_eq!(nearest_index(&entries, at(5)), Some(0));
    }

    #[test]
    fn test_find_nearest_minimizes_distance() {
        let entries = entries_at(&[0, 3, 3, 7, 12, 20, 21, 40]);
        for millis in (0..=40_000).step_by(250) {
            let target = at(0) + TimeDelta::milliseconds(millis);
            let found = nearest_index(&entries, target).unwrap();
            let best = entries
                .iter()
                .map(|e| (e.time - target).abs())
                .min()
                .unwrap();
            assert_eq!((entries[found].time - target).abs(), best, "target {millis}ms");
            // the first entry at the minimal distance
            let first_best = entries.iter().position(|e| (e.time - target).abs() == best).unwrap();
            assert_eq!(found, first_best, "target {millis}ms");
        }
    }

    #[test]
    fn test_find_nearest_clamps_out_of_range() {
        let entries = entries_at(&[10, 20]);
        assert_eq!(nearest_index(&entries, at(0)), Some(0));
        assert_eq!(nearest_index(&entries, at(100)), Some(1));
        assert_eq!(nearest_index(&[], at(0)), None);
    }

    #[test]
    fn test_load_replay_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("game.csv");
        fs::write(&plain, SAMPLE).unwrap();
        assert_eq!(load_replay(&plain, MAX_REPLAY_BYTES as u64).unwrap().len(), 3);

        let compressed = dir.path().join("game.csv.gz");
        let mut encoder = flate2::write::GzEncoder::new(File::create(&compressed).unwrap(), flate2::Compression::default());
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        encoder.finish().unwrap();
        assert_eq!(load_replay(&compressed, MAX_REPLAY_BYTES as u64).unwrap().len(), 3);

        assert!(matches!(load_replay(&plain, 16), Err(ReplayError::TooLarge { .. })));
        assert!(matches!(
            load_replay(&dir.path().join("missing.csv"), 16),
            Err(ReplayError::Io(_))
        ));

        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("nested.csv")).unwrap();
        assert_eq!(list_replays(dir.path()).unwrap(), vec!["game.csv", "game.csv.gz"]);
        assert!(list_replays(&dir.path().join("nope")).unwrap().is_empty());
    }
}

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::Error;

/// Location of a GTFS feed: a zip archive or an extracted directory
#[derive(Debug, Clone)]
pub enum FeedSource {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl FeedSource {
    /// # Errors
    ///
    /// Returns a configuration error if nothing exists at `path`
    pub fn open(path: &Path) -> Result<Self, Error> {
        if path.is_dir() {
            Ok(FeedSource::Directory(path.to_path_buf()))
        } else if path.is_file() {
            Ok(FeedSource::Archive(path.to_path_buf()))
        } else {
            Err(Error::Configuration(format!(
                "GTFS feed not found at '{}'",
                path.display()
            )))
        }
    }

    /// Raw bytes of a feed file, `None` when the feed does not contain it
    fn read_member(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        match self {
            FeedSource::Directory(dir) => {
                let path = dir.join(name);
                if !path.exists() {
                    return Ok(None);
                }
                std::fs::read(&path).map(Some).map_err(|e| {
                    std::io::Error::new(
                        e.kind(),
                        format!("Failed to read file '{}': {}", path.display(), e),
                    )
                    .into()
                })
            }
            FeedSource::Archive(path) => {
                let file = File::open(path).map_err(|e| {
                    std::io::Error::new(
                        e.kind(),
                        format!("Failed to open feed archive '{}': {}", path.display(), e),
                    )
                })?;
                let mut archive = ZipArchive::new(file)?;
                // Some publishers wrap the feed files in a top-level folder
                let entry_name = if archive.index_for_name(name).is_some() {
                    name.to_string()
                } else {
                    let suffix = format!("/{name}");
                    match archive.file_names().find(|n| n.ends_with(&suffix)) {
                        Some(nested) => nested.to_string(),
                        None => return Ok(None),
                    }
                };
                let mut entry = match archive.by_name(&entry_name) {
                    Ok(entry) => entry,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
        }
    }
}

/// Deserializes an optional feed file, skipping rows that do not parse
pub fn deserialize_gtfs_file<T>(source: &FeedSource, name: &str) -> Result<Option<Vec<T>>, Error>
where
    T: DeserializeOwned,
{
    let Some(bytes) = source.read_member(name)? else {
        return Ok(None);
    };
    let content = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.deserialize::<T>() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => {
                skipped += 1;
                debug!("Skipping malformed row in {name}: {e}");
            }
        }
    }
    if skipped > 0 {
        warn!("Skipped {skipped} malformed rows in {name}");
    }
    Ok(Some(rows))
}

/// Deserializes a feed file the graph cannot be built without
pub fn deserialize_required_gtfs_file<T>(source: &FeedSource, name: &str) -> Result<Vec<T>, Error>
where
    T: DeserializeOwned,
{
    deserialize_gtfs_file(source, name)?
        .ok_or_else(|| Error::Configuration(format!("GTFS feed is missing required file {name}")))
}

/// Parse time string in HH:MM:SS format to seconds since midnight.
///
/// Hours may exceed 23 for trips running past midnight. Empty values
/// (non-timepoint stops) yield `None`.
pub fn parse_time(time_str: &str) -> Option<u32> {
    let bytes = time_str.as_bytes();

    // Fast path for HH:MM:SS format
    if bytes.len() == 8
        && bytes[2] == b':'
        && bytes[5] == b':'
        && [0, 1, 3, 4, 6, 7].iter().all(|&i| bytes[i].is_ascii_digit())
    {
        let digit = |i: usize| u32::from(bytes[i] - b'0');
        let hours = digit(0) * 10 + digit(1);
        let minutes = digit(3) * 10 + digit(4);
        let seconds = digit(6) * 10 + digit(7);
        if minutes >= 60 || seconds >= 60 {
            return None;
        }
        return Some(hours * 3600 + minutes * 60 + seconds);
    }

    parse_time_fallback(time_str)
}

fn parse_time_fallback(time_str: &str) -> Option<u32> {
    let mut parts = time_str.trim().split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u32 = parts.next()?.parse().ok()?;
    let seconds: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_regular_times() {
        assert_eq!(parse_time("08:15:30"), Some(8 * 3600 + 15 * 60 + 30));
        assert_eq!(parse_time("00:00:00"), Some(0));
    }

    #[test]
    fn parses_single_digit_hours_and_overnight_trips() {
        assert_eq!(parse_time("7:05:00"), Some(7 * 3600 + 5 * 60));
        assert_eq!(parse_time("25:10:00"), Some(25 * 3600 + 10 * 60));
    }

    #[test]
    fn rejects_blank_and_garbage() {
        assert_eq!(parse_time(""), None);
        assert_eq!(parse_time("ab:cd:ef"), None);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert_eq!(parse_time("10:75:00"), None);
        assert_eq!(parse_time("10:00:60"), None);
        assert_eq!(parse_time("9:60:00"), None);
        assert_eq!(parse_time("10:59:59"), Some(10 * 3600 + 59 * 60 + 59));
    }

    #[test]
    fn huge_hours_do_not_overflow() {
        assert_eq!(parse_time("4000000:00:00"), None);
        assert_eq!(parse_time("4294967295:00:00"), None);
        assert_eq!(parse_time("1000:00:00"), Some(3_600_000));
    }

    #[test]
    fn missing_directory_is_a_configuration_error() {
        let err = FeedSource::open(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}

//! CSV export of a finished timeline

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::timeline::{Timeline, TimelineEntry};

/// Column names, in order
pub const HEADER: [&str; 9] = [
    "date",
    "time",
    "location",
    "latitude",
    "longitude",
    "source",
    "post_type",
    "hashtags",
    "url",
];

/// Location column for posts without one
pub const UNKNOWN_LOCATION: &str = "Unknown";

#[derive(Debug, Serialize)]
struct Row<'a> {
    date: String,
    time: String,
    location: &'a str,
    latitude: Option<f64>,
    longitude: Option<f64>,
    source: &'static str,
    post_type: &'static str,
    hashtags: String,
    url: String,
}

impl<'a> From<&'a TimelineEntry> for Row<'a> {
    fn from(entry: &'a TimelineEntry) -> Self {
        let post = &entry.post;
        let location = if entry.location.is_resolved() {
            entry.location.name.as_str()
        } else {
            UNKNOWN_LOCATION
        };

        Self {
            date: post.taken_at.format("%Y-%m-%d").to_string(),
            time: post.taken_at.format("%H:%M:%S").to_string(),
            location,
            latitude: entry.location.latitude,
            longitude: entry.location.longitude,
            source: entry.location.source.as_str(),
            post_type: post.kind.as_str(),
            hashtags: post.hashtags().join(", "),
            url: post.url(),
        }
    }
}

/// Write `timeline` as CSV, header first, oldest entry first
pub fn write_csv<W: Write>(timeline: &Timeline, writer: W) -> Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    csv.write_record(HEADER)?;
    for entry in timeline {
        csv.serialize(Row::from(entry))?;
    }
    csv.flush()?;
    Ok(())
}

/// Write `timeline` to `path`, creating the directory if needed
pub fn export_csv(timeline: &Timeline, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_csv(timeline, file).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = timeline.len(), "timeline exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LocationRecord, PostKind, ProfileTarget};
    use crate::testing::posts;
    use crate::timeline::{Completion, TimelineAssembler};
    use tempfile::tempdir;

    fn timeline() -> Timeline {
        let all = posts(2);
        let mut asm = TimelineAssembler::new(ProfileTarget::Username("someone".to_string()));
        asm.insert(
            all[0]
                .clone()
                .with_kind(PostKind::Carousel)
                .with_caption("Sunset #travel #norway"),
            LocationRecord::embedded("Oslo", 59.91, 10.75),
        );
        asm.insert(all[1].clone(), LocationRecord::unresolved());
        asm.finalize(Completion::Exhausted)
    }

    #[test]
    fn test_csv_rows() {
        let mut out = Vec::new();
        write_csv(&timeline(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "date,time,location,latitude,longitude,source,post_type,hashtags,url");
        // oldest first: p1 (01:00) has no location
        assert_eq!(
            lines[1],
            "2024-01-01,01:00:00,Unknown,,,unresolved,unknown,,https://www.instagram.com/p/p1/"
        );
        assert_eq!(
            lines[2],
            "2024-01-01,02:00:00,Oslo,59.91,10.75,embedded,carousel,\"travel, norway\",https://www.instagram.com/p/p0/"
        );
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_empty_timeline_writes_header() {
        let empty = TimelineAssembler::new(ProfileTarget::Username("x".to_string()))
            .finalize(Completion::Cancelled);
        let mut out = Vec::new();
        write_csv(&empty, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_export_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output").join("someone_location_timeline.csv");

        export_csv(&timeline(), &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Oslo"));
    }
}

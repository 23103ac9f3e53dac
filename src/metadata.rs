//! Object-key metadata: table identity and partition derivation.
//!
//! Keys are hierarchical paths carrying `field=value` partition markers, e.g.
//! `telemetry/v1/submission_date=20240102/os=linux/part-0.parquet`. The date
//! partition anchors the layout: the segments before it name the table, the
//! segments after it are extra partitions synthesized into the destination
//! schema.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::RegexSet;
use snafu::{OptionExt, ensure};

use crate::error::{
    MetadataError, MissingTablePrefixSnafu, NoPartitionMarkerSnafu, UnknownDateFormatSnafu,
};

/// Keys that never carry loadable data.
static IGNORE_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"^.*/$",                  // directory markers
        r"^.*/_[^=/]*/",           // temp dirs
        r"^.*/_[^/]*$",            // temp files
        r"^.*/[^/]*\$folder\$/?",  // filesystem metadata sentinels
        r"^.*/\.spark-staging.*$", // spark staging dirs
    ])
    .expect("ignore patterns are valid regexes")
});

/// Characters allowed in scratch-table suffixes.
const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
/// Length of the random scratch-table suffix.
const SUFFIX_LEN: usize = 5;

/// Whether an object key matches one of the fixed ignore patterns.
pub fn ignore_key(key: &str) -> bool {
    IGNORE_PATTERNS.is_match(key)
}

/// Lower-case a name and replace every non-alphanumeric character with `_`.
pub fn normalize_table_id(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Raw date formats recognized in partition values, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `YYYYMMDD`
    Compact,
    /// `YYYY-MM-DD`
    Dashed,
}

impl DateFormat {
    const ALL: [DateFormat; 2] = [DateFormat::Compact, DateFormat::Dashed];

    /// The strftime pattern for this format.
    pub fn pattern(self) -> &'static str {
        match self {
            DateFormat::Compact => "%Y%m%d",
            DateFormat::Dashed => "%Y-%m-%d",
        }
    }

    /// Try each known format in order; the first match wins.
    pub fn detect(value: &str) -> Option<(DateFormat, NaiveDate)> {
        Self::ALL.iter().find_map(|format| {
            NaiveDate::parse_from_str(value, format.pattern())
                .ok()
                .map(|date| (*format, date))
        })
    }

    /// Render a date back into this format.
    pub fn render(self, date: NaiveDate) -> String {
        date.format(self.pattern()).to_string()
    }
}

/// Identity and partition layout derived from an object key.
///
/// Deterministic for a given key; the only randomness is in scratch-table
/// naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Normalized destination table id.
    pub table_id: String,
    /// Name of the date partition column.
    pub partition_field: String,
    /// Date partition value, canonical `YYYY-MM-DD`.
    pub partition_value: String,
    /// Raw format the partition value was found in, kept so warehouse-stored
    /// partitions can be re-rendered into path form for comparison.
    pub date_format: DateFormat,
    /// `(field, value)` pairs after the date partition, in path order.
    pub extra_partitions: Vec<(String, String)>,
    /// Index of the date partition segment within the key path.
    pub first_partition_index: usize,
}

impl ObjectMetadata {
    /// Parse an object key.
    ///
    /// The date partition is the first `field=value` segment whose value
    /// parses in a known date format; up to two segments before it form the
    /// table id, and every `=`-bearing segment after it becomes an extra
    /// partition.
    pub fn parse(key: &str) -> Result<Self, MetadataError> {
        let segments: Vec<&str> = key.split('/').collect();

        let mut first_marker_value = None;
        let mut date_partition = None;
        for (index, segment) in segments.iter().enumerate() {
            let Some((field, value)) = segment.split_once('=') else {
                continue;
            };
            if first_marker_value.is_none() {
                first_marker_value = Some(value);
            }
            if let Some((format, date)) = DateFormat::detect(value) {
                date_partition = Some((index, field, format, date));
                break;
            }
        }

        let first_marker = first_marker_value.context(NoPartitionMarkerSnafu { key })?;
        let (index, field, format, date) =
            date_partition.context(UnknownDateFormatSnafu { value: first_marker })?;
        ensure!(index > 0, MissingTablePrefixSnafu { key });

        let prefix_start = index.saturating_sub(2);
        let table_id = normalize_table_id(&segments[prefix_start..index].join("_"));

        let extra_partitions = segments[index + 1..]
            .iter()
            .filter_map(|segment| segment.split_once('='))
            .map(|(field, value)| (field.to_string(), value.to_string()))
            .collect();

        Ok(Self {
            table_id,
            partition_field: field.to_string(),
            partition_value: date.format("%Y-%m-%d").to_string(),
            date_format: format,
            extra_partitions,
            first_partition_index: index,
        })
    }

    /// A fresh scratch-table id for this object.
    ///
    /// The random suffix keeps concurrent loads of the same table/partition
    /// from colliding.
    pub fn scratch_table_id(&self) -> String {
        let suffix = scratch_suffix();
        normalize_table_id(&format!(
            "{}_{}_{}",
            self.table_id, self.partition_value, suffix
        ))
    }
}

fn scratch_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARS[rng.random_range(0..SUFFIX_CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_with_extra_partitions() {
        let meta =
            ObjectMetadata::parse("telemetry/v1/submission_date=20240102/os=linux/part-0.parquet")
                .unwrap();

        assert_eq!(meta.table_id, "telemetry_v1");
        assert_eq!(meta.partition_field, "submission_date");
        assert_eq!(meta.partition_value, "2024-01-02");
        assert_eq!(meta.date_format, DateFormat::Compact);
        assert_eq!(
            meta.extra_partitions,
            vec![("os".to_string(), "linux".to_string())]
        );
        assert_eq!(meta.first_partition_index, 2);
    }

    #[test]
    fn table_id_is_stable_across_extra_partition_count() {
        let none = ObjectMetadata::parse("ns/v1/d=2024-01-02/f.parquet").unwrap();
        let one = ObjectMetadata::parse("ns/v1/d=2024-01-02/a=1/f.parquet").unwrap();
        let two = ObjectMetadata::parse("ns/v1/d=2024-01-02/a=1/b=2/f.parquet").unwrap();

        assert_eq!(none.table_id, one.table_id);
        assert_eq!(one.table_id, two.table_id);
        assert!(none.extra_partitions.is_empty());
        assert_eq!(two.extra_partitions.len(), 2);
    }

    #[test]
    fn marker_segment_before_date_partition_joins_table_id() {
        let meta = ObjectMetadata::parse("a=b/c=2024-01-02/d=x/data.parquet").unwrap();

        assert_eq!(meta.table_id, "a_b");
        assert_eq!(meta.partition_field, "c");
        assert_eq!(meta.partition_value, "2024-01-02");
        assert_eq!(
            meta.extra_partitions,
            vec![("d".to_string(), "x".to_string())]
        );
    }

    #[test]
    fn rejects_key_without_partition_marker() {
        let err = ObjectMetadata::parse("ns/v1/plain/file.parquet").unwrap_err();
        assert!(matches!(err, MetadataError::NoPartitionMarker { .. }));
    }

    #[test]
    fn rejects_unparseable_date() {
        let err = ObjectMetadata::parse("ns/v1/d=not-a-date/file.parquet").unwrap_err();
        assert!(matches!(err, MetadataError::UnknownDateFormat { .. }));
    }

    #[test]
    fn rejects_date_partition_in_first_segment() {
        let err = ObjectMetadata::parse("d=2024-01-02/file.parquet").unwrap_err();
        assert!(matches!(err, MetadataError::MissingTablePrefix { .. }));
    }

    #[test]
    fn detects_date_formats_in_order() {
        let (compact, date) = DateFormat::detect("20240102").unwrap();
        assert_eq!(compact, DateFormat::Compact);
        assert_eq!(date.to_string(), "2024-01-02");

        let (dashed, _) = DateFormat::detect("2024-01-02").unwrap();
        assert_eq!(dashed, DateFormat::Dashed);

        assert!(DateFormat::detect("not-a-date").is_none());
    }

    #[test]
    fn renders_dates_back_into_raw_format() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(DateFormat::Compact.render(date), "20240102");
        assert_eq!(DateFormat::Dashed.render(date), "2024-01-02");
    }

    #[test]
    fn normalizes_table_ids() {
        assert_eq!(normalize_table_id("Main-Summary_v4"), "main_summary_v4");
        assert_eq!(normalize_table_id("a=b"), "a_b");
    }

    #[test]
    fn ignores_markers_and_temp_files() {
        assert!(ignore_key("ns/v1/d=20240102/"));
        assert!(ignore_key("ns/v1/_SUCCESS"));
        assert!(ignore_key("ns/v1/_temporary/part-0.parquet"));
        assert!(ignore_key("ns/v1/d=20240102_$folder$"));
        assert!(ignore_key("ns/v1/.spark-staging-abc/part-0.parquet"));
        assert!(!ignore_key("ns/v1/d=20240102/part-0.parquet"));
    }

    #[test]
    fn scratch_table_ids_share_prefix_but_differ() {
        let meta = ObjectMetadata::parse("ns/v1/d=20240102/f.parquet").unwrap();
        let a = meta.scratch_table_id();
        let b = meta.scratch_table_id();

        assert!(a.starts_with("ns_v1_2024_01_02_"));
        assert_eq!(a.len(), "ns_v1_2024_01_02_".len() + 5);
        assert_ne!(a, b);
    }
}

//! Filtering and sorting of stored result rows for display

use chrono::{NaiveDateTime, Timelike};
use std::collections::BTreeSet;

use super::{BlitzCacheRecord, ProcedureKind, ProcedureRecord};

/// Drop rows without a non-negative priority, then keep `priority <= max`
pub fn filter_priority(records: Vec<ProcedureRecord>, max: Option<i64>) -> Vec<ProcedureRecord> {
    records
        .into_iter()
        .filter(|r| match r.priority() {
            Some(p) if p >= 0 => max.map_or(true, |m| p <= m),
            _ => false,
        })
        .collect()
}

/// Finding group of a row.
///
/// sp_BlitzIndex findings read `Group: specifics`, so the group is the
/// prefix; sp_Blitz findings are already group-sized.
pub fn finding_group(record: &ProcedureRecord) -> Option<&str> {
    let finding = record.headline()?;
    match record.kind() {
        ProcedureKind::Blitz => Some(finding),
        ProcedureKind::BlitzIndex => finding.split_once(':').map(|(group, _)| group),
        ProcedureKind::BlitzCache => None,
    }
}

/// Sorted, de-duplicated finding groups present in `records`
pub fn finding_groups(records: &[ProcedureRecord]) -> Vec<String> {
    records
        .iter()
        .filter_map(finding_group)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Keep rows whose group is selected; an empty selection keeps everything
pub fn filter_groups(records: Vec<ProcedureRecord>, selected: &[String]) -> Vec<ProcedureRecord> {
    if selected.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| finding_group(r).is_some_and(|g| selected.iter().any(|s| s == g)))
        .collect()
}

/// Minimum thresholds for plan cache rows
#[derive(Debug, Clone, Default)]
pub struct CacheThresholds {
    pub min_avg_cpu_ms: Option<f64>,
    pub min_total_cpu_ms: Option<f64>,
    pub min_executions: Option<i64>,
    pub min_total_reads: Option<i64>,
}

impl CacheThresholds {
    fn accepts(&self, r: &BlitzCacheRecord) -> bool {
        fn at_least<T: PartialOrd>(value: Option<T>, min: Option<T>) -> bool {
            match min {
                None => true,
                Some(min) => value.is_some_and(|v| v >= min),
            }
        }

        at_least(r.avg_cpu_ms, self.min_avg_cpu_ms)
            && at_least(r.total_cpu_ms, self.min_total_cpu_ms)
            && at_least(r.executions, self.min_executions)
            && at_least(r.total_reads, self.min_total_reads)
    }
}

/// Apply plan cache thresholds; rows of other procedures pass through
pub fn filter_cache(records: Vec<ProcedureRecord>, thresholds: &CacheThresholds) -> Vec<ProcedureRecord> {
    records
        .into_iter()
        .filter(|r| match r {
            ProcedureRecord::BlitzCache(c) => thresholds.accepts(c),
            _ => true,
        })
        .collect()
}

/// Numeric columns plan cache rows can be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    AvgCpu,
    TotalCpu,
    Executions,
    TotalReads,
}

impl SortKey {
    /// Parses the column name; unknown names mean "keep stored order"
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "avg_cpu_ms" => Some(SortKey::AvgCpu),
            "total_cpu_ms" => Some(SortKey::TotalCpu),
            "executions" => Some(SortKey::Executions),
            "total_reads" => Some(SortKey::TotalReads),
            _ => None,
        }
    }

    fn value(self, record: &ProcedureRecord) -> f64 {
        let ProcedureRecord::BlitzCache(r) = record else {
            return 0.0;
        };
        match self {
            SortKey::AvgCpu => r.avg_cpu_ms,
            SortKey::TotalCpu => r.total_cpu_ms,
            SortKey::Executions => r.executions.map(|v| v as f64),
            SortKey::TotalReads => r.total_reads.map(|v| v as f64),
        }
        .unwrap_or(0.0)
    }
}

/// Stable sort by `key`; missing values count as zero
pub fn sort_records(mut records: Vec<ProcedureRecord>, key: SortKey, descending: bool) -> Vec<ProcedureRecord> {
    records.sort_by(|a, b| {
        let ord = key.value(a).total_cmp(&key.value(b));
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    records
}

const EXECUTION_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

fn execution_hour(timestamp: &str) -> Option<u32> {
    let timestamp = timestamp.trim();
    EXECUTION_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(timestamp, fmt).ok())
        .map(|dt| dt.hour())
}

/// Keep plan cache rows last executed within `[start, end]` hours.
///
/// A window with `start > end` wraps midnight (22..6). Rows whose timestamp
/// is missing or unparseable are dropped.
pub fn filter_by_hour(records: Vec<ProcedureRecord>, start: u32, end: u32) -> Vec<ProcedureRecord> {
    records
        .into_iter()
        .filter(|r| {
            let ProcedureRecord::BlitzCache(c) = r else {
                return true;
            };
            let Some(hour) = c.last_execution.as_deref().and_then(execution_hour) else {
                return false;
            };
            if start <= end {
                (start..=end).contains(&hour)
            } else {
                hour >= start || hour <= end
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{BlitzIndexRecord, BlitzRecord};

    fn blitz(finding: &str, priority: Option<i64>) -> ProcedureRecord {
        ProcedureRecord::Blitz(BlitzRecord {
            pb_id: 0,
            finding: Some(finding.to_string()),
            details: None,
            priority,
            raw_record: None,
            procedure_order: 0,
            pc_id: 1,
            analyzed: false,
        })
    }

    fn index(finding: &str) -> ProcedureRecord {
        ProcedureRecord::BlitzIndex(BlitzIndexRecord {
            pbi_id: 0,
            finding: Some(finding.to_string()),
            details_schema_table_index_indexid: None,
            priority: Some(100),
            more_info: None,
            raw_record: None,
            procedure_order: 0,
            pc_id: 1,
            analyzed: false,
        })
    }

    fn cache(avg: Option<f64>, executions: Option<i64>, last: Option<&str>) -> ProcedureRecord {
        ProcedureRecord::BlitzCache(BlitzCacheRecord {
            pbc_id: 0,
            query_text: Some("SELECT 1".into()),
            avg_cpu_ms: avg,
            total_cpu_ms: None,
            executions,
            total_reads: None,
            last_execution: last.map(str::to_string),
            warnings: None,
            raw_record: None,
            procedure_order: 0,
            pc_id: 1,
            analyzed: false,
        })
    }

    #[test]
    fn test_priority_filter_drops_missing_and_negative() {
        let records = vec![
            blitz("a", Some(1)),
            blitz("b", None),
            blitz("c", Some(-1)),
            blitz("d", Some(50)),
        ];
        assert_eq!(filter_priority(records.clone(), None).len(), 2);
        let capped = filter_priority(records, Some(10));
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].headline(), Some("a"));
    }

    #[test]
    fn test_index_groups_use_prefix() {
        let records = vec![
            index("Over-Indexing: 7 indexes on dbo.Orders"),
            index("Unused Index: dbo.Users.IX_Name"),
            index("Over-Indexing: 5 indexes on dbo.Users"),
            index("no group here"),
        ];
        assert_eq!(finding_groups(&records), vec!["Over-Indexing", "Unused Index"]);

        let kept = filter_groups(records.clone(), &["Unused Index".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(filter_groups(records, &[]).len(), 4);
    }

    #[test]
    fn test_cache_thresholds_and_sort() {
        let records = vec![
            cache(Some(10.0), Some(5), None),
            cache(None, Some(100), None),
            cache(Some(50.0), Some(1), None),
        ];
        let thresholds = CacheThresholds {
            min_avg_cpu_ms: Some(20.0),
            ..Default::default()
        };
        assert_eq!(filter_cache(records.clone(), &thresholds).len(), 1);

        let sorted = sort_records(records, SortKey::Executions, true);
        let execs: Vec<_> = sorted
            .iter()
            .map(|r| match r {
                ProcedureRecord::BlitzCache(c) => c.executions.unwrap(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(execs, vec![100, 5, 1]);
        assert!(SortKey::parse("bogus").is_none());
    }

    #[test]
    fn test_hour_window_wraps_midnight() {
        let records = vec![
            cache(None, None, Some("2024-08-15T23:10:00")),
            cache(None, None, Some("2024-08-15 03:00:00.123")),
            cache(None, None, Some("08/15/2024 12:00:00")),
            cache(None, None, Some("yesterday")),
        ];
        assert_eq!(filter_by_hour(records.clone(), 22, 6).len(), 2);
        assert_eq!(filter_by_hour(records, 9, 17).len(), 1);
    }
}

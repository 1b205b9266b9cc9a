use crate::analytics::policy::*;
use crate::domain::records::Read;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderSpeed {
    Immediate,
    Fast,
    Normal,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderBreadth {
    Generalist,
    #[serde(rename = "Multi-Sector")]
    MultiSector,
    Specialist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadershipIntelligence {
    pub total_reads: usize,
    pub sector_breadth: usize,
    pub preferred_sector: Option<String>,
    pub preferred_report_type: Option<String>,
    pub avg_read_delay_days: f64,
    pub read_velocity_score: Option<f64>,
    pub same_day_read_ratio: f64,
    pub late_read_ratio: f64,
    pub reader_speed_type: ReaderSpeed,
    pub reader_breadth_type: ReaderBreadth,
    pub readership_quality_score: Option<f64>,
}

/// Summarises the reads stamped at or before `now`. `None` when there are none.
pub fn compute(reads: &[Read<'_>], now: DateTime<Utc>) -> Option<ReadershipIntelligence> {
    let reads: Vec<Read<'_>> = reads
        .iter()
        .copied()
        .filter(|r| r.event.read_timestamp <= now)
        .collect();
    if reads.is_empty() {
        return None;
    }

    let total = reads.len();
    let diffs: Vec<i64> = reads.iter().map(Read::days_diff).collect();
    let avg = diffs.iter().sum::<i64>() as f64 / total as f64;

    let sectors: BTreeSet<&str> = reads
        .iter()
        .filter_map(|r| r.report.sector.as_deref())
        .collect();
    let breadth = sectors.len();

    // Reads stamped before publication would make this blow up or go negative.
    let velocity = (1.0 + avg > 0.0).then(|| 1.0 / (1.0 + avg));

    Some(ReadershipIntelligence {
        total_reads: total,
        sector_breadth: breadth,
        preferred_sector: most_frequent(reads.iter().filter_map(|r| r.report.sector.as_deref())),
        preferred_report_type: most_frequent(
            reads.iter().filter_map(|r| r.report.report_type.as_deref()),
        ),
        avg_read_delay_days: avg,
        read_velocity_score: velocity,
        same_day_read_ratio: ratio(
            diffs.iter().filter(|d| **d <= SAME_DAY_READ_DAYS).count(),
            total,
        ),
        late_read_ratio: ratio(diffs.iter().filter(|d| **d >= LATE_READ_DAYS).count(), total),
        reader_speed_type: reader_speed(avg),
        reader_breadth_type: reader_breadth(breadth),
        readership_quality_score: velocity.map(|v| {
            total as f64 * READ_COUNT_SCORE_WEIGHT
                + v * READ_VELOCITY_SCORE_WEIGHT
                + breadth as f64 * READ_BREADTH_SCORE_WEIGHT
        }),
    })
}

pub fn reader_speed(avg_days: f64) -> ReaderSpeed {
    if avg_days <= 1.0 {
        ReaderSpeed::Immediate
    } else if avg_days <= 3.0 {
        ReaderSpeed::Fast
    } else if avg_days <= 7.0 {
        ReaderSpeed::Normal
    } else {
        ReaderSpeed::Slow
    }
}

pub fn reader_breadth(sectors: usize) -> ReaderBreadth {
    if sectors >= 8 {
        ReaderBreadth::Generalist
    } else if sectors >= 4 {
        ReaderBreadth::MultiSector
    } else {
        ReaderBreadth::Specialist
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    part as f64 / total as f64
}

/// Most common value; ties go to the lexicographically first.
fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, m)| n > m) {
            best = Some((value, n));
        }
    }
    best.map(|(value, _)| value.to_string())
}

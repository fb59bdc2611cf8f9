use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use common::error::AppError;
use regex::Regex;
use serde_json::json;

use crate::{
    engine::CollisionEngine,
    scoring::clamp_unit,
    types::{
        confidence_for, ChunkRecord, CollisionEvidence, CollisionResult, DetectionInput,
        EngineType,
    },
};

const SECONDS_PER_DAY: i64 = 86_400;

pub struct TemporalProximityEngine {
    iso_date: Regex,
    long_date: Regex,
    slash_date: Regex,
    /// Chunks further apart than this score zero.
    window_days: i64,
}

impl TemporalProximityEngine {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            iso_date: compile(r"\b(\d{4})-(\d{2})-(\d{2})\b")?,
            long_date: compile(
                r"\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2}),\s+(\d{4})\b",
            )?,
            slash_date: compile(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b")?,
            window_days: 90,
        })
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days.max(1);
        self
    }

    /// Timestamp resolution order: explicit field, then the first date the
    /// content regexes find.
    fn timestamp_of(&self, chunk: &ChunkRecord) -> Option<DateTime<Utc>> {
        if let Some(explicit) = chunk.timestamp {
            return Some(explicit);
        }
        self.date_from_content(&chunk.content)
    }

    fn date_from_content(&self, content: &str) -> Option<DateTime<Utc>> {
        if let Some(caps) = self.iso_date.captures(content) {
            return build_date(caps.get(1)?.as_str(), caps.get(2)?.as_str(), caps.get(3)?.as_str());
        }
        if let Some(caps) = self.long_date.captures(content) {
            let month = month_number(caps.get(1)?.as_str())?;
            return build_date(
                caps.get(3)?.as_str(),
                &month.to_string(),
                caps.get(2)?.as_str(),
            );
        }
        if let Some(caps) = self.slash_date.captures(content) {
            // US-style month/day/year.
            return build_date(
                caps.get(3)?.as_str(),
                caps.get(1)?.as_str(),
                caps.get(2)?.as_str(),
            );
        }
        None
    }

    fn effective_window(&self, input: &DetectionInput) -> i64 {
        input
            .config
            .as_ref()
            .and_then(|c| c.get("window_days"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(self.window_days)
            .max(1)
    }
}

fn compile(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern)
        .map_err(|err| AppError::InternalError(format!("invalid temporal pattern: {err}")))
}

fn build_date(year: &str, month: &str, day: &str) -> Option<DateTime<Utc>> {
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

fn month_number(name: &str) -> Option<u32> {
    let months = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    months
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name))
        .and_then(|idx| u32::try_from(idx.saturating_add(1)).ok())
}

/// Detects a regular posting rhythm from sorted timestamps. Requires at
/// least three intervals whose coefficient of variation stays small.
fn detect_period(timestamps: &[DateTime<Utc>]) -> Option<i64> {
    if timestamps.len() < 4 {
        return None;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort();

    let intervals: Vec<f64> = sorted
        .windows(2)
        .map(|pair| {
            let gap = pair[1].signed_duration_since(pair[0]).num_seconds();
            #[allow(clippy::cast_precision_loss)]
            let gap = gap as f64;
            gap
        })
        .filter(|gap| *gap > 0.0)
        .collect();
    if intervals.len() < 3 {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let count = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / count;
    if mean <= 0.0 {
        return None;
    }
    let variance = intervals
        .iter()
        .map(|gap| (gap - mean).powi(2))
        .sum::<f64>()
        / count;
    let coefficient_of_variation = variance.sqrt() / mean;

    if coefficient_of_variation < 0.25 {
        #[allow(clippy::cast_possible_truncation)]
        let period = mean.round() as i64;
        Some(period)
    } else {
        None
    }
}

/// True when `gap` sits within 10% of a whole multiple of `period`.
fn aligns_with_period(gap_seconds: i64, period: i64) -> bool {
    if period <= 0 || gap_seconds <= 0 {
        return false;
    }
    let residual = gap_seconds % period;
    let tolerance = period / 10;
    residual <= tolerance || residual >= period.saturating_sub(tolerance)
}

#[async_trait]
impl CollisionEngine for TemporalProximityEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::TemporalProximity
    }

    fn can_process(&self, input: &DetectionInput) -> bool {
        self.timestamp_of(&input.source).is_some()
    }

    async fn detect(&self, input: &DetectionInput) -> Result<Vec<CollisionResult>, AppError> {
        let Some(source_time) = self.timestamp_of(&input.source) else {
            return Ok(Vec::new());
        };
        let window_seconds = self.effective_window(input).saturating_mul(SECONDS_PER_DAY);

        let target_times: Vec<(usize, DateTime<Utc>)> = input
            .targets
            .iter()
            .enumerate()
            .filter_map(|(index, target)| self.timestamp_of(target).map(|ts| (index, ts)))
            .collect();

        let mut all_times: Vec<DateTime<Utc>> =
            target_times.iter().map(|(_, ts)| *ts).collect();
        all_times.push(source_time);
        let period = detect_period(&all_times);

        let mut results = Vec::new();
        for (index, target_time) in target_times {
            let Some(target) = input.targets.get(index) else {
                continue;
            };
            let gap_seconds = source_time
                .signed_duration_since(target_time)
                .num_seconds()
                .abs();
            if gap_seconds > window_seconds {
                continue;
            }

            #[allow(clippy::cast_precision_loss)]
            let decay = (-3.0 * gap_seconds as f32 / window_seconds.max(1) as f32).exp();
            let periodic = period.is_some_and(|p| aligns_with_period(gap_seconds, p));
            let score = clamp_unit(if periodic { decay + 0.2 } else { decay });

            results.push(CollisionResult {
                source_chunk_id: input.source.id.clone(),
                target_chunk_id: target.id.clone(),
                engine: EngineType::TemporalProximity,
                score,
                confidence: confidence_for(score),
                explanation: Some(format!(
                    "{} days apart{}",
                    gap_seconds / SECONDS_PER_DAY,
                    if periodic { ", on a recurring rhythm" } else { "" }
                )),
                evidence: CollisionEvidence::Temporal {
                    gap_seconds,
                    periodic,
                },
            });
        }
        Ok(results)
    }

    fn config_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "window_days": { "type": "integer", "minimum": 1 }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use common::types::ChunkMetadata;

    use super::*;

    fn record(id: &str, content: &str, timestamp: Option<DateTime<Utc>>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: "doc".into(),
            content: content.to_string(),
            metadata: ChunkMetadata::default(),
            embedding: None,
            created_at: Utc::now(),
            timestamp,
        }
    }

    fn day(year: i32, month: u32, day_of_month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day_of_month, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    #[test]
    fn extracts_dates_in_priority_order() {
        let engine = TemporalProximityEngine::new().expect("compiles");

        let explicit = record("a", "written 2020-01-01", Some(day(2024, 6, 1)));
        assert_eq!(engine.timestamp_of(&explicit), Some(day(2024, 6, 1)));

        let iso = record("b", "Notes from 2023-03-15 meeting", None);
        assert_eq!(engine.timestamp_of(&iso), Some(day(2023, 3, 15)));

        let long = record("c", "Published March 15, 2023 online", None);
        assert_eq!(engine.timestamp_of(&long), Some(day(2023, 3, 15)));

        let slash = record("d", "dated 3/15/2023 originally", None);
        assert_eq!(engine.timestamp_of(&slash), Some(day(2023, 3, 15)));

        let none = record("e", "undated musings", None);
        assert!(engine.timestamp_of(&none).is_none());
    }

    #[tokio::test]
    async fn closer_in_time_scores_higher() {
        let engine = TemporalProximityEngine::new().expect("compiles");
        let input = DetectionInput {
            source: record("s", "", Some(day(2024, 1, 1))),
            targets: vec![
                record("near", "", Some(day(2024, 1, 3))),
                record("far", "", Some(day(2024, 3, 1))),
            ],
            config: None,
        };

        let results = engine.detect(&input).await.expect("detects");
        assert_eq!(results.len(), 2);
        let near = results.iter().find(|r| r.target_chunk_id == "near").expect("near");
        let far = results.iter().find(|r| r.target_chunk_id == "far").expect("far");
        assert!(near.score > far.score);
    }

    #[tokio::test]
    async fn targets_outside_the_window_are_dropped() {
        let engine = TemporalProximityEngine::new().expect("compiles").with_window_days(30);
        let input = DetectionInput {
            source: record("s", "", Some(day(2024, 1, 1))),
            targets: vec![record("old", "", Some(day(2020, 1, 1)))],
            config: None,
        };

        let results = engine.detect(&input).await.expect("detects");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn weekly_rhythm_gets_the_periodic_boost() {
        let engine = TemporalProximityEngine::new().expect("compiles");
        // Weekly entries; the target four weeks from the source aligns.
        let input = DetectionInput {
            source: record("s", "", Some(day(2024, 1, 1))),
            targets: vec![
                record("t1", "", Some(day(2024, 1, 8))),
                record("t2", "", Some(day(2024, 1, 15))),
                record("t3", "", Some(day(2024, 1, 22))),
                record("t4", "", Some(day(2024, 1, 29))),
            ],
            config: None,
        };

        let results = engine.detect(&input).await.expect("detects");
        assert_eq!(results.len(), 4);
        for result in &results {
            if let CollisionEvidence::Temporal { periodic, .. } = result.evidence {
                assert!(periodic, "{} should align", result.target_chunk_id);
            }
        }
    }

    #[test]
    fn irregular_intervals_yield_no_period() {
        let times = vec![
            day(2024, 1, 1),
            day(2024, 1, 2),
            day(2024, 2, 15),
            day(2024, 2, 16),
            day(2024, 4, 1),
        ];
        assert!(detect_period(&times).is_none());
    }

    #[test]
    fn undated_source_cannot_be_processed() {
        let engine = TemporalProximityEngine::new().expect("compiles");
        let input = DetectionInput {
            source: record("s", "no dates here", None),
            targets: Vec::new(),
            config: None,
        };
        assert!(!engine.can_process(&input));
    }
}

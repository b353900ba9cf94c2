use chrono::{DateTime, Duration, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::config::PerformanceConfig;
use crate::store::{
    AngleMeasurement, DailyBestEntry, DataStore, DailyStats, PersonalBestEntry, PersonalBests,
};

/// Statistics derived for one measurement against the full history.
///
/// The history already contains the measurement being scored (it is appended
/// before stats are computed), so `daily_best`/`personal_best` include the
/// current value and the "is best" flags read as "current value ties or beats
/// everything recorded so far". A tie therefore re-triggers a best — kept
/// deliberately, see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub current_value: f32,
    pub daily_best: Option<f32>,
    pub historical_average: Option<f32>,
    pub personal_best: Option<f32>,
    pub improvement_vs_average: Option<f32>,
    pub is_daily_best: bool,
    pub is_personal_best: bool,
}

/// Why a measurement deserves feedback, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    PersonalBest,
    DailyBest,
    Improvement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub trend: Trend,
    pub improvement: f32,
    pub recent_average: f32,
    pub days_analyzed: i64,
    pub data_points: usize,
}

impl TrendReport {
    fn insufficient(days: i64, data_points: usize) -> Self {
        Self {
            trend: Trend::InsufficientData,
            improvement: 0.0,
            recent_average: 0.0,
            days_analyzed: days,
            data_points,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub measurements_taken: usize,
    pub improvements: usize,
    pub daily_bests: usize,
    pub personal_bests: usize,
    /// Minutes between the first and last measurement of the session.
    pub session_duration: f32,
    pub poses_practiced: Vec<String>,
}

/// Append-only measurement log plus the derived best/average statistics.
///
/// Only (pose, angle) pairs on the configured allow-list are recorded;
/// everything else is silently ignored. The daily-best and personal-best
/// maps are caches over the log, rebuilt incrementally as records land.
pub struct PerformanceTracker {
    config: PerformanceConfig,
    store: DataStore,
    history: Vec<AngleMeasurement>,
    daily_stats: DailyStats,
    personal_bests: PersonalBests,
    session_id: String,
    session_measurements: Vec<AngleMeasurement>,
}

impl PerformanceTracker {
    pub fn new(config: PerformanceConfig, store: DataStore) -> Self {
        let history = store.load_history();
        let daily_stats = store.load_daily_stats();
        let personal_bests = store.load_personal_bests();
        let session_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        info!(
            session = %session_id,
            history_len = history.len(),
            "performance tracker ready"
        );
        Self {
            config,
            store,
            history,
            daily_stats,
            personal_bests,
            session_id,
            session_measurements: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record one measurement and return its statistics, or `None` when the
    /// (pose, angle) pair is not on the allow-list.
    pub fn record_measurement(
        &mut self,
        pose: &str,
        angle_name: &str,
        value: f32,
    ) -> Option<PerformanceStats> {
        if !self.config.is_tracked(pose, angle_name) {
            return None;
        }

        let now = Local::now();
        let measurement = AngleMeasurement {
            pose: pose.to_string(),
            angle_name: angle_name.to_string(),
            value,
            timestamp: now,
            session_id: self.session_id.clone(),
        };
        self.session_measurements.push(measurement.clone());
        self.history.push(measurement);

        let stats = self.compute_stats(pose, angle_name, value, now);
        self.update_daily_stats(pose, angle_name, value, stats.is_daily_best, now);
        self.update_personal_bests(pose, angle_name, value, stats.is_personal_best, now);

        Some(stats)
    }

    /// Derive statistics for `current_value` from the history as it stands.
    /// The historical average spans the configured window and includes the
    /// just-recorded point (known quirk, preserved — see DESIGN.md).
    fn compute_stats(
        &self,
        pose: &str,
        angle_name: &str,
        current_value: f32,
        now: DateTime<Local>,
    ) -> PerformanceStats {
        let today = now.date_naive();
        let cutoff = now - Duration::days(self.config.history_days);

        let mut window_sum = 0.0f32;
        let mut window_count = 0usize;
        let mut daily_best: Option<f32> = None;
        let mut personal_best: Option<f32> = None;

        for m in &self.history {
            if m.pose != pose || m.angle_name != angle_name {
                continue;
            }
            personal_best = Some(personal_best.map_or(m.value, |b: f32| b.max(m.value)));
            if m.timestamp < cutoff {
                continue;
            }
            window_sum += m.value;
            window_count += 1;
            if m.timestamp.date_naive() == today {
                daily_best = Some(daily_best.map_or(m.value, |b: f32| b.max(m.value)));
            }
        }

        let historical_average = (window_count > 0).then(|| window_sum / window_count as f32);

        PerformanceStats {
            current_value,
            daily_best,
            historical_average,
            personal_best,
            improvement_vs_average: historical_average.map(|avg| current_value - avg),
            is_daily_best: daily_best.is_none_or(|b| current_value >= b),
            is_personal_best: personal_best.is_none_or(|b| current_value >= b),
        }
    }

    fn update_daily_stats(
        &mut self,
        pose: &str,
        angle_name: &str,
        value: f32,
        is_best: bool,
        now: DateTime<Local>,
    ) {
        let today = now.date_naive().to_string();
        let key = format!("{pose}_{angle_name}");
        let day_entry = self.daily_stats.entry(today).or_default();
        if is_best || !day_entry.contains_key(&key) {
            day_entry.insert(
                key,
                DailyBestEntry {
                    value,
                    timestamp: now,
                },
            );
        }
    }

    fn update_personal_bests(
        &mut self,
        pose: &str,
        angle_name: &str,
        value: f32,
        is_best: bool,
        now: DateTime<Local>,
    ) {
        if !is_best {
            return;
        }
        self.personal_bests.insert(
            format!("{pose}_{angle_name}"),
            PersonalBestEntry {
                value,
                date: now.date_naive().to_string(),
                session_id: self.session_id.clone(),
            },
        );
    }

    /// Decide whether a measurement deserves spoken feedback, and which
    /// achievement it represents. Personal best beats daily best beats
    /// an improvement over the windowed average.
    pub fn should_provide_feedback(
        &self,
        pose: &str,
        angle_name: &str,
        current_value: f32,
    ) -> Option<Achievement> {
        let stats = self.compute_stats(pose, angle_name, current_value, Local::now());
        if stats.is_personal_best {
            Some(Achievement::PersonalBest)
        } else if stats.is_daily_best {
            Some(Achievement::DailyBest)
        } else if stats
            .improvement_vs_average
            .is_some_and(|imp| imp >= self.config.improvement_threshold)
        {
            Some(Achievement::Improvement)
        } else {
            None
        }
    }

    /// Summarize this session. Every session measurement is re-scored
    /// against the final history and classified into exactly one bucket by
    /// the same priority order as `should_provide_feedback`.
    pub fn session_summary(&self) -> SessionSummary {
        let now = Local::now();
        let mut personal_bests = 0;
        let mut daily_bests = 0;
        let mut improvements = 0;

        for m in &self.session_measurements {
            let stats = self.compute_stats(&m.pose, &m.angle_name, m.value, now);
            if stats.is_personal_best {
                personal_bests += 1;
            } else if stats.is_daily_best {
                daily_bests += 1;
            } else if stats
                .improvement_vs_average
                .is_some_and(|imp| imp >= self.config.improvement_threshold)
            {
                improvements += 1;
            }
        }

        let session_duration = match (
            self.session_measurements.iter().map(|m| m.timestamp).min(),
            self.session_measurements.iter().map(|m| m.timestamp).max(),
        ) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f32 / 60_000.0,
            _ => 0.0,
        };

        let poses_practiced: Vec<String> = self
            .session_measurements
            .iter()
            .map(|m| m.pose.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        SessionSummary {
            measurements_taken: self.session_measurements.len(),
            improvements,
            daily_bests,
            personal_bests,
            session_duration,
            poses_practiced,
        }
    }

    /// Trend over recent days: bucket the window by calendar day, average
    /// each day, and compare the later half of the daily averages against
    /// the earlier half.
    pub fn trend_analysis(&self, pose: &str, angle_name: &str, days: i64) -> TrendReport {
        let cutoff = Local::now() - Duration::days(days);
        let recent: Vec<&AngleMeasurement> = self
            .history
            .iter()
            .filter(|m| m.pose == pose && m.angle_name == angle_name && m.timestamp >= cutoff)
            .collect();

        if recent.len() < 2 {
            return TrendReport::insufficient(days, recent.len());
        }

        // BTreeMap keeps the daily buckets in chronological order.
        let mut by_day: BTreeMap<chrono::NaiveDate, Vec<f32>> = BTreeMap::new();
        for m in &recent {
            by_day.entry(m.timestamp.date_naive()).or_default().push(m.value);
        }

        let daily_averages: Vec<f32> = by_day
            .values()
            .map(|values| values.iter().sum::<f32>() / values.len() as f32)
            .collect();

        if daily_averages.len() < 2 {
            return TrendReport::insufficient(days, recent.len());
        }

        let mid = daily_averages.len() / 2;
        let first_avg = daily_averages[..mid].iter().sum::<f32>() / mid as f32;
        let second_avg =
            daily_averages[mid..].iter().sum::<f32>() / (daily_averages.len() - mid) as f32;
        let improvement = second_avg - first_avg;

        let trend = if improvement > 1.0 {
            Trend::Improving
        } else if improvement < -1.0 {
            Trend::Declining
        } else {
            Trend::Stable
        };

        TrendReport {
            trend,
            improvement,
            recent_average: second_avg,
            days_analyzed: days,
            data_points: recent.len(),
        }
    }

    /// Flush the log and both caches to durable storage. Failures are
    /// warned about, never propagated into the frame loop.
    pub fn save(&self) {
        if let Err(e) = self
            .store
            .save_all(&self.history, &self.daily_stats, &self.personal_bests)
        {
            warn!(error = %e, "performance data not fully saved");
        }
    }
}

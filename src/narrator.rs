use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::analyzer::AngleAnalysis;
use crate::config::{NarratorConfig, PoseDetectionConfig};
use crate::tracker::{Achievement, PerformanceTracker};

/// Outbound speech boundary. Production supplies a TTS-backed sink; tests
/// use a recording sink.
pub trait SpeechSink: Send + 'static {
    fn say(&self, text: &str);
}

/// Sink that discards everything. Useful when narration is disabled but the
/// queue plumbing should still exist.
pub struct NullSink;

impl SpeechSink for NullSink {
    fn say(&self, _text: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub priority: Priority,
}

struct QueueState {
    queue: VecDeque<Utterance>,
    stop: bool,
    speaking: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

/// Background speech queue. One worker thread drains utterances into the
/// sink so the frame loop never blocks on speech. A high-priority enqueue
/// evicts queued normal-priority utterances; an utterance already being
/// spoken is never interrupted.
pub struct SpeechQueue {
    inner: Arc<QueueInner>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SpeechQueue {
    pub fn start(sink: impl SpeechSink) -> Self {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                stop: false,
                speaking: false,
            }),
            condvar: Condvar::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("speech-worker".into())
            .spawn(move || Self::run_worker(worker_inner, sink))
            .ok();
        if worker.is_none() {
            warn!("speech worker could not be spawned, utterances will queue unspoken");
        }

        Self { inner, worker }
    }

    fn run_worker(inner: Arc<QueueInner>, sink: impl SpeechSink) {
        loop {
            let utterance = {
                let mut state = inner.state.lock().unwrap();
                while state.queue.is_empty() && !state.stop {
                    state = inner.condvar.wait(state).unwrap();
                }
                match state.queue.pop_front() {
                    Some(u) => {
                        state.speaking = true;
                        u
                    }
                    // Stop requested and nothing left to drain.
                    None => break,
                }
            };

            sink.say(&utterance.text);

            let mut state = inner.state.lock().unwrap();
            state.speaking = false;
            inner.condvar.notify_all();
        }
        inner.condvar.notify_all();
    }

    pub fn enqueue(&self, text: impl Into<String>, priority: Priority) {
        let mut state = self.inner.state.lock().unwrap();
        if state.stop {
            return;
        }
        if priority == Priority::High {
            state.queue.retain(|u| u.priority == Priority::High);
        }
        state.queue.push_back(Utterance {
            text: text.into(),
            priority,
        });
        self.inner.condvar.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    /// Ask the worker to drain what is queued and stop, waiting at most
    /// `timeout`. On timeout the worker is abandoned mid-utterance; the
    /// process exit reaps it.
    pub fn shutdown(mut self, timeout: Duration) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.stop = true;
            self.inner.condvar.notify_all();

            let (state, result) = self
                .inner
                .condvar
                .wait_timeout_while(state, timeout, |s| !s.queue.is_empty() || s.speaking)
                .unwrap();
            if result.timed_out() {
                warn!(pending = state.queue.len(), "speech queue shutdown timed out");
                if let Some(worker) = self.worker.take() {
                    drop(worker);
                }
                return;
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!("speech queue drained and stopped");
    }
}

/// Achievement-gated coaching voice. Keeps per-pose hold and cooldown state
/// for one session; every gate must pass before a measurement is recorded
/// and spoken.
pub struct Narrator {
    enabled: bool,
    confidence_threshold: f32,
    min_hold_time: f32,
    feedback_cooldown: f32,
    current_pose: Option<String>,
    pose_hold_start: HashMap<String, f64>,
    last_feedback_time: HashMap<String, f64>,
}

impl Narrator {
    pub fn new(narrator: &NarratorConfig, detection: &PoseDetectionConfig) -> Self {
        Self {
            enabled: narrator.enabled,
            confidence_threshold: detection.confidence_threshold,
            min_hold_time: detection.min_hold_time,
            feedback_cooldown: narrator.feedback_cooldown,
            current_pose: None,
            pose_hold_start: HashMap::new(),
            last_feedback_time: HashMap::new(),
        }
    }

    fn now_seconds() -> f64 {
        Local::now().timestamp_millis() as f64 / 1000.0
    }

    /// Run one frame's worth of gating. Returns true when an utterance was
    /// enqueued.
    ///
    /// Gate order: enabled and known pose, confidence, pose change (resets
    /// the hold timer, never speaks on the first frame of a pose), minimum
    /// hold, cooldown. Only then is the best-scoring tracked analysis
    /// recorded and, if it earns an achievement, spoken.
    pub fn observe(
        &mut self,
        pose_name: &str,
        similarity_score: f32,
        analyses: &[AngleAnalysis],
        tracker: &mut PerformanceTracker,
        speech: &SpeechQueue,
    ) -> bool {
        if !self.enabled || pose_name == "unknown" {
            return false;
        }

        let now = Self::now_seconds();

        let confidence = 1.0 - similarity_score;
        if confidence < self.confidence_threshold {
            return false;
        }

        if self.current_pose.as_deref() != Some(pose_name) {
            self.pose_hold_start.insert(pose_name.to_string(), now);
            self.current_pose = Some(pose_name.to_string());
            return false;
        }

        let hold_start = self.pose_hold_start.get(pose_name).copied().unwrap_or(now);
        if (now - hold_start) < self.min_hold_time as f64 {
            return false;
        }

        let last = self.last_feedback_time.get(pose_name).copied().unwrap_or(0.0);
        if (now - last) < self.feedback_cooldown as f64 {
            return false;
        }

        // One measurement per emission opportunity: the best-held angle the
        // tracker accepts. Ordered by level weight descending; the stable
        // sort keeps first-listed order on ties. Untracked angles (a
        // requirement table can score angles outside the allow-list) are
        // passed over, not allowed to shadow a tracked one.
        let mut ordered: Vec<&AngleAnalysis> = analyses.iter().collect();
        ordered.sort_by(|a, b| {
            b.feedback_level
                .weight()
                .partial_cmp(&a.feedback_level.weight())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let Some((analysis, stats)) = ordered.into_iter().find_map(|a| {
            tracker
                .record_measurement(pose_name, &a.angle_name, a.measured_angle)
                .map(|stats| (a, stats))
        }) else {
            return false;
        };

        let Some(achievement) =
            tracker.should_provide_feedback(pose_name, &analysis.angle_name, analysis.measured_angle)
        else {
            return false;
        };

        let clean_pose = pose_name.replace('_', " ");
        let clean_angle = analysis.angle_name.replace('_', " ");
        let value = analysis.measured_angle;

        let message = match achievement {
            Achievement::PersonalBest => format!(
                "Outstanding! New personal best {clean_angle} in {clean_pose}: {value:.1} degrees!"
            ),
            Achievement::DailyBest => format!(
                "Great work! Best {clean_angle} today: {value:.1} degrees in {clean_pose}!"
            ),
            Achievement::Improvement => {
                let (Some(imp), Some(avg)) =
                    (stats.improvement_vs_average, stats.historical_average)
                else {
                    return false;
                };
                format!(
                    "Excellent progress! Your {clean_angle} is {imp:.1} degrees better \
                     than your recent average of {avg:.1} degrees."
                )
            }
        };

        info!(pose = pose_name, angle = %analysis.angle_name, ?achievement, "feedback");
        speech.enqueue(message, Priority::High);
        self.last_feedback_time.insert(pose_name.to_string(), now);
        true
    }

    /// Speak the closing summary for the session.
    pub fn announce_session_summary(&self, tracker: &PerformanceTracker, speech: &SpeechQueue) {
        if !self.enabled {
            return;
        }

        let summary = tracker.session_summary();
        let message = Self::summary_message(
            summary.personal_bests,
            summary.daily_bests,
            summary.improvements,
            summary.session_duration,
        );
        speech.enqueue(message, Priority::High);
    }

    fn summary_message(
        personal_bests: usize,
        daily_bests: usize,
        improvements: usize,
        duration_minutes: f32,
    ) -> String {
        let mut parts = Vec::new();
        if personal_bests > 0 {
            parts.push(format!(
                "{personal_bests} personal best{}",
                if personal_bests > 1 { "s" } else { "" }
            ));
        }
        if daily_bests > 0 {
            parts.push(format!(
                "{daily_bests} daily best{}",
                if daily_bests > 1 { "s" } else { "" }
            ));
        }
        if improvements > 0 {
            parts.push(format!(
                "{improvements} improvement{}",
                if improvements > 1 { "s" } else { "" }
            ));
        }

        if parts.is_empty() {
            return "Session complete. Keep practicing to build your performance history!"
                .to_string();
        }

        let mut message = format!("Excellent session! You achieved {} today.", parts.join(", "));
        if duration_minutes > 5.0 {
            message.push_str(&format!(" Session time: {duration_minutes:.1} minutes."));
        }
        message
    }
}

//! Execution Timeline
//!
//! Tracks job start/end times for filling report durations and
//! rendering a Gantt chart of a build.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::workflow::dag::JobId;

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub job: JobId,
    /// Label shown in the chart
    pub label: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Records when each job starts, completes, or fails.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a job.
    pub fn add_event(&mut self, job: JobId, label: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            job,
            label: label.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Time between a job's start and its completion or failure.
    pub fn duration_of(&self, job: JobId) -> Option<Duration> {
        self.spans().get(&job).and_then(|(_, start, end)| end.map(|end| end - *start))
    }

    /// Durations of every finished job.
    pub fn durations(&self) -> HashMap<JobId, Duration> {
        self.spans()
            .into_iter()
            .filter_map(|(job, (_, start, end))| end.map(|end| (job, end - start)))
            .collect()
    }

    /// Start offset and optional end offset of each job, relative to the
    /// timeline start.
    fn spans(&self) -> HashMap<JobId, (&str, Duration, Option<Duration>)> {
        let mut spans: HashMap<JobId, (&str, Duration, Option<Duration>)> = HashMap::new();
        for event in &self.events {
            let offset = event.timestamp.duration_since(self.start_time);
            match event.event_type {
                EventType::Started => {
                    spans.insert(event.job, (event.label.as_str(), offset, None));
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(span) = spans.get_mut(&event.job) {
                        span.2 = Some(offset);
                    }
                }
            }
        }
        spans
    }

    /// Generates an ASCII Gantt chart.
    ///
    /// Each finished job is a bar placed relative to the total build time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.start_time.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut spans: Vec<_> = self
            .spans()
            .into_values()
            .filter_map(|(label, start, end)| end.map(|end| (label, start.as_millis(), end.as_millis())))
            .collect();
        spans.sort_by_key(|(_, start, _)| *start);

        for (label, start, end) in spans {
            let start_pos = (start as f64 * scale) as usize;
            let width = ((end - start) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            output.push_str(&format!(
                "{:16} |{}| ({} ms)\n",
                truncate(label, 16),
                bar,
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a label to `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.events().is_empty());
        assert!(timeline.durations().is_empty());
    }

    #[test]
    fn test_duration_of_finished_job() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(JobId(0), "sort", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event(JobId(0), "sort", EventType::Completed);

        assert!(timeline.duration_of(JobId(0)).unwrap() >= Duration::from_millis(20));
        assert_eq!(timeline.durations().len(), 1);
    }

    #[test]
    fn test_failed_job_has_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(JobId(3), "bad", EventType::Started);
        timeline.add_event(JobId(3), "bad", EventType::Failed);

        assert!(timeline.duration_of(JobId(3)).is_some());
        assert_eq!(timeline.events()[1].event_type, EventType::Failed);
    }

    #[test]
    fn test_running_job_has_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(JobId(1), "slow", EventType::Started);
        assert!(timeline.duration_of(JobId(1)).is_none());
        assert!(timeline.duration_of(JobId(9)).is_none());
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event(JobId(0), "align[sample=a]", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event(JobId(0), "align[sample=a]", EventType::Completed);
        timeline.add_event(JobId(1), "a_very_long_rule_label[x=1]", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event(JobId(1), "a_very_long_rule_label[x=1]", EventType::Completed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("align[sample=a]"));
        assert!(chart.contains("a_very_long_r..."));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}

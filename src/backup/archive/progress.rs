//! Progress reporting for long running operations.

use crate::backup::archive::measure::Measurement;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

/// Share of the bar driven by compressed bytes; the rest follows the file count.
static BYTES_WEIGHT: f64 = 90.0;
static FILES_WEIGHT: f64 = 10.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Always finite and within `[0, 100]`.
    pub percent: f64,
    pub message: String,
}

impl ProgressEvent {
    pub fn new<S: Into<String>>(percent: f64, message: S) -> Self {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            percent,
            message: message.into(),
        }
    }
}

/// Receives progress while an operation runs.
///
/// Called on the operation's own thread, so implementations must return quickly.
pub trait ProgressSink {
    fn report(&mut self, event: ProgressEvent);
}

impl<F: FnMut(ProgressEvent)> ProgressSink for F {
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Forwards events to another thread. Events are dropped once the receiver hangs up.
pub struct ChannelSink(pub Sender<ProgressEvent>);

impl ProgressSink for ChannelSink {
    fn report(&mut self, event: ProgressEvent) {
        if self.0.send(event).is_err() {
            tracing::trace!("Progress receiver dropped");
        }
    }
}

#[derive(Default, Debug)]
pub struct RecordingSink {
    pub events: Vec<ProgressEvent>,
}

impl ProgressSink for RecordingSink {
    fn report(&mut self, event: ProgressEvent) {
        self.events.push(event);
    }
}

/// Maps the inner sink's `[0, 100]` onto `[offset, offset + span]`.
pub struct ScaledSink<'a> {
    inner: &'a mut dyn ProgressSink,
    offset: f64,
    span: f64,
}

impl<'a> ScaledSink<'a> {
    pub fn new(inner: &'a mut dyn ProgressSink, offset: f64, span: f64) -> Self {
        Self {
            inner,
            offset,
            span,
        }
    }
}

impl ProgressSink for ScaledSink<'_> {
    fn report(&mut self, event: ProgressEvent) {
        let percent = self.offset + event.percent / 100.0 * self.span;
        self.inner.report(ProgressEvent::new(percent, event.message));
    }
}

/// Weighted blend of compressed bytes and archived files.
pub fn blend_percent(bytes_written: u64, files_written: u64, totals: &Measurement) -> f64 {
    let bytes_part = if totals.total_size > 0 {
        bytes_written as f64 / totals.total_size as f64 * BYTES_WEIGHT
    } else {
        0.0
    };
    let files_part = if totals.total_files > 0 {
        files_written as f64 / totals.total_files as f64 * FILES_WEIGHT
    } else {
        0.0
    };

    let percent = (bytes_part + files_part).min(100.0);
    if percent.is_finite() {
        percent.max(0.0)
    } else {
        0.0
    }
}

/// `None` when nothing has been written yet, which means the rate is unknown.
pub fn estimate_remaining(bytes_written: u64, total_size: u64, elapsed: Duration) -> Option<Duration> {
    let elapsed = elapsed.as_secs_f64();
    let throughput = if elapsed > 0.0 {
        bytes_written as f64 / elapsed
    } else {
        0.0
    };
    if !throughput.is_finite() || throughput <= 0.0 {
        return None;
    }

    let remaining = total_size.saturating_sub(bytes_written) as f64 / throughput;
    Duration::try_from_secs_f64(remaining).ok()
}

/// Turns raw counters into monotonic progress events.
pub struct ProgressTracker {
    totals: Measurement,
    started: Instant,
    last_percent: f64,
}

impl ProgressTracker {
    pub fn new(totals: Measurement) -> Self {
        Self {
            totals,
            started: Instant::now(),
            last_percent: 0.0,
        }
    }

    pub fn event(&mut self, bytes_written: u64, files_written: u64) -> ProgressEvent {
        let percent = blend_percent(bytes_written, files_written, &self.totals).max(self.last_percent);
        self.last_percent = percent;

        let eta = match estimate_remaining(bytes_written, self.totals.total_size, self.started.elapsed()) {
            Some(remaining) => format!("{} remaining", format_duration(remaining)),
            None => "remaining time unknown".to_string(),
        };
        ProgressEvent::new(
            percent,
            format!(
                "Compressing: {}/{} files ({} / {})... {}",
                files_written,
                self.totals.total_files,
                format_size(bytes_written),
                format_size(self.totals.total_size),
                eta
            ),
        )
    }
}

pub fn format_size(bytes: u64) -> String {
    static UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

fn plural(n: u64) -> &'static str {
    if n > 1 {
        "s"
    } else {
        ""
    }
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64().round() as u64;
    if seconds < 60 {
        format!("{} second{}", seconds, plural(seconds))
    } else if seconds < 3600 {
        let (m, s) = (seconds / 60, seconds % 60);
        format!("{} minute{} {} second{}", m, plural(m), s, plural(s))
    } else {
        let (h, m) = (seconds / 3600, (seconds % 3600) / 60);
        format!("{} hour{} {} minute{}", h, plural(h), m, plural(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(total_size: u64, total_files: u64) -> Measurement {
        Measurement {
            total_size,
            total_files,
        }
    }

    #[test]
    fn test_blend_percent_weights() {
        let t = totals(1000, 10);
        assert_eq!(blend_percent(0, 0, &t), 0.0);
        assert_eq!(blend_percent(500, 5, &t), 50.0);
        assert_eq!(blend_percent(1000, 10, &t), 100.0);
        assert_eq!(blend_percent(1000, 0, &t), 90.0);
        assert_eq!(blend_percent(0, 10, &t), 10.0);
    }

    #[test]
    fn test_blend_percent_is_clamped() {
        // zip headers can push the byte count past the measured size
        assert_eq!(blend_percent(5000, 10, &totals(1000, 10)), 100.0);
    }

    #[test]
    fn test_blend_percent_empty_totals() {
        let p = blend_percent(300, 4, &totals(0, 0));
        assert_eq!(p, 0.0);
        assert!(p.is_finite());
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(estimate_remaining(0, 100, Duration::from_secs(3)), None);
        assert_eq!(estimate_remaining(10, 100, Duration::ZERO), None);
        assert_eq!(
            estimate_remaining(50, 100, Duration::from_secs(5)),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            estimate_remaining(200, 100, Duration::from_secs(1)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_tracker_never_goes_backwards() {
        let mut tracker = ProgressTracker::new(totals(1000, 10));
        let a = tracker.event(600, 3);
        let b = tracker.event(400, 3);
        assert!(b.percent >= a.percent);
        assert!(b.message.contains("3/10 files"));
    }

    #[test]
    fn test_progress_event_sanitizes_percent() {
        assert_eq!(ProgressEvent::new(f64::NAN, "x").percent, 0.0);
        assert_eq!(ProgressEvent::new(f64::INFINITY, "x").percent, 0.0);
        assert_eq!(ProgressEvent::new(150.0, "x").percent, 100.0);
        assert_eq!(ProgressEvent::new(-3.0, "x").percent, 0.0);
    }

    #[test]
    fn test_scaled_sink() {
        let mut recording = RecordingSink::default();
        {
            let mut scaled = ScaledSink::new(&mut recording, 0.0, 90.0);
            scaled.report(ProgressEvent::new(50.0, "half"));
            scaled.report(ProgressEvent::new(100.0, "done"));
        }
        let percents: Vec<f64> = recording.events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![45.0, 90.0]);
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: ProgressEvent| seen.push(e.percent);
            let sink: &mut dyn ProgressSink = &mut sink;
            sink.report(ProgressEvent::new(12.5, "a"));
        }
        assert_eq!(seen, vec![12.5]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 * 1024), "3072.0 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(1)), "1 second");
        assert_eq!(format_duration(Duration::from_secs(42)), "42 seconds");
        assert_eq!(format_duration(Duration::from_secs(125)), "2 minutes 5 seconds");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1 hour 2 minutes");
    }
}

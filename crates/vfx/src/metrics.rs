use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;

const DEFAULT_WINDOW: usize = 120;

/// Steps of the frame round trip that are timed separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Plane copy plus YUV -> RGBA.
    Convert,
    /// Detection and effect calls.
    Engine,
    /// Handing frames back to the host.
    Deliver,
}

impl Stage {
    fn idx(self) -> usize {
        self as usize
    }
}

/// Point-in-time view of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageSummary {
    /// Frames timed since the metrics were created.
    pub frames: u64,
    /// Mean over the recent window.
    pub avg: Option<Duration>,
    /// Slowest frame in the recent window.
    pub max: Option<Duration>,
    pub last: Option<Duration>,
}

struct Recent {
    total: u64,
    window: VecDeque<Duration>,
}

struct Shared {
    capacity: usize,
    stages: [Mutex<Recent>; 3],
    rendered: AtomicU64,
    reports: AtomicU64,
}

/// Per-filter timings and outcome counters, shared between the filter and its processor.
///
/// # Example
/// ```rust
/// use vfx::prelude::{PipelineMetrics, Stage};
///
/// let metrics = PipelineMetrics::new(8);
/// metrics.time(Stage::Engine, || ());
/// assert_eq!(metrics.stage(Stage::Engine).frames, 1);
/// assert_eq!(metrics.rendered_frames(), 0);
/// ```
#[derive(Clone)]
pub struct PipelineMetrics {
    shared: Arc<Shared>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl PipelineMetrics {
    /// Keep the last `window` samples per stage; at least one.
    pub fn new(window: usize) -> Self {
        let capacity = window.max(1);
        let recent = || {
            Mutex::new(Recent {
                total: 0,
                window: VecDeque::with_capacity(capacity),
            })
        };
        Self {
            shared: Arc::new(Shared {
                capacity,
                stages: [recent(), recent(), recent()],
                rendered: AtomicU64::new(0),
                reports: AtomicU64::new(0),
            }),
        }
    }

    pub fn record(&self, stage: Stage, elapsed: Duration) {
        let mut recent = self.shared.stages[stage.idx()].lock();
        recent.total += 1;
        if recent.window.len() == self.shared.capacity {
            recent.window.pop_front();
        }
        recent.window.push_back(elapsed);
    }

    /// Run `f` and charge its wall time to `stage`.
    pub fn time<T>(&self, stage: Stage, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(stage, start.elapsed());
        out
    }

    pub fn stage(&self, stage: Stage) -> StageSummary {
        let recent = self.shared.stages[stage.idx()].lock();
        let n = recent.window.len() as u32;
        StageSummary {
            frames: recent.total,
            avg: (n > 0).then(|| recent.window.iter().sum::<Duration>() / n),
            max: recent.window.iter().max().copied(),
            last: recent.window.back().copied(),
        }
    }

    pub(crate) fn note_rendered(&self) {
        self.shared.rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_report(&self) {
        self.shared.reports.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames the AI effect rewrote.
    pub fn rendered_frames(&self) -> u64 {
        self.shared.rendered.load(Ordering::Relaxed)
    }

    /// Detection reports posted to the host.
    pub fn reports_posted(&self) -> u64 {
        self.shared.reports.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_recent_samples() {
        let metrics = PipelineMetrics::new(2);
        for ms in [9, 2, 4] {
            metrics.record(Stage::Convert, Duration::from_millis(ms));
        }
        let convert = metrics.stage(Stage::Convert);
        assert_eq!(convert.frames, 3);
        assert_eq!(convert.avg, Some(Duration::from_millis(3)));
        assert_eq!(convert.max, Some(Duration::from_millis(4)));
        assert_eq!(convert.last, Some(Duration::from_millis(4)));
        assert_eq!(metrics.stage(Stage::Deliver), StageSummary::default());
    }

    #[test]
    fn clones_share_counters() {
        let metrics = PipelineMetrics::new(0);
        let other = metrics.clone();
        assert_eq!(other.time(Stage::Engine, || 4), 4);
        other.note_rendered();
        other.note_report();
        assert_eq!(metrics.stage(Stage::Engine).frames, 1);
        assert_eq!(metrics.rendered_frames(), 1);
        assert_eq!(metrics.reports_posted(), 1);
    }
}

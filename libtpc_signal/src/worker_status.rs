/// Bar color hint for front ends displaying worker progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarColor {
    #[default]
    CYAN,
    GREEN,
    RED,
}

/// Progress message sent by a pipeline worker
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    /// Fraction of the worker's events processed
    pub progress: f32,
    pub events_processed: usize,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, events_processed: usize, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            events_processed,
            worker_id,
            color,
        }
    }
}

/// Where a chain is in its warm-up.
///
/// Passed to every adaptation hook, so that adaptive components never need
/// to track the draw count themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptPhase {
    /// 1-based index of the current draw.
    pub iteration: u64,
    pub adapt_count: u64,
    pub enabled: bool,
}

impl AdaptPhase {
    pub fn new(iteration: u64, adapt_count: u64, enabled: bool) -> Self {
        Self {
            iteration,
            adapt_count,
            enabled,
        }
    }

    pub fn is_tuning(&self) -> bool {
        self.enabled && self.iteration <= self.adapt_count
    }

    /// The draw that finishes warm-up.
    pub fn is_last_tuning_draw(&self) -> bool {
        self.enabled && self.iteration == self.adapt_count
    }

    pub fn next(self) -> Self {
        Self {
            iteration: self.iteration + 1,
            ..self
        }
    }
}

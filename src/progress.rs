/// Receives overall run progress (0..=100) with a short status message.
pub trait ProgressSink {
    fn report(&mut self, percent: u8, status: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(u8, &str),
{
    fn report(&mut self, percent: u8, status: &str) {
        self(percent, status)
    }
}

/// Discards every update.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: u8, _status: &str) {}
}

/// Slice of the overall 0..=100 scale reserved for one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    pub start: f32,
    pub end: f32,
}

impl ProgressRange {
    pub const fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    /// Maps `done / total` into the range. An empty stage maps to its end.
    pub fn map(&self, done: usize, total: usize) -> u8 {
        let fraction = if total == 0 {
            1.0
        } else {
            (done as f32 / total as f32).clamp(0.0, 1.0)
        };
        (self.start + (self.end - self.start) * fraction)
            .round()
            .clamp(0.0, 100.0) as u8
    }
}

/// Forwards updates while never letting the reported percentage go backwards.
pub(crate) struct Monotonic<'a> {
    inner: &'a mut dyn ProgressSink,
    last: u8,
}

impl<'a> Monotonic<'a> {
    pub(crate) fn new(inner: &'a mut dyn ProgressSink) -> Self {
        Self { inner, last: 0 }
    }

    pub(crate) fn last(&self) -> u8 {
        self.last
    }
}

impl ProgressSink for Monotonic<'_> {
    fn report(&mut self, percent: u8, status: &str) {
        let percent = percent.max(self.last).min(100);
        self.last = percent;
        self.inner.report(percent, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_fraction_into_range() {
        let range = ProgressRange::new(5.0, 50.0);
        assert_eq!(range.map(0, 4), 5);
        assert_eq!(range.map(2, 4), 28);
        assert_eq!(range.map(4, 4), 50);
        assert_eq!(range.map(0, 0), 50);
    }

    #[test]
    fn monotonic_never_decreases() {
        let mut seen = Vec::new();
        let mut sink = |percent: u8, _: &str| seen.push(percent);
        {
            let mut progress = Monotonic::new(&mut sink);
            progress.report(10, "a");
            progress.report(7, "b");
            progress.report(60, "c");
            assert_eq!(progress.last(), 60);
        }
        assert_eq!(seen, vec![10, 10, 60]);
    }
}

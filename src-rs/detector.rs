/// Compares each valid activity measure with the one before it.
///
/// The baseline starts at zero, so a busy screen on the first valid sample fires
/// once. Unavailable samples leave the baseline alone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeDetector {
    previous: u64,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> u64 {
        self.previous
    }

    /// Returns true when `measure` differs from the previous valid measure by more
    /// than `limit`. The baseline advances on every valid measure, fired or not.
    pub fn evaluate(&mut self, measure: Option<u64>, limit: u64) -> bool {
        let Some(measure) = measure else {
            return false;
        };
        let fired = measure.abs_diff(self.previous) > limit;
        self.previous = measure;
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(detector: &mut ChangeDetector, measures: &[Option<u64>], limit: u64) -> Vec<bool> {
        measures
            .iter()
            .map(|m| detector.evaluate(*m, limit))
            .collect()
    }

    #[test]
    fn scripted_sequence_fires_on_large_steps() {
        let mut detector = ChangeDetector::new();
        let measures = [10, 10, 15, 15, 2].map(Some);
        assert_eq!(
            feed(&mut detector, &measures, 3),
            vec![true, false, true, false, true]
        );
        assert_eq!(detector.previous(), 2);
    }

    #[test]
    fn first_busy_sample_fires_against_zero_baseline() {
        let mut detector = ChangeDetector::new();
        assert!(detector.evaluate(Some(10), 3));
    }

    #[test]
    fn small_steps_never_fire() {
        for limit in [0u64, 1, 3, 10] {
            for m1 in [1u64, 5, 40, 1000] {
                for delta in 0..=limit {
                    for m2 in [m1.saturating_sub(delta), m1 + delta] {
                        let mut detector = ChangeDetector { previous: m1 };
                        assert!(!detector.evaluate(Some(m2), limit), "{m1} -> {m2} limit {limit}");
                    }
                }
            }
        }
    }

    #[test]
    fn large_step_fires_exactly_once() {
        let mut detector = ChangeDetector::new();
        detector.evaluate(Some(100), 3);
        assert_eq!(feed(&mut detector, &[Some(104), Some(104)], 3), vec![true, false]);

        let mut detector = ChangeDetector::new();
        detector.evaluate(Some(100), 3);
        assert_eq!(feed(&mut detector, &[Some(96), Some(96)], 3), vec![true, false]);
    }

    #[test]
    fn baseline_advances_without_firing() {
        let mut detector = ChangeDetector::new();
        detector.evaluate(Some(50), 3);
        assert!(!detector.evaluate(Some(52), 3));
        assert_eq!(detector.previous(), 52);
    }

    #[test]
    fn gradual_drift_under_limit_never_fires() {
        let mut detector = ChangeDetector::new();
        detector.evaluate(Some(100), 3);
        let drift: Vec<Option<u64>> = (1..=20).map(|step| Some(100 + step * 3)).collect();
        assert!(feed(&mut detector, &drift, 3).iter().all(|fired| !fired));
        assert_eq!(detector.previous(), 160);
    }

    #[test]
    fn unavailable_leaves_baseline_untouched() {
        let mut detector = ChangeDetector::new();
        detector.evaluate(Some(42), 3);
        assert!(!detector.evaluate(None, 3));
        assert_eq!(detector.previous(), 42);
        assert!(!detector.evaluate(Some(43), 3));
    }
}

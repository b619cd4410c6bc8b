//! Odometer throttle for reports made from inside a service area.

/// What a location update means for the throttle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// Not inside any polygon, nothing to measure.
    Outside,
    /// Inside, below the threshold.
    Accumulating { displacement: f64 },
    /// Threshold reached. The baseline has moved to this reading.
    Reached { displacement: f64 },
    /// Odometer went backwards (provider reset); baseline moved to it.
    Rebased { previous: f64 },
}

/// Tracks the odometer reading at polygon entry and fires once per
/// `threshold` meters travelled since.
#[derive(Debug, Clone)]
pub struct DisplacementGate {
    baseline: Option<f64>,
    threshold: f64,
}

impl DisplacementGate {
    pub fn new(threshold: f64) -> Self {
        Self {
            baseline: None,
            threshold,
        }
    }

    /// Odometer reading at entry, or `None` outside every polygon.
    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn enter(&mut self, odometer: f64) {
        self.baseline = Some(odometer);
    }

    pub fn exit(&mut self) {
        self.baseline = None;
    }

    pub fn observe(&mut self, odometer: f64) -> GateDecision {
        let Some(baseline) = self.baseline else {
            return GateDecision::Outside;
        };
        let displacement = odometer - baseline;
        if displacement < 0.0 {
            self.baseline = Some(odometer);
            return GateDecision::Rebased { previous: baseline };
        }
        if displacement >= self.threshold {
            self.baseline = Some(odometer);
            GateDecision::Reached { displacement }
        } else {
            GateDecision::Accumulating { displacement }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_at_threshold_and_rebases() {
        let mut gate = DisplacementGate::new(400.0);
        gate.enter(0.0);

        let fired: Vec<f64> = [0.0, 100.0, 250.0, 450.0, 460.0]
            .into_iter()
            .filter(|&odo| matches!(gate.observe(odo), GateDecision::Reached { .. }))
            .collect();

        assert_eq!(fired, vec![450.0]);
        assert_eq!(gate.baseline(), Some(450.0));
    }

    #[test]
    fn exact_threshold_counts() {
        let mut gate = DisplacementGate::new(400.0);
        gate.enter(1000.0);
        assert_eq!(
            gate.observe(1400.0),
            GateDecision::Reached { displacement: 400.0 }
        );
        assert_eq!(
            gate.observe(1799.0),
            GateDecision::Accumulating { displacement: 399.0 }
        );
    }

    #[test]
    fn outside_until_entered_and_after_exit() {
        let mut gate = DisplacementGate::new(400.0);
        assert_eq!(gate.observe(5000.0), GateDecision::Outside);
        gate.enter(5000.0);
        gate.exit();
        assert_eq!(gate.observe(9000.0), GateDecision::Outside);
        assert_eq!(gate.baseline(), None);
    }

    #[test]
    fn odometer_reset_rebases_without_firing() {
        let mut gate = DisplacementGate::new(400.0);
        gate.enter(3000.0);
        assert_eq!(gate.observe(10.0), GateDecision::Rebased { previous: 3000.0 });
        assert!(matches!(gate.observe(300.0), GateDecision::Accumulating { .. }));
        assert!(matches!(gate.observe(410.0), GateDecision::Reached { .. }));
    }
}

//! Automation curves and their evaluator.
//!
//! An `AutomationCurve` is an ordered breakpoint list over time; the
//! evaluator is a pure function so it can be called from both the
//! scheduling loop and any UI preview without synchronization.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Interpolation from a point toward the next one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Interp {
    /// Hold this value until the next point.
    Step,
    /// Straight line to the next point.
    Linear,
    /// Smoothstep (`3t^2 - 2t^3`) toward the next point.
    /// `tension` in [0,1] blends back toward linear: 0 = full
    /// smoothstep, 1 = linear.
    Smooth { tension: f32 },
}

/// A breakpoint on an automation curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Absolute time in seconds.
    pub time: f64,
    /// Value at this point.
    pub value: f32,
    /// How to reach the next point.
    pub kind: Interp,
}

impl CurvePoint {
    /// Create a new breakpoint.
    pub fn new(time: f64, value: f32, kind: Interp) -> Self {
        Self { time, value, kind }
    }
}

/// An ordered sequence of breakpoints, sorted ascending by time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationCurve {
    points: Vec<CurvePoint>,
}

impl AutomationCurve {
    /// Create an empty curve.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Build a curve from a slice of points (sorted on insertion).
    pub fn from_points(pts: &[CurvePoint]) -> Self {
        let mut curve = Self::new();
        for p in pts {
            curve.insert(*p);
        }
        curve
    }

    /// Insert a point, keeping the list sorted by time.
    /// Equal-time points keep insertion order.
    pub fn insert(&mut self, point: CurvePoint) {
        let pos = self.points.partition_point(|p| p.time <= point.time);
        self.points.insert(pos, point);
    }

    /// Remove the point at `index`, if it exists.
    pub fn remove(&mut self, index: usize) -> Option<CurvePoint> {
        if index < self.points.len() {
            Some(self.points.remove(index))
        } else {
            None
        }
    }

    /// Read-only view of the breakpoints.
    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Number of breakpoints.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the curve has no breakpoints.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Evaluate a curve at `time` seconds.
///
/// Binary-searches for the bracketing pair. Before the first point the
/// first point's value is returned, after the last the last value —
/// clamped, never extrapolated. Zero points evaluates to 0.0.
pub fn evaluate(curve: &AutomationCurve, time: f64) -> f32 {
    let pts = &curve.points;
    if pts.is_empty() {
        return 0.0;
    }

    // Index of the first point strictly after `time`.
    let idx = pts.partition_point(|p| p.time <= time);
    if idx == 0 {
        return pts[0].value;
    }
    let left = &pts[idx - 1];
    if idx == pts.len() {
        return left.value;
    }
    let right = &pts[idx];

    let span = right.time - left.time;
    if span <= 0.0 {
        // Coincident points: the later one wins.
        return left.value;
    }
    let t = ((time - left.time) / span) as f32;

    let factor = match left.kind {
        Interp::Step => 0.0,
        Interp::Linear => t,
        Interp::Smooth { tension } => {
            let tension = tension.clamp(0.0, 1.0);
            let smooth = t * t * (3.0 - 2.0 * t);
            smooth * (1.0 - tension) + t * tension
        }
    };
    left.value + (right.value - left.value) * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(time: f64, value: f32) -> CurvePoint {
        CurvePoint::new(time, value, Interp::Linear)
    }

    #[test]
    fn empty_curve_evaluates_to_zero() {
        let curve = AutomationCurve::new();
        assert_eq!(evaluate(&curve, 0.0), 0.0);
        assert_eq!(evaluate(&curve, 123.0), 0.0);
    }

    #[test]
    fn single_point_holds_everywhere() {
        let curve = AutomationCurve::from_points(&[linear(1.0, 0.7)]);
        assert_eq!(evaluate(&curve, 0.0), 0.7);
        assert_eq!(evaluate(&curve, 1.0), 0.7);
        assert_eq!(evaluate(&curve, 100.0), 0.7);
    }

    #[test]
    fn clamps_before_first_and_after_last() {
        let curve = AutomationCurve::from_points(&[linear(1.0, 0.2), linear(2.0, 0.8)]);
        assert_eq!(evaluate(&curve, 0.0), 0.2);
        assert_eq!(evaluate(&curve, 5.0), 0.8);
    }

    #[test]
    fn linear_midpoint() {
        let curve = AutomationCurve::from_points(&[linear(0.0, 0.0), linear(2.0, 1.0)]);
        assert!((evaluate(&curve, 1.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn linear_exact_at_defined_points() {
        let curve = AutomationCurve::from_points(&[
            linear(0.0, 0.1),
            linear(0.5, 0.9),
            linear(2.0, 0.3),
        ]);
        for p in curve.points() {
            assert_eq!(evaluate(&curve, p.time), p.value);
        }
    }

    #[test]
    fn evaluation_is_idempotent() {
        let curve = AutomationCurve::from_points(&[
            CurvePoint::new(0.0, 0.0, Interp::Smooth { tension: 0.3 }),
            linear(1.0, 1.0),
        ]);
        let a = evaluate(&curve, 0.37);
        let b = evaluate(&curve, 0.37);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn step_holds_left_value() {
        let curve = AutomationCurve::from_points(&[
            CurvePoint::new(0.0, 0.25, Interp::Step),
            linear(1.0, 0.75),
        ]);
        assert_eq!(evaluate(&curve, 0.5), 0.25);
        assert_eq!(evaluate(&curve, 0.999), 0.25);
        assert_eq!(evaluate(&curve, 1.0), 0.75);
    }

    #[test]
    fn smooth_midpoint_matches_smoothstep() {
        let curve = AutomationCurve::from_points(&[
            CurvePoint::new(0.0, 0.0, Interp::Smooth { tension: 0.0 }),
            linear(1.0, 1.0),
        ]);
        // smoothstep(0.5) = 0.5; smoothstep(0.25) = 0.15625
        assert!((evaluate(&curve, 0.5) - 0.5).abs() < 1e-6);
        assert!((evaluate(&curve, 0.25) - 0.15625).abs() < 1e-6);
    }

    #[test]
    fn smooth_full_tension_is_linear() {
        let curve = AutomationCurve::from_points(&[
            CurvePoint::new(0.0, 0.0, Interp::Smooth { tension: 1.0 }),
            linear(1.0, 1.0),
        ]);
        assert!((evaluate(&curve, 0.25) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn insert_keeps_points_sorted() {
        let mut curve = AutomationCurve::new();
        curve.insert(linear(2.0, 0.2));
        curve.insert(linear(0.5, 0.5));
        curve.insert(linear(1.0, 0.1));
        let times: Vec<f64> = curve.points().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn remove_out_of_range_is_none() {
        let mut curve = AutomationCurve::from_points(&[linear(0.0, 0.0)]);
        assert!(curve.remove(5).is_none());
        assert_eq!(curve.len(), 1);
    }
}

/*
 * This file is part of Crossfan.
 *
 * Copyright (C) 2025 Crossfan contributors
 *
 * Crossfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Crossfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Crossfan. If not, see <https://www.gnu.org/licenses/>.
 */

//! Fixed 8-point fan curves as the firmware understands them.
//!
//! The on-wire layout is 16 bytes: the 8 temperature breakpoints (°C) followed
//! by the 8 duty percents. The breakpoint count is part of the firmware
//! contract, so curves are fixed-size arrays rather than growable lists.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CURVE_POINTS: usize = 8;
pub const CURVE_BYTES: usize = CURVE_POINTS * 2;

/// Temperature breakpoints used for synthesized flat curves.
pub const FLAT_CURVE_TEMPS: [u8; CURVE_POINTS] = [30, 40, 50, 60, 70, 80, 90, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fan {
    Cpu,
    Gpu,
}

impl Fan {
    pub const ALL: [Fan; 2] = [Fan::Cpu, Fan::Gpu];

    pub fn index(self) -> usize {
        match self {
            Fan::Cpu => 0,
            Fan::Gpu => 1,
        }
    }

    /// The fan cooling the other component.
    pub fn other(self) -> Fan {
        match self {
            Fan::Cpu => Fan::Gpu,
            Fan::Gpu => Fan::Cpu,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Fan::Cpu => "cpu",
            Fan::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Fan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fan::Cpu => write!(f, "CPU"),
            Fan::Gpu => write!(f, "GPU"),
        }
    }
}

/// Firmware performance mode, selects which default curve applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    #[default]
    Balanced,
    Turbo,
    Silent,
}

impl PerformanceMode {
    pub fn from_index(idx: i64) -> Option<Self> {
        match idx {
            0 => Some(PerformanceMode::Balanced),
            1 => Some(PerformanceMode::Turbo),
            2 => Some(PerformanceMode::Silent),
            _ => None,
        }
    }

    pub fn index(self) -> i64 {
        match self {
            PerformanceMode::Balanced => 0,
            PerformanceMode::Turbo => 1,
            PerformanceMode::Silent => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub temp_c: u8,
    pub pwm_pct: u8,
}

/// A structurally valid 8-point curve.
///
/// Construction goes through [`FanCurve::new`], [`FanCurve::from_bytes`] or
/// [`FanCurve::flat`], all of which reject or normalize invalid input, so a
/// `FanCurve` value is always safe to evaluate and to write to hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FanCurve {
    points: [CurvePoint; CURVE_POINTS],
}

impl FanCurve {
    pub fn new(points: [CurvePoint; CURVE_POINTS]) -> Result<Self, String> {
        validate_points(&points)?;
        Ok(Self { points })
    }

    pub fn from_table(temps: [u8; CURVE_POINTS], duties: [u8; CURVE_POINTS]) -> Result<Self, String> {
        Self::new(std::array::from_fn(|i| CurvePoint { temp_c: temps[i], pwm_pct: duties[i] }))
    }

    /// Decode the 16-byte firmware layout. Returns `None` for anything
    /// [`is_invalid_curve`] rejects.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        validate_curve_bytes(bytes).ok()?;
        Some(Self { points: decode_points(bytes) })
    }

    pub fn to_bytes(&self) -> [u8; CURVE_BYTES] {
        let mut out = [0u8; CURVE_BYTES];
        for (i, p) in self.points.iter().enumerate() {
            out[i] = p.temp_c;
            out[CURVE_POINTS + i] = p.pwm_pct;
        }
        out
    }

    /// Hold a fan at `percent` regardless of its own temperature.
    pub fn flat(percent: u8) -> Self {
        let pct = percent.min(100);
        Self {
            points: std::array::from_fn(|i| CurvePoint { temp_c: FLAT_CURVE_TEMPS[i], pwm_pct: pct }),
        }
    }

    /// Returns the held percent when every duty value is the same.
    pub fn flat_percent(&self) -> Option<u8> {
        let first = self.points[0].pwm_pct;
        self.points.iter().all(|p| p.pwm_pct == first).then_some(first)
    }

    pub fn points(&self) -> &[CurvePoint; CURVE_POINTS] {
        &self.points
    }

    /// Requested duty percent at `temp_c`.
    pub fn duty_at(&self, temp_c: f64) -> u8 {
        interp_pwm_percent(&self.points, temp_c)
    }
}

fn decode_points(bytes: &[u8]) -> [CurvePoint; CURVE_POINTS] {
    std::array::from_fn(|i| CurvePoint { temp_c: bytes[i], pwm_pct: bytes[CURVE_POINTS + i] })
}

fn validate_points(points: &[CurvePoint]) -> Result<(), String> {
    if points.len() != CURVE_POINTS {
        return Err(format!("curve must have exactly {} points", CURVE_POINTS));
    }
    if points.iter().all(|p| p.temp_c == 0 && p.pwm_pct == 0) {
        return Err("curve is empty".into());
    }
    if points.windows(2).any(|w| w[1].temp_c < w[0].temp_c) {
        return Err("curve temperatures must be non-decreasing".into());
    }
    if points.iter().any(|p| p.pwm_pct > 100) {
        return Err("duty percent out of range (0..100)".into());
    }
    Ok(())
}

/// Structural check of a raw 16-byte curve.
pub fn validate_curve_bytes(bytes: &[u8]) -> Result<(), String> {
    if bytes.len() != CURVE_BYTES {
        return Err(format!("curve must be {} bytes, got {}", CURVE_BYTES, bytes.len()));
    }
    validate_points(&decode_points(bytes))
}

/// True when a configured curve is absent or malformed and must be replaced
/// by a default before use.
pub fn is_invalid_curve(curve: Option<&[u8]>) -> bool {
    match curve {
        Some(bytes) => validate_curve_bytes(bytes).is_err(),
        None => true,
    }
}

/// Piecewise-linear duty lookup over ordered breakpoints.
///
/// - Below the first point: first duty
/// - Above the last point: last duty
/// - Between points: linear interpolation, rounded half to even and clamped to 0..=100
///
/// An empty slice yields 0.
pub fn interp_pwm_percent(points: &[CurvePoint], temp_c: f64) -> u8 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else { return 0 };
    if temp_c <= first.temp_c as f64 { return first.pwm_pct.min(100); }
    if temp_c >= last.temp_c as f64 { return last.pwm_pct.min(100); }
    for w in points.windows(2) {
        let a = &w[0];
        let b = &w[1];
        let (x0, x1) = (a.temp_c as f64, b.temp_c as f64);
        if temp_c >= x0 && temp_c <= x1 {
            let span = x1 - x0;
            // Zero-width segment behaves as a step
            if span <= 0.0 { return a.pwm_pct.min(100); }
            let t = (temp_c - x0) / span;
            let v = (a.pwm_pct as f64) + t * ((b.pwm_pct as f64) - (a.pwm_pct as f64));
            return v.round_ties_even().clamp(0.0, 100.0) as u8;
        }
    }
    last.pwm_pct.min(100)
}

/// Evaluate a raw 16-byte curve. Absent or wrong-length input yields 0%,
/// callers are expected to substitute a default curve before getting here.
pub fn evaluate_curve_bytes(curve: Option<&[u8]>, temp_c: f64) -> u8 {
    match curve {
        Some(bytes) if bytes.len() == CURVE_BYTES => interp_pwm_percent(&decode_points(bytes), temp_c),
        _ => 0,
    }
}

const DEFAULT_TEMPS: [u8; CURVE_POINTS] = [30, 40, 50, 60, 70, 80, 90, 100];

fn default_duties(fan: Fan, mode: PerformanceMode) -> [u8; CURVE_POINTS] {
    match (mode, fan) {
        (PerformanceMode::Balanced, Fan::Cpu) => [10, 15, 25, 35, 50, 65, 80, 90],
        (PerformanceMode::Balanced, Fan::Gpu) => [10, 15, 20, 30, 45, 60, 75, 85],
        (PerformanceMode::Turbo, Fan::Cpu) => [20, 30, 40, 55, 70, 85, 95, 100],
        (PerformanceMode::Turbo, Fan::Gpu) => [20, 25, 35, 50, 65, 80, 95, 100],
        (PerformanceMode::Silent, Fan::Cpu) => [0, 5, 10, 20, 30, 45, 60, 75],
        (PerformanceMode::Silent, Fan::Gpu) => [0, 5, 10, 15, 25, 40, 55, 70],
    }
}

/// Built-in platform curve for a fan in the given mode.
pub fn default_curve(fan: Fan, mode: PerformanceMode) -> FanCurve {
    let duties = default_duties(fan, mode);
    FanCurve {
        points: std::array::from_fn(|i| CurvePoint { temp_c: DEFAULT_TEMPS[i], pwm_pct: duties[i] }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes() -> Vec<u8> {
        vec![
            30, 40, 50, 60, 70, 80, 90, 100,
            20, 40, 45, 55, 70, 80, 90, 100,
        ]
    }

    #[test]
    fn test_interp_pwm_percent_empty_points() {
        assert_eq!(interp_pwm_percent(&[], 50.0), 0);
    }

    #[test]
    fn test_interp_pwm_percent_midpoint() {
        let points = [
            CurvePoint { temp_c: 30, pwm_pct: 20 },
            CurvePoint { temp_c: 40, pwm_pct: 40 },
        ];
        assert_eq!(interp_pwm_percent(&points, 35.0), 30);
    }

    #[test]
    fn test_interp_pwm_percent_below_and_above_range() {
        let curve = FanCurve::from_bytes(&sample_bytes()).unwrap();
        assert_eq!(curve.duty_at(10.0), 20);
        assert_eq!(curve.duty_at(30.0), 20);
        assert_eq!(curve.duty_at(100.0), 100);
        assert_eq!(curve.duty_at(130.0), 100);
    }

    #[test]
    fn test_interp_pwm_percent_rounds_to_nearest() {
        // 40 + 0.34 * 5 = 41.7 -> 42
        let curve = FanCurve::from_bytes(&sample_bytes()).unwrap();
        assert_eq!(curve.duty_at(43.4), 42);
        // 55 + 0.14 * 15 = 57.1 -> 57
        assert_eq!(curve.duty_at(61.4), 57);
    }

    #[test]
    fn test_interp_pwm_percent_ties_round_to_even() {
        let low = [
            CurvePoint { temp_c: 30, pwm_pct: 20 },
            CurvePoint { temp_c: 40, pwm_pct: 25 },
        ];
        // 22.5 -> 22
        assert_eq!(interp_pwm_percent(&low, 35.0), 22);
        let high = [
            CurvePoint { temp_c: 30, pwm_pct: 20 },
            CurvePoint { temp_c: 40, pwm_pct: 27 },
        ];
        // 23.5 -> 24
        assert_eq!(interp_pwm_percent(&high, 35.0), 24);
    }

    #[test]
    fn test_interp_pwm_percent_degenerate_segment() {
        let points = [
            CurvePoint { temp_c: 30, pwm_pct: 20 },
            CurvePoint { temp_c: 50, pwm_pct: 40 },
            CurvePoint { temp_c: 50, pwm_pct: 60 },
            CurvePoint { temp_c: 70, pwm_pct: 80 },
        ];
        assert_eq!(interp_pwm_percent(&points, 50.0), 40);
        assert_eq!(interp_pwm_percent(&points, 60.0), 70);
    }

    #[test]
    fn test_interp_pwm_percent_clamps_out_of_range_duties() {
        let points = [
            CurvePoint { temp_c: 30, pwm_pct: 150 },
            CurvePoint { temp_c: 40, pwm_pct: 200 },
        ];
        assert_eq!(interp_pwm_percent(&points, 20.0), 100);
        assert_eq!(interp_pwm_percent(&points, 35.0), 100);
    }

    #[test]
    fn test_evaluate_curve_bytes_invalid_input_is_zero() {
        assert_eq!(evaluate_curve_bytes(None, 60.0), 0);
        assert_eq!(evaluate_curve_bytes(Some(&[30, 40, 50][..]), 60.0), 0);
        assert_eq!(evaluate_curve_bytes(Some(sample_bytes().as_slice()), 60.0), 55);
    }

    #[test]
    fn test_is_invalid_curve() {
        assert!(is_invalid_curve(None));
        assert!(is_invalid_curve(Some(&[][..])));
        assert!(is_invalid_curve(Some(&[0u8; CURVE_BYTES][..])));
        assert!(is_invalid_curve(Some(&sample_bytes()[..15])));

        let mut decreasing = sample_bytes();
        decreasing.swap(2, 3);
        assert!(is_invalid_curve(Some(decreasing.as_slice())));

        let mut too_fast = sample_bytes();
        too_fast[CURVE_BYTES - 1] = 101;
        assert!(is_invalid_curve(Some(too_fast.as_slice())));

        assert!(!is_invalid_curve(Some(sample_bytes().as_slice())));
    }

    #[test]
    fn test_from_bytes_layout() {
        let curve = FanCurve::from_bytes(&sample_bytes()).unwrap();
        assert_eq!(curve.points()[0], CurvePoint { temp_c: 30, pwm_pct: 20 });
        assert_eq!(curve.points()[7], CurvePoint { temp_c: 100, pwm_pct: 100 });
        assert_eq!(curve.to_bytes().to_vec(), sample_bytes());
    }

    #[test]
    fn test_flat_curve() {
        let curve = FanCurve::flat(70);
        assert_eq!(curve.flat_percent(), Some(70));
        let temps: Vec<u8> = curve.points().iter().map(|p| p.temp_c).collect();
        assert_eq!(temps, FLAT_CURVE_TEMPS.to_vec());
        assert_eq!(curve.duty_at(20.0), 70);
        assert_eq!(curve.duty_at(65.0), 70);
        assert_eq!(curve.duty_at(120.0), 70);
    }

    #[test]
    fn test_flat_curve_clamps_percent() {
        assert_eq!(FanCurve::flat(250).flat_percent(), Some(100));
    }

    #[test]
    fn test_flat_curve_zero_is_still_valid() {
        // Temperatures are non-zero, so a 0% hold is not the empty curve
        let curve = FanCurve::flat(0);
        assert!(!is_invalid_curve(Some(&curve.to_bytes()[..])));
    }

    #[test]
    fn test_new_rejects_unsorted_points() {
        let result = FanCurve::from_table([30, 40, 50, 45, 70, 80, 90, 100], [10; CURVE_POINTS]);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_curves_are_valid() {
        for mode in [PerformanceMode::Balanced, PerformanceMode::Turbo, PerformanceMode::Silent] {
            for fan in Fan::ALL {
                let curve = default_curve(fan, mode);
                assert!(!is_invalid_curve(Some(&curve.to_bytes()[..])), "{fan} {mode:?}");
            }
        }
    }

    #[test]
    fn test_fan_identity() {
        assert_eq!(Fan::Cpu.other(), Fan::Gpu);
        assert_eq!(Fan::Gpu.other(), Fan::Cpu);
        assert_eq!(Fan::Cpu.index(), 0);
        assert_eq!(Fan::Gpu.index(), 1);
        assert_eq!(Fan::Gpu.to_string(), "GPU");
    }

    #[test]
    fn test_performance_mode_index() {
        assert_eq!(PerformanceMode::from_index(1), Some(PerformanceMode::Turbo));
        assert_eq!(PerformanceMode::from_index(7), None);
        assert_eq!(PerformanceMode::Silent.index(), 2);
        assert_eq!(PerformanceMode::default(), PerformanceMode::Balanced);
    }
}

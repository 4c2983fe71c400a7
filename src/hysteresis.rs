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

//! Thermal alarm latch with a dead zone below the threshold.
//!
//! The latch rises at `threshold` and only falls again once the temperature
//! has dropped to `threshold - hysteresis`. Anywhere in between it keeps its
//! previous value.

/// Next latch value for a reading.
pub fn next_high(prev_high: bool, temp_c: f64, threshold_c: i32, hysteresis_c: i32) -> bool {
    let rise = threshold_c as f64;
    let fall = threshold_c.saturating_sub(hysteresis_c.max(0)) as f64;
    if temp_c >= rise {
        true
    } else if temp_c <= fall {
        false
    } else {
        prev_high
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HysteresisLatch {
    high: bool,
}

impl HysteresisLatch {
    pub fn is_high(&self) -> bool {
        self.high
    }

    /// Feed a reading, returns true when the latch flipped.
    pub fn update(&mut self, temp_c: f64, threshold_c: i32, hysteresis_c: i32) -> bool {
        let was = self.high;
        self.high = next_high(was, temp_c, threshold_c, hysteresis_c);
        was != self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rises_at_threshold() {
        assert!(next_high(false, 75.0, 75, 5));
        assert!(next_high(false, 90.0, 75, 5));
        assert!(!next_high(false, 74.9, 75, 5));
    }

    #[test]
    fn test_falls_at_lower_edge() {
        assert!(!next_high(true, 70.0, 75, 5));
        assert!(!next_high(true, 40.0, 75, 5));
        assert!(next_high(true, 70.1, 75, 5));
    }

    #[test]
    fn test_dead_zone_keeps_previous() {
        for temp in [70.5, 72.0, 74.99] {
            assert!(next_high(true, temp, 75, 5));
            assert!(!next_high(false, temp, 75, 5));
        }
    }

    #[test]
    fn test_zero_hysteresis_is_plain_comparator() {
        assert!(next_high(false, 75.0, 75, 0));
        assert!(!next_high(true, 74.99, 75, 0));
    }

    #[test]
    fn test_negative_hysteresis_treated_as_zero() {
        assert!(!next_high(true, 74.0, 75, -5));
    }

    #[test]
    fn test_extreme_threshold_saturates() {
        assert!(next_high(true, 0.0, i32::MIN, 5));
        assert!(!next_high(false, -1.0e12, i32::MIN + 1, i32::MAX));
        assert!(next_high(false, 0.0, i32::MIN, i32::MAX));
    }

    #[test]
    fn test_rising_sequence_flips_once() {
        let mut latch = HysteresisLatch::default();
        let mut flips = Vec::new();
        for temp in [60.0, 68.0, 72.0, 74.0, 75.0, 78.0, 82.0] {
            if latch.update(temp, 75, 5) {
                flips.push(temp);
            }
        }
        assert_eq!(flips, vec![75.0]);
        assert!(latch.is_high());
    }

    #[test]
    fn test_falling_sequence_flips_once() {
        let mut latch = HysteresisLatch::default();
        latch.update(80.0, 75, 5);
        let mut flips = Vec::new();
        for temp in [78.0, 74.0, 72.0, 71.0, 70.0, 65.0, 50.0] {
            if latch.update(temp, 75, 5) {
                flips.push(temp);
            }
        }
        assert_eq!(flips, vec![70.0]);
        assert!(!latch.is_high());
    }

    #[test]
    fn test_dead_zone_stable_over_many_updates() {
        let mut latch = HysteresisLatch::default();
        latch.update(76.0, 75, 5);
        for _ in 0..100 {
            assert!(!latch.update(72.5, 75, 5));
        }
        assert!(latch.is_high());
    }
}

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

//! Cross-fan balancing.
//!
//! When exactly one of CPU and GPU is thermally stressed, the cooler
//! component's fan is held flat at the duty the hot component's curve asks
//! for. When both are hot or both are cool, every held fan goes back to its
//! own curve.
//!
//! The controller owns no hardware. It talks to the outside world through
//! [`TemperatureSource`], [`CurveProvider`] and [`FanCurveWriter`], and keeps
//! all of its memory in a [`ControllerState`] the caller passes in. Calls must
//! be serialized; there is no internal locking.

use std::fmt;

use serde::Serialize;
use serde_json::json;

use crate::config::CrossFanSettings;
use crate::curves::{is_invalid_curve, Fan, FanCurve, PerformanceMode};
use crate::hwmon::HwmonError;
use crate::hysteresis::HysteresisLatch;
use crate::logger;

pub trait TemperatureSource {
    fn cpu_temp(&mut self) -> Option<f64>;
    fn gpu_temp(&mut self) -> Option<f64>;
}

pub trait CurveProvider {
    /// Raw 16-byte curve from configuration, if any.
    fn configured_curve(&self, fan: Fan) -> Option<Vec<u8>>;
    fn default_curve(&self, fan: Fan, mode: PerformanceMode) -> FanCurve;
}

pub trait FanCurveWriter {
    fn set_fan_curve(&mut self, fan: Fan, curve: &FanCurve) -> Result<(), HwmonError>;
}

/// Everything the controller needs from the machine.
pub trait Platform: TemperatureSource + CurveProvider + FanCurveWriter {}

impl<T: TemperatureSource + CurveProvider + FanCurveWriter + ?Sized> Platform for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    NoOverride,
    /// GPU hot, CPU cool: the CPU fan follows the GPU curve.
    CpuOverridden,
    /// CPU hot, GPU cool: the GPU fan follows the CPU curve.
    GpuOverridden,
}

impl Regime {
    pub fn from_flags(cpu_high: bool, gpu_high: bool) -> Self {
        match (cpu_high, gpu_high) {
            (true, false) => Regime::GpuOverridden,
            (false, true) => Regime::CpuOverridden,
            _ => Regime::NoOverride,
        }
    }

    /// The fan held flat in this regime.
    pub fn overridden_fan(self) -> Option<Fan> {
        match self {
            Regime::NoOverride => None,
            Regime::CpuOverridden => Some(Fan::Cpu),
            Regime::GpuOverridden => Some(Fan::Gpu),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Regime::NoOverride => "no_override",
            Regime::CpuOverridden => "cpu_overridden",
            Regime::GpuOverridden => "gpu_overridden",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-lifetime controller memory. Starts cool with nothing overridden.
///
/// An override is stored as the last percent successfully written, so an
/// active override always carries a valid value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerState {
    cpu: HysteresisLatch,
    gpu: HysteresisLatch,
    overrides: [Option<u8>; 2],
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu_high(&self) -> bool {
        self.cpu.is_high()
    }

    pub fn gpu_high(&self) -> bool {
        self.gpu.is_high()
    }

    pub fn regime(&self) -> Regime {
        Regime::from_flags(self.cpu_high(), self.gpu_high())
    }

    /// Last percent written as an override, `None` when the fan is on its own curve.
    pub fn override_percent(&self, fan: Fan) -> Option<u8> {
        self.overrides[fan.index()]
    }

    pub fn is_overridden(&self, fan: Fan) -> bool {
        self.overrides[fan.index()].is_some()
    }

    pub fn any_override(&self) -> bool {
        self.overrides.iter().any(Option::is_some)
    }

    /// Take ownership of a flat curve already on the hardware, e.g. one left
    /// behind by an earlier process, so the next cycle can restore it.
    pub fn adopt_override(&mut self, fan: Fan, percent: u8) {
        self.overrides[fan.index()] = Some(percent.min(100));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FanAction {
    /// Flat curve written at `percent`.
    Overridden { fan: Fan, percent: u8 },
    /// Override already in place at `percent`, nothing written.
    Unchanged { fan: Fan, percent: u8 },
    /// Own curve written back, override cleared.
    Restored { fan: Fan },
    /// Hardware refused the write; state left as it was.
    WriteFailed { fan: Fan, restoring: bool, error: String },
}

impl FanAction {
    pub fn fan(&self) -> Fan {
        match self {
            FanAction::Overridden { fan, .. }
            | FanAction::Unchanged { fan, .. }
            | FanAction::Restored { fan }
            | FanAction::WriteFailed { fan, .. } => *fan,
        }
    }

    pub fn wrote_hardware(&self) -> bool {
        !matches!(self, FanAction::Unchanged { .. })
    }
}

/// What one evaluated invocation saw and did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cpu_temp_c: f64,
    pub gpu_temp_c: f64,
    pub cpu_high: bool,
    pub gpu_high: bool,
    pub cpu_request_pct: u8,
    pub gpu_request_pct: u8,
    pub regime: Regime,
    /// A hysteresis flag flipped during this call.
    pub state_changed: bool,
    pub actions: Vec<FanAction>,
}

impl CycleReport {
    pub fn failures(&self) -> impl Iterator<Item = &FanAction> {
        self.actions.iter().filter(|a| matches!(a, FanAction::WriteFailed { .. }))
    }

    pub fn hardware_writes(&self) -> usize {
        self.actions.iter().filter(|a| a.wrote_hardware()).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Feature off and not forced.
    Disabled,
    /// A temperature was missing or not finite; nothing changed.
    SensorUnavailable,
    Evaluated(CycleReport),
}

impl ApplyOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            ApplyOutcome::Evaluated(r) => Some(r),
            _ => None,
        }
    }
}

/// Dry-run view used by `status`: what `apply` would decide right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub cpu_temp_c: f64,
    pub gpu_temp_c: f64,
    pub cpu_high: bool,
    pub gpu_high: bool,
    pub cpu_request_pct: u8,
    pub gpu_request_pct: u8,
    pub regime: Regime,
    /// Fan that would be held flat, and at what percent.
    pub target: Option<(Fan, u8)>,
}

fn read_temps<P: TemperatureSource + ?Sized>(platform: &mut P) -> Option<(f64, f64)> {
    let cpu = platform.cpu_temp().filter(|t| t.is_finite());
    let gpu = platform.gpu_temp().filter(|t| t.is_finite());
    Some((cpu?, gpu?))
}

/// Configured curve when it is structurally valid, otherwise the platform default.
pub fn resolve_curve<P: CurveProvider + ?Sized>(platform: &P, fan: Fan, mode: PerformanceMode) -> FanCurve {
    let configured = platform.configured_curve(fan);
    if !is_invalid_curve(configured.as_deref()) {
        if let Some(curve) = configured.as_deref().and_then(FanCurve::from_bytes) {
            return curve;
        }
    }
    platform.default_curve(fan, mode)
}

fn requested_duties<P: CurveProvider + ?Sized>(platform: &P, mode: PerformanceMode, cpu_temp: f64, gpu_temp: f64) -> (u8, u8) {
    let cpu = resolve_curve(platform, Fan::Cpu, mode).duty_at(cpu_temp);
    let gpu = resolve_curve(platform, Fan::Gpu, mode).duty_at(gpu_temp);
    (cpu, gpu)
}

fn request_for(fan: Fan, cpu_request: u8, gpu_request: u8) -> u8 {
    match fan {
        Fan::Cpu => cpu_request,
        Fan::Gpu => gpu_request,
    }
}

fn override_fan<P: FanCurveWriter + ?Sized>(state: &mut ControllerState, platform: &mut P, fan: Fan, percent: u8) -> FanAction {
    if state.override_percent(fan) == Some(percent) {
        return FanAction::Unchanged { fan, percent };
    }
    match platform.set_fan_curve(fan, &FanCurve::flat(percent)) {
        Ok(()) => {
            state.overrides[fan.index()] = Some(percent);
            logger::log_event("cross_fan_override", json!({ "fan": fan.to_string(), "percent": percent }));
            FanAction::Overridden { fan, percent }
        }
        Err(e) => FanAction::WriteFailed { fan, restoring: false, error: e.to_string() },
    }
}

fn restore_fan<P: CurveProvider + FanCurveWriter + ?Sized>(
    state: &mut ControllerState,
    platform: &mut P,
    fan: Fan,
    mode: PerformanceMode,
) -> FanAction {
    let curve = resolve_curve(platform, fan, mode);
    match platform.set_fan_curve(fan, &curve) {
        Ok(()) => {
            state.overrides[fan.index()] = None;
            logger::log_event("cross_fan_restore", json!({ "fan": fan.to_string(), "curve": curve.to_bytes().to_vec() }));
            FanAction::Restored { fan }
        }
        Err(e) => FanAction::WriteFailed { fan, restoring: true, error: e.to_string() },
    }
}

/// Put every overridden fan back on its own curve.
///
/// Fans whose restore fails stay marked as overridden.
pub fn release_overrides<P: CurveProvider + FanCurveWriter + ?Sized>(
    state: &mut ControllerState,
    platform: &mut P,
    mode: PerformanceMode,
) -> Vec<FanAction> {
    let mut actions = Vec::with_capacity(2);
    for fan in Fan::ALL {
        if state.is_overridden(fan) {
            actions.push(restore_fan(state, platform, fan, mode));
        }
    }
    actions
}

/// One control cycle.
///
/// Never fails: sensor gaps skip the cycle, write failures are reported in
/// the returned [`CycleReport`] and retried on the next call. At most one
/// hardware write is issued per fan.
pub fn apply<P: Platform + ?Sized>(
    state: &mut ControllerState,
    settings: &CrossFanSettings,
    platform: &mut P,
    force: bool,
) -> ApplyOutcome {
    if !force && !settings.enabled {
        return ApplyOutcome::Disabled;
    }
    let Some((cpu_temp, gpu_temp)) = read_temps(platform) else {
        return ApplyOutcome::SensorUnavailable;
    };

    let cpu_flipped = state.cpu.update(cpu_temp, settings.threshold_c, settings.hysteresis_c);
    let gpu_flipped = state.gpu.update(gpu_temp, settings.threshold_c, settings.hysteresis_c);

    let (cpu_request, gpu_request) = requested_duties(platform, settings.mode, cpu_temp, gpu_temp);
    let regime = state.regime();

    let mut actions = Vec::with_capacity(2);
    match regime.overridden_fan() {
        Some(target) => {
            let hot = target.other();
            // Left over from the opposite regime
            if state.is_overridden(hot) {
                actions.push(restore_fan(state, platform, hot, settings.mode));
            }
            let percent = request_for(hot, cpu_request, gpu_request);
            actions.push(override_fan(state, platform, target, percent));
        }
        None => actions.extend(release_overrides(state, platform, settings.mode)),
    }

    let state_changed = cpu_flipped || gpu_flipped;
    if state_changed {
        logger::log_event(
            "cross_fan_state",
            json!({
                "cpu_high": state.cpu_high(),
                "gpu_high": state.gpu_high(),
                "threshold": settings.threshold_c,
                "hysteresis": settings.hysteresis_c,
                "cpu_temp": cpu_temp,
                "gpu_temp": gpu_temp,
            }),
        );
    }

    ApplyOutcome::Evaluated(CycleReport {
        cpu_temp_c: cpu_temp,
        gpu_temp_c: gpu_temp,
        cpu_high: state.cpu_high(),
        gpu_high: state.gpu_high(),
        cpu_request_pct: cpu_request,
        gpu_request_pct: gpu_request,
        regime,
        state_changed,
        actions,
    })
}

/// Evaluate without touching hardware or `state`.
pub fn preview<P: TemperatureSource + CurveProvider + ?Sized>(
    state: &ControllerState,
    settings: &CrossFanSettings,
    platform: &mut P,
) -> Option<Preview> {
    let (cpu_temp, gpu_temp) = read_temps(platform)?;
    let mut scratch = state.clone();
    scratch.cpu.update(cpu_temp, settings.threshold_c, settings.hysteresis_c);
    scratch.gpu.update(gpu_temp, settings.threshold_c, settings.hysteresis_c);
    let (cpu_request, gpu_request) = requested_duties(platform, settings.mode, cpu_temp, gpu_temp);
    let regime = scratch.regime();
    let target = regime
        .overridden_fan()
        .map(|fan| (fan, request_for(fan.other(), cpu_request, gpu_request)));

    Some(Preview {
        cpu_temp_c: cpu_temp,
        gpu_temp_c: gpu_temp,
        cpu_high: scratch.cpu_high(),
        gpu_high: scratch.gpu_high(),
        cpu_request_pct: cpu_request,
        gpu_request_pct: gpu_request,
        regime,
        target,
    })
}

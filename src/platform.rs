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

//! Linux sysfs binding of the controller collaborators.

use std::path::{Path, PathBuf};

use serde_json::json;

use crate::config::{ConfigStore, KEY_CPU_TEMP_SOURCE, KEY_GPU_TEMP_SOURCE};
use crate::controller::{ControllerState, CurveProvider, FanCurveWriter, TemperatureSource};
use crate::curves::{self, Fan, FanCurve, PerformanceMode};
use crate::ec::EcFanCurves;
use crate::hwmon::{self, HwmonError};
use crate::logger;

pub const CPU_TEMP_CANDIDATES: &[&str] = &["k10temp:Tctl", "coretemp:Package id 0", "zenpower:Tdie", "acpitz:temp1"];
pub const GPU_TEMP_CANDIDATES: &[&str] = &["amdgpu:edge", "nouveau:temp1"];

fn source_key(fan: Fan) -> &'static str {
    match fan {
        Fan::Cpu => KEY_CPU_TEMP_SOURCE,
        Fan::Gpu => KEY_GPU_TEMP_SOURCE,
    }
}

fn candidates(fan: Fan) -> &'static [&'static str] {
    match fan {
        Fan::Cpu => CPU_TEMP_CANDIDATES,
        Fan::Gpu => GPU_TEMP_CANDIDATES,
    }
}

pub struct SysfsPlatform {
    hwmon_root: PathBuf,
    store: ConfigStore,
    ec: EcFanCurves,
}

impl SysfsPlatform {
    pub fn new<P: Into<PathBuf>>(hwmon_root: P, store: ConfigStore, ec: EcFanCurves) -> Self {
        Self { hwmon_root: hwmon_root.into(), store, ec }
    }

    /// Bind to the fan curve device found under `hwmon_root`.
    pub fn discover(hwmon_root: &Path, store: ConfigStore) -> Result<Self, HwmonError> {
        let ec = EcFanCurves::discover(hwmon_root)?;
        Ok(Self::new(hwmon_root, store, ec))
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore {
        &mut self.store
    }

    pub fn ec(&self) -> &EcFanCurves {
        &self.ec
    }

    /// Fresh controller state that owns any flat curve already active on the
    /// device, so a crashed or one-shot run cannot leave a fan pinned.
    pub fn recover_state(&self) -> ControllerState {
        let mut state = ControllerState::new();
        for fan in Fan::ALL {
            if !self.ec.is_enabled(fan).unwrap_or(false) {
                continue;
            }
            if let Some(percent) = self.ec.read_curve(fan).ok().and_then(|c| c.flat_percent()) {
                state.adopt_override(fan, percent);
                logger::log_event("override_recovered", json!({ "fan": fan.to_string(), "percent": percent }));
            }
        }
        state
    }

    /// Temperature in °C for the component cooled by `fan`, with the selector it came from.
    ///
    /// A configured selector is authoritative: if it cannot be read there is
    /// no reading, rather than a silent switch to another sensor.
    pub fn read_component_temp(&self, fan: Fan) -> Option<(String, f64)> {
        match self.store.get_string(source_key(fan)) {
            Some(sel) => hwmon::read_temp(&self.hwmon_root, &sel).ok().map(|c| (sel, c)),
            None => hwmon::first_available_temp(&self.hwmon_root, candidates(fan)),
        }
    }
}

impl TemperatureSource for SysfsPlatform {
    fn cpu_temp(&mut self) -> Option<f64> {
        self.read_component_temp(Fan::Cpu).map(|(_, c)| c)
    }

    fn gpu_temp(&mut self) -> Option<f64> {
        self.read_component_temp(Fan::Gpu).map(|(_, c)| c)
    }
}

impl CurveProvider for SysfsPlatform {
    fn configured_curve(&self, fan: Fan) -> Option<Vec<u8>> {
        self.store.fan_curve(fan)
    }

    fn default_curve(&self, fan: Fan, mode: PerformanceMode) -> FanCurve {
        curves::default_curve(fan, mode)
    }
}

impl FanCurveWriter for SysfsPlatform {
    fn set_fan_curve(&mut self, fan: Fan, curve: &FanCurve) -> Result<(), HwmonError> {
        self.ec.write_curve(fan, curve)
    }
}

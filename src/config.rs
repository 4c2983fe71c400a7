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

use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::curves::{validate_curve_bytes, Fan, FanCurve, PerformanceMode};

pub const CONFIG_ENV: &str = "CROSSFAN_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/crossfan/config.json";

pub const KEY_CROSS_FAN: &str = "cross_fan";
pub const KEY_CROSS_TEMP: &str = "cross_temp";
pub const KEY_CROSS_HYST: &str = "cross_hyst";
pub const KEY_PERFORMANCE_MODE: &str = "performance_mode";
pub const KEY_INTERVAL_MS: &str = "cross_interval_ms";
pub const KEY_CPU_TEMP_SOURCE: &str = "cpu_temp_source";
pub const KEY_GPU_TEMP_SOURCE: &str = "gpu_temp_source";

pub const DEFAULT_THRESHOLD_C: i32 = 75;
pub const DEFAULT_HYSTERESIS_C: i32 = 5;
pub const DEFAULT_INTERVAL_MS: u64 = 2000;

/// Integer settings the CLI may change, with their accepted ranges.
pub const SETTING_RANGES: [(&str, i64, i64); 5] = [
    (KEY_CROSS_FAN, 0, 1),
    (KEY_CROSS_TEMP, 40, 110),
    (KEY_CROSS_HYST, 0, 20),
    (KEY_PERFORMANCE_MODE, 0, 2),
    (KEY_INTERVAL_MS, 250, 60_000),
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config root must be a JSON object")]
    NotAnObject,
    #[error("{key} = {value} is out of range ({min}..={max})")]
    OutOfRange { key: String, value: i64, min: i64, max: i64 },
    #[error("unknown setting: {0}")]
    UnknownKey(String),
    #[error("invalid fan curve: {0}")]
    InvalidCurve(String),
}

/// `$CROSSFAN_CONFIG` when set, else the system-wide file.
pub fn config_path() -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => PathBuf::from(SYSTEM_CONFIG_PATH),
    }
}

pub fn fan_curve_key(fan: Fan) -> &'static str {
    match fan {
        Fan::Cpu => "fan_profile_cpu",
        Fan::Gpu => "fan_profile_gpu",
    }
}

fn range_for(key: &str) -> Option<(i64, i64)> {
    SETTING_RANGES.iter().find(|(k, _, _)| *k == key).map(|(_, lo, hi)| (*lo, *hi))
}

/// Check a value for one of [`SETTING_RANGES`].
pub fn validate_setting(key: &str, value: i64) -> Result<(), ConfigError> {
    let (min, max) = range_for(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { key: key.to_string(), value, min, max });
    }
    Ok(())
}

/// Flat JSON key/value store.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStore {
    path: PathBuf,
    values: Map<String, Value>,
}

fn read_values(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };
    if data.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&data)? {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::NotAnObject),
    }
}

impl ConfigStore {
    /// Missing file is an empty store.
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = read_values(&path)?;
        Ok(Self { path, values })
    }

    pub fn empty<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), values: Map::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read from disk. On error the current values are kept.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        self.values = read_values(&self.path)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&Value::Object(self.values.clone()))?;
        fs::write(&self.path, json)?;
        let _ = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o644));
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(default),
            Some(Value::Bool(b)) => *b as i64,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// `true` for JSON true or any non-zero number.
    pub fn get_bool(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => matches!(s.trim(), "1" | "true" | "on"),
            _ => false,
        }
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.values.insert(key.to_string(), Value::from(value));
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.values.insert(key.to_string(), Value::from(value));
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), Value::from(value));
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Raw bytes of a stored curve. Elements that are not bytes make the whole
    /// curve absent.
    pub fn fan_curve(&self, fan: Fan) -> Option<Vec<u8>> {
        let arr = self.values.get(fan_curve_key(fan))?.as_array()?;
        arr.iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect()
    }

    pub fn set_fan_curve(&mut self, fan: Fan, curve: &FanCurve) {
        let bytes: Vec<Value> = curve.to_bytes().iter().map(|b| Value::from(*b)).collect();
        self.values.insert(fan_curve_key(fan).to_string(), Value::Array(bytes));
    }

    /// Validate and store a raw 16-byte curve (8 temperatures, then 8 duties).
    pub fn apply_fan_curve(&mut self, fan: Fan, bytes: &[u8]) -> Result<(), ConfigError> {
        validate_curve_bytes(bytes).map_err(ConfigError::InvalidCurve)?;
        let curve = FanCurve::from_bytes(bytes).ok_or_else(|| ConfigError::InvalidCurve("unreadable curve".into()))?;
        self.set_fan_curve(fan, &curve);
        Ok(())
    }

    /// Validate and store one of [`SETTING_RANGES`].
    pub fn apply_setting(&mut self, key: &str, value: i64) -> Result<(), ConfigError> {
        validate_setting(key, value)?;
        if key == KEY_CROSS_FAN {
            self.set_bool(key, value != 0);
        } else {
            self.set_int(key, value);
        }
        Ok(())
    }

    /// Service tick, clamped to the accepted range.
    pub fn interval(&self) -> Duration {
        let (lo, hi) = range_for(KEY_INTERVAL_MS).unwrap_or((250, 60_000));
        let ms = self.get_int(KEY_INTERVAL_MS, DEFAULT_INTERVAL_MS as i64).clamp(lo, hi);
        Duration::from_millis(ms as u64)
    }
}

/// Settings snapshot taken once per control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CrossFanSettings {
    pub enabled: bool,
    pub threshold_c: i32,
    pub hysteresis_c: i32,
    pub mode: PerformanceMode,
}

impl Default for CrossFanSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_c: DEFAULT_THRESHOLD_C,
            hysteresis_c: DEFAULT_HYSTERESIS_C,
            mode: PerformanceMode::default(),
        }
    }
}

fn clamped(store: &ConfigStore, key: &str, default: i64) -> i64 {
    let value = store.get_int(key, default);
    match range_for(key) {
        Some((lo, hi)) => value.clamp(lo, hi),
        None => value,
    }
}

impl CrossFanSettings {
    /// Out-of-range stored values are pulled into range; an unknown mode is balanced.
    pub fn from_store(store: &ConfigStore) -> Self {
        Self {
            enabled: store.get_bool(KEY_CROSS_FAN),
            threshold_c: clamped(store, KEY_CROSS_TEMP, DEFAULT_THRESHOLD_C as i64) as i32,
            hysteresis_c: clamped(store, KEY_CROSS_HYST, DEFAULT_HYSTERESIS_C as i64) as i32,
            mode: PerformanceMode::from_index(store.get_int(KEY_PERFORMANCE_MODE, 0)).unwrap_or_default(),
        }
    }
}

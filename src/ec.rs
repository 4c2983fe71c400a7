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

//! Embedded-controller fan curves via the asus-wmi `asus_custom_fan_curve`
//! hwmon device.
//!
//! Layout per fan N (1 = CPU, 2 = GPU):
//! `pwmN_auto_pointM_temp` in °C, `pwmN_auto_pointM_pwm` in 0..=255 for
//! M = 1..8, and `pwmN_enable` (1 = custom curve active).

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde_json::json;

use crate::curves::{Fan, FanCurve, CURVE_POINTS};
use crate::hwmon::{self, HwmonError};
use crate::logger;

pub const FAN_CURVE_DEVICE: &str = "asus_custom_fan_curve";

pub fn profiles_dir() -> PathBuf {
    PathBuf::from("/etc/crossfan/profiles")
}

pub fn percent_to_raw(percent: u8) -> u8 {
    ((percent.min(100) as u32 * 255 + 50) / 100) as u8
}

pub fn raw_to_percent(raw: u8) -> u8 {
    ((raw as u32 * 100 + 127) / 255) as u8
}

fn pwm_index(fan: Fan) -> usize {
    match fan {
        Fan::Cpu => 1,
        Fan::Gpu => 2,
    }
}

/// Handle on the firmware curve device.
#[derive(Debug, Clone)]
pub struct EcFanCurves {
    dir: PathBuf,
}

impl EcFanCurves {
    /// Locate the curve device under a hwmon root.
    pub fn discover(root: &Path) -> Result<Self, HwmonError> {
        hwmon::resolve_chip_dir(root, FAN_CURVE_DEVICE)
            .map(|dir| Self { dir })
            .ok_or_else(|| HwmonError::NotFound(format!("{} under {}", FAN_CURVE_DEVICE, root.display())))
    }

    pub fn at<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn point_path(&self, fan: Fan, point: usize, kind: &str) -> PathBuf {
        self.dir.join(format!("pwm{}_auto_point{}_{}", pwm_index(fan), point, kind))
    }

    fn enable_path(&self, fan: Fan) -> PathBuf {
        self.dir.join(format!("pwm{}_enable", pwm_index(fan)))
    }

    /// Program all 8 points and switch the fan to its custom curve.
    pub fn write_curve(&self, fan: Fan, curve: &FanCurve) -> Result<(), HwmonError> {
        for (i, p) in curve.points().iter().enumerate() {
            hwmon::write_attr(&self.point_path(fan, i + 1, "temp"), &p.temp_c.to_string())?;
            hwmon::write_attr(&self.point_path(fan, i + 1, "pwm"), &percent_to_raw(p.pwm_pct).to_string())?;
        }
        hwmon::write_attr(&self.enable_path(fan), "1")?;

        logger::log_event(
            "fan_curve_write",
            json!({
                "device": self.dir.display().to_string(),
                "fan": fan.to_string(),
                "curve": curve.to_bytes().to_vec(),
            }),
        );
        Ok(())
    }

    fn read_u8(path: &Path) -> Result<u8, HwmonError> {
        let raw = hwmon::read_trimmed(path)?;
        raw.parse::<u8>()
            .map_err(|_| HwmonError::Parse(format!("{}: {:?}", path.display(), raw)))
    }

    /// Read back the curve currently programmed for `fan`.
    pub fn read_curve(&self, fan: Fan) -> Result<FanCurve, HwmonError> {
        let mut temps = [0u8; CURVE_POINTS];
        let mut duties = [0u8; CURVE_POINTS];
        for i in 0..CURVE_POINTS {
            temps[i] = Self::read_u8(&self.point_path(fan, i + 1, "temp"))?;
            duties[i] = raw_to_percent(Self::read_u8(&self.point_path(fan, i + 1, "pwm"))?);
        }
        FanCurve::from_table(temps, duties).map_err(HwmonError::InvalidData)
    }

    /// Custom curve active. Missing attribute reads as disabled.
    pub fn is_enabled(&self, fan: Fan) -> Result<bool, HwmonError> {
        match hwmon::read_trimmed(self.enable_path(fan)) {
            Ok(v) => Ok(v == "1"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct FanCurveDump {
    enabled: bool,
    /// 16-byte firmware layout, absent if the read failed
    curve: Option<Vec<u8>>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CurveProfile {
    board: String,
    device: String,
    cpu: FanCurveDump,
    gpu: FanCurveDump,
}

fn dump_fan(ec: &EcFanCurves, fan: Fan) -> FanCurveDump {
    let enabled = ec.is_enabled(fan).unwrap_or(false);
    match ec.read_curve(fan) {
        Ok(c) => FanCurveDump { enabled, curve: Some(c.to_bytes().to_vec()), error: None },
        Err(e) => FanCurveDump { enabled, curve: None, error: Some(e.to_string()) },
    }
}

fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o755));
    }
    Ok(())
}

/// Write both active curves to `<dir>/<board>.json`.
pub fn dump_profile(ec: &EcFanCurves, board: &str, dir: &Path) -> anyhow::Result<PathBuf> {
    let profile = CurveProfile {
        board: board.to_string(),
        device: ec.dir().display().to_string(),
        cpu: dump_fan(ec, Fan::Cpu),
        gpu: dump_fan(ec, Fan::Gpu),
    };

    ensure_dir(dir).with_context(|| format!("create {}", dir.display()))?;
    let out_path = dir.join(format!("{}.json", sanitize_name(board)));
    let json = serde_json::to_string_pretty(&profile)?;
    fs::write(&out_path, json).with_context(|| format!("write {}", out_path.display()))?;
    let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(0o644));
    Ok(out_path)
}

fn sanitize_name(s: &str) -> String {
    let out: String = s
        .trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    if out.is_empty() { "board".into() } else { out }
}

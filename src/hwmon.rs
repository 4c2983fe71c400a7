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

//! sysfs hwmon access.
//!
//! Every lookup takes the hwmon root explicitly (normally [`HWMON_ROOT`]) so
//! the same code runs against a fake tree in tests.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const HWMON_ROOT: &str = "/sys/class/hwmon";

#[derive(Error, Debug)]
pub enum HwmonError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied - need root")]
    PermissionDenied,
}

/// A temperature input as found under the hwmon root.
#[derive(Debug, Clone, PartialEq)]
pub struct TempSensor {
    /// `name@hwmonX`
    pub chip: String,
    pub index: usize,
    pub label: String,
    pub celsius: Option<f64>,
}

impl TempSensor {
    pub fn selector(&self) -> String {
        format!("{}:{}", self.chip, self.label)
    }
}

pub(crate) fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    let mut s = String::new();
    fs::File::open(p)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

/// Write a sysfs attribute, mapping EACCES/EPERM to [`HwmonError::PermissionDenied`].
pub(crate) fn write_attr(path: &Path, value: &str) -> Result<(), HwmonError> {
    fs::write(path, value).map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied => HwmonError::PermissionDenied,
        _ => HwmonError::Io(e),
    })
}

pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<usize> {
    if fname.starts_with(prefix) && fname.ends_with(suffix) && fname.len() > prefix.len() + suffix.len() {
        let mid = &fname[prefix.len()..fname.len() - suffix.len()];
        mid.parse().ok()
    } else {
        None
    }
}

/// Split a `chip:label` selector. The chip part never contains ':'.
pub fn parse_selector(s: &str) -> Option<(&str, &str)> {
    let (chip, label) = s.split_once(':')?;
    let (chip, label) = (chip.trim(), label.trim());
    if chip.is_empty() || label.is_empty() {
        return None;
    }
    Some((chip, label))
}

/// Resolve the sysfs directory for `name` or `name@hwmonX`.
pub fn resolve_chip_dir(root: &Path, chip_selector: &str) -> Option<PathBuf> {
    let (want_name, tag_opt) = match chip_selector.split_once('@') {
        Some((n, tag)) => (n, Some(tag)),
        None => (chip_selector, None),
    };

    let mut entries: Vec<PathBuf> = fs::read_dir(root).ok()?.flatten().map(|e| e.path()).collect();
    // hwmon numbering is not stable across boots but ordering keeps lookups deterministic
    entries.sort();

    let mut fallback: Option<PathBuf> = None;
    for dir in entries {
        let file_tag = dir.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if let Some(tag) = tag_opt {
            if file_tag == tag {
                return Some(dir);
            }
        }
        if let Ok(name) = read_trimmed(dir.join("name")) {
            if name == want_name {
                if tag_opt.is_none() {
                    return Some(dir);
                }
                if fallback.is_none() {
                    fallback = Some(dir);
                }
            }
        }
    }
    fallback
}

/// Find `tempN` whose `tempN_label` equals `label`; falls back to a literal `tempN`.
pub fn find_temp_index(dir: &Path, label: &str) -> Option<usize> {
    if let Ok(dir_iter) = fs::read_dir(dir) {
        for file in dir_iter.flatten() {
            let fname = file.file_name();
            let fname = fname.to_string_lossy();
            if let Some(idx) = extract_index(&fname, "temp", "_label") {
                if read_trimmed(file.path()).map(|l| l == label).unwrap_or(false) {
                    return Some(idx);
                }
            }
        }
    }
    let idx = extract_index(label, "temp", "")?;
    dir.join(format!("temp{}_input", idx)).exists().then_some(idx)
}

fn read_millidegrees(path: &Path) -> Result<f64, HwmonError> {
    let raw = read_trimmed(path)?;
    let mc = raw
        .parse::<i64>()
        .map_err(|_| HwmonError::Parse(format!("{}: {:?}", path.display(), raw)))?;
    Ok(mc as f64 / 1000.0)
}

/// Read a temperature in °C from a `chip:label` selector.
pub fn read_temp(root: &Path, selector: &str) -> Result<f64, HwmonError> {
    let (chip, label) = parse_selector(selector)
        .ok_or_else(|| HwmonError::InvalidData(format!("selector '{}' is not chip:label", selector)))?;
    let dir = resolve_chip_dir(root, chip).ok_or_else(|| HwmonError::NotFound(format!("chip {}", chip)))?;
    let idx = find_temp_index(&dir, label)
        .ok_or_else(|| HwmonError::NotFound(format!("sensor {}", selector)))?;
    let celsius = read_millidegrees(&dir.join(format!("temp{}_input", idx)))?;
    if !celsius.is_finite() {
        return Err(HwmonError::InvalidData(format!("{} is not finite", selector)));
    }
    Ok(celsius)
}

/// First selector in `candidates` that yields a reading.
pub fn first_available_temp(root: &Path, candidates: &[&str]) -> Option<(String, f64)> {
    candidates
        .iter()
        .find_map(|sel| read_temp(root, sel).ok().map(|c| (sel.to_string(), c)))
}

/// Every temperature input under the root, sorted by chip then index.
pub fn list_temps(root: &Path) -> Vec<TempSensor> {
    let mut out = Vec::new();
    let Ok(entries) = fs::read_dir(root) else { return out };
    for ent in entries.flatten() {
        let dir = ent.path();
        let base = read_trimmed(dir.join("name")).unwrap_or_else(|_| "unknown".into());
        let tag = dir.file_name().and_then(|s| s.to_str()).unwrap_or("hwmon?").to_string();
        let chip = format!("{}@{}", base, tag);

        let Ok(dir_iter) = fs::read_dir(&dir) else { continue };
        for file in dir_iter.flatten() {
            let fname = file.file_name();
            let fname = fname.to_string_lossy();
            if let Some(index) = extract_index(&fname, "temp", "_input") {
                let label = read_trimmed(dir.join(format!("temp{}_label", index)))
                    .unwrap_or_else(|_| format!("temp{}", index));
                let celsius = read_millidegrees(&file.path()).ok().filter(|c| c.is_finite());
                out.push(TempSensor { chip: chip.clone(), index, label, celsius });
            }
        }
    }
    out.sort_by(|a, b| a.chip.cmp(&b.chip).then(a.index.cmp(&b.index)));
    out
}

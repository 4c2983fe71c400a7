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

use std::fs;
use std::path::Path;
use std::process::Command;

pub const DMI_ROOT: &str = "/sys/devices/virtual/dmi/id";

fn read_dmi(dmi_root: &Path, field: &str) -> Option<String> {
    fs::read_to_string(dmi_root.join(field))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// "vendor board", falling back to the product name.
pub fn board_name_at(dmi_root: &Path) -> String {
    let vendor = read_dmi(dmi_root, "board_vendor");
    let name = read_dmi(dmi_root, "board_name");
    match (vendor, name) {
        (Some(v), Some(n)) => format!("{} {}", v, n),
        (Some(v), None) => v,
        (None, Some(n)) => n,
        (None, None) => read_dmi(dmi_root, "product_name").unwrap_or_else(|| "unknown".into()),
    }
}

pub fn read_board_name() -> String {
    board_name_at(Path::new(DMI_ROOT))
}

pub fn is_asus_board_at(dmi_root: &Path) -> bool {
    ["board_vendor", "sys_vendor"]
        .iter()
        .filter_map(|f| read_dmi(dmi_root, f))
        .any(|v| v.to_ascii_lowercase().contains("asus"))
}

/// Kernel modules needed for the curve device and the temperature sensors.
pub fn modules_for(cpuinfo: &str, asus: bool) -> Vec<&'static str> {
    let mut modules = Vec::new();
    if asus {
        modules.extend(["asus_wmi", "asus_nb_wmi"]);
    }
    if cpuinfo.contains("GenuineIntel") {
        modules.push("coretemp");
    } else if cpuinfo.contains("AuthenticAMD") {
        modules.push("k10temp");
    }
    modules
}

fn modprobe(module: &str) {
    let _ = Command::new("modprobe").args(["-q", module]).output();
}

/// Best-effort module loading. Errors are ignored, the service reports a
/// missing device on its own.
pub fn load_sensor_modules() {
    let cpuinfo = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
    for module in modules_for(&cpuinfo, is_asus_board_at(Path::new(DMI_ROOT))) {
        modprobe(module);
    }
}

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

//! Crossfan - cross-fan thermal balancing for dual-fan ASUS laptops
//!
//! When the CPU runs hot while the GPU is cool (or the other way round), the
//! cooler side's fan is held at the speed the hot side's curve asks for, so
//! the shared heat pipes get extra airflow. Fan curves are written through
//! the asus-wmi custom fan curve interface.

pub mod curves;
pub mod hysteresis;
pub mod controller;
pub mod config;
pub mod hwmon;
pub mod ec;
pub mod platform;
pub mod service;
pub mod system;
pub mod logger;

#[cfg(test)]
pub mod test_utils;

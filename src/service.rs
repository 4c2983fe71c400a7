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

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::{ConfigStore, CrossFanSettings};
use crate::controller::{self, ApplyOutcome, ControllerState, FanAction};
use crate::hwmon::HWMON_ROOT;
use crate::logger;
use crate::platform::SysfsPlatform;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub config_path: PathBuf,
    pub hwmon_root: PathBuf,
    /// Stop after this many ticks (None = until signalled).
    pub max_ticks: Option<u64>,
}

impl ServiceOptions {
    pub fn new<P: Into<PathBuf>>(config_path: P) -> Self {
        Self { config_path: config_path.into(), hwmon_root: PathBuf::from(HWMON_ROOT), max_ticks: None }
    }
}

fn log_failures(actions: &[FanAction]) {
    for a in actions {
        if let FanAction::WriteFailed { fan, restoring, error } = a {
            logger::log_event(
                "apply_error",
                json!({ "fan": fan.to_string(), "restoring": restoring, "error": error }),
            );
        }
    }
}

/// Scheduler state: the platform, the controller memory and the last settings seen.
pub struct CrossFanService {
    platform: SysfsPlatform,
    state: ControllerState,
    last: Option<CrossFanSettings>,
}

impl CrossFanService {
    /// Flat curves left active by an earlier run are adopted, see
    /// [`SysfsPlatform::recover_state`].
    pub fn new(platform: SysfsPlatform) -> Self {
        let state = platform.recover_state();
        Self { platform, state, last: None }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn platform(&self) -> &SysfsPlatform {
        &self.platform
    }

    pub fn interval(&self) -> Duration {
        self.platform.store().interval()
    }

    /// One scheduler tick: refresh settings, then run the controller.
    pub fn tick(&mut self) -> ApplyOutcome {
        if let Err(e) = self.platform.store_mut().reload() {
            logger::log_event(
                "config_reload_error",
                json!({ "path": self.platform.store().path().display().to_string(), "error": e.to_string() }),
            );
        }
        let settings = CrossFanSettings::from_store(self.platform.store());
        let previous = self.last.replace(settings);

        let changed = previous.map_or(false, |p| p != settings);
        if changed {
            logger::log_event("settings_changed", json!({ "from": previous, "to": settings }));
        }

        // Feature off: hand back any held fan (failed restores retry next tick)
        if !settings.enabled {
            let actions = controller::release_overrides(&mut self.state, &mut self.platform, settings.mode);
            log_failures(&actions);
            return ApplyOutcome::Disabled;
        }

        // Re-evaluate right away on start and on any settings change
        let force = settings.enabled && (previous.is_none() || changed);
        let outcome = controller::apply(&mut self.state, &settings, &mut self.platform, force);
        if let Some(report) = outcome.report() {
            log_failures(&report.actions);
        }
        outcome
    }

    /// Release every override. Called once on the way out.
    pub fn shutdown(&mut self) -> Vec<FanAction> {
        let mode = self.last.map(|s| s.mode).unwrap_or_default();
        let actions = controller::release_overrides(&mut self.state, &mut self.platform, mode);
        log_failures(&actions);
        actions
    }
}

fn sleep_until_next(interval: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Run the loop until `stop` is raised (or `max_ticks` is reached).
pub fn run_until(opts: &ServiceOptions, stop: &AtomicBool) -> Result<()> {
    let store = ConfigStore::load(&opts.config_path)
        .with_context(|| format!("load config {}", opts.config_path.display()))?;
    let platform = SysfsPlatform::discover(&opts.hwmon_root, store)
        .context("fan curve device not available (is asus-wmi loaded?)")?;

    let mut service = CrossFanService::new(platform);
    logger::log_event(
        "service_start",
        json!({
            "config": opts.config_path.display().to_string(),
            "device": service.platform().ec().dir().display().to_string(),
            "interval_ms": service.interval().as_millis() as u64,
        }),
    );

    let mut ticks: u64 = 0;
    while !stop.load(Ordering::SeqCst) {
        service.tick();
        ticks += 1;
        if opts.max_ticks.map_or(false, |max| ticks >= max) {
            break;
        }
        sleep_until_next(service.interval(), stop);
    }

    let released = service.shutdown();
    logger::log_event("service_stop", json!({ "ticks": ticks, "released": released }));
    Ok(())
}

pub fn run_service(opts: &ServiceOptions) -> Result<()> {
    eprintln!("crossfan: starting service mode");
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        eprintln!("crossfan: could not install signal handler: {}", e);
    }
    run_until(opts, &stop)
}

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

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use serde_json::json;

use crossfan::config::{self, ConfigStore, CrossFanSettings, KEY_CROSS_FAN, SETTING_RANGES};
use crossfan::controller::{self, ApplyOutcome, FanAction};
use crossfan::curves::Fan;
use crossfan::ec::{self, EcFanCurves, FAN_CURVE_DEVICE};
use crossfan::hwmon::{self, HWMON_ROOT};
use crossfan::logger;
use crossfan::platform::SysfsPlatform;
use crossfan::service::{self, ServiceOptions};
use crossfan::system;

const USAGE: &str = "\
usage: crossfan <command> [--config PATH] [--logging]

commands:
  --service           run the balancing loop until SIGINT/SIGTERM
  apply [--force]     run one control cycle and print what happened
  status              show settings, temperatures and the regime they imply
  set <key> <value>   store a setting (cross_fan, cross_temp, cross_hyst,
                      performance_mode, cross_interval_ms), or a curve
                      for fan_profile_cpu / fan_profile_gpu as 16
                      comma-separated bytes (8 temps, then 8 duties)
  --dump-ec           write the active fan curves to /etc/crossfan/profiles";

fn require_root() {
    if unsafe { libc::geteuid() } != 0 {
        eprintln!("Error: crossfan requires root privileges to write fan curves.");
        eprintln!("Please run with: sudo {}", std::env::args().next().unwrap_or_else(|| "crossfan".to_string()));
        std::process::exit(1);
    }
}

fn option_value(args: &[String], name: &str) -> Option<String> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).cloned()
}

/// Positional arguments, with flags and their values removed.
fn positionals(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut it = args.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--config" => {
                it.next();
            }
            s if s.starts_with("--") => {}
            s => out.push(s),
        }
    }
    out
}

fn parse_setting_value(key: &str, raw: &str) -> anyhow::Result<i64> {
    if key == KEY_CROSS_FAN {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "on" | "true" | "yes" => return Ok(1),
            "0" | "off" | "false" | "no" => return Ok(0),
            _ => {}
        }
    }
    raw.parse::<i64>().map_err(|_| anyhow!("'{}' is not a valid value for {}", raw, key))
}

fn print_actions(actions: &[FanAction]) {
    for a in actions {
        match a {
            FanAction::Overridden { fan, percent } => println!("  {} fan held at {}%", fan, percent),
            FanAction::Unchanged { fan, percent } => println!("  {} fan already held at {}%", fan, percent),
            FanAction::Restored { fan } => println!("  {} fan restored to its curve", fan),
            FanAction::WriteFailed { fan, restoring, error } => {
                let what = if *restoring { "restore" } else { "override" };
                println!("  {} fan {} failed: {}", fan, what, error);
            }
        }
    }
}

fn cmd_apply(config_path: &Path, force: bool) -> anyhow::Result<()> {
    let store = ConfigStore::load(config_path).with_context(|| format!("load {}", config_path.display()))?;
    let settings = CrossFanSettings::from_store(&store);
    let mut platform = SysfsPlatform::discover(Path::new(HWMON_ROOT), store)
        .context("fan curve device not available (is asus-wmi loaded?)")?;
    // Pick up a hold left by an earlier run so a cool reading can release it
    let mut state = platform.recover_state();

    match controller::apply(&mut state, &settings, &mut platform, force) {
        ApplyOutcome::Disabled => {
            println!("cross-fan is disabled (use --force to evaluate anyway)");
            let released = controller::release_overrides(&mut state, &mut platform, settings.mode);
            print_actions(&released);
        }
        ApplyOutcome::SensorUnavailable => println!("temperature unavailable, nothing done"),
        ApplyOutcome::Evaluated(report) => {
            println!(
                "CPU {:.1}°C -> {}%  GPU {:.1}°C -> {}%  regime: {}",
                report.cpu_temp_c, report.cpu_request_pct, report.gpu_temp_c, report.gpu_request_pct, report.regime
            );
            print_actions(&report.actions);
            logger::write_line(&format!("apply: regime {} with {} write(s)", report.regime, report.hardware_writes()));
            if report.failures().next().is_some() {
                bail!("one or more fan curve writes failed");
            }
        }
    }
    Ok(())
}

fn cmd_status(config_path: &Path) -> anyhow::Result<()> {
    let store = ConfigStore::load(config_path).with_context(|| format!("load {}", config_path.display()))?;
    let settings = CrossFanSettings::from_store(&store);
    let root = Path::new(HWMON_ROOT);

    println!("config: {}", config_path.display());
    println!(
        "cross_fan: {}  threshold: {}°C  hysteresis: {}°C  mode: {:?}",
        if settings.enabled { "on" } else { "off" },
        settings.threshold_c,
        settings.hysteresis_c,
        settings.mode
    );

    let device = EcFanCurves::discover(root);
    match &device {
        Ok(ec) => {
            println!("fan curve device: {}", ec.dir().display());
            for fan in Fan::ALL {
                let custom = ec.is_enabled(fan).unwrap_or(false);
                println!("  {} custom curve: {}", fan, if custom { "active" } else { "inactive" });
            }
        }
        Err(e) => println!("fan curve device: {}", e),
    }

    // Status never writes, an unresolved device only affects the header above
    let ec = device.unwrap_or_else(|_| EcFanCurves::at(root.join(FAN_CURVE_DEVICE)));
    let mut platform = SysfsPlatform::new(root, store, ec);
    for fan in Fan::ALL {
        match platform.read_component_temp(fan) {
            Some((sel, c)) => println!("{} temperature: {:.1}°C ({})", fan, c, sel),
            None => println!("{} temperature: unavailable", fan),
        }
    }

    match controller::preview(&platform.recover_state(), &settings, &mut platform) {
        Some(p) => {
            println!("requested: CPU {}%  GPU {}%", p.cpu_request_pct, p.gpu_request_pct);
            match p.target {
                Some((fan, pct)) => println!("regime: {} ({} fan would be held at {}%)", p.regime, fan, pct),
                None => println!("regime: {}", p.regime),
            }
        }
        None => {
            println!("regime: unknown (missing temperature)");
            let temps = hwmon::list_temps(root);
            if !temps.is_empty() {
                println!("available sensors (set cpu_temp_source / gpu_temp_source):");
                for t in temps {
                    println!("  {}", t.selector());
                }
            }
        }
    }
    Ok(())
}

fn parse_curve_bytes(raw: &str) -> anyhow::Result<Vec<u8>> {
    raw.split(',')
        .map(|t| t.trim().parse::<u8>().map_err(|_| anyhow!("'{}' is not a byte", t.trim())))
        .collect()
}

fn cmd_set(config_path: &Path, key: &str, raw: &str) -> anyhow::Result<()> {
    if let Some(fan) = Fan::ALL.into_iter().find(|f| config::fan_curve_key(*f) == key) {
        let bytes = parse_curve_bytes(raw)?;
        let mut store = ConfigStore::load(config_path).with_context(|| format!("load {}", config_path.display()))?;
        store.apply_fan_curve(fan, &bytes)?;
        store.save().with_context(|| format!("write {}", config_path.display()))?;
        println!("{} curve stored ({})", fan, config_path.display());
        return Ok(());
    }
    if !SETTING_RANGES.iter().any(|(k, _, _)| *k == key) {
        bail!("unknown setting '{}'", key);
    }
    let value = parse_setting_value(key, raw)?;
    let mut store = ConfigStore::load(config_path).with_context(|| format!("load {}", config_path.display()))?;
    store.apply_setting(key, value)?;
    store.save().with_context(|| format!("write {}", config_path.display()))?;
    println!("{} = {} ({})", key, value, config_path.display());
    Ok(())
}

fn cmd_dump_ec() -> anyhow::Result<()> {
    let ec = EcFanCurves::discover(Path::new(HWMON_ROOT)).context("fan curve device not available")?;
    let path = ec::dump_profile(&ec, &system::read_board_name(), &ec::profiles_dir())?;
    println!("Wrote fan curve profile to {}", path.display());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config_path = option_value(&args, "--config").map(PathBuf::from).unwrap_or_else(config::config_path);

    // Optional JSON event log (/var/log/crossfan/events.json)
    if args.iter().any(|a| a == "--logging") {
        logger::init_logging();
        logger::log_event("startup", json!({ "args": args }));
    }

    if args.iter().any(|a| a == "--service") {
        require_root();
        system::load_sensor_modules();
        return service::run_service(&ServiceOptions::new(config_path));
    }

    if args.iter().any(|a| a == "--dump-ec") {
        require_root();
        system::load_sensor_modules();
        return cmd_dump_ec();
    }

    let pos = positionals(&args);
    let result = match pos.as_slice() {
        ["apply"] => {
            require_root();
            cmd_apply(&config_path, args.iter().any(|a| a == "--force"))
        }
        ["status"] => cmd_status(&config_path),
        ["set", key, value] => cmd_set(&config_path, key, value),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    if let Err(err) = result {
        eprintln!("error: {:#}", err);
        logger::log_event("fatal_error", json!({ "error": err.to_string() }));
        std::process::exit(1);
    }
    Ok(())
}

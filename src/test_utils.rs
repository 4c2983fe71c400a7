/*
 * Test utilities and fakes for Crossfan
 *
 * A recording platform for controller tests and a throwaway hwmon tree for
 * anything that reads or writes sysfs.
 */

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::controller::{CurveProvider, FanCurveWriter, TemperatureSource};
use crate::curves::{self, Fan, FanCurve, PerformanceMode, FLAT_CURVE_TEMPS};
use crate::ec::{percent_to_raw, FAN_CURVE_DEVICE};
use crate::hwmon::HwmonError;

/// Curve over the standard 30..100°C breakpoints.
pub fn ramp_curve(duties: [u8; 8]) -> FanCurve {
    FanCurve::from_table(FLAT_CURVE_TEMPS, duties).unwrap()
}

/// In-memory platform that records every successful curve write.
pub struct FakePlatform {
    pub cpu_temp: Option<f64>,
    pub gpu_temp: Option<f64>,
    pub curves: [Option<Vec<u8>>; 2],
    pub fail_writes: [bool; 2],
    pub writes: Vec<(Fan, FanCurve)>,
    /// Last mode the default-curve provider was asked for.
    pub mode_seen: Cell<Option<PerformanceMode>>,
}

impl FakePlatform {
    pub fn new(cpu_temp: Option<f64>, gpu_temp: Option<f64>) -> Self {
        Self {
            cpu_temp,
            gpu_temp,
            curves: [None, None],
            fail_writes: [false, false],
            writes: Vec::new(),
            mode_seen: Cell::new(None),
        }
    }

    pub fn with_curve(mut self, fan: Fan, curve: FanCurve) -> Self {
        self.curves[fan.index()] = Some(curve.to_bytes().to_vec());
        self
    }

    pub fn writes_for(&self, fan: Fan) -> Vec<FanCurve> {
        self.writes.iter().filter(|(f, _)| *f == fan).map(|(_, c)| *c).collect()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

impl TemperatureSource for FakePlatform {
    fn cpu_temp(&mut self) -> Option<f64> {
        self.cpu_temp
    }

    fn gpu_temp(&mut self) -> Option<f64> {
        self.gpu_temp
    }
}

impl CurveProvider for FakePlatform {
    fn configured_curve(&self, fan: Fan) -> Option<Vec<u8>> {
        self.curves[fan.index()].clone()
    }

    fn default_curve(&self, fan: Fan, mode: PerformanceMode) -> FanCurve {
        self.mode_seen.set(Some(mode));
        curves::default_curve(fan, mode)
    }
}

impl FanCurveWriter for FakePlatform {
    fn set_fan_curve(&mut self, fan: Fan, curve: &FanCurve) -> Result<(), HwmonError> {
        if self.fail_writes[fan.index()] {
            return Err(HwmonError::PermissionDenied);
        }
        self.writes.push((fan, *curve));
        Ok(())
    }
}

/// Fake `/sys/class/hwmon` inside a temp dir, plus a config path next to it.
pub struct MockHwmon {
    dir: TempDir,
    root: PathBuf,
}

impl MockHwmon {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("sys/class/hwmon");
        fs::create_dir_all(&root).unwrap();
        Self { dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("etc/crossfan/config.json")
    }

    fn chip_dir(&self, tag: &str, name: &str) -> PathBuf {
        let chip = self.root.join(tag);
        fs::create_dir_all(&chip).unwrap();
        fs::write(chip.join("name"), format!("{}\n", name)).unwrap();
        chip
    }

    /// Labelled inputs, numbered temp1.. in order. Values in millidegrees.
    pub fn add_chip(&self, tag: &str, name: &str, temps: &[(&str, i64)]) -> PathBuf {
        let chip = self.chip_dir(tag, name);
        for (i, (label, mc)) in temps.iter().enumerate() {
            fs::write(chip.join(format!("temp{}_input", i + 1)), format!("{}\n", mc)).unwrap();
            fs::write(chip.join(format!("temp{}_label", i + 1)), format!("{}\n", label)).unwrap();
        }
        chip
    }

    pub fn add_unlabelled_chip(&self, tag: &str, name: &str, temps: &[i64]) -> PathBuf {
        let chip = self.chip_dir(tag, name);
        for (i, mc) in temps.iter().enumerate() {
            fs::write(chip.join(format!("temp{}_input", i + 1)), format!("{}\n", mc)).unwrap();
        }
        chip
    }

    pub fn set_temp(&self, tag: &str, index: usize, millidegrees: i64) {
        fs::write(self.root.join(tag).join(format!("temp{}_input", index)), millidegrees.to_string()).unwrap();
    }

    /// Curve device preloaded with the balanced defaults, both fans on firmware control.
    pub fn add_fan_curve_device(&self, tag: &str) -> PathBuf {
        let dev = self.chip_dir(tag, FAN_CURVE_DEVICE);
        for fan in Fan::ALL {
            let n = fan.index() + 1;
            let curve = curves::default_curve(fan, PerformanceMode::Balanced);
            for (i, p) in curve.points().iter().enumerate() {
                fs::write(dev.join(format!("pwm{}_auto_point{}_temp", n, i + 1)), p.temp_c.to_string()).unwrap();
                fs::write(dev.join(format!("pwm{}_auto_point{}_pwm", n, i + 1)), percent_to_raw(p.pwm_pct).to_string())
                    .unwrap();
            }
            fs::write(dev.join(format!("pwm{}_enable", n)), "2").unwrap();
        }
        dev
    }

    pub fn remove_fan_curve_device(&self, tag: &str) {
        fs::remove_dir_all(self.root.join(tag)).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::interp_pwm_percent;
    use crate::hwmon::read_temp;

    #[test]
    fn test_ramp_curve() {
        let curve = ramp_curve([20, 30, 40, 50, 60, 70, 80, 90]);
        assert_eq!(curve.duty_at(80.0), 70);
        assert_eq!(interp_pwm_percent(curve.points(), 65.0), 55);
    }

    #[test]
    fn test_fake_platform_records_writes() {
        let mut p = FakePlatform::new(Some(50.0), None);
        assert_eq!(p.cpu_temp(), Some(50.0));
        assert_eq!(p.gpu_temp(), None);

        p.set_fan_curve(Fan::Gpu, &FanCurve::flat(40)).unwrap();
        p.fail_writes[Fan::Cpu.index()] = true;
        assert!(p.set_fan_curve(Fan::Cpu, &FanCurve::flat(40)).is_err());
        assert_eq!(p.writes.len(), 1);
        assert_eq!(p.writes_for(Fan::Gpu), vec![FanCurve::flat(40)]);
    }

    #[test]
    fn test_mock_hwmon_layout() {
        let hw = MockHwmon::new();
        hw.add_chip("hwmon0", "k10temp", &[("Tctl", 45500)]);
        assert_eq!(read_temp(hw.root(), "k10temp:Tctl").unwrap(), 45.5);
        hw.set_temp("hwmon0", 1, 90000);
        assert_eq!(read_temp(hw.root(), "k10temp:Tctl").unwrap(), 90.0);

        let dev = hw.add_fan_curve_device("hwmon3");
        assert_eq!(fs::read_to_string(dev.join("name")).unwrap().trim(), FAN_CURVE_DEVICE);
        assert!(dev.join("pwm2_auto_point8_pwm").exists());
        hw.remove_fan_curve_device("hwmon3");
        assert!(!dev.exists());
    }
}

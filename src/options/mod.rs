pub mod kv_file;

use std::path::Path;
use kv_file::*;

const KEY_EXPOSURE: &str = "Exposure";
const KEY_GAIN: &str = "Gain";
const KEY_CAMERA_TYPE: &str = "Camera Type";
const KEY_TEST_MODE: &str = "Test mode";
const KEY_D_X: &str = "d_x";
const KEY_D_Y: &str = "d_y";
const KEY_PIX_SCALE: &str = "Pixel scale";
const KEY_CAMERA_COMMAND: &str = "Camera Command";

pub const EXPOSURE_RANGE: (f64, f64) = (0.1, 60.0);
pub const GAIN_RANGE: (i32, i32) = (0, 100);

/// Angular offset of finder boresight from telescope axis
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OffsetOptions {
    pub d_x: f64, // in degrees
    pub d_y: f64, // in degrees
}

impl OffsetOptions {
    /// `dx,dy` in arcminutes as shown on handpad
    pub fn display_str(&self) -> String {
        format!("{:.1},{:.1}", 60.0 * self.d_x, 60.0 * self.d_y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub exposure:       f64, // in seconds
    pub gain:           i32,
    pub camera_type:    String,
    pub test_mode:      bool,
    pub offset:         OffsetOptions,
    pub pix_scale:      f64, // in arcsec per pixel
    pub camera_command: String,

    /// Keys this version doesn't know, kept in file order
    pub unknown:        Vec<(String, String)>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            exposure:       1.0,
            gain:           20,
            camera_type:    "ASI".to_string(),
            test_mode:      false,
            offset:         OffsetOptions::default(),
            pix_scale:      15.0,
            camera_command: String::new(),
            unknown:        Vec::new(),
        }
    }
}

impl Options {
    /// Missing file gives defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut result = Self::default();
        if !path.is_file() {
            log::info!("No config {:?}, using defaults", path);
            return Ok(result);
        }
        let text = std::fs::read_to_string(path)?;
        for (key, value) in parse_kv_text(&text) {
            result.set_value(&key, &value);
        }
        log::debug!("Options loaded from {:?}: {:?}", path, result);
        Ok(result)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(path, write_kv_text(&self.to_pairs()))?;
        log::debug!("Options saved into {:?}", path);
        Ok(())
    }

    fn set_value(&mut self, key: &str, value: &str) {
        fn parse_or<T: std::str::FromStr + Copy>(key: &str, value: &str, default: T) -> T {
            match value.trim().parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    log::warn!("Wrong value `{}` of `{}` in config", value, key);
                    default
                }
            }
        }
        let defaults = Self::default();
        match key {
            KEY_EXPOSURE =>
                self.exposure = Some(parse_or(key, value, defaults.exposure))
                    .filter(|v| v.is_finite())
                    .unwrap_or(defaults.exposure)
                    .clamp(EXPOSURE_RANGE.0, EXPOSURE_RANGE.1),
            KEY_GAIN =>
                self.gain = Some(parse_or(key, value, defaults.gain as f64))
                    .filter(|v| v.is_finite())
                    .unwrap_or(defaults.gain as f64)
                    .clamp(GAIN_RANGE.0 as f64, GAIN_RANGE.1 as f64)
                    .round() as i32,
            KEY_CAMERA_TYPE =>
                self.camera_type = value.trim().to_string(),
            KEY_TEST_MODE =>
                self.test_mode = parse_or(key, value, 0.0) != 0.0,
            KEY_D_X =>
                self.offset.d_x = parse_or(key, value, 0.0),
            KEY_D_Y =>
                self.offset.d_y = parse_or(key, value, 0.0),
            KEY_PIX_SCALE =>
                self.pix_scale = parse_or(key, value, defaults.pix_scale),
            KEY_CAMERA_COMMAND =>
                self.camera_command = value.trim().to_string(),
            _ =>
                self.unknown.push((key.to_string(), value.to_string())),
        }
    }

    fn to_pairs(&self) -> Vec<(String, String)> {
        let mut result = vec![
            (KEY_EXPOSURE.to_string(),       self.exposure.to_string()),
            (KEY_GAIN.to_string(),           self.gain.to_string()),
            (KEY_CAMERA_TYPE.to_string(),    self.camera_type.clone()),
            (KEY_TEST_MODE.to_string(),      if self.test_mode { "1" } else { "0" }.to_string()),
            (KEY_D_X.to_string(),            self.offset.d_x.to_string()),
            (KEY_D_Y.to_string(),            self.offset.d_y.to_string()),
            (KEY_PIX_SCALE.to_string(),      self.pix_scale.to_string()),
            (KEY_CAMERA_COMMAND.to_string(), self.camera_command.clone()),
        ];
        result.extend(self.unknown.iter().cloned());
        result
    }

    /// Exposure in microseconds as camera expects
    pub fn exposure_us(&self) -> u64 {
        (self.exposure * 1_000_000.0).round() as u64
    }

    pub fn change_exposure(&mut self, delta: f64) {
        self.exposure = (self.exposure + delta).clamp(EXPOSURE_RANGE.0, EXPOSURE_RANGE.1);
    }

    pub fn change_gain(&mut self, delta: i32) {
        self.gain = self.gain.saturating_add(delta).clamp(GAIN_RANGE.0, GAIN_RANGE.1);
    }

    pub fn summary_lines(&self) -> (String, String) {
        (
            format!("Ex:{}  Gn:{}", self.exposure, self.gain),
            format!("Test mode:{}", if self.test_mode { 1 } else { 0 }),
        )
    }
}

#[test]
fn test_options_round_trip_keeps_unknown_keys() {
    let path = std::env::temp_dir().join(format!("efinder_options_{}.config", std::process::id()));
    std::fs::write(&path, "\
Exposure:0.5
Gain:25.0
Camera Type:QHY
Test mode:1
d_x:0.125
d_y:-0.25
Brightness:8
Camera Command:rpicam-still -o {output} --shutter {exposure_us}
").unwrap();

    let options = Options::load(&path).unwrap();
    assert_eq!(options.exposure, 0.5);
    assert_eq!(options.gain, 25);
    assert_eq!(options.camera_type, "QHY");
    assert!(options.test_mode);
    assert_eq!(options.offset, OffsetOptions { d_x: 0.125, d_y: -0.25 });
    assert_eq!(options.pix_scale, 15.0);
    assert_eq!(options.camera_command, "rpicam-still -o {output} --shutter {exposure_us}");
    assert_eq!(options.unknown, vec![("Brightness".to_string(), "8".to_string())]);

    options.save(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Brightness:8\n"));
    assert!(text.contains("d_y:-0.25\n"));
    let reloaded = Options::load(&path).unwrap();
    assert_eq!(reloaded, options);
    _ = std::fs::remove_file(&path);
}

#[test]
fn test_options_defaults() {
    let path = std::env::temp_dir().join("efinder_options_missing.config");
    _ = std::fs::remove_file(&path);
    assert_eq!(Options::load(&path).unwrap(), Options::default());

    let mut options = Options::default();
    options.set_value("Gain", "lots");
    assert_eq!(options.gain, 20);
    options.change_gain(-100);
    assert_eq!(options.gain, 0);
    options.change_exposure(-5.0);
    assert_eq!(options.exposure, EXPOSURE_RANGE.0);
    assert_eq!(options.exposure_us(), 100_000);
}

#[test]
fn test_options_out_of_range_values_are_clamped() {
    let mut options = Options::default();
    options.set_value("Gain", "3000000000");
    options.set_value("Exposure", "-5");
    assert_eq!(options.gain, GAIN_RANGE.1);
    assert_eq!(options.exposure, EXPOSURE_RANGE.0);
    assert_eq!(options.exposure_us(), 100_000);

    options.change_gain(100);
    assert_eq!(options.gain, GAIN_RANGE.1);

    options.set_value("Exposure", "1e9");
    assert_eq!(options.exposure, EXPOSURE_RANGE.1);
    options.set_value("Exposure", "NaN");
    assert_eq!(options.exposure, 1.0);
    options.set_value("Gain", "-7");
    assert_eq!(options.gain, GAIN_RANGE.0);

    options.gain = i32::MAX;
    options.change_gain(i32::MAX);
    assert_eq!(options.gain, GAIN_RANGE.1);
}

#[test]
fn test_offset_display_str() {
    let offset = OffsetOptions { d_x: 0.25, d_y: -0.1 };
    assert_eq!(offset.display_str(), "15.0,-6.0");
    assert_eq!(OffsetOptions::default().display_str(), "0.0,0.0");
}

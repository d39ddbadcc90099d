use crate::domain::models::InputModality;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "rc_link_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Wireless link parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: String,
    /// Only offer devices whose advertised name starts with this.
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    #[serde(default = "default_telemetry_period_ms")]
    pub telemetry_period_ms: u64,
    /// Send the two-field `angle;speed` form instead of the three-field one.
    #[serde(default = "default_false")]
    pub legacy_wire_format: bool,
    #[serde(default)]
    pub last_device_id: Option<String>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            characteristic_uuid: default_characteristic_uuid(),
            name_prefix: None,
            chunk_size: default_chunk_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
            telemetry_period_ms: default_telemetry_period_ms(),
            legacy_wire_format: false,
            last_device_id: None,
        }
    }
}

fn default_service_uuid() -> String {
    "0000ffe0-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_characteristic_uuid() -> String {
    "0000ffe1-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_chunk_size() -> usize {
    20
}
fn default_chunk_delay_ms() -> u64 {
    100
}
fn default_telemetry_period_ms() -> u64 {
    100
}

/// Tuning for the input adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSettings {
    #[serde(default = "default_modality")]
    pub default_modality: InputModality,
    #[serde(default = "default_button_step_deg")]
    pub button_step_deg: i32,
    /// Animation frame interval driving held buttons and gamepad polling.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_joystick_max_radius")]
    pub joystick_max_radius: f64,
    #[serde(default = "default_joystick_deadzone")]
    pub joystick_deadzone: i32,
    #[serde(default = "default_tilt_smoothing")]
    pub tilt_smoothing: f64,
    #[serde(default = "default_tilt_max_deg")]
    pub tilt_max_deg: f64,
    #[serde(default = "default_gamepad_deadzone")]
    pub gamepad_deadzone: f64,
    #[serde(default = "default_gamepad_max_rate")]
    pub gamepad_max_rate_deg_per_s: f64,
    #[serde(default = "default_trigger_epsilon")]
    pub trigger_epsilon: f64,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            default_modality: default_modality(),
            button_step_deg: default_button_step_deg(),
            frame_interval_ms: default_frame_interval_ms(),
            joystick_max_radius: default_joystick_max_radius(),
            joystick_deadzone: default_joystick_deadzone(),
            tilt_smoothing: default_tilt_smoothing(),
            tilt_max_deg: default_tilt_max_deg(),
            gamepad_deadzone: default_gamepad_deadzone(),
            gamepad_max_rate_deg_per_s: default_gamepad_max_rate(),
            trigger_epsilon: default_trigger_epsilon(),
        }
    }
}

fn default_modality() -> InputModality {
    InputModality::Buttons
}
fn default_button_step_deg() -> i32 {
    4
}
fn default_frame_interval_ms() -> u64 {
    16
}
fn default_joystick_max_radius() -> f64 {
    75.0
}
fn default_joystick_deadzone() -> i32 {
    5
}
fn default_tilt_smoothing() -> f64 {
    0.15
}
fn default_tilt_max_deg() -> f64 {
    45.0
}
fn default_gamepad_deadzone() -> f64 {
    0.1
}
fn default_gamepad_max_rate() -> f64 {
    300.0
}
fn default_trigger_epsilon() -> f64 {
    0.02
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub link: LinkSettings,
    #[serde(default)]
    pub input: InputSettings,
    #[serde(default)]
    pub log_settings: LogSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path: Some(settings_path),
        })
    }

    /// Settings that live only in memory; `save` is a no-op.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            settings,
            settings_path: None,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("RcLinkController");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.settings_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_device(&mut self, device_id: Option<String>) -> anyhow::Result<()> {
        if self.settings.link.last_device_id != device_id {
            self.settings.link.last_device_id = device_id;
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "link": { "chunk_size": 16 } }"#).unwrap();
        assert_eq!(settings.link.chunk_size, 16);
        assert_eq!(settings.link.chunk_delay_ms, 100);
        assert_eq!(settings.input.button_step_deg, 4);
        assert_eq!(settings.input.default_modality, InputModality::Buttons);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn in_memory_service_remembers_device_without_touching_disk() {
        let mut service = SettingsService::in_memory(Settings::default());
        service.remember_device(Some("sim-01".into())).unwrap();
        assert_eq!(service.get().link.last_device_id.as_deref(), Some("sim-01"));
    }
}

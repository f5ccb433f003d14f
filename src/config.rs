//! Config/persistence (4.10), grounded on the teacher's `config.rs` /
//! `telescope_control/config.rs` layering: a serde-serializable aggregate
//! loaded and saved through an injected store, rather than touching disk
//! directly from the guider core.

use crate::enums::{pier_side_string, PierSide};
use crate::errors::{GuiderError, GuiderErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// `/<mount-class>/calibration/*` scalars plus the metadata fields §6 lists
/// alongside them. `ra_steps`/`dec_steps` are kept in their on-disk string
/// form here (brace-delimited `{x y}` pairs separated by `, `) and parsed
/// on demand rather than eagerly, since nothing in the core reads them back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PersistedCalibration {
    pub x_angle: f64,
    pub y_angle: f64,
    pub x_rate: f64,
    pub y_rate: f64,
    pub declination: f64,
    #[serde(with = "pier_side_string")]
    pub pier_side: PierSide,
    pub rotator_angle: Option<f64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,

    #[serde(default)]
    pub focal_length: Option<f64>,
    #[serde(default)]
    pub image_scale: Option<f64>,
    #[serde(default)]
    pub ra_guide_rate: Option<f64>,
    #[serde(default)]
    pub dec_guide_rate: Option<f64>,
    #[serde(default)]
    pub ortho_error: Option<f64>,
    #[serde(default)]
    pub ra_step_count: Option<u32>,
    #[serde(default)]
    pub dec_step_count: Option<u32>,
    #[serde(default)]
    pub ra_steps: String,
    #[serde(default)]
    pub dec_steps: String,
}

impl From<&crate::calibration::Calibration> for PersistedCalibration {
    fn from(cal: &crate::calibration::Calibration) -> Self {
        Self {
            x_angle: cal.x_angle,
            y_angle: cal.y_angle,
            x_rate: cal.x_rate,
            y_rate: cal.y_rate,
            declination: cal.declination,
            pier_side: cal.pier_side,
            rotator_angle: cal.rotator_angle,
            timestamp: cal.timestamp,
            focal_length: None,
            image_scale: None,
            ra_guide_rate: None,
            dec_guide_rate: None,
            ortho_error: None,
            ra_step_count: None,
            dec_step_count: None,
            ra_steps: String::new(),
            dec_steps: String::new(),
        }
    }
}

impl PersistedCalibration {
    pub fn to_calibration(&self) -> crate::calibration::Calibration {
        crate::calibration::Calibration::new(
            self.x_angle,
            self.y_angle,
            self.x_rate,
            self.y_rate,
            self.declination,
            self.pier_side,
            self.rotator_angle,
            self.timestamp,
        )
    }
}

/// Encodes a sequence of axis-space step points as `{x y}, {x y}, ...`,
/// matching the on-disk `ra_steps`/`dec_steps` format in §6.
pub fn encode_steps(points: &[crate::geometry::AxisPoint]) -> String {
    points
        .iter()
        .map(|p| format!("{{{} {}}}", p.x, p.y))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parses the `{x y}, {x y}, ...` format back into points. Malformed pairs
/// are skipped rather than aborting the whole parse -- a single corrupted
/// entry shouldn't lose the rest of a session's calibration history.
pub fn decode_steps(s: &str) -> Vec<crate::geometry::AxisPoint> {
    s.split(',')
        .filter_map(|chunk| {
            let chunk = chunk.trim().trim_start_matches('{').trim_end_matches('}');
            let mut parts = chunk.split_whitespace();
            let x: f64 = parts.next()?.parse().ok()?;
            let y: f64 = parts.next()?.parse().ok()?;
            Some(crate::geometry::AxisPoint::new(x, y))
        })
        .collect()
}

/// `/<mount-class>/DecBacklashPulse`, `/DecBacklashCeiling`,
/// `/DecBackLashFixed`, `/BacklashCompEnabled`. The normalized spelling is
/// `dec_backlash_fixed`; the legacy `DecBackLashFixed` casing is accepted as
/// a serde alias on read but never produced on write (9's Open Questions).
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PersistedBacklash {
    pub dec_backlash_pulse: u32,
    pub dec_backlash_ceiling: u32,
    #[serde(alias = "DecBackLashFixed")]
    pub dec_backlash_fixed: bool,
    pub backlash_comp_enabled: bool,
}

impl Default for PersistedBacklash {
    fn default() -> Self {
        Self {
            dec_backlash_pulse: 0,
            dec_backlash_ceiling: 0,
            dec_backlash_fixed: false,
            backlash_comp_enabled: true,
        }
    }
}

impl From<&crate::backlash::BacklashCompensator> for PersistedBacklash {
    fn from(comp: &crate::backlash::BacklashCompensator) -> Self {
        Self {
            dec_backlash_pulse: comp.pulse_width_ms(),
            dec_backlash_ceiling: comp.ceiling_ms(),
            dec_backlash_fixed: comp.fixed_size(),
            backlash_comp_enabled: comp.active(),
        }
    }
}

impl PersistedBacklash {
    pub fn to_compensator(self) -> crate::backlash::BacklashCompensator {
        crate::backlash::BacklashCompensator::new(
            self.dec_backlash_pulse,
            self.dec_backlash_fixed,
            self.dec_backlash_ceiling,
            self.backlash_comp_enabled,
        )
    }
}

/// `/stepguider/*` keys.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StepGuiderConfig {
    pub bump_percentage: u32,
    pub bump_max_steps_per_cycle: f64,
    pub samples_to_average: u32,
    pub calibration_steps_per_iteration: u32,
    pub bump_on_dither: bool,
}

impl Default for StepGuiderConfig {
    fn default() -> Self {
        Self {
            bump_percentage: 80,
            bump_max_steps_per_cycle: 1.0,
            samples_to_average: crate::calibration::engine_ao::DEFAULT_SAMPLES_TO_AVERAGE,
            calibration_steps_per_iteration: 1,
            bump_on_dither: false,
        }
    }
}

/// Per-mount-class persisted state: calibration (absent until the first
/// successful run) plus backlash compensation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct MountClassConfig {
    pub calibration: Option<PersistedCalibration>,
    #[serde(default)]
    pub backlash: PersistedBacklash,
}

/// The full serde-serializable aggregate, mirroring the teacher's
/// `Config { com_settings, observation_location, telescope_details, ... }`
/// layering: one struct per concern, composed into a single top-level
/// record keyed by mount class for the per-profile sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct GuiderConfig {
    #[serde(default)]
    pub mounts: HashMap<String, MountClassConfig>,
    #[serde(default)]
    pub step_guider: StepGuiderConfig,
}

impl GuiderConfig {
    pub fn mount(&self, mount_class: &str) -> MountClassConfig {
        self.mounts.get(mount_class).cloned().unwrap_or_default()
    }

    pub fn set_mount(&mut self, mount_class: &str, config: MountClassConfig) {
        self.mounts.insert(mount_class.to_string(), config);
    }
}

/// Abstracts the backing store so the guider core never depends on a
/// concrete filesystem/confy dependency directly; tests use
/// `InMemoryConfigStore`, production code uses `ConfyConfigStore`.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<GuiderConfig>;
    fn store(&self, config: &GuiderConfig) -> Result<()>;
}

/// Confy-backed store (the teacher's choice of persistence crate), reading
/// and writing a named application config file.
pub struct ConfyConfigStore {
    app_name: &'static str,
    config_name: &'static str,
}

impl ConfyConfigStore {
    pub fn new(app_name: &'static str, config_name: &'static str) -> Self {
        Self {
            app_name,
            config_name,
        }
    }
}

impl ConfigStore for ConfyConfigStore {
    fn load(&self) -> Result<GuiderConfig> {
        confy::load(self.app_name, Some(self.config_name)).map_err(|e| {
            GuiderError::from_msg(
                GuiderErrorKind::TransportError,
                format!("failed to load config: {e}"),
            )
        })
    }

    fn store(&self, config: &GuiderConfig) -> Result<()> {
        confy::store(self.app_name, Some(self.config_name), config).map_err(|e| {
            GuiderError::from_msg(
                GuiderErrorKind::TransportError,
                format!("failed to store config: {e}"),
            )
        })
    }
}

/// In-memory fake store used by unit and integration tests in place of a
/// filesystem round-trip.
#[derive(Default)]
pub struct InMemoryConfigStore {
    inner: Mutex<GuiderConfig>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GuiderConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load(&self) -> Result<GuiderConfig> {
        Ok(self.inner.lock().unwrap().clone())
    }

    fn store(&self, config: &GuiderConfig) -> Result<()> {
        *self.inner.lock().unwrap() = config.clone();
        Ok(())
    }
}

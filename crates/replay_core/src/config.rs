//! # Engine Configuration
//!
//! Every tuning constant of the replay engine lives here, grouped by the
//! component that consumes it. Speed thresholds in particular are never
//! hard-coded: different sources disagree on where "running" ends and
//! "sprinting" begins, so they are plain configuration values.
//!
//! ```rust
//! use replay_core::config::EngineConfig;
//!
//! let config = EngineConfig::default();
//! let small = EngineConfig::low_memory();
//! assert!(small.window.size_frames < config.window.size_frames);
//! ```

use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};

use crate::coordinates::{kmh_to_mps, Pitch};
use crate::error::ConfigError;

/// Environment variable pointing at a JSON or YAML config file.
pub const CONFIG_PATH_ENV: &str = "REPLAY_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub pitch: PitchConfig,
    pub window: WindowConfig,
    pub interpolation: InterpolationConfig,
    pub metrics: MetricsConfig,
    pub spatial: SpatialConfig,
    pub events: EventConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    pub length_m: f64,
    pub width_m: f64,
    /// Tracking sample rate (SkillCorner broadcast data is 10 Hz).
    pub sample_rate_hz: f64,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self { length_m: 105.0, width_m: 68.0, sample_rate_hz: 10.0 }
    }
}

impl PitchConfig {
    pub fn pitch(&self) -> Pitch {
        Pitch { length_m: self.length_m, width_m: self.width_m }
    }
}

/// Windowed cache sizing, prefetch and loader retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Frames per resident window (300 = 30 s at 10 Hz).
    pub size_frames: usize,
    /// Frames kept behind the playhead in its direction of travel.
    pub margin_frames: usize,
    /// Fraction of a window after which the next one is prefetched.
    pub prefetch_trigger: f64,
    pub prefetch_workers: usize,
    /// Frames processed between cancellation checks while loading.
    pub load_chunk_frames: usize,
    pub max_retries: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Process-wide ceiling for resident frames across all sessions.
    pub memory_budget_bytes: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size_frames: 300,
            margin_frames: 30,
            prefetch_trigger: 0.9,
            prefetch_workers: 1,
            load_chunk_frames: 50,
            max_retries: 3,
            retry_initial_ms: 50,
            retry_max_ms: 1_000,
            memory_budget_bytes: 256 * 1024 * 1024,
        }
    }
}

impl WindowConfig {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Detection gaps longer than this are held, never spline-filled.
    pub gap_threshold_s: f64,
    /// How far back a held position may come from before reporting no data.
    pub max_hold_s: f64,
    /// Largest velocity jump across a knot still considered continuous.
    pub continuity_epsilon: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self { gap_threshold_s: 1.0, max_hold_s: 30.0, continuity_epsilon: 1e-6 }
    }
}

/// Kinematic thresholds, all in m/s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Walking below this speed (7 km/h).
    pub jog_from_mps: f64,
    /// 14 km/h
    pub run_from_mps: f64,
    /// 19 km/h; reported as a separate high-intensity total.
    pub high_intensity_from_mps: f64,
    /// 24 km/h
    pub sprint_from_mps: f64,
    /// Speeds above this are measurement noise outside gap recovery.
    pub max_plausible_speed_mps: f64,
    pub min_sprint_duration_s: f64,
    pub cache_budget_bytes: usize,
    pub heatmap_cols: usize,
    pub heatmap_rows: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            jog_from_mps: kmh_to_mps(7.0),
            run_from_mps: kmh_to_mps(14.0),
            high_intensity_from_mps: kmh_to_mps(19.0),
            sprint_from_mps: kmh_to_mps(24.0),
            max_plausible_speed_mps: 12.5,
            min_sprint_duration_s: 1.0,
            cache_budget_bytes: 64 * 1024 * 1024,
            heatmap_cols: 21,
            heatmap_rows: 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridResolution {
    pub cols: usize,
    pub rows: usize,
}

impl Default for GridResolution {
    fn default() -> Self {
        Self { cols: 32, rows: 21 }
    }
}

/// Reachability model used by pitch control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchControlConfig {
    /// Time a player keeps drifting with current velocity before reacting.
    pub reaction_time_s: f64,
    pub max_speed_mps: f64,
    pub max_accel_mps2: f64,
    /// Arrival-time difference giving ~73% control (logistic scale).
    pub control_sigma_s: f64,
    pub grid: GridResolution,
}

impl Default for PitchControlConfig {
    fn default() -> Self {
        Self {
            reaction_time_s: 0.7,
            max_speed_mps: 5.0,
            max_accel_mps2: 7.0,
            control_sigma_s: 0.45,
            grid: GridResolution::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormationConfig {
    /// A new label must hold this long before it is reported.
    pub min_duration_s: f64,
    /// How far back the hysteresis looks for a stable label.
    pub lookback_s: f64,
    /// Per-line cost penalty so extra lines must earn their keep.
    pub line_penalty_m: f64,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self { min_duration_s: 5.0, lookback_s: 60.0, line_penalty_m: 1.5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KnnBackend {
    #[default]
    Linear,
    Grid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub exclude_goalkeeper: bool,
    /// Known goalkeeper ids; when empty a positional heuristic is used.
    pub goalkeeper_ids: Vec<u32>,
    /// Voronoi cells are clipped to the pitch grown by this margin.
    pub voronoi_margin_m: f64,
    pub knn_backend: KnnBackend,
    pub snapshot_cache_frames: usize,
    pub pitch_control: PitchControlConfig,
    pub formation: FormationConfig,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            exclude_goalkeeper: true,
            goalkeeper_ids: Vec::new(),
            voronoi_margin_m: 5.0,
            knn_backend: KnnBackend::Linear,
            snapshot_cache_frames: 256,
            pitch_control: PitchControlConfig::default(),
            formation: FormationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub default_pre_s: f64,
    pub default_post_s: f64,
    pub related_window_s: f64,
    pub buildup_s: f64,
    pub reaction_s: f64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            default_pre_s: 15.0,
            default_post_s: 5.0,
            related_window_s: 30.0,
            buildup_s: 30.0,
            reaction_s: 15.0,
        }
    }
}

impl EngineConfig {
    /// Smaller windows and caches for machines replaying several matches.
    pub fn low_memory() -> Self {
        let mut cfg = Self::default();
        cfg.window.size_frames = 150;
        cfg.window.margin_frames = 15;
        cfg.window.memory_budget_bytes = 32 * 1024 * 1024;
        cfg.metrics.cache_budget_bytes = 8 * 1024 * 1024;
        cfg.spatial.snapshot_cache_frames = 64;
        cfg
    }

    /// Tiny windows and near-instant retries for tests.
    pub fn testing() -> Self {
        let mut cfg = Self::default();
        cfg.window.size_frames = 40;
        cfg.window.margin_frames = 4;
        cfg.window.load_chunk_frames = 8;
        cfg.window.retry_initial_ms = 1;
        cfg.window.retry_max_ms = 4;
        cfg.spatial.pitch_control.grid = GridResolution { cols: 12, rows: 8 };
        cfg
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    /// Load from `REPLAY_CONFIG_PATH`, or defaults when it is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let Ok(path) = env::var(CONFIG_PATH_ENV) else {
            return Ok(Self::default());
        };
        let path = path.trim();
        if path.is_empty() {
            return Ok(Self::default());
        }
        Self::from_path(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(self.pitch.sample_rate_hz.is_finite() && self.pitch.sample_rate_hz > 0.0) {
            return invalid(format!("pitch.sample_rate_hz must be > 0, got {}", self.pitch.sample_rate_hz));
        }
        if self.pitch.length_m <= 0.0 || self.pitch.width_m <= 0.0 {
            return invalid("pitch dimensions must be positive".to_string());
        }

        let w = &self.window;
        if w.size_frames == 0 {
            return invalid("window.size_frames must be > 0".to_string());
        }
        if w.margin_frames >= w.size_frames {
            return invalid(format!(
                "window.margin_frames ({}) must be smaller than window.size_frames ({})",
                w.margin_frames, w.size_frames
            ));
        }
        if !(w.prefetch_trigger > 0.0 && w.prefetch_trigger < 1.0) {
            return invalid(format!("window.prefetch_trigger must be in (0, 1), got {}", w.prefetch_trigger));
        }
        if w.load_chunk_frames == 0 {
            return invalid("window.load_chunk_frames must be > 0".to_string());
        }

        let m = &self.metrics;
        let ascending = [m.jog_from_mps, m.run_from_mps, m.sprint_from_mps, m.max_plausible_speed_mps];
        if ascending.windows(2).any(|pair| pair[0] >= pair[1]) || m.jog_from_mps <= 0.0 {
            return invalid(format!(
                "metrics thresholds must ascend: jog {} < run {} < sprint {} < max {}",
                m.jog_from_mps, m.run_from_mps, m.sprint_from_mps, m.max_plausible_speed_mps
            ));
        }
        if m.high_intensity_from_mps < m.run_from_mps || m.high_intensity_from_mps > m.sprint_from_mps {
            return invalid("metrics.high_intensity_from_mps must lie between run and sprint".to_string());
        }
        if m.heatmap_cols == 0 || m.heatmap_rows == 0 {
            return invalid("metrics heatmap grid must be non-empty".to_string());
        }

        let ip = &self.interpolation;
        if !(ip.gap_threshold_s.is_finite() && ip.gap_threshold_s > 0.0) {
            return invalid("interpolation.gap_threshold_s must be > 0".to_string());
        }
        if ip.max_hold_s.is_nan() || ip.max_hold_s < ip.gap_threshold_s {
            return invalid(format!(
                "interpolation.max_hold_s ({}) must be at least gap_threshold_s ({})",
                ip.max_hold_s, ip.gap_threshold_s
            ));
        }

        let f = &self.spatial.formation;
        let e = &self.events;
        let durations = [
            ("metrics.min_sprint_duration_s", m.min_sprint_duration_s),
            ("spatial.pitch_control.reaction_time_s", self.spatial.pitch_control.reaction_time_s),
            ("spatial.formation.min_duration_s", f.min_duration_s),
            ("spatial.formation.lookback_s", f.lookback_s),
            ("events.default_pre_s", e.default_pre_s),
            ("events.default_post_s", e.default_post_s),
            ("events.related_window_s", e.related_window_s),
            ("events.buildup_s", e.buildup_s),
            ("events.reaction_s", e.reaction_s),
        ];
        if let Some((name, value)) = durations.iter().find(|(_, v)| !(v.is_finite() && *v >= 0.0)) {
            return invalid(format!("{} must be a non-negative duration, got {}", name, value));
        }

        let pc = &self.spatial.pitch_control;
        if pc.max_speed_mps <= 0.0 || pc.max_accel_mps2 <= 0.0 || pc.control_sigma_s <= 0.0 {
            return invalid("pitch_control speed, acceleration and sigma must be > 0".to_string());
        }
        if pc.grid.cols == 0 || pc.grid.rows == 0 {
            return invalid("pitch_control.grid must be non-empty".to_string());
        }

        Ok(())
    }
}

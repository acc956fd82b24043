use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub crop: CropConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub fast_mode: FastModeConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
    #[serde(default)]
    pub postprocess: PostProcessConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,
    /// Wait before the single retry of a blank first capture.
    #[serde(default = "default_blank_retry_delay")]
    pub blank_retry_delay_secs: f64,
    /// Title handed to the slide sink when no job title is available.
    #[serde(default = "default_title")]
    pub title: String,
}

/// Which similarity strategy the change detector dispatches to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMethod {
    Basic,
    #[default]
    #[serde(alias = "default")]
    Perceptual,
}

/// Named SSIM thresholds. When set, overrides `ssim_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SsimPreset {
    Strict,
    Normal,
    Loose,
}

impl SsimPreset {
    pub fn threshold(self) -> f64 {
        match self {
            SsimPreset::Strict => 0.999,
            SsimPreset::Normal => 0.9987,
            SsimPreset::Loose => 0.998,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComparisonConfig {
    #[serde(default)]
    pub method: ComparisonMethod,
    /// Summed |dR|+|dG|+|dB| above which a pixel counts as different.
    #[serde(default = "default_pixel_diff_threshold")]
    pub pixel_diff_threshold: u32,
    #[serde(default = "default_change_ratio_threshold")]
    pub change_ratio_threshold: f64,
    #[serde(default = "default_gaussian_blur_sigma")]
    pub gaussian_blur_sigma: f64,
    #[serde(default = "default_hamming_threshold_low")]
    pub hamming_threshold_low: u32,
    #[serde(default = "default_hamming_threshold_up")]
    pub hamming_threshold_up: u32,
    #[serde(default = "default_ssim_threshold")]
    pub ssim_threshold: f64,
    #[serde(default)]
    pub ssim_preset: Option<SsimPreset>,
}

impl ComparisonConfig {
    pub fn effective_ssim_threshold(&self) -> f64 {
        self.ssim_preset
            .map(SsimPreset::threshold)
            .unwrap_or(self.ssim_threshold)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_true")]
    pub double_verification: bool,
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CropConfig {
    #[serde(default = "default_crop_percent")]
    pub top_percent: f64,
    #[serde(default = "default_crop_percent")]
    pub bottom_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_playback_speed")]
    pub speed: f64,
    #[serde(default)]
    pub auto_adjust_speed: bool,
    /// How long to wait for the player to report playing before it counts as a fault.
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FastModeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_fast_interval")]
    pub interval_secs: f64,
    #[serde(default = "default_fast_speed")]
    pub speed: f64,
    #[serde(default = "default_true")]
    pub force_auto_speed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Consecutive "capture target unavailable" ticks treated as a player fault.
    #[serde(default = "default_target_missing_threshold")]
    pub target_missing_threshold: u32,
    #[serde(default = "default_inter_job_delay")]
    pub inter_job_delay_secs: f64,
    #[serde(default = "default_max_retry_attempts")]
    pub default_max_retry_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub max_retry_attempts: Option<u32>,
    #[serde(default = "default_true")]
    pub auto_retry_error: bool,
    #[serde(default)]
    pub fast_mode_eligible: bool,
    #[serde(default)]
    pub reset_progress: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_retry_attempts: None,
            auto_retry_error: true,
            fast_mode_eligible: false,
            reset_progress: false,
        }
    }
}

/// Pass over a finished job's slides.
#[derive(Debug, Clone, Deserialize)]
pub struct PostProcessConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub enable_duplicate_removal: bool,
    #[serde(default = "default_true")]
    pub enable_exclusion_list: bool,
    /// Slides whose hashes are at most this many bits apart count as the same.
    #[serde(default = "default_phash_threshold")]
    pub phash_threshold: u32,
    #[serde(default)]
    pub exclusion_list: Vec<ExclusionEntry>,
}

/// A named slide that is never kept, e.g. a title card or a "be right back" screen.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExclusionEntry {
    pub name: String,
    /// 64 hex digits.
    pub phash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_true")]
    pub index_db: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_progress_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            blank_retry_delay_secs: default_blank_retry_delay(),
            title: default_title(),
        }
    }
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            method: ComparisonMethod::default(),
            pixel_diff_threshold: default_pixel_diff_threshold(),
            change_ratio_threshold: default_change_ratio_threshold(),
            gaussian_blur_sigma: default_gaussian_blur_sigma(),
            hamming_threshold_low: default_hamming_threshold_low(),
            hamming_threshold_up: default_hamming_threshold_up(),
            ssim_threshold: default_ssim_threshold(),
            ssim_preset: None,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            double_verification: true,
            required_confirmations: default_required_confirmations(),
        }
    }
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            top_percent: default_crop_percent(),
            bottom_percent: default_crop_percent(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: default_playback_speed(),
            auto_adjust_speed: false,
            start_timeout_secs: default_start_timeout(),
        }
    }
}

impl Default for FastModeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_fast_interval(),
            speed: default_fast_speed(),
            force_auto_speed: true,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            target_missing_threshold: default_target_missing_threshold(),
            inter_job_delay_secs: default_inter_job_delay(),
            default_max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            enable_duplicate_removal: true,
            enable_exclusion_list: true,
            phash_threshold: default_phash_threshold(),
            exclusion_list: Vec::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            index_db: true,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            timeout_secs: default_progress_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config.sanitized())
    }

    /// Clamp or default every out-of-range value. Never fails.
    pub fn sanitized(mut self) -> Self {
        self.capture.sanitize();
        self.comparison.sanitize();
        self.verification.sanitize();
        self.crop.sanitize();
        self.playback.sanitize();
        self.fast_mode.sanitize();
        self.orchestrator.sanitize();
        self.postprocess.sanitize();
        self
    }
}

fn positive_or(field: &'static str, value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        warn!(field, value, fallback, "invalid value, using default");
        fallback
    }
}

impl CaptureConfig {
    fn sanitize(&mut self) {
        self.poll_interval_secs =
            positive_or("capture.poll_interval_secs", self.poll_interval_secs, default_poll_interval());
        self.blank_retry_delay_secs = positive_or(
            "capture.blank_retry_delay_secs",
            self.blank_retry_delay_secs,
            default_blank_retry_delay(),
        );
    }
}

impl ComparisonConfig {
    fn sanitize(&mut self) {
        // 3 * 255 is the largest possible summed channel difference.
        if self.pixel_diff_threshold > 765 {
            warn!(value = self.pixel_diff_threshold, "pixel_diff_threshold clamped to 765");
            self.pixel_diff_threshold = 765;
        }
        if !(self.change_ratio_threshold.is_finite()
            && (0.0..1.0).contains(&self.change_ratio_threshold))
        {
            warn!(value = self.change_ratio_threshold, "invalid change_ratio_threshold, using default");
            self.change_ratio_threshold = default_change_ratio_threshold();
        }
        if !(self.gaussian_blur_sigma.is_finite() && self.gaussian_blur_sigma > 0.0) {
            warn!(value = self.gaussian_blur_sigma, "invalid gaussian_blur_sigma, using default");
            self.gaussian_blur_sigma = default_gaussian_blur_sigma();
        }
        self.gaussian_blur_sigma = self.gaussian_blur_sigma.min(10.0);
        self.hamming_threshold_up = self.hamming_threshold_up.min(64);
        if self.hamming_threshold_low > self.hamming_threshold_up {
            warn!(
                low = self.hamming_threshold_low,
                up = self.hamming_threshold_up,
                "hamming_threshold_low above upper bound, clamping"
            );
            self.hamming_threshold_low = self.hamming_threshold_up;
        }
        if !(self.ssim_threshold.is_finite() && self.ssim_threshold > 0.0 && self.ssim_threshold <= 1.0)
        {
            warn!(value = self.ssim_threshold, "invalid ssim_threshold, using default");
            self.ssim_threshold = default_ssim_threshold();
        }
    }
}

impl VerificationConfig {
    fn sanitize(&mut self) {
        if self.required_confirmations == 0 {
            warn!("required_confirmations must be at least 1, using 1");
            self.required_confirmations = 1;
        }
    }
}

impl CropConfig {
    fn sanitize(&mut self) {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 99.0) } else { 0.0 };
        self.top_percent = clamp(self.top_percent);
        self.bottom_percent = clamp(self.bottom_percent);
        if self.top_percent + self.bottom_percent >= 100.0 {
            warn!(
                top = self.top_percent,
                bottom = self.bottom_percent,
                "crop leaves no rows, disabling crop"
            );
            self.top_percent = 0.0;
            self.bottom_percent = 0.0;
        }
    }
}

impl PlaybackConfig {
    fn sanitize(&mut self) {
        self.speed = positive_or("playback.speed", self.speed, default_playback_speed());
        self.start_timeout_secs =
            positive_or("playback.start_timeout_secs", self.start_timeout_secs, default_start_timeout());
    }
}

impl FastModeConfig {
    fn sanitize(&mut self) {
        self.interval_secs = positive_or("fast_mode.interval_secs", self.interval_secs, default_fast_interval());
        self.speed = positive_or("fast_mode.speed", self.speed, default_fast_speed());
    }
}

impl OrchestratorConfig {
    fn sanitize(&mut self) {
        if self.target_missing_threshold == 0 {
            self.target_missing_threshold = 1;
        }
        if !(self.inter_job_delay_secs.is_finite() && self.inter_job_delay_secs >= 0.0) {
            self.inter_job_delay_secs = default_inter_job_delay();
        }
    }
}

impl PostProcessConfig {
    fn sanitize(&mut self) {
        // 255 bits per hash.
        if self.phash_threshold > 255 {
            warn!(value = self.phash_threshold, "phash_threshold clamped to 255");
            self.phash_threshold = 255;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> f64 {
    2.0
}
fn default_blank_retry_delay() -> f64 {
    3.0
}
fn default_title() -> String {
    "Slides".into()
}
fn default_pixel_diff_threshold() -> u32 {
    30
}
fn default_change_ratio_threshold() -> f64 {
    0.005
}
fn default_gaussian_blur_sigma() -> f64 {
    0.5
}
fn default_hamming_threshold_low() -> u32 {
    0
}
fn default_hamming_threshold_up() -> u32 {
    5
}
fn default_ssim_threshold() -> f64 {
    0.999
}
fn default_required_confirmations() -> u32 {
    2
}
fn default_crop_percent() -> f64 {
    5.0
}
fn default_playback_speed() -> f64 {
    1.0
}
fn default_start_timeout() -> f64 {
    20.0
}
fn default_fast_interval() -> f64 {
    0.5
}
fn default_fast_speed() -> f64 {
    4.0
}
fn default_target_missing_threshold() -> u32 {
    5
}
fn default_inter_job_delay() -> f64 {
    2.0
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_phash_threshold() -> u32 {
    10
}
fn default_output_dir() -> String {
    "slides".into()
}
fn default_progress_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.comparison.method, ComparisonMethod::Perceptual);
        assert_eq!(config.comparison.pixel_diff_threshold, 30);
        assert_eq!(config.comparison.hamming_threshold_up, 5);
        assert_eq!(config.verification.required_confirmations, 2);
        assert!(config.verification.double_verification);
        assert_eq!(config.capture.poll_interval_secs, 2.0);
        assert_eq!(config.crop.top_percent, 5.0);
        assert!(!config.fast_mode.enabled);
        assert!(!config.postprocess.enabled);
        assert_eq!(config.postprocess.phash_threshold, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn postprocess_section_parses_exclusions() {
        let config = Config::from_toml(
            r#"
            [postprocess]
            enabled = true
            enable_duplicate_removal = false
            phash_threshold = 400

            [[postprocess.exclusion_list]]
            name = "intermission"
            phash = "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff"
            "#,
        )
        .unwrap();
        let pp = &config.postprocess;
        assert!(pp.enabled);
        assert!(!pp.enable_duplicate_removal);
        assert!(pp.enable_exclusion_list);
        assert_eq!(pp.phash_threshold, 255);
        assert_eq!(pp.exclusion_list.len(), 1);
        assert_eq!(pp.exclusion_list[0].name, "intermission");
    }

    #[test]
    fn default_method_alias_maps_to_perceptual() {
        let config = Config::from_toml("[comparison]\nmethod = \"default\"\n").unwrap();
        assert_eq!(config.comparison.method, ComparisonMethod::Perceptual);
        let config = Config::from_toml("[comparison]\nmethod = \"basic\"\n").unwrap();
        assert_eq!(config.comparison.method, ComparisonMethod::Basic);
    }

    #[test]
    fn unknown_method_is_a_parse_error() {
        let result = Config::from_toml("[comparison]\nmethod = \"ocr\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn invalid_thresholds_are_clamped() {
        let config = Config::from_toml(
            r#"
            [comparison]
            pixel_diff_threshold = 9000
            change_ratio_threshold = -1.0
            gaussian_blur_sigma = 0.0
            hamming_threshold_low = 12
            hamming_threshold_up = 80
            ssim_threshold = 3.0

            [verification]
            required_confirmations = 0

            [capture]
            poll_interval_secs = -2.0
            "#,
        )
        .unwrap();
        assert_eq!(config.comparison.pixel_diff_threshold, 765);
        assert_eq!(config.comparison.change_ratio_threshold, 0.005);
        assert_eq!(config.comparison.gaussian_blur_sigma, 0.5);
        assert_eq!(config.comparison.hamming_threshold_up, 64);
        assert_eq!(config.comparison.hamming_threshold_low, 12);
        assert_eq!(config.comparison.ssim_threshold, 0.999);
        assert_eq!(config.verification.required_confirmations, 1);
        assert_eq!(config.capture.poll_interval_secs, 2.0);
    }

    #[test]
    fn hamming_low_never_exceeds_up() {
        let config = Config::from_toml(
            "[comparison]\nhamming_threshold_low = 9\nhamming_threshold_up = 4\n",
        )
        .unwrap();
        assert_eq!(config.comparison.hamming_threshold_low, 4);
    }

    #[test]
    fn overlapping_crop_is_disabled() {
        let config = Config::from_toml("[crop]\ntop_percent = 60\nbottom_percent = 50\n").unwrap();
        assert_eq!(config.crop.top_percent, 0.0);
        assert_eq!(config.crop.bottom_percent, 0.0);
    }

    #[test]
    fn ssim_preset_overrides_threshold() {
        let config = Config::from_toml("[comparison]\nssim_preset = \"loose\"\n").unwrap();
        assert_eq!(config.comparison.effective_ssim_threshold(), 0.998);
        let config = Config::from_toml("[comparison]\nssim_threshold = 0.95\n").unwrap();
        assert_eq!(config.comparison.effective_ssim_threshold(), 0.95);
    }

    #[test]
    fn profiles_parse_with_defaults() {
        let config = Config::from_toml(
            r#"
            [profiles.lecture]
            name = "Lecture archive"
            max_retry_attempts = 30
            fast_mode_eligible = true
            "#,
        )
        .unwrap();
        let profile = &config.profiles["lecture"];
        assert_eq!(profile.max_retry_attempts, Some(30));
        assert!(profile.auto_retry_error);
        assert!(profile.fast_mode_eligible);
        assert!(!profile.reset_progress);
    }
}

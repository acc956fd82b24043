use std::time::Duration;

use slidewatch_common::config::{ComparisonConfig, Config, CropConfig, VerificationConfig};
use slidewatch_common::job::JobDescriptor;
use tracing::debug;

/// Everything a capture session and the orchestrator need for one job,
/// resolved once per job transition.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub poll_interval: Duration,
    pub blank_retry_delay: Duration,
    pub start_timeout: Duration,
    pub playback_speed: f64,
    pub auto_adjust_speed: bool,
    pub fast_mode: bool,
    pub comparison: ComparisonConfig,
    pub crop: CropConfig,
    pub verification: VerificationConfig,
    /// Title handed to the slide sink.
    pub title: String,
    /// Reloads allowed after a player fault before the job is failed.
    pub max_retry_attempts: u32,
    pub reset_progress: bool,
    pub target_missing_threshold: u32,
}

fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

/// Resolve the settings for `job`, or for a standalone session when `job` is `None`.
///
/// Fast mode only applies to jobs whose profile is marked eligible, and then
/// overrides the poll interval and playback speed and forces auto speed.
pub fn effective_config(job: Option<&JobDescriptor>, base: &Config) -> ResolvedConfig {
    let profile = job.and_then(|j| base.profiles.get(&j.profile_id));

    let fast_mode = base.fast_mode.enabled && profile.is_some_and(|p| p.fast_mode_eligible);

    let (poll_interval, playback_speed, auto_adjust_speed) = if fast_mode {
        (
            secs(base.fast_mode.interval_secs, Duration::from_millis(500)),
            base.fast_mode.speed,
            base.fast_mode.force_auto_speed || base.playback.auto_adjust_speed,
        )
    } else {
        (
            secs(base.capture.poll_interval_secs, Duration::from_secs(2)),
            base.playback.speed,
            base.playback.auto_adjust_speed,
        )
    };

    let max_retry_attempts = match profile {
        Some(p) if !p.auto_retry_error => 0,
        Some(p) => p
            .max_retry_attempts
            .unwrap_or(base.orchestrator.default_max_retry_attempts),
        None => base.orchestrator.default_max_retry_attempts,
    };

    let title = job
        .and_then(|j| j.title.clone())
        .unwrap_or_else(|| base.capture.title.clone());

    let resolved = ResolvedConfig {
        poll_interval,
        blank_retry_delay: secs(base.capture.blank_retry_delay_secs, Duration::from_secs(3)),
        start_timeout: secs(base.playback.start_timeout_secs, Duration::from_secs(20)),
        playback_speed,
        auto_adjust_speed,
        fast_mode,
        comparison: base.comparison.clone(),
        crop: base.crop,
        verification: base.verification.clone(),
        title,
        max_retry_attempts,
        reset_progress: profile.is_some_and(|p| p.reset_progress),
        target_missing_threshold: base.orchestrator.target_missing_threshold.max(1),
    };
    debug!(
        job = job.map(|j| j.id.as_str()),
        fast_mode,
        poll_ms = resolved.poll_interval.as_millis() as u64,
        speed = resolved.playback_speed,
        max_retry_attempts,
        "resolved effective config"
    );
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_toml(
            r#"
            [capture]
            poll_interval_secs = 2.0
            title = "Fallback"

            [fast_mode]
            enabled = true
            interval_secs = 0.25
            speed = 8.0

            [profiles.archive]
            fast_mode_eligible = true
            max_retry_attempts = 7
            reset_progress = true

            [profiles.live]
            auto_retry_error = false
            max_retry_attempts = 7
            "#,
        )
        .unwrap()
    }

    #[test]
    fn standalone_session_never_uses_fast_mode() {
        let resolved = effective_config(None, &config());
        assert!(!resolved.fast_mode);
        assert_eq!(resolved.poll_interval, Duration::from_secs(2));
        assert_eq!(resolved.playback_speed, 1.0);
        assert_eq!(resolved.title, "Fallback");
        assert_eq!(resolved.max_retry_attempts, 3);
    }

    #[test]
    fn eligible_profile_gets_fast_mode_bundle() {
        let job = JobDescriptor::new("j1", "t", "archive").with_title("Lecture 3");
        let resolved = effective_config(Some(&job), &config());
        assert!(resolved.fast_mode);
        assert_eq!(resolved.poll_interval, Duration::from_millis(250));
        assert_eq!(resolved.playback_speed, 8.0);
        assert!(resolved.auto_adjust_speed);
        assert_eq!(resolved.title, "Lecture 3");
        assert_eq!(resolved.max_retry_attempts, 7);
        assert!(resolved.reset_progress);
    }

    #[test]
    fn fast_mode_disabled_globally_wins() {
        let mut base = config();
        base.fast_mode.enabled = false;
        let job = JobDescriptor::new("j1", "t", "archive");
        let resolved = effective_config(Some(&job), &base);
        assert!(!resolved.fast_mode);
        assert_eq!(resolved.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn ineligible_and_custom_jobs_use_base_settings() {
        let live = JobDescriptor::new("j2", "t", "live");
        let resolved = effective_config(Some(&live), &config());
        assert!(!resolved.fast_mode);
        assert_eq!(resolved.max_retry_attempts, 0);

        let custom = JobDescriptor::new("j3", "t", "custom");
        let resolved = effective_config(Some(&custom), &config());
        assert!(!resolved.fast_mode);
        assert_eq!(resolved.max_retry_attempts, 3);
        assert!(!resolved.reset_progress);
    }
}

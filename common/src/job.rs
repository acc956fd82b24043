use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Profile id for ad-hoc targets. Jobs with this profile skip capability validation.
pub const CUSTOM_PROFILE: &str = "custom";

/// Automation flags a job's profile must provide for unattended processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AutomationCapabilities {
    #[serde(default)]
    pub auto_detect_end: bool,
    #[serde(default)]
    pub auto_start_playback: bool,
    #[serde(default)]
    pub auto_detect_title: bool,
}

impl AutomationCapabilities {
    pub fn all() -> Self {
        Self {
            auto_detect_end: true,
            auto_start_playback: true,
            auto_detect_title: true,
        }
    }

    /// Name of the first missing flag, if any.
    pub fn first_missing(&self) -> Option<&'static str> {
        if !self.auto_detect_end {
            Some("auto_detect_end")
        } else if !self.auto_start_playback {
            Some("auto_start_playback")
        } else if !self.auto_detect_title {
            Some("auto_detect_title")
        } else {
            None
        }
    }
}

/// One queued capture job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    /// Whatever the player collaborator understands as a location (URL, directory, ...).
    pub target: String,
    #[serde(default = "default_profile", rename = "profile")]
    pub profile_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub capabilities: AutomationCapabilities,
}

impl JobDescriptor {
    pub fn new(id: impl Into<String>, target: impl Into<String>, profile_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            profile_id: profile_id.into(),
            title: None,
            capabilities: AutomationCapabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: AutomationCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn is_custom(&self) -> bool {
        self.profile_id == CUSTOM_PROFILE
    }
}

impl fmt::Display for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.profile_id)
    }
}

/// On-disk job queue: a TOML file with a `[[jobs]]` array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFile {
    #[serde(default)]
    pub jobs: Vec<JobDescriptor>,
}

impl QueueFile {
    pub fn load(path: &Path) -> Result<Self, QueueFileError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| QueueFileError::ReadFile(path.display().to_string(), e))?;
        toml::from_str(&content).map_err(|e| QueueFileError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueFileError {
    #[error("failed to read queue file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse queue file: {0}")]
    Parse(String),
}

fn default_profile() -> String {
    CUSTOM_PROFILE.into()
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use directories::ProjectDirs;

use crate::error::ConfigError;

/// Advertised-name substring shared by Xiaoxiang/JBD BMS boards.
pub const DEFAULT_NAME_FILTER: &str = "xiaoxi";

const TOKEN_FILE_NAME: &str = "token";

/// Timing and matching parameters for acquisition rounds.
///
/// ```
/// use std::time::Duration;
///
/// use bmspoll::AcquisitionConfig;
///
/// let config = AcquisitionConfig::builder()
///     .tick_interval(Duration::from_secs(2))
///     .build();
/// assert_eq!(6, config.ticks_per_session());
/// assert_eq!(Duration::from_secs(12), config.session_duration());
/// ```
#[derive(Debug, Clone, Builder)]
pub struct AcquisitionConfig {
    #[builder(into, default = DEFAULT_NAME_FILTER.to_string())]
    name_filter: String,
    #[builder(default = Duration::from_secs(5))]
    tick_interval: Duration,
    #[builder(default = 6)]
    ticks_per_session: u32,
    #[builder(default = Duration::from_secs(4))]
    response_timeout: Duration,
    #[builder(default = Duration::from_secs(10))]
    discovery_timeout: Duration,
    #[builder(default = Duration::from_secs(30))]
    discovery_retry_interval: Duration,
    #[builder(default = Duration::from_secs(60))]
    default_poll_interval: Duration,
    #[builder(default = Duration::from_secs(10))]
    session_grace: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AcquisitionConfig {
    /// Checks values that would make a round meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroTicks`] when no ticks would run.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.ticks_per_session == 0 {
            return Err(ConfigError::ZeroTicks);
        }
        Ok(self)
    }

    /// Case-insensitive substring matched against advertised names.
    #[must_use]
    pub fn name_filter(&self) -> &str {
        &self.name_filter
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    #[must_use]
    pub fn ticks_per_session(&self) -> u32 {
        self.ticks_per_session
    }

    /// How long a request may wait for its response before the round is abandoned.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Length of one scan window.
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// Wait before scanning again after an empty or failed discovery.
    #[must_use]
    pub fn discovery_retry_interval(&self) -> Duration {
        self.discovery_retry_interval
    }

    /// Wait between rounds when delivery does not suggest one.
    #[must_use]
    pub fn default_poll_interval(&self) -> Duration {
        self.default_poll_interval
    }

    #[must_use]
    pub fn session_grace(&self) -> Duration {
        self.session_grace
    }

    /// Nominal length of one session: `ticks_per_session × tick_interval`.
    #[must_use]
    pub fn session_duration(&self) -> Duration {
        self.tick_interval.saturating_mul(self.ticks_per_session)
    }

    /// Hard bound after which the parent cancels a session that is still running.
    #[must_use]
    pub fn session_deadline(&self) -> Duration {
        self.session_duration()
            .saturating_add(self.response_timeout)
            .saturating_add(self.session_grace)
    }
}

/// Returns the default delivery token path under the platform config directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] when the platform has no home directory.
pub fn default_token_path() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("", "", "bmspoll").ok_or(ConfigError::NoConfigDir)?;
    Ok(dirs.config_dir().join(TOKEN_FILE_NAME))
}

/// Reads a delivery token, trimming surrounding whitespace.
///
/// # Errors
///
/// Returns [`ConfigError::TokenFile`] when the file cannot be read.
pub fn read_token(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|token| token.trim().to_string())
        .map_err(|source| ConfigError::TokenFile {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_field_deployment() {
        let config = AcquisitionConfig::default();

        assert_eq!("xiaoxi", config.name_filter());
        assert_eq!(Duration::from_secs(5), config.tick_interval());
        assert_eq!(6, config.ticks_per_session());
        assert_eq!(Duration::from_secs(4), config.response_timeout());
        assert_eq!(Duration::from_secs(60), config.default_poll_interval());
        assert_eq!(Duration::from_secs(30), config.session_duration());
        assert_eq!(Duration::from_secs(44), config.session_deadline());
    }

    #[test]
    fn zero_ticks_are_rejected() {
        let config = AcquisitionConfig::builder().ticks_per_session(0).build();
        assert_matches!(config.validate(), Err(ConfigError::ZeroTicks));
    }

    #[test]
    fn missing_token_file_names_the_path() {
        let result = read_token(Path::new("/nonexistent/bmspoll/token"));
        assert_matches!(
            result,
            Err(ConfigError::TokenFile { path, .. }) if path == "/nonexistent/bmspoll/token"
        );
    }
}

//! Client configuration.
//!
//! Values come from, in order of precedence: explicit overrides, environment
//! variables, built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::SdkError;
use crate::poller::StatusPoller;

/// Server used when neither an override nor `MODELOPS_URL` is set.
pub const DEFAULT_BASE_URL: &str = "http://localhost:7070";

/// Sustained polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Polling interval while a freshly created resource builds.
pub const DEFAULT_BUILD_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub const ENV_URL: &str = "MODELOPS_URL";
pub const ENV_TOKEN: &str = "MODELOPS_TOKEN";
pub const ENV_GROUP_TOKEN: &str = "MODELOPS_GROUP_TOKEN";
pub const ENV_POLL_INTERVAL_SECS: &str = "MODELOPS_POLL_INTERVAL_SECS";
pub const ENV_MAX_WAIT_SECS: &str = "MODELOPS_MAX_WAIT_SECS";

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API base URL, normalized to end in `/api`.
    pub base_url: String,

    /// User token sent on management calls.
    pub token: String,

    /// Group token used for invocations when none is given per call.
    pub group_token: Option<String>,

    /// Sustained polling interval.
    pub poll_interval: Duration,

    /// Polling interval right after create or restart.
    pub build_poll_interval: Duration,

    /// Upper bound on any single wait. `None` waits forever.
    pub max_wait: Option<Duration>,

    /// Directory where intermediate results of chained runs are stored.
    pub staging_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: normalize_base_url(DEFAULT_BASE_URL),
            token: String::new(),
            group_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            build_poll_interval: DEFAULT_BUILD_POLL_INTERVAL,
            max_wait: None,
            staging_dir: std::env::temp_dir().join("modelops"),
        }
    }
}

/// Explicit values that win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub group_token: Option<String>,
    pub poll_interval: Option<Duration>,
    pub build_poll_interval: Option<Duration>,
    pub max_wait: Option<Duration>,
    pub staging_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Resolve against the process environment.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, SdkError> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary variable lookup.
    ///
    /// A user token is required; everything else has a default.
    pub fn resolve_with<F>(overrides: ConfigOverrides, lookup: F) -> Result<Self, SdkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = overrides
            .base_url
            .or_else(|| env(ENV_URL))
            .map(|url| normalize_base_url(&url))
            .unwrap_or(defaults.base_url);

        let token = overrides
            .token
            .or_else(|| env(ENV_TOKEN))
            .ok_or_else(|| {
                SdkError::Input(format!(
                    "no user token given. Pass one explicitly or set {ENV_TOKEN}"
                ))
            })?;

        let group_token = overrides.group_token.or_else(|| env(ENV_GROUP_TOKEN));

        let poll_interval = match overrides.poll_interval {
            Some(interval) => interval,
            None => env_secs(&env, ENV_POLL_INTERVAL_SECS)?.unwrap_or(defaults.poll_interval),
        };

        let max_wait = match overrides.max_wait {
            Some(max_wait) => Some(max_wait),
            None => env_secs(&env, ENV_MAX_WAIT_SECS)?,
        };

        Ok(Self {
            base_url,
            token,
            group_token,
            poll_interval,
            build_poll_interval: overrides
                .build_poll_interval
                .unwrap_or(defaults.build_poll_interval),
            max_wait,
            staging_dir: overrides.staging_dir.unwrap_or(defaults.staging_dir),
        })
    }

    /// Poller at the sustained interval.
    pub fn poller(&self) -> StatusPoller {
        StatusPoller::new(self.poll_interval).with_max_wait(self.max_wait)
    }

    /// Poller at the build interval.
    pub fn build_poller(&self) -> StatusPoller {
        StatusPoller::new(self.build_poll_interval).with_max_wait(self.max_wait)
    }
}

fn env_secs<F>(env: &F, key: &str) -> Result<Option<Duration>, SdkError>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| SdkError::Input(format!("{key} must be a whole number of seconds, got '{raw}'")))
        })
        .transpose()
}

/// Strips trailing slashes and appends `/api` when missing.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/api")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_explicit_beats_env() {
        let overrides = ConfigOverrides {
            base_url: Some("https://explicit.example.com/".to_string()),
            token: Some("explicit-token".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::resolve_with(
            overrides,
            lookup(&[
                (ENV_URL, "https://env.example.com"),
                (ENV_TOKEN, "env-token"),
                (ENV_GROUP_TOKEN, "env-group"),
            ]),
        )
        .unwrap();

        assert_eq!(config.base_url, "https://explicit.example.com/api");
        assert_eq!(config.token, "explicit-token");
        assert_eq!(config.group_token.as_deref(), Some("env-group"));
    }

    #[test]
    fn test_env_beats_default() {
        let config = ClientConfig::resolve_with(
            ConfigOverrides::default(),
            lookup(&[
                (ENV_TOKEN, "env-token"),
                (ENV_POLL_INTERVAL_SECS, "5"),
                (ENV_MAX_WAIT_SECS, "600"),
            ]),
        )
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:7070/api");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.build_poll_interval, DEFAULT_BUILD_POLL_INTERVAL);
        assert_eq!(config.max_wait, Some(Duration::from_secs(600)));
        assert_eq!(config.group_token, None);
    }

    #[test]
    fn test_missing_token_is_input_error() {
        let err = ClientConfig::resolve_with(ConfigOverrides::default(), lookup(&[(ENV_TOKEN, "  ")]))
            .unwrap_err();
        assert!(matches!(err, SdkError::Input(_)));
    }

    #[test]
    fn test_bad_interval_is_input_error() {
        let err = ClientConfig::resolve_with(
            ConfigOverrides::default(),
            lookup(&[(ENV_TOKEN, "t"), (ENV_POLL_INTERVAL_SECS, "soon")]),
        )
        .unwrap_err();
        assert!(matches!(err, SdkError::Input(m) if m.contains(ENV_POLL_INTERVAL_SECS)));
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://a.io/"), "https://a.io/api");
        assert_eq!(normalize_base_url("https://a.io/api/"), "https://a.io/api");
        assert_eq!(normalize_base_url("https://a.io//"), "https://a.io/api");
    }
}

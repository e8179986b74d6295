//! Configuration types for the autogrant agent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for the autogrant agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Rule provider (Pangolin API) settings.
    pub provider: ProviderConfig,

    /// Log source settings.
    pub log: LogConfig,

    /// Persisted state settings.
    pub state: StateConfig,

    /// Grant lifetime settings.
    #[serde(default)]
    pub grant: GrantConfig,
}

/// Rule provider API settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Base URL of the Pangolin API, without a trailing slash.
    pub endpoint: String,

    /// Bearer credential (supports ${ENV_VAR} syntax).
    pub api_key: String,

    /// Resource the ACCEPT rules are scoped to.
    #[serde(default = "default_resource_id")]
    pub resource_id: String,

    /// API request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_resource_id() -> String {
    "1".to_string()
}

fn default_timeout() -> u64 {
    10_000
}

/// Log source settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Path to the proxy log file.
    pub path: PathBuf,

    /// Substring identifying an authentication-success line.
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Treat a missing log file as a fatal error instead of a skipped pass.
    #[serde(default)]
    pub missing_is_fatal: bool,
}

fn default_marker() -> String {
    "Exchange session: Badger sent ".to_string()
}

/// Persisted state settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    /// Path to the state file (cursor + rule ledger).
    pub path: PathBuf,

    /// Path to the pass lock file. Defaults to the state path with a
    /// `.lock` suffix.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
}

impl StateConfig {
    /// Resolved lock file path.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_path.clone().unwrap_or_else(|| {
            let mut p = self.path.as_os_str().to_owned();
            p.push(".lock");
            PathBuf::from(p)
        })
    }
}

/// Grant lifetime settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrantConfig {
    /// How long an IP keeps access after authenticating, in minutes.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

fn default_ttl_minutes() -> u64 {
    360
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.provider.endpoint.is_empty() {
            anyhow::bail!("provider.endpoint must not be empty");
        }

        if self.provider.api_key.is_empty() {
            anyhow::bail!("provider.api_key must not be empty");
        }

        if self.provider.resource_id.is_empty() {
            anyhow::bail!("provider.resource_id must not be empty");
        }

        if self.provider.timeout_ms == 0 {
            anyhow::bail!("provider.timeout_ms must be greater than zero");
        }

        if self.grant.ttl_minutes == 0 {
            anyhow::bail!("grant.ttl_minutes must be greater than zero");
        }

        if self.log.marker.is_empty() {
            anyhow::bail!("log.marker must not be empty");
        }

        Ok(())
    }

    /// Grant TTL as a duration.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.grant.ttl_minutes as i64)
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Autogrant Agent Configuration

# Pangolin rule provider API
provider:
  endpoint: "https://pangolin.example.com/v1"
  api_key: "${PANGOLIN_API_KEY}"  # Use environment variable
  resource_id: "1"                # Resource the ACCEPT rules belong to
  timeout_ms: 10000               # API timeout

# Proxy log to scan for authentication events
log:
  path: "/var/log/pangolin/traefik.log"
  marker: "Exchange session: Badger sent "
  missing_is_fatal: false         # Skip the pass if the log is missing

# Durable cursor + rule ledger
state:
  path: "/var/lib/autogrant/state.json"
  # lock_path: "/var/lib/autogrant/state.json.lock"

# Access grant lifetime
grant:
  ttl_minutes: 360                # 6 hours
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config {
            provider: ProviderConfig {
                endpoint: "https://pangolin.example.com/v1".to_string(),
                api_key: "secret".to_string(),
                resource_id: default_resource_id(),
                timeout_ms: default_timeout(),
            },
            log: LogConfig {
                path: PathBuf::from("/var/log/pangolin/traefik.log"),
                marker: default_marker(),
                missing_is_fatal: false,
            },
            state: StateConfig {
                path: PathBuf::from("/var/lib/autogrant/state.json"),
                lock_path: None,
            },
            grant: GrantConfig::default(),
        }
    }

    #[test]
    fn test_default_grant() {
        let grant = GrantConfig::default();
        assert_eq!(grant.ttl_minutes, 360);
    }

    #[test]
    fn test_lock_path_default() {
        let config = minimal_config();
        assert_eq!(
            config.state.lock_path(),
            PathBuf::from("/var/lib/autogrant/state.json.lock")
        );
    }

    #[test]
    fn test_lock_path_explicit() {
        let mut config = minimal_config();
        config.state.lock_path = Some(PathBuf::from("/run/autogrant.lock"));
        assert_eq!(config.state.lock_path(), PathBuf::from("/run/autogrant.lock"));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("AUTOGRANT_TEST_KEY", "secret123");
        let input = "api_key: \"${AUTOGRANT_TEST_KEY}\"";
        let result = expand_env_vars(input);
        assert_eq!(result, "api_key: \"secret123\"");
        std::env::remove_var("AUTOGRANT_TEST_KEY");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let input = "api_key: \"${AUTOGRANT_NONEXISTENT_VAR}\"";
        let result = expand_env_vars(input);
        assert_eq!(result, "api_key: \"\"");
    }

    #[test]
    fn test_parse_config_yaml() {
        let yaml = r#"
provider:
  endpoint: "https://pangolin.example.com/v1"
  api_key: "secret"

log:
  path: "/var/log/pangolin/traefik.log"

state:
  path: "/var/lib/autogrant/state.json"

grant:
  ttl_minutes: 120
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.provider.resource_id, "1");
        assert_eq!(config.provider.timeout_ms, 10_000);
        assert_eq!(config.log.marker, default_marker());
        assert!(!config.log.missing_is_fatal);
        assert_eq!(config.grant.ttl_minutes, 120);
        config.validate().unwrap();
    }

    #[test]
    fn test_example_config_parses() {
        std::env::set_var("PANGOLIN_API_KEY", "example-key");
        let config: Config = serde_yaml::from_str(&expand_env_vars(&Config::example())).unwrap();
        config.validate().unwrap();
        std::env::remove_var("PANGOLIN_API_KEY");
    }

    #[test]
    fn test_validate_empty_api_key() {
        let mut config = minimal_config();
        config.provider.api_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = minimal_config();
        config.provider.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let mut config = minimal_config();
        config.grant.ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_duration() {
        let config = minimal_config();
        assert_eq!(config.ttl(), chrono::Duration::hours(6));
    }
}

//! Durable record of active access rules and the log cursor.

use crate::cursor::LogCursor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};

/// An active ACCEPT rule held for one IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Identifier assigned by the rule provider, required for deletion.
    pub remote_rule_id: String,
    /// When the rule was created.
    pub created_at: DateTime<Utc>,
    /// When the rule should be retracted.
    pub expires_at: DateTime<Utc>,
}

impl Rule {
    /// Whether the rule is due for retraction at the given cutoff.
    pub fn is_expired_at(&self, cutoff: DateTime<Utc>) -> bool {
        self.expires_at <= cutoff
    }
}

/// The single persisted state object: log cursor plus the IP-to-rule map.
///
/// This is the engine's only memory across invocations. At most one rule
/// exists per IP at any time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    /// Read position in the log.
    #[serde(default)]
    pub cursor: LogCursor,

    /// Active rules keyed by the granted IP.
    #[serde(default)]
    pub rules: BTreeMap<IpAddr, Rule>,
}

impl Ledger {
    /// Load the ledger from disk.
    ///
    /// A missing or unreadable state file yields an empty ledger with the
    /// cursor at zero; first-run bootstrap is a normal case, not an error.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file, starting empty");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "state file unreadable, starting empty");
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "state file corrupt, starting empty");
                Self::default()
            }
        }
    }

    /// Persist the ledger atomically.
    ///
    /// Writes to a temporary file in the target directory and renames it over
    /// the state file, so a crash mid-write never corrupts the previous valid
    /// state.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.persist(path).map_err(|e| e.error)?;

        debug!(path = %path.display(), rules = self.rules.len(), "state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FileIdentity;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample_rule(expires_at: DateTime<Utc>) -> Rule {
        Rule {
            remote_rule_id: "42".to_string(),
            created_at: expires_at - chrono::Duration::hours(6),
            expires_at,
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::load(&dir.path().join("state.json"));

        assert_eq!(ledger.cursor.offset, 0);
        assert!(ledger.cursor.identity.is_none());
        assert!(ledger.rules.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ definitely not json").unwrap();

        let ledger = Ledger::load(&path);
        assert!(ledger.rules.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let expires = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        let mut ledger = Ledger::default();
        ledger.cursor = LogCursor {
            offset: 512,
            identity: Some(FileIdentity {
                dev: 1,
                ino: 99,
                created: None,
            }),
            head: b"line one\n".to_vec(),
        };
        ledger
            .rules
            .insert("10.0.0.5".parse().unwrap(), sample_rule(expires));

        ledger.save(&path).unwrap();
        let loaded = Ledger::load(&path);

        assert_eq!(loaded.cursor, ledger.cursor);
        assert_eq!(loaded.rules, ledger.rules);
    }

    #[test]
    fn test_save_replaces_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let expires = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        let mut ledger = Ledger::default();
        ledger
            .rules
            .insert("10.0.0.5".parse().unwrap(), sample_rule(expires));
        ledger.save(&path).unwrap();

        ledger.rules.clear();
        ledger.cursor.offset = 1024;
        ledger.save(&path).unwrap();

        let loaded = Ledger::load(&path);
        assert!(loaded.rules.is_empty());
        assert_eq!(loaded.cursor.offset, 1024);
    }

    #[test]
    fn test_rule_expiry_cutoff() {
        let expires = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        let rule = sample_rule(expires);

        assert!(!rule.is_expired_at(expires - chrono::Duration::seconds(1)));
        assert!(rule.is_expired_at(expires));
        assert!(rule.is_expired_at(expires + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_state_file_format_is_stable() {
        // Matches what earlier deployments wrote by hand.
        let json = r#"{
            "cursor": { "offset": 100, "identity": { "dev": 3, "ino": 77 } },
            "rules": {
                "10.0.0.9": {
                    "remote_rule_id": "7",
                    "created_at": "2025-06-01T06:00:00Z",
                    "expires_at": "2025-06-01T12:00:00Z"
                }
            }
        }"#;

        let ledger: Ledger = serde_json::from_str(json).unwrap();
        assert_eq!(ledger.cursor.offset, 100);
        let rule = &ledger.rules[&"10.0.0.9".parse::<IpAddr>().unwrap()];
        assert_eq!(rule.remote_rule_id, "7");
    }
}

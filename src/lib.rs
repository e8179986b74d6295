//! Autogrant agent for Pangolin.
//!
//! Derives temporary network-access grants from authentication events in a
//! proxy log and retracts them after a fixed TTL. Covers clients that cannot
//! complete an interactive authentication redirect (e.g. televisions): once
//! any device on a shared IP authenticates, the IP is granted access for a
//! bounded window.
//!
//! # Features
//!
//! - **Incremental Log Consumption** - Durable byte cursor with rotation and
//!   truncation detection
//! - **Idempotent Grants** - At most one ACCEPT rule per IP; re-authentication
//!   refreshes the expiry instead of duplicating
//! - **TTL Expiry** - Rules retracted on the first pass after their TTL
//!   elapses; failed deletions retried every pass
//! - **Atomic State** - Cursor and rule ledger persisted via write-then-rename
//! - **One-Shot Passes** - Designed to be invoked by cron or a systemd timer;
//!   a lock file guards against overlapping invocations
//!
//! # Example Configuration
//!
//! ```yaml
//! provider:
//!   endpoint: "https://pangolin.example.com/v1"
//!   api_key: "${PANGOLIN_API_KEY}"
//!   resource_id: "1"
//!
//! log:
//!   path: "/var/log/pangolin/traefik.log"
//!
//! state:
//!   path: "/var/lib/autogrant/state.json"
//!
//! grant:
//!   ttl_minutes: 360
//! ```

pub mod config;
pub mod cursor;
pub mod engine;
pub mod extract;
pub mod ledger;
pub mod lock;
pub mod provider;

pub use config::Config;
pub use engine::{Engine, PassError, PassSummary};
pub use provider::PangolinClient;

//! Environment-driven configuration for the ledger connection and audit write/read policy.

use crate::EntityRegistry;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Bounded exponential backoff for append retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Which ledger adapter the service runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Memory,
    Sqlite,
    Http,
}

impl std::str::FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(LedgerBackend::Memory),
            "sqlite" => Ok(LedgerBackend::Sqlite),
            "http" => Ok(LedgerBackend::Http),
            other => Err(format!("expected memory, sqlite or http, got {:?}", other)),
        }
    }
}

/// Ledger location, credentials, namespace and audit table.
#[derive(Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub audit_table: String,
}

impl std::fmt::Debug for LedgerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("audit_table", &self.audit_table)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    pub ledger: LedgerSettings,
    pub backend: LedgerBackend,
    pub sqlite_path: String,
    pub append_timeout: Duration,
    pub query_timeout: Duration,
    pub retry: RetryPolicy,
    pub extra_entities: Vec<String>,
    /// Most unaudited mutations kept for reconciliation before the oldest is dropped.
    pub pending_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerSettings {
                host: "localhost".to_string(),
                port: 8080,
                username: "immudb".to_string(),
                password: "immudb".to_string(),
                database: "auditdb".to_string(),
                audit_table: "comments_audit_v2".to_string(),
            },
            backend: LedgerBackend::Memory,
            sqlite_path: "audit-ledger.db".to_string(),
            append_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            extra_entities: Vec::new(),
            pending_capacity: 10_000,
        }
    }
}

impl AuditConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from any variable lookup; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LEDGER_HOST") {
            cfg.ledger.host = v;
        }
        if let Some(v) = get("LEDGER_PORT") {
            cfg.ledger.port = parse("LEDGER_PORT", &v)?;
        }
        if let Some(v) = get("LEDGER_USER") {
            cfg.ledger.username = v;
        }
        if let Some(v) = get("LEDGER_PASSWORD") {
            cfg.ledger.password = v;
        }
        if let Some(v) = get("LEDGER_DATABASE") {
            cfg.ledger.database = v;
        }
        if let Some(v) = get("LEDGER_AUDIT_TABLE") {
            if !audit_types::is_valid_identifier(&v) {
                return Err(ConfigError::Invalid {
                    var: "LEDGER_AUDIT_TABLE",
                    value: v,
                    reason: "not a valid table identifier".to_string(),
                });
            }
            cfg.ledger.audit_table = v;
        }
        if let Some(v) = get("AUDIT_LEDGER_BACKEND") {
            cfg.backend = v.parse().map_err(|reason| ConfigError::Invalid {
                var: "AUDIT_LEDGER_BACKEND",
                value: v.clone(),
                reason,
            })?;
        }
        if let Some(v) = get("AUDIT_SQLITE_PATH") {
            cfg.sqlite_path = v;
        }
        if let Some(v) = get("AUDIT_APPEND_TIMEOUT_MS") {
            cfg.append_timeout = Duration::from_millis(parse("AUDIT_APPEND_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("AUDIT_QUERY_TIMEOUT_MS") {
            cfg.query_timeout = Duration::from_millis(parse("AUDIT_QUERY_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("AUDIT_RETRY_COUNT") {
            let n: u32 = parse("AUDIT_RETRY_COUNT", &v)?;
            if n == 0 {
                return Err(ConfigError::Invalid {
                    var: "AUDIT_RETRY_COUNT",
                    value: v,
                    reason: "must be at least 1".to_string(),
                });
            }
            cfg.retry.max_attempts = n;
        }
        if let Some(v) = get("AUDIT_RETRY_BACKOFF_MS") {
            cfg.retry.base_delay = Duration::from_millis(parse("AUDIT_RETRY_BACKOFF_MS", &v)?);
        }
        if let Some(v) = get("AUDIT_RETRY_MAX_BACKOFF_MS") {
            cfg.retry.max_delay = Duration::from_millis(parse("AUDIT_RETRY_MAX_BACKOFF_MS", &v)?);
        }
        if let Some(v) = get("AUDIT_EXTRA_ENTITIES") {
            cfg.extra_entities = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = get("AUDIT_PENDING_CAPACITY") {
            let n: usize = parse("AUDIT_PENDING_CAPACITY", &v)?;
            if n == 0 {
                return Err(ConfigError::Invalid {
                    var: "AUDIT_PENDING_CAPACITY",
                    value: v,
                    reason: "must be at least 1".to_string(),
                });
            }
            cfg.pending_capacity = n;
        }
        Ok(cfg)
    }

    /// Default taxonomy plus any configured extra entity names.
    pub fn entity_registry(&self) -> EntityRegistry {
        self.extra_entities
            .iter()
            .fold(EntityRegistry::assessment_domain(), |reg, name| {
                reg.with(name.clone())
            })
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = AuditConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, AuditConfig::default());
        assert_eq!(cfg.ledger.database, "auditdb");
        assert_eq!(cfg.ledger.audit_table, "comments_audit_v2");
        assert_eq!(cfg.retry.max_attempts, 4);
    }

    #[test]
    fn reads_every_variable() {
        let cfg = AuditConfig::from_lookup(lookup(&[
            ("LEDGER_HOST", "immudb"),
            ("LEDGER_PORT", "3323"),
            ("LEDGER_USER", "auditor"),
            ("LEDGER_PASSWORD", "s3cret"),
            ("LEDGER_DATABASE", "ledgerdb"),
            ("LEDGER_AUDIT_TABLE", "audit_v3"),
            ("AUDIT_LEDGER_BACKEND", "HTTP"),
            ("AUDIT_SQLITE_PATH", "/tmp/l.db"),
            ("AUDIT_APPEND_TIMEOUT_MS", "250"),
            ("AUDIT_QUERY_TIMEOUT_MS", "750"),
            ("AUDIT_RETRY_COUNT", "6"),
            ("AUDIT_RETRY_BACKOFF_MS", "20"),
            ("AUDIT_RETRY_MAX_BACKOFF_MS", "400"),
            ("AUDIT_EXTRA_ENTITIES", "Report, Annotation,,"),
            ("AUDIT_PENDING_CAPACITY", "50"),
        ]))
        .unwrap();
        assert_eq!(cfg.ledger.host, "immudb");
        assert_eq!(cfg.ledger.port, 3323);
        assert_eq!(cfg.ledger.username, "auditor");
        assert_eq!(cfg.ledger.password, "s3cret");
        assert_eq!(cfg.ledger.database, "ledgerdb");
        assert_eq!(cfg.ledger.audit_table, "audit_v3");
        assert_eq!(cfg.backend, LedgerBackend::Http);
        assert_eq!(cfg.sqlite_path, "/tmp/l.db");
        assert_eq!(cfg.append_timeout, Duration::from_millis(250));
        assert_eq!(cfg.query_timeout, Duration::from_millis(750));
        assert_eq!(cfg.retry.max_attempts, 6);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(20));
        assert_eq!(cfg.retry.max_delay, Duration::from_millis(400));
        assert_eq!(cfg.extra_entities, vec!["Report", "Annotation"]);
        assert_eq!(cfg.pending_capacity, 50);
        let reg = cfg.entity_registry();
        assert!(reg.contains("Report"));
        assert!(reg.contains("Comments"));
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = AuditConfig::from_lookup(lookup(&[("LEDGER_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LEDGER_PORT", .. }));
        let err = AuditConfig::from_lookup(lookup(&[("AUDIT_RETRY_COUNT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "AUDIT_RETRY_COUNT", .. }));
        let err = AuditConfig::from_lookup(lookup(&[("AUDIT_PENDING_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "AUDIT_PENDING_CAPACITY", .. }));
        let err =
            AuditConfig::from_lookup(lookup(&[("LEDGER_AUDIT_TABLE", "x; drop")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "LEDGER_AUDIT_TABLE", .. }));
    }

    #[test]
    fn password_is_not_debug_printed() {
        let cfg = AuditConfig::default();
        assert!(!format!("{:?}", cfg).contains("password: \"immudb\""));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(5), Duration::from_millis(1000));
        assert_eq!(p.delay_for(40), Duration::from_millis(1000));
    }
}

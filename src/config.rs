use std::env;

use anyhow::Context;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    /// Clinic used by public booking and patient self-signup.
    pub default_clinic_id: Option<Uuid>,
    pub db_max_connections: u32,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let session_ttl_hours = get("SESSION_TTL_HOURS")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);

        let default_clinic_id = match get("DEFAULT_CLINIC_ID").filter(|s| !s.trim().is_empty()) {
            Some(s) => Some(
                Uuid::parse_str(s.trim())
                    .with_context(|| format!("DEFAULT_CLINIC_ID is not a UUID: {s}"))?,
            ),
            None => None,
        };

        let db_max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(s) => s
                .parse::<u32>()
                .with_context(|| format!("DB_MAX_CONNECTIONS is not a number: {s}"))?,
            None => 10,
        };

        let run_migrations = match get("RUN_MIGRATIONS").as_deref().map(str::trim) {
            None | Some("1" | "true" | "yes") => true,
            Some("0" | "false" | "no") => false,
            Some(other) => anyhow::bail!("RUN_MIGRATIONS must be true or false, got {other}"),
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            default_clinic_id,
            db_max_connections,
            run_migrations,
        })
    }
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
    fn defaults_apply_when_only_database_url_is_set() {
        let cfg = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x/y")])).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:8080");
        assert_eq!(cfg.session_ttl_hours, 24);
        assert_eq!(cfg.default_clinic_id, None);
        assert_eq!(cfg.db_max_connections, 10);
        assert!(cfg.run_migrations);
    }

    #[test]
    fn database_url_is_required() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn default_clinic_must_be_a_uuid() {
        let id = "6f1c1f8e-1b7a-4a53-9f0e-2b3c4d5e6f70";
        let cfg = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x/y"),
            ("DEFAULT_CLINIC_ID", id),
            ("RUN_MIGRATIONS", "false"),
        ]))
        .unwrap();
        assert_eq!(cfg.default_clinic_id, Some(Uuid::parse_str(id).unwrap()));
        assert!(!cfg.run_migrations);

        let bad = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x/y"),
            ("DEFAULT_CLINIC_ID", "clinic-1"),
        ]));
        assert!(bad.is_err());
    }
}

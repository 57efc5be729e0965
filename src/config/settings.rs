use std::env;
use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Fallback cache endpoint used when `REDIS_URL` is not set
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingRequired { var: String },

    #[error("Invalid value for {field}: '{value}' (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

/// A secret value whose content is redacted from debug output and logs
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying value. Callers must not log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Immutable application settings, materialized once from the environment.
///
/// Providers reference the settings through the container; a missing required
/// field fails construction here, before any provider can be initialized.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database connection string (required, `DATABASE_URL`)
    pub database_url: String,
    /// Cache endpoint (`REDIS_URL`, defaults to a local instance)
    pub redis_url: String,
    /// Signing secret (required, `JWT_SECRET`)
    pub jwt_secret: Secret,
    /// Diagnostic endpoint (`SENTRY_DSN`, optional)
    pub sentry_dsn: Option<String>,
    /// Identifier generated per settings construction, never read from the
    /// environment
    pub run_id: String,
}

impl Settings {
    /// Load settings from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        let jwt_secret = Secret::new(required(&lookup, "JWT_SECRET")?);
        let sentry_dsn = lookup("SENTRY_DSN");
        let run_id = Uuid::new_v4().simple().to_string();

        let settings = Settings {
            database_url,
            redis_url,
            jwt_secret,
            sentry_dsn,
            run_id,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the loaded settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.database_url.contains("://") {
            return Err(ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: self.database_url.clone(),
                expected: "a connection URL such as postgres://host/db".to_string(),
            });
        }

        if self.jwt_secret.expose().is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "jwt_secret".to_string(),
                reason: "secret cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn required<F>(lookup: &F, var: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            var: var.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_all_fields_loaded() {
        let env = vars(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("REDIS_URL", "redis://cache:6379/1"),
            ("JWT_SECRET", "s3cret"),
            ("SENTRY_DSN", "https://sentry.example.com/42"),
        ]);
        let settings = Settings::from_lookup(|k| env.get(k).cloned()).unwrap();

        assert_eq!(settings.database_url, "postgres://localhost/app");
        assert_eq!(settings.redis_url, "redis://cache:6379/1");
        assert_eq!(settings.jwt_secret.expose(), "s3cret");
        assert_eq!(
            settings.sentry_dsn.as_deref(),
            Some("https://sentry.example.com/42")
        );
        assert_eq!(settings.run_id.len(), 32);
    }

    #[test]
    fn test_optional_fields_default() {
        let env = vars(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("JWT_SECRET", "s3cret"),
        ]);
        let settings = Settings::from_lookup(|k| env.get(k).cloned()).unwrap();

        assert_eq!(settings.redis_url, DEFAULT_REDIS_URL);
        assert!(settings.sentry_dsn.is_none());
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let env = vars(&[("DATABASE_URL", "postgres://localhost/app")]);
        let result = Settings::from_lookup(|k| env.get(k).cloned());

        match result {
            Err(ConfigError::MissingRequired { var }) => assert_eq!(var, "JWT_SECRET"),
            other => panic!("expected MissingRequired, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_database_url_is_fatal() {
        let env = vars(&[("JWT_SECRET", "s3cret")]);
        let result = Settings::from_lookup(|k| env.get(k).cloned());

        assert!(matches!(
            result,
            Err(ConfigError::MissingRequired { var }) if var == "DATABASE_URL"
        ));
    }

    #[test]
    fn test_malformed_database_url_rejected() {
        let env = vars(&[
            ("DATABASE_URL", "not-a-url"),
            ("JWT_SECRET", "s3cret"),
        ]);
        let result = Settings::from_lookup(|k| env.get(k).cloned());

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field, .. }) if field == "database_url"
        ));
    }

    #[test]
    fn test_run_id_is_generated_fresh() {
        let env = vars(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("JWT_SECRET", "s3cret"),
        ]);
        let a = Settings::from_lookup(|k| env.get(k).cloned()).unwrap();
        let b = Settings::from_lookup(|k| env.get(k).cloned()).unwrap();

        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(****)");
        assert_eq!(format!("{}", secret), "****");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        env::set_var("DATABASE_URL", "postgres://localhost/env_test");
        env::set_var("JWT_SECRET", "env-secret");
        env::remove_var("REDIS_URL");
        env::remove_var("SENTRY_DSN");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.database_url, "postgres://localhost/env_test");
        assert_eq!(settings.redis_url, DEFAULT_REDIS_URL);

        env::remove_var("DATABASE_URL");
        env::remove_var("JWT_SECRET");
    }
}

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Which job pipeline the process should try to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    Postgres,
    Inline,
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub broker: BrokerMode,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub broker_timeout_secs: u64,
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub jobs: JobsConfig,
    pub admin: Option<AdminSeed>,
    pub environment: String,
    /// Whether 500 responses carry the underlying error text.
    pub expose_internal_errors: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "onboarding".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "onboarding-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60 * 24),
        };
        let broker = match std::env::var("JOB_BROKER").as_deref() {
            Ok("inline") => BrokerMode::Inline,
            Ok("postgres") | Err(_) => BrokerMode::Postgres,
            Ok(other) => anyhow::bail!("unknown JOB_BROKER value: {other}"),
        };
        let jobs = JobsConfig {
            broker,
            workers: env_parse("JOB_WORKERS", 2),
            poll_interval_ms: env_parse("JOB_POLL_INTERVAL_MS", 500),
            broker_timeout_secs: env_parse("BROKER_TIMEOUT_SECS", 30),
        };
        let admin = match (std::env::var("ADMIN_EMAIL"), std::env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(AdminSeed { email, password }),
            _ => None,
        };
        let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "development".into());
        let expose_internal_errors =
            env_parse("EXPOSE_INTERNAL_ERRORS", environment != "production");

        Ok(Self {
            database_url,
            jwt,
            jobs,
            admin,
            environment,
            expose_internal_errors,
        })
    }

    /// Settings used by unit tests and `AppState::fake`.
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            jobs: JobsConfig {
                broker: BrokerMode::Inline,
                workers: 1,
                poll_interval_ms: 50,
                broker_timeout_secs: 5,
            },
            admin: None,
            environment: "development".into(),
            expose_internal_errors: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parse_falls_back_on_missing_or_garbled_values() {
        std::env::set_var("ONBOARDING_TEST_WORKERS", "4");
        assert_eq!(env_parse("ONBOARDING_TEST_WORKERS", 2usize), 4);
        std::env::set_var("ONBOARDING_TEST_WORKERS", "many");
        assert_eq!(env_parse("ONBOARDING_TEST_WORKERS", 2usize), 2);
        assert_eq!(env_parse("ONBOARDING_TEST_UNSET", 9u64), 9);
    }

    // The only test that touches these variables, so nothing races it.
    #[test]
    fn production_hides_internal_errors_unless_overridden() {
        std::env::set_var("JWT_SECRET", "from-env");
        std::env::set_var("APP_ENV", "production");
        std::env::remove_var("EXPOSE_INTERNAL_ERRORS");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.jwt.secret, "from-env");
        assert!(!cfg.expose_internal_errors);

        std::env::set_var("EXPOSE_INTERNAL_ERRORS", "true");
        assert!(AppConfig::from_env().unwrap().expose_internal_errors);

        std::env::set_var("APP_ENV", "development");
        std::env::remove_var("EXPOSE_INTERNAL_ERRORS");
        assert!(AppConfig::from_env().unwrap().expose_internal_errors);
    }
}

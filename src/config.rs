use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingStoreMode {
    Postgres,
    Memory,
}

impl BillingStoreMode {
    fn from_env(value: Option<String>) -> Self {
        match value
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => Self::Memory,
            _ => Self::Postgres,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

/// Knobs the billing services need, detached from the rest of the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPolicy {
    /// Periods billed per lease in one run before the rest is deferred.
    pub max_periods_per_lease: u32,
    /// Days after the period start an issued invoice falls due.
    pub invoice_due_days: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub billing_store: BillingStoreMode,
    pub billing_seed_file: Option<String>,
    pub internal_api_key: Option<String>,
    pub billing_scheduler_enabled: bool,
    pub billing_run_interval_minutes: u64,
    pub billing_max_periods_per_lease: u32,
    pub invoice_due_days: u32,
    pub billing_manager_roles: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rentledger API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            billing_store: BillingStoreMode::from_env(env_opt("BILLING_STORE")),
            billing_seed_file: env_opt("BILLING_SEED_FILE"),
            internal_api_key: env_opt("INTERNAL_API_KEY"),
            billing_scheduler_enabled: env_parse_bool_or("BILLING_SCHEDULER_ENABLED", true),
            billing_run_interval_minutes: env_parse_or("BILLING_RUN_INTERVAL_MINUTES", 60),
            billing_max_periods_per_lease: env_parse_or("BILLING_MAX_PERIODS_PER_LEASE", 24),
            invoice_due_days: env_parse_or("INVOICE_DUE_DAYS", 5),
            billing_manager_roles: parse_csv(&env_or(
                "BILLING_MANAGER_ROLES",
                "owner_admin,accountant",
            )),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn billing_policy(&self) -> BillingPolicy {
        BillingPolicy {
            max_periods_per_lease: self.billing_max_periods_per_lease.max(1),
            invoice_due_days: self.invoice_due_days,
        }
    }

    pub fn billing_run_interval_seconds(&self) -> u64 {
        self.billing_run_interval_minutes.max(1) * 60
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv, AppConfig, BillingStoreMode};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn parses_role_lists() {
        assert_eq!(
            parse_csv(" owner_admin, ,accountant "),
            vec!["owner_admin".to_string(), "accountant".to_string()]
        );
    }

    #[test]
    fn store_mode_defaults_to_postgres() {
        assert_eq!(BillingStoreMode::from_env(None), BillingStoreMode::Postgres);
        assert_eq!(
            BillingStoreMode::from_env(Some(" Memory ".to_string())),
            BillingStoreMode::Memory
        );
        assert_eq!(
            BillingStoreMode::from_env(Some("sqlite".to_string())),
            BillingStoreMode::Postgres
        );
    }

    #[test]
    fn billing_policy_keeps_a_positive_cap() {
        let mut config = AppConfig::from_env();
        config.billing_max_periods_per_lease = 0;
        config.invoice_due_days = 7;
        let policy = config.billing_policy();
        assert_eq!(policy.max_periods_per_lease, 1);
        assert_eq!(policy.invoice_due_days, 7);

        config.billing_run_interval_minutes = 0;
        assert_eq!(config.billing_run_interval_seconds(), 60);
    }
}

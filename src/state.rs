use std::{fs, sync::Arc};

use sqlx::PgPool;

use crate::{
    config::{AppConfig, BillingStoreMode},
    db::create_pool,
    repository::{
        billing_store::BillingStore,
        memory_billing_store::{MemoryBillingStore, MemorySeed},
        pg_billing_store::PgBillingStore,
    },
    services::clock::{Clock, SystemClock},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub billing_store: Arc<dyn BillingStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let roles = config.billing_manager_roles.clone();

        let (db_pool, billing_store): (Option<PgPool>, Arc<dyn BillingStore>) =
            match config.billing_store {
                BillingStoreMode::Memory => (None, Arc::new(memory_store(&config, roles)?)),
                BillingStoreMode::Postgres => match create_pool(&config)? {
                    Some(pool) => (
                        Some(pool.clone()),
                        Arc::new(PgBillingStore::new(pool, roles)),
                    ),
                    None => {
                        tracing::warn!(
                            "BILLING_STORE=postgres but DATABASE_URL is not set; using the volatile memory store"
                        );
                        (None, Arc::new(memory_store(&config, roles)?))
                    }
                },
            };

        tracing::info!(
            billing_store = if db_pool.is_some() {
                BillingStoreMode::Postgres.as_str()
            } else {
                BillingStoreMode::Memory.as_str()
            },
            "Billing store ready"
        );

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            billing_store,
            clock: Arc::new(SystemClock),
        })
    }

    /// State over an explicit store and clock, without touching the
    /// environment's database settings.
    pub fn with_store(
        config: AppConfig,
        billing_store: Arc<dyn BillingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db_pool: None,
            billing_store,
            clock,
        }
    }
}

/// Memory store, seeded from `BILLING_SEED_FILE` when one is configured.
fn memory_store(
    config: &AppConfig,
    roles: Vec<String>,
) -> Result<MemoryBillingStore, Box<dyn std::error::Error>> {
    let Some(path) = config.billing_seed_file.as_deref() else {
        return Ok(MemoryBillingStore::new(roles));
    };
    let seed = MemorySeed::from_json(&fs::read_to_string(path)?)?;
    tracing::info!(
        seed_file = path,
        leases = seed.leases.len(),
        charges = seed.charges.len(),
        "Seeded memory billing store"
    );
    Ok(MemoryBillingStore::with_seed(roles, seed))
}

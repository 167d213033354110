use anyhow::Result;

use harvester::config::Config;
use harvester::storage;

/// Create tables and indexes
pub async fn migrate(config: &Config) -> Result<()> {
    let pool = storage::create_pool(&config.database)?;
    storage::migrate(&pool).await?;
    println!("Schema is up to date");
    Ok(())
}

use anyhow::Result;
use chrono::{TimeZone, Utc};

use harvester::clock::{Clock, SystemClock};
use harvester::config::Config;
use harvester::storage::{self, NewSession, PostgresSessionRepository, SessionRepository};

fn repository(config: &Config) -> Result<PostgresSessionRepository> {
    let pool = storage::create_pool(&config.database)?;
    Ok(PostgresSessionRepository::new(pool))
}

fn format_micros(micros: i64) -> String {
    match Utc.timestamp_micros(micros).single() {
        Some(at) if micros > 0 => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => "-".to_string(),
    }
}

/// Register or refresh a credential
pub async fn apply_session(
    config: &Config,
    account: &str,
    cookie: &str,
    slot: i32,
    agent: &str,
) -> Result<()> {
    let repo = repository(config)?;
    let session = repo
        .apply(&NewSession {
            account: account.to_string(),
            cookie: cookie.to_string(),
            slot,
            node: config.scheduler.storage_node,
            agent: agent.to_string(),
        })
        .await?;

    tracing::info!(account = %session.account, status = session.status.as_str(), "Session applied");
    println!("{} {} ({})", session.id, session.account, session.status.as_str());
    if let Some(proxy) = session.egress(config.fetcher.proxy_base_port) {
        println!("  egress: {proxy}");
    }
    Ok(())
}

/// Report whether the next default-pool session is usable
pub async fn current_session(config: &Config) -> Result<()> {
    let repo = repository(config)?;
    let now = SystemClock.now_micros();

    match repo.current(config.scheduler.storage_node).await? {
        Some(session) if session.is_blocked(now) => {
            println!(
                "{} is cooling down until {}",
                session.account,
                format_micros(session.unblocked_at)
            );
        }
        Some(session) => {
            println!(
                "{} is usable (last used {})",
                session.account,
                format_micros(session.timestamp)
            );
        }
        None => println!("No session in the default pool"),
    }
    Ok(())
}

/// List the sessions of the configured node
pub async fn list_sessions(config: &Config) -> Result<()> {
    let repo = repository(config)?;
    let now = SystemClock.now_micros();

    println!(
        "{:<24} {:<8} {:>5} {:<20} {:<20}",
        "account", "status", "slot", "last used", "blocked until"
    );
    for session in repo.list(config.scheduler.storage_node).await? {
        let blocked = if session.is_blocked(now) {
            format_micros(session.unblocked_at)
        } else {
            "-".to_string()
        };
        println!(
            "{:<24} {:<8} {:>5} {:<20} {:<20}",
            session.account,
            session.status.as_str(),
            session.slot,
            format_micros(session.timestamp),
            blocked
        );
    }
    Ok(())
}

use anyhow::Result;

use harvester::models::TaskStatus;
use harvester::scheduler::{CrawlScheduler, TaskFamily, TickReport};
use harvester::storage::StatusFilter;

/// Run one process tick for a family
pub async fn process(scheduler: &CrawlScheduler, family: &str, limit: Option<usize>) -> Result<()> {
    let family = TaskFamily::from_name(family)?;
    let limit = limit.unwrap_or_else(|| scheduler.limits(&family).process_limit);
    let report = scheduler.process(&family, limit).await?;
    print_report("process", &report);
    Ok(())
}

/// Run one flush tick for a family
pub async fn flush(scheduler: &CrawlScheduler, family: &str, limit: Option<usize>) -> Result<()> {
    let family = TaskFamily::from_name(family)?;
    let limit = limit.unwrap_or_else(|| scheduler.limits(&family).flush_limit);
    let report = scheduler.flush(&family, limit).await?;
    print_report("flush", &report);
    Ok(())
}

/// Handle one task by id
pub async fn process_task(scheduler: &CrawlScheduler, family: &str, task_id: &str) -> Result<()> {
    let family = TaskFamily::from_name(family)?;
    let outcome = scheduler.process_task(&family, task_id).await?;
    println!("{task_id}: {}", outcome.as_str());
    Ok(())
}

/// Create or reactivate a task
///
/// For the posts family, `target` is the account name when `remote_id` is
/// given, and the user row is created if needed.
pub async fn apply_task(
    scheduler: &CrawlScheduler,
    family: &str,
    target: &str,
    remote_id: Option<i64>,
) -> Result<()> {
    let family = TaskFamily::from_name(family)?;
    let outcome = match remote_id {
        Some(remote_id) if family == TaskFamily::POSTS => {
            scheduler.apply_user_posts(target, remote_id).await?
        }
        _ => scheduler.apply(&family, target).await?,
    };
    println!("{} ({})", outcome.id(), outcome.as_str());
    Ok(())
}

/// Apply replies crawls for the most active repliers' recent posts
pub async fn seed_replies(scheduler: &CrawlScheduler, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or(scheduler.config().seed_limit);
    let applied = scheduler.seed_replies(limit).await?;
    println!("Applied {applied} replies tasks");
    Ok(())
}

/// Print task counts per family and status
pub async fn count_tasks(scheduler: &CrawlScheduler, family: Option<&str>) -> Result<()> {
    let families = match family {
        Some(name) => vec![TaskFamily::from_name(name)?],
        None => TaskFamily::ALL.to_vec(),
    };
    let statuses = [
        TaskStatus::Pending,
        TaskStatus::FlushPending,
        TaskStatus::Done,
        TaskStatus::Invalid,
        TaskStatus::Deferred,
    ];

    println!("{:<12} {:>14} {:>10}", "family", "status", "tasks");
    for family in &families {
        for status in statuses {
            let count = scheduler
                .count_tasks(family, &StatusFilter::Is(status))
                .await?;
            println!("{:<12} {:>14} {:>10}", family.name, status.as_str(), count);
        }
        let admitted = scheduler.admission(family).cardinality().await?;
        println!("{:<12} {:>14} {:>10}", family.name, "admitted", admitted);
    }
    Ok(())
}

fn print_report(pass: &str, report: &TickReport) {
    println!("{} {}: {} candidates", report.family, pass, report.candidates);
    let rows = [
        ("advanced", report.advanced),
        ("stalled", report.stalled),
        ("exhausted", report.exhausted),
        ("flushed", report.flushed),
        ("recent", report.recent),
        ("locked", report.locked),
        ("entity gone", report.entity_gone),
        ("invalid", report.invalid),
        ("vanished", report.vanished),
        ("session failures", report.session_failures),
        ("fetch failures", report.fetch_failures),
        ("errors", report.errors),
        ("evicted", report.evicted),
    ];
    for (label, count) in rows.iter().filter(|(_, count)| *count > 0) {
        println!("  {label}: {count}");
    }
    if report.aborted {
        println!("  aborted: no usable session");
    }
}

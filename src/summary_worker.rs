// Calendar-driven jobs: the end-of-day summary on a cron schedule, and the local-midnight
// rollover of daily statistics. Both use local time.

use crate::analytics::local_date;
use crate::context::AppContext;
use chrono::{DateTime, Local, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SummaryWorkerConfig {
    pub enabled: bool,
    /// Cron expression with a seconds field, e.g. "0 0 21 * * *".
    pub schedule: String,
}

/// Spawns the summary scheduler and the midnight rollover task.
pub fn spawn(ctx: Arc<AppContext>, config: SummaryWorkerConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let rollover = tokio::spawn(midnight_rollover(Arc::clone(&ctx)));
        if config.enabled {
            run(ctx, config).await;
        } else {
            info!("daily summary disabled");
        }
        let _ = rollover.await;
    })
}

#[instrument(skip(ctx), fields(schedule = %config.schedule))]
async fn run(ctx: Arc<AppContext>, config: SummaryWorkerConfig) {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(cron_scheduler(config.schedule.clone(), tx));

    while rx.recv().await.is_some() {
        if let Err(e) = send_daily_summary(&ctx, Utc::now()).await {
            warn!(error = %e, operation = "daily_summary", "daily summary failed");
        }
    }
}

/// Composes and sends the end-of-day report.
pub async fn send_daily_summary(ctx: &AppContext, now: DateTime<Utc>) -> anyhow::Result<()> {
    let (subject, body) = ctx.compose_daily_summary(now).await;
    ctx.notify(&subject, &body).await?;
    info!(subject = %subject, "daily summary sent");
    Ok(())
}

/// Sends on `tx` at each time matching the cron expression.
async fn cron_scheduler(schedule: String, tx: tokio::sync::mpsc::Sender<()>) {
    let Ok(schedule) = cron::Schedule::from_str(&schedule) else {
        warn!(cron = %schedule, "invalid summary schedule; daily summary will not run");
        return;
    };
    loop {
        let now = Local::now();
        let Some(next) = schedule.after(&now).next() else {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            continue;
        };
        let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
        tokio::time::sleep(delay).await;
        if tx.send(()).await.is_err() {
            break;
        }
    }
}

/// Closes the day at each local midnight even when no samples arrive, then saves state.
async fn midnight_rollover(ctx: Arc<AppContext>) {
    let Ok(schedule) = cron::Schedule::from_str("0 0 0 * * *") else {
        return;
    };
    loop {
        let now = Local::now();
        let Some(next) = schedule.after(&now).next() else {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            continue;
        };
        let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
        tokio::time::sleep(delay).await;

        // Sleeping can end a hair early; never roll into the day we just left.
        let now = Utc::now().max(next.with_timezone(&Utc));
        if let Some(closed) = ctx.analytics.roll_over(local_date(now)).await {
            info!(date = %closed.date, peak_power = closed.peak_power.value, "daily statistics rolled over");
            if let Err(e) = ctx.save_state().await {
                warn!(error = %e, operation = "save_state", "failed to persist after rollover");
            }
        }
    }
}

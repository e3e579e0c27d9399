//! Ghost-lock maintenance loop: periodically releases outbox
//! rows whose lock has outlived `lock_ttl`, assumed abandoned by a
//! dispatcher that crashed mid-publish.

use std::time::Duration;

use tracing::{debug, error, info};

pub async fn run_maintenance_loop(pool: sqlx::PgPool, lock_ttl: chrono::Duration, every: Duration) {
    let running = std::sync::Arc::new(tokio::sync::Mutex::new(()));
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let Ok(_guard) = running.clone().try_lock_owned() else {
            debug!("outbox maintenance tick skipped: previous tick still running");
            continue;
        };
        match access_db::outbox::release_ghost_locks(&pool, lock_ttl).await {
            Ok(0) => {}
            Ok(released) => info!(released, "outbox maintenance released ghost-locked rows"),
            Err(err) => error!(error = %err, "outbox maintenance sweep errored"),
        }
    }
}

//! Remote change listener task.
//!
//! Subscribes to the server-pushed change channel and turns notifications
//! into sync triggers. Missed or duplicate notifications are harmless: the
//! worker ignores versions it already has, and an extra cycle is absorbed
//! as a no-op.

use crate::config::RetryConfig;
use crate::transport::ChangeFeed;
use crate::worker::Trigger;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Runs the listener until shutdown or until the worker goes away.
///
/// Subscription failures and closed channels reconnect with the same
/// bounded exponential backoff the sync cycle uses.
pub(crate) async fn run_listener(
    feed: Arc<dyn ChangeFeed>,
    entity_id: String,
    triggers: mpsc::UnboundedSender<Trigger>,
    shutdown: watch::Receiver<bool>,
    retry: RetryConfig,
) {
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        if failures > 0 {
            let delay = retry.delay_for_attempt(failures);
            tracing::warn!(?delay, failures, "change feed reconnecting");
            let mut stop = shutdown.clone();
            tokio::select! {
                _ = stop.wait_for(|stop| *stop) => return,
                () = tokio::time::sleep(delay) => {}
            }
        }

        let mut stop = shutdown.clone();
        let subscribed = tokio::select! {
            _ = stop.wait_for(|stop| *stop) => return,
            result = feed.subscribe(&entity_id) => result,
        };

        let mut rx = match subscribed {
            Ok(rx) => rx,
            Err(err) => {
                failures += 1;
                tracing::warn!(error = %err, "change feed subscribe failed");
                continue;
            }
        };

        tracing::debug!(entity_id = %entity_id, "change feed subscribed");

        loop {
            let mut stop = shutdown.clone();
            let notification = tokio::select! {
                _ = stop.wait_for(|stop| *stop) => return,
                notification = rx.recv() => notification,
            };

            match notification {
                Some(change) => {
                    // A delivered message proves the channel is healthy.
                    failures = 0;
                    tracing::debug!(version = change.version, "remote change notified");
                    if triggers
                        .send(Trigger::RemoteChange {
                            version: change.version,
                        })
                        .is_err()
                    {
                        // Worker is gone; nothing left to notify.
                        return;
                    }
                }
                None => {
                    failures += 1;
                    tracing::debug!("change feed closed; resubscribing");
                    break;
                }
            }
        }
    }
}

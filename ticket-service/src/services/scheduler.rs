use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::TicketService;

/// Periodically expires tickets whose sale window has closed, until `shutdown` is cancelled.
pub fn spawn_expiry_scheduler(
    tickets: TicketService,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_seconds = every.as_secs(), "Ticket expiry scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Ticket expiry scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match tickets.expire_overdue_now().await {
                        Ok(expired) => tracing::debug!(expired, "Expiry sweep complete"),
                        Err(e) => tracing::error!(error = %e, "Expiry sweep failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtos::ticket::CreateTicketRequest;
    use crate::models::TicketStatus;
    use crate::services::InMemoryTicketRepository;
    use crate::utils::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn sweeps_on_first_tick_and_stops_on_cancel() {
        let clock = ManualClock::new(Utc.timestamp_millis_opt(1_000).unwrap());
        let tickets = TicketService::new(
            Arc::new(InMemoryTicketRepository::new()),
            Arc::new(clock.clone()),
        );
        let ticket = tickets
            .create(CreateTicketRequest {
                event_id: "event-1".to_string(),
                ticket_type: "VIP".to_string(),
                price: 10.0,
                quota: 1,
                description: None,
                sale_start: 0,
                sale_end: 2_000,
            })
            .await
            .unwrap();

        clock.set(Utc.timestamp_millis_opt(5_000).unwrap());

        let shutdown = CancellationToken::new();
        let handle = spawn_expiry_scheduler(tickets.clone(), Duration::from_secs(3600), shutdown.clone());

        // The first tick fires immediately.
        for _ in 0..50 {
            if tickets.get(ticket.id).await.unwrap().status == TicketStatus::Expired {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tickets.get(ticket.id).await.unwrap().status, TicketStatus::Expired);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}

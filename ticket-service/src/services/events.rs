//! Purchase notifications handed off to a background listener.

use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{Ticket, TicketType};

#[derive(Debug, Clone)]
pub struct TicketPurchased {
    pub ticket_id: Uuid,
    pub event_id: String,
    pub ticket_type: TicketType,
    pub amount: i32,
    pub buyer: Uuid,
}

impl TicketPurchased {
    pub fn new(ticket: &Ticket, amount: i32, buyer: Uuid) -> Self {
        Self {
            ticket_id: ticket.id,
            event_id: ticket.event_id.clone(),
            ticket_type: ticket.ticket_type,
            amount,
            buyer,
        }
    }
}

/// Sending half of the purchase event queue.
///
/// Publishing never blocks a purchase: when the queue is full the event is dropped and counted.
#[derive(Clone)]
pub struct PurchaseEvents {
    tx: mpsc::Sender<TicketPurchased>,
}

impl PurchaseEvents {
    pub fn channel(queue_size: usize) -> (Self, mpsc::Receiver<TicketPurchased>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: TicketPurchased) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(ticket_id = %event.ticket_id, "Purchase event queue full, dropping event");
                counter!("ticket_purchase_events_dropped_total").increment(1);
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(ticket_id = %event.ticket_id, "Purchase event listener stopped");
                counter!("ticket_purchase_events_dropped_total").increment(1);
            }
        }
    }
}

/// Consume purchase events until `shutdown` fires or every sender is gone.
///
/// Events already queued at shutdown are still handled. Resolves to the number handled.
pub fn spawn_purchase_listener(
    mut rx: mpsc::Receiver<TicketPurchased>,
    shutdown: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut handled = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        record(&event);
                        handled += 1;
                    }
                    tracing::info!(handled, "Purchase listener shutting down");
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => {
                        record(&event);
                        handled += 1;
                    }
                    None => {
                        tracing::info!(handled, "Purchase event channel closed");
                        break;
                    }
                }
            }
        }

        handled
    })
}

fn record(event: &TicketPurchased) {
    tracing::info!(
        ticket_id = %event.ticket_id,
        event_id = %event.event_id,
        ticket_type = event.ticket_type.as_str(),
        amount = event.amount,
        user_id = %event.buyer,
        "Ticket purchase event received"
    );
    counter!("ticket_purchase_events_total", "ticket_type" => event.ticket_type.as_str())
        .increment(u64::try_from(event.amount).unwrap_or(0));
}

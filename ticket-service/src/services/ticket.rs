use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    dtos::ticket::{CreateTicketRequest, UpdateTicketRequest},
    models::{
        ticket::{validate_price, validate_quota, validate_sale_window, NewTicket},
        Ticket, TicketStatus, TicketType,
    },
    services::{
        error::TicketError,
        events::{PurchaseEvents, TicketPurchased},
        TicketRepository,
    },
    utils::Clock,
};

/// Ticket lifecycle over a `TicketRepository`.
#[derive(Clone)]
pub struct TicketService {
    repo: Arc<dyn TicketRepository>,
    clock: Arc<dyn Clock>,
    events: Option<PurchaseEvents>,
}

impl TicketService {
    pub fn new(repo: Arc<dyn TicketRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            events: None,
        }
    }

    /// Publish a `TicketPurchased` event after every successful purchase.
    pub fn with_events(mut self, events: PurchaseEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn repository(&self) -> &Arc<dyn TicketRepository> {
        &self.repo
    }

    pub async fn list(&self) -> Result<Vec<Ticket>, TicketError> {
        Ok(self.repo.list().await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Ticket, TicketError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(TicketError::NotFound(id))
    }

    pub async fn list_by_event(&self, event_id: &str) -> Result<Vec<Ticket>, TicketError> {
        Ok(self.repo.list_by_event(event_id).await?)
    }

    pub async fn list_available(&self) -> Result<Vec<Ticket>, TicketError> {
        Ok(self.repo.list_available(self.clock.now_millis()).await?)
    }

    #[instrument(skip(self, req), fields(event_id = %req.event_id))]
    pub async fn create(&self, req: CreateTicketRequest) -> Result<Ticket, TicketError> {
        let ticket = Ticket::from_new(to_new_ticket(req)?);
        self.repo.insert(&ticket).await?;

        tracing::info!(ticket_id = %ticket.id, "Ticket created");
        counter!("tickets_created_total").increment(1);
        Ok(ticket)
    }

    /// Validate every entry first; nothing is stored unless all are valid.
    #[instrument(skip(self, reqs), fields(count = reqs.len()))]
    pub async fn create_batch(
        &self,
        reqs: Vec<CreateTicketRequest>,
    ) -> Result<Vec<Ticket>, TicketError> {
        let tickets = reqs
            .into_iter()
            .enumerate()
            .map(|(i, req)| {
                to_new_ticket(req)
                    .map(Ticket::from_new)
                    .map_err(|e| TicketError::Invalid(format!("Ticket {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.repo.insert_many(&tickets).await?;

        tracing::info!(count = tickets.len(), "Ticket batch created");
        counter!("tickets_created_total").increment(tickets.len() as u64);
        Ok(tickets)
    }

    /// Partial update. The sold count is preserved; the store recomputes the remaining quota
    /// from its own row, so a purchase racing this update is never lost.
    #[instrument(skip(self, req))]
    pub async fn update(&self, id: Uuid, req: UpdateTicketRequest) -> Result<Ticket, TicketError> {
        let mut ticket = self.get(id).await?;

        if ticket.is_purchased_or_used() {
            return Err(TicketError::Conflict(
                "Cannot update ticket that has been purchased or used".to_string(),
            ));
        }

        if let Some(event_id) = req.event_id {
            ticket.event_id = event_id;
        }
        if let Some(ticket_type) = req.ticket_type {
            ticket.ticket_type = ticket_type.parse::<TicketType>()?;
        }
        if let Some(price) = req.price {
            validate_price(price)?;
            ticket.price = price;
        }
        if let Some(quota) = req.quota {
            validate_quota(quota)?;
            let sold = ticket.sold();
            if quota < sold {
                return Err(TicketError::Invalid(format!(
                    "Quota cannot be below the {} tickets already sold",
                    sold
                )));
            }
            ticket.quota = quota;
        }
        if req.description.is_some() {
            ticket.description = req.description;
        }
        let sale_start = req.sale_start.unwrap_or(ticket.sale_start);
        let sale_end = req.sale_end.unwrap_or(ticket.sale_end);
        validate_sale_window(sale_start, sale_end)?;
        ticket.sale_start = sale_start;
        ticket.sale_end = sale_end;

        let updated = self
            .repo
            .update(&ticket, ticket.status)
            .await?
            .ok_or_else(|| TicketError::Conflict("Ticket was modified concurrently".to_string()))?;

        tracing::info!(ticket_id = %id, "Ticket updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, id: Uuid, status: &str) -> Result<Ticket, TicketError> {
        let status: TicketStatus = status.parse()?;

        if status == TicketStatus::Available {
            let current = self.get(id).await?;
            if current.remaining_quota == 0 {
                return Err(TicketError::Invalid(
                    "Cannot mark ticket as available with zero quota".to_string(),
                ));
            }
            // A sell-out between the read and here flips the status, failing the compare.
            if !self
                .repo
                .set_status(id, status, Some(current.status))
                .await?
            {
                return Err(TicketError::Conflict(
                    "Ticket was modified concurrently".to_string(),
                ));
            }
        } else if !self.repo.set_status(id, status, None).await? {
            return Err(TicketError::NotFound(id));
        }

        tracing::info!(ticket_id = %id, status = %status, "Ticket status updated");
        counter!("ticket_status_updates_total", "status" => status.as_str()).increment(1);
        self.get(id).await
    }

    /// Buy `amount` tickets at `timestamp` (epoch millis, default now) on behalf of `buyer`.
    #[instrument(skip(self))]
    pub async fn purchase(
        &self,
        id: Uuid,
        amount: i32,
        timestamp: Option<i64>,
        buyer: Uuid,
    ) -> Result<Ticket, TicketError> {
        if amount < 1 {
            return Err(TicketError::Invalid("Amount must be positive".to_string()));
        }

        let now_ms = timestamp.unwrap_or_else(|| self.clock.now_millis());

        let started = Instant::now();
        let purchased = self.repo.decrement_quota(id, amount, buyer, now_ms).await;
        histogram!("ticket_purchase_duration_seconds").record(started.elapsed().as_secs_f64());

        if let Some(ticket) = purchased? {
            tracing::info!(ticket_id = %id, user_id = %buyer, amount, "Ticket purchased");
            counter!("tickets_purchased_total").increment(amount as u64);
            if let Some(events) = &self.events {
                events.publish(TicketPurchased::new(&ticket, amount, buyer));
            }
            return Ok(ticket);
        }

        // The conditional update refused; report why.
        let ticket = self.get(id).await?;
        if !ticket.is_available_for_purchase(now_ms) {
            return Err(TicketError::Invalid(
                "Ticket is not available for purchase".to_string(),
            ));
        }
        Err(TicketError::Invalid("Not enough tickets available".to_string()))
    }

    /// Mark a ticket USED at the venue.
    #[instrument(skip(self))]
    pub async fn validate(&self, id: Uuid) -> Result<Ticket, TicketError> {
        let ticket = self.get(id).await?;

        match ticket.status {
            TicketStatus::Used => {
                return Err(TicketError::Invalid(
                    "Ticket has already been used".to_string(),
                ))
            }
            TicketStatus::Expired => {
                return Err(TicketError::Invalid("Ticket has expired".to_string()))
            }
            _ => {}
        }

        if !self
            .repo
            .set_status(id, TicketStatus::Used, Some(ticket.status))
            .await?
        {
            return Err(TicketError::Conflict(
                "Ticket was modified concurrently".to_string(),
            ));
        }

        tracing::info!(ticket_id = %id, "Ticket validated");
        counter!("ticket_status_updates_total", "status" => TicketStatus::Used.as_str())
            .increment(1);
        self.get(id).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), TicketError> {
        let ticket = self.get(id).await?;

        if ticket.is_purchased_or_used() {
            return Err(TicketError::Conflict(
                "Cannot delete ticket that has been purchased or used".to_string(),
            ));
        }

        if !self.repo.delete(id, ticket.status).await? {
            return Err(TicketError::Conflict(
                "Ticket was modified concurrently".to_string(),
            ));
        }

        tracing::info!(ticket_id = %id, "Ticket deleted");
        Ok(())
    }

    /// Expire AVAILABLE tickets whose sale window closed before `now_ms`.
    pub async fn expire_overdue(&self, now_ms: i64) -> Result<u64, TicketError> {
        let expired = self.repo.expire_overdue(now_ms).await?;

        if expired > 0 {
            tracing::info!(expired, "Expired overdue tickets");
            counter!("tickets_expired_total").increment(expired);
        }
        Ok(expired)
    }

    pub async fn expire_overdue_now(&self) -> Result<u64, TicketError> {
        self.expire_overdue(self.clock.now_millis()).await
    }

    /// Expire one ticket if it is AVAILABLE and its sale has ended; otherwise leave it as is.
    #[instrument(skip(self))]
    pub async fn expire(&self, id: Uuid) -> Result<Ticket, TicketError> {
        let ticket = self.get(id).await?;

        if !ticket.is_overdue(self.clock.now_millis()) {
            return Ok(ticket);
        }

        if self
            .repo
            .set_status(id, TicketStatus::Expired, Some(TicketStatus::Available))
            .await?
        {
            tracing::info!(ticket_id = %id, "Ticket expired");
            counter!("tickets_expired_total").increment(1);
        }
        self.get(id).await
    }
}

fn to_new_ticket(req: CreateTicketRequest) -> Result<NewTicket, TicketError> {
    let new = NewTicket {
        ticket_type: req.ticket_type.parse()?,
        event_id: req.event_id,
        price: req.price,
        quota: req.quota,
        description: req.description,
        sale_start: req.sale_start,
        sale_end: req.sale_end,
    };
    new.validate()?;
    Ok(new)
}

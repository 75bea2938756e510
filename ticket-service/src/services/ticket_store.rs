//! Persistence contract for tickets.

use async_trait::async_trait;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{Ticket, TicketStatus, TicketType};

use super::database::Database;
use super::error::StoreError;

#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError>;

    /// Insert all or none.
    async fn insert_many(&self, tickets: &[Ticket]) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Ticket>, StoreError>;

    async fn list(&self) -> Result<Vec<Ticket>, StoreError>;

    async fn list_by_event(&self, event_id: &str) -> Result<Vec<Ticket>, StoreError>;

    /// AVAILABLE, quota left, and `now_ms` inside the sale window.
    async fn list_available(&self, now_ms: i64) -> Result<Vec<Ticket>, StoreError>;

    /// Overwrite the editable fields if the status is still `expected`.
    ///
    /// The remaining quota is recomputed from the stored sold count, so purchases that land
    /// after `ticket` was read are kept. `None` when the status moved or the new quota no
    /// longer covers what has been sold.
    async fn update(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Set the status, optionally only when the current status is `expected`.
    async fn set_status(
        &self,
        id: Uuid,
        status: TicketStatus,
        expected: Option<TicketStatus>,
    ) -> Result<bool, StoreError>;

    /// Atomically take `amount` from the remaining quota if the ticket is purchasable at `now_ms`.
    /// Reaching zero marks it PURCHASED. `None` when the condition did not hold.
    async fn decrement_quota(
        &self,
        id: Uuid,
        amount: i32,
        buyer: Uuid,
        now_ms: i64,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Delete if the status is still `expected`.
    async fn delete(&self, id: Uuid, expected: TicketStatus) -> Result<bool, StoreError>;

    /// Mark AVAILABLE tickets whose sale ended before `now_ms` as EXPIRED.
    async fn expire_overdue(&self, now_ms: i64) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

// ==================== PostgreSQL ====================

#[derive(FromRow)]
struct TicketRow {
    ticket_id: Uuid,
    event_id: String,
    ticket_type: String,
    price: f64,
    quota: i32,
    remaining_quota: i32,
    description: Option<String>,
    sale_start: i64,
    sale_end: i64,
    status: String,
    user_id: Option<Uuid>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let ticket_type: TicketType = row
            .ticket_type
            .parse()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("{}", e)))?;
        let status: TicketStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("{}", e)))?;

        Ok(Ticket {
            id: row.ticket_id,
            event_id: row.event_id,
            ticket_type,
            price: row.price,
            quota: row.quota,
            remaining_quota: row.remaining_quota,
            description: row.description,
            sale_start: row.sale_start,
            sale_end: row.sale_end,
            status,
            user_id: row.user_id,
        })
    }
}

const TICKET_COLUMNS: &str = "ticket_id, event_id, ticket_type, price, quota, remaining_quota, \
     description, sale_start, sale_end, status, user_id";

fn into_tickets(rows: Vec<TicketRow>) -> Result<Vec<Ticket>, StoreError> {
    rows.into_iter().map(Ticket::try_from).collect()
}

/// `TicketRepository` over the `tickets` table.
#[derive(Clone)]
pub struct PgTicketRepository {
    db: Database,
}

impl PgTicketRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn insert_with<'e, E>(executor: E, ticket: &Ticket) -> Result<(), StoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO tickets (ticket_id, event_id, ticket_type, price, quota, remaining_quota,
                                 description, sale_start, sale_end, status, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(ticket.id)
        .bind(&ticket.event_id)
        .bind(ticket.ticket_type.as_str())
        .bind(ticket.price)
        .bind(ticket.quota)
        .bind(ticket.remaining_quota)
        .bind(&ticket.description)
        .bind(ticket.sale_start)
        .bind(ticket.sale_end)
        .bind(ticket.status.as_str())
        .bind(ticket.user_id)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError> {
        Self::insert_with(self.db.pool(), ticket).await
    }

    async fn insert_many(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;
        for ticket in tickets {
            Self::insert_with(&mut *tx, ticket).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE ticket_id = $1",
            TICKET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets ORDER BY sale_start, ticket_id",
            TICKET_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;

        into_tickets(rows)
    }

    async fn list_by_event(&self, event_id: &str) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE event_id = $1 ORDER BY sale_start, ticket_id",
            TICKET_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(self.db.pool())
        .await?;

        into_tickets(rows)
    }

    async fn list_available(&self, now_ms: i64) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            SELECT {} FROM tickets
            WHERE status = 'AVAILABLE' AND remaining_quota > 0
              AND sale_start <= $1 AND sale_end >= $1
            ORDER BY sale_start, ticket_id
            "#,
            TICKET_COLUMNS
        ))
        .bind(now_ms)
        .fetch_all(self.db.pool())
        .await?;

        into_tickets(rows)
    }

    async fn update(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<Option<Ticket>, StoreError> {
        // SET expressions see the pre-update row, so `quota - remaining_quota` is the live sold count.
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET event_id = $2, ticket_type = $3, price = $4, quota = $5,
                remaining_quota = $5 - (quota - remaining_quota),
                description = $6, sale_start = $7, sale_end = $8
            WHERE ticket_id = $1 AND status = $9 AND quota - remaining_quota <= $5
            RETURNING {}
            "#,
            TICKET_COLUMNS
        ))
        .bind(ticket.id)
        .bind(&ticket.event_id)
        .bind(ticket.ticket_type.as_str())
        .bind(ticket.price)
        .bind(ticket.quota)
        .bind(&ticket.description)
        .bind(ticket.sale_start)
        .bind(ticket.sale_end)
        .bind(expected.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: TicketStatus,
        expected: Option<TicketStatus>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = $2 WHERE ticket_id = $1 AND ($3::text IS NULL OR status = $3)",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(expected.map(|s| s.as_str()))
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn decrement_quota(
        &self,
        id: Uuid,
        amount: i32,
        buyer: Uuid,
        now_ms: i64,
    ) -> Result<Option<Ticket>, StoreError> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET remaining_quota = remaining_quota - $2,
                user_id = $3,
                status = CASE WHEN remaining_quota - $2 = 0 THEN 'PURCHASED' ELSE status END
            WHERE ticket_id = $1
              AND status = 'AVAILABLE'
              AND remaining_quota >= $2
              AND sale_start <= $4 AND sale_end >= $4
            RETURNING {}
            "#,
            TICKET_COLUMNS
        ))
        .bind(id)
        .bind(amount)
        .bind(buyer)
        .bind(now_ms)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn delete(&self, id: Uuid, expected: TicketStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tickets WHERE ticket_id = $1 AND status = $2")
            .bind(id)
            .bind(expected.as_str())
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_overdue(&self, now_ms: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'EXPIRED' WHERE status = 'AVAILABLE' AND sale_end < $1",
        )
        .bind(now_ms)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.db.health_check().await
    }
}

// ==================== In-memory ====================

/// In-memory `TicketRepository`; every conditional write holds the lock for its whole check-and-set.
#[derive(Default)]
pub struct InMemoryTicketRepository {
    tickets: Mutex<HashMap<Uuid, Ticket>>,
}

impl InMemoryTicketRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tickets(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Ticket>> {
        self.tickets.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sorted(mut tickets: Vec<Ticket>) -> Vec<Ticket> {
        tickets.sort_by(|a, b| a.sale_start.cmp(&b.sale_start).then(a.id.cmp(&b.id)));
        tickets
    }
}

#[async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError> {
        self.insert_many(std::slice::from_ref(ticket)).await
    }

    async fn insert_many(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
        let mut map = self.tickets();
        if let Some(dup) = tickets.iter().find(|t| map.contains_key(&t.id)) {
            return Err(StoreError::Duplicate(format!("ticket {}", dup.id)));
        }
        for ticket in tickets {
            map.insert(ticket.id, ticket.clone());
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(self.tickets().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Ticket>, StoreError> {
        Ok(Self::sorted(self.tickets().values().cloned().collect()))
    }

    async fn list_by_event(&self, event_id: &str) -> Result<Vec<Ticket>, StoreError> {
        Ok(Self::sorted(
            self.tickets()
                .values()
                .filter(|t| t.event_id == event_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_available(&self, now_ms: i64) -> Result<Vec<Ticket>, StoreError> {
        Ok(Self::sorted(
            self.tickets()
                .values()
                .filter(|t| t.is_available_for_purchase(now_ms))
                .cloned()
                .collect(),
        ))
    }

    async fn update(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut map = self.tickets();
        match map.get_mut(&ticket.id) {
            Some(existing) if existing.status == expected && ticket.quota >= existing.sold() => {
                let sold = existing.sold();
                existing.event_id = ticket.event_id.clone();
                existing.ticket_type = ticket.ticket_type;
                existing.price = ticket.price;
                existing.quota = ticket.quota;
                existing.remaining_quota = ticket.quota - sold;
                existing.description = ticket.description.clone();
                existing.sale_start = ticket.sale_start;
                existing.sale_end = ticket.sale_end;
                Ok(Some(existing.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: TicketStatus,
        expected: Option<TicketStatus>,
    ) -> Result<bool, StoreError> {
        let mut map = self.tickets();
        match map.get_mut(&id) {
            Some(ticket) if expected.map_or(true, |e| ticket.status == e) => {
                ticket.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn decrement_quota(
        &self,
        id: Uuid,
        amount: i32,
        buyer: Uuid,
        now_ms: i64,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut map = self.tickets();
        match map.get_mut(&id) {
            Some(ticket)
                if ticket.is_available_for_purchase(now_ms) && ticket.remaining_quota >= amount =>
            {
                ticket.remaining_quota -= amount;
                ticket.user_id = Some(buyer);
                if ticket.remaining_quota == 0 {
                    ticket.status = TicketStatus::Purchased;
                }
                Ok(Some(ticket.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid, expected: TicketStatus) -> Result<bool, StoreError> {
        let mut map = self.tickets();
        if map.get(&id).is_some_and(|t| t.status == expected) {
            map.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn expire_overdue(&self, now_ms: i64) -> Result<u64, StoreError> {
        let mut count = 0;
        for ticket in self.tickets().values_mut() {
            if ticket.is_overdue(now_ms) {
                ticket.status = TicketStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

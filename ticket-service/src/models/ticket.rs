//! Ticket model - a purchasable allocation for an event.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::error::TicketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketType {
    Regular,
    Vip,
}

impl TicketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::Regular => "REGULAR",
            TicketType::Vip => "VIP",
        }
    }
}

impl FromStr for TicketType {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGULAR" => Ok(TicketType::Regular),
            "VIP" => Ok(TicketType::Vip),
            _ => Err(TicketError::Invalid(format!("Invalid ticket type: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketStatus {
    Available,
    Purchased,
    Expired,
    Used,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Available => "AVAILABLE",
            TicketStatus::Purchased => "PURCHASED",
            TicketStatus::Expired => "EXPIRED",
            TicketStatus::Used => "USED",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = TicketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(TicketStatus::Available),
            "PURCHASED" => Ok(TicketStatus::Purchased),
            "EXPIRED" => Ok(TicketStatus::Expired),
            "USED" => Ok(TicketStatus::Used),
            _ => Err(TicketError::Invalid(format!("Invalid ticket status: {}", s))),
        }
    }
}

/// Ticket as stored and returned. Sale window bounds are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: String,
    pub ticket_type: TicketType,
    pub price: f64,
    pub quota: i32,
    pub remaining_quota: i32,
    pub description: Option<String>,
    pub sale_start: i64,
    pub sale_end: i64,
    pub status: TicketStatus,
    /// Buyer of the most recent purchase.
    pub user_id: Option<Uuid>,
}

/// Fields supplied when creating a ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub event_id: String,
    pub ticket_type: TicketType,
    pub price: f64,
    pub quota: i32,
    pub description: Option<String>,
    pub sale_start: i64,
    pub sale_end: i64,
}

pub(crate) fn validate_price(price: f64) -> Result<(), TicketError> {
    if !price.is_finite() || price < 0.0 {
        return Err(TicketError::Invalid("Price cannot be negative".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_quota(quota: i32) -> Result<(), TicketError> {
    if quota <= 0 {
        return Err(TicketError::Invalid("Quota must be positive".to_string()));
    }
    Ok(())
}

pub(crate) fn validate_sale_window(sale_start: i64, sale_end: i64) -> Result<(), TicketError> {
    if sale_end <= sale_start {
        return Err(TicketError::Invalid(
            "Sale end must be after sale start".to_string(),
        ));
    }
    Ok(())
}

impl NewTicket {
    pub fn validate(&self) -> Result<(), TicketError> {
        if self.event_id.trim().is_empty() {
            return Err(TicketError::Invalid("Event id is required".to_string()));
        }
        validate_price(self.price)?;
        validate_quota(self.quota)?;
        validate_sale_window(self.sale_start, self.sale_end)
    }
}

impl Ticket {
    /// Build an AVAILABLE ticket with its full quota remaining.
    pub fn from_new(new: NewTicket) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: new.event_id,
            ticket_type: new.ticket_type,
            price: new.price,
            quota: new.quota,
            remaining_quota: new.quota,
            description: new.description,
            sale_start: new.sale_start,
            sale_end: new.sale_end,
            status: TicketStatus::Available,
            user_id: None,
        }
    }

    pub fn sold(&self) -> i32 {
        self.quota - self.remaining_quota
    }

    pub fn is_available_for_purchase(&self, now_ms: i64) -> bool {
        self.status == TicketStatus::Available
            && self.remaining_quota > 0
            && now_ms >= self.sale_start
            && now_ms <= self.sale_end
    }

    pub fn is_purchased_or_used(&self) -> bool {
        matches!(self.status, TicketStatus::Purchased | TicketStatus::Used)
    }

    pub fn is_overdue(&self, now_ms: i64) -> bool {
        self.status == TicketStatus::Available && self.sale_end < now_ms
    }
}

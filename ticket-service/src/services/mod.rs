//! Services layer for ticket-service.
//!
//! Token handling, authentication, the ticket resource and the stores
//! backing them.

pub mod auth;
pub mod credential_store;
mod database;
pub mod error;
pub mod events;
pub mod jwt;
pub mod scheduler;
pub mod ticket;
pub mod ticket_store;

pub use auth::AuthService;
pub use credential_store::{CredentialStore, InMemoryCredentialStore, PgCredentialStore};
pub use database::Database;
pub use error::{AuthError, StoreError, TicketError};
pub use events::{spawn_purchase_listener, PurchaseEvents, TicketPurchased};
pub use jwt::{Claims, IssuedToken, TokenCodec, TokenError, TokenKind};
pub use scheduler::spawn_expiry_scheduler;
pub use ticket::TicketService;
pub use ticket_store::{InMemoryTicketRepository, PgTicketRepository, TicketRepository};

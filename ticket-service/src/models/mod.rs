pub mod identity;
pub mod refresh_token;
pub mod role;
pub mod ticket;

pub use identity::Identity;
pub use refresh_token::RefreshTokenRecord;
pub use role::Role;
pub use ticket::{Ticket, TicketStatus, TicketType};

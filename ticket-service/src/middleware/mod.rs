pub mod gate;

pub use gate::{require_access, AccessRule, Guard, RequestGate, Session, SessionContext};

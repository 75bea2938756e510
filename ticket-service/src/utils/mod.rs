pub mod clock;
pub mod password;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use password::{hash_password, verify_password, verify_password_or_dummy, Password};
pub use validation::ValidatedJson;

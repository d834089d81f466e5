//! Single-use, short-lived codes delivered out of band.

mod error;
mod flows;
mod pg;
pub mod policy;
pub mod rate_limit;
pub mod store;
mod vault;

pub use error::CodeError;
pub use flows::{EmailVerification, PasswordReset};
pub use pg::PgCodeStore;
pub use policy::{CodeKind, CodePolicy};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use store::{CodeRecord, CodeStore, InsertOutcome, LimitScope, MemoryCodeStore, RateWindow, StoreError};
pub use vault::{OneTimeCodeVault, RequestOutcome};

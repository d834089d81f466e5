//! Bearer token issuance, validation, rotation and revocation.

pub mod codec;
pub mod error;
pub mod issuer;
pub mod ledger;

pub use codec::{TokenClaims, TokenCodec, TokenKind};
pub use error::{SigningKeyError, TokenError};
pub use issuer::{SessionIssuer, TokenPair};
pub use ledger::{RevocationLedger, SweepStats};

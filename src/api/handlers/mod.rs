pub mod health;
pub mod password;
pub mod session;
mod utils;
pub mod verification;

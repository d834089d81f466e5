//! Credential lifecycle and token trust engine.
//!
//! Issues, rotates and revokes bearer sessions, and runs the single-use code flows for
//! password reset and email verification.

pub mod api;
pub mod cli;
pub mod clock;
pub mod codes;
pub mod directory;
pub mod email;
pub mod hashing;
pub mod session;
pub mod sweeper;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

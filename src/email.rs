//! Delivery of one-time codes.
//!
//! Vaults hand a rendered `EmailMessage` to an `EmailSender` right after the code row is
//! stored. Delivery is synchronous from the vault's point of view: if `send` fails the
//! code is deleted again and the caller sees a delivery failure.
//!
//! The default sender is `LogEmailSender`, which logs and returns `Ok(())`. Plug a real
//! transport (SMTP, provider API, broker) in by implementing the trait.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error so the caller can roll back.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport rejects the message.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email send stub"
        );
        Ok(())
    }
}

/// Keeps every message in memory; can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl MemoryEmailSender {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The `code` field of the newest message sent to `email`.
    #[must_use]
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent()
            .iter()
            .rev()
            .find(|message| message.to_email == email)
            .and_then(|message| serde_json::from_str::<serde_json::Value>(&message.payload_json).ok())
            .and_then(|payload| payload.get("code")?.as_str().map(str::to_string))
    }
}

impl EmailSender for MemoryEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("mail transport unavailable"));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

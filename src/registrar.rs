//! Email sign-up for short-notice alerts.

use std::sync::Arc;

use log::{error, info};

use crate::error::{Error, RegistrationError};
use crate::models::Subscriber;
use crate::store::SlotStore;

/// Trims and lower-cases `raw`. Blank input or input without an `@` is rejected.
pub fn normalize_email(raw: &str) -> Result<String, Error> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::InvalidEmail(raw.to_string()));
    }
    Ok(email)
}

/// Registers subscribers. Registering an address twice, in any letter case,
/// leaves one active row.
#[derive(Clone)]
pub struct Registrar {
    store: Arc<dyn SlotStore>,
}

impl Registrar {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    /// Upserts the normalized address with `active = true`.
    ///
    /// Not retried; the caller decides whether to submit again.
    pub async fn register(&self, email: &str) -> Result<Subscriber, RegistrationError> {
        let email = normalize_email(email).map_err(|_| RegistrationError::InvalidEmail)?;
        let subscriber = Subscriber {
            email,
            active: true,
        };

        match self.store.upsert_subscriber(&subscriber).await {
            Ok(()) => {
                info!("Registered subscriber");
                Ok(subscriber)
            }
            Err(e) => {
                error!("Subscriber upsert failed: {}", e);
                Err(RegistrationError::Failed)
            }
        }
    }
}

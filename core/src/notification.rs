//! Notification dispatcher contract.
//!
//! Notifications are a best-effort side channel sent after a claim commits.
//! Their outcome never affects the committed claim.

use crate::error::NotificationError;
use crate::model::{Claimant, Pledge};
use crate::store::BoxFuture;
use serde::{Deserialize, Serialize};

/// Template parameters for a claim confirmation message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationParams {
    /// Recipient address
    pub to_email: String,
    /// Recipient display name
    pub to_name: String,
    /// Sender display name
    pub from_name: String,
    /// Claimant name
    pub user_name: String,
    /// Claimant email
    pub user_email: String,
    /// Claimant phone
    pub user_phone: String,
    /// Claimed item names joined with `", "`
    pub items: String,
}

impl NotificationParams {
    /// Parameters for the claimant's own confirmation.
    #[must_use]
    pub fn for_claimant(claimant: &Claimant, pledge: &Pledge, from_name: &str) -> Self {
        Self {
            to_email: claimant.email.clone(),
            to_name: claimant.name.clone(),
            from_name: from_name.to_string(),
            user_name: claimant.name.clone(),
            user_email: claimant.email.clone(),
            user_phone: claimant.phone.clone(),
            items: pledge.item_names().join(", "),
        }
    }

    /// The same message redirected to an administrative address.
    #[must_use]
    pub fn redirected_to_admin(&self, admin_email: &str) -> Self {
        Self {
            to_email: admin_email.to_string(),
            to_name: "Admin".to_string(),
            ..self.clone()
        }
    }
}

/// Sends claim confirmation messages.
///
/// Implementations abstract over the delivery service (an email API, a
/// queue, a console logger in development).
pub trait Notifier: Send + Sync {
    /// Sends one message.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if the dispatcher rejects or fails to
    /// deliver the message.
    fn send(&self, params: NotificationParams) -> BoxFuture<'_, Result<(), NotificationError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemRef, PledgeId};
    use chrono::Utc;

    #[test]
    fn admin_copy_keeps_claimant_details() {
        let claimant = Claimant::new("Asha", "asha@example.com", "555-0100");
        let pledge = Pledge::new(
            PledgeId::new("p-1"),
            &claimant,
            &[ItemRef::new("i1", "Ladoo"), ItemRef::new("i2", "Barfi")],
            Utc::now(),
        );

        let params = NotificationParams::for_claimant(&claimant, &pledge, "Annakut Seva");
        assert_eq!(params.items, "Ladoo, Barfi");
        assert_eq!(params.to_email, "asha@example.com");

        let admin = params.redirected_to_admin("admin@example.com");
        assert_eq!(admin.to_email, "admin@example.com");
        assert_eq!(admin.to_name, "Admin");
        assert_eq!(admin.user_email, "asha@example.com");
        assert_eq!(admin.items, params.items);
    }
}

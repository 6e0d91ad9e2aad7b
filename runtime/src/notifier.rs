//! Console notifier for development and testing.

use claimboard_core::error::NotificationError;
use claimboard_core::notification::{NotificationParams, Notifier};
use claimboard_core::store::BoxFuture;
use tracing::info;

/// Console notifier.
///
/// Logs claim confirmations instead of delivering them. Useful for
/// development where no mail service is configured.
///
/// # Examples
///
/// ```ignore
/// use claimboard_runtime::notifier::ConsoleNotifier;
///
/// let allocator = ClaimAllocator::new(store, config)
///     .with_notifier(Arc::new(ConsoleNotifier::new()));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Create a new console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The message body as it would be mailed.
    #[must_use]
    pub fn render(params: &NotificationParams) -> String {
        format!(
            "Hi {to_name},\n\n\
             {user_name} ({user_email}, {user_phone}) signed up to bring:\n  {items}\n\n\
             Thank you!\n{from_name}",
            to_name = params.to_name,
            user_name = params.user_name,
            user_email = params.user_email,
            user_phone = params.user_phone,
            items = params.items,
            from_name = params.from_name,
        )
    }
}

impl Notifier for ConsoleNotifier {
    fn send(&self, params: NotificationParams) -> BoxFuture<'_, Result<(), NotificationError>> {
        Box::pin(async move {
            info!(
                to = %params.to_email,
                items = %params.items,
                body = %Self::render(&params),
                "📧 Claim confirmation (Development Mode)"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_notifier_always_succeeds() {
        let params = NotificationParams {
            to_email: "asha@example.com".to_string(),
            to_name: "Asha".to_string(),
            from_name: "Diwali Potluck".to_string(),
            user_name: "Asha".to_string(),
            user_email: "asha@example.com".to_string(),
            user_phone: "514-555-0100".to_string(),
            items: "Ladoo, Barfi".to_string(),
        };

        let body = ConsoleNotifier::render(&params);
        assert!(body.contains("Ladoo, Barfi"));
        assert!(body.ends_with("Diwali Potluck"));
        assert!(ConsoleNotifier::new().send(params).await.is_ok());
    }
}

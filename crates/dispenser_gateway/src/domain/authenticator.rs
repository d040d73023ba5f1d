use common::domain::{CredentialStore, DeviceId, DomainError, DomainResult, PresentedToken};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

/// Compared against when there is nothing real to compare, so every failing
/// path performs one constant-time comparison.
const PLACEHOLDER_TOKEN: &[u8] = b"\0unregistered-device\0";

/// Confirms a device's claimed identity against the credential store
pub struct Authenticator {
    credential_store: Arc<dyn CredentialStore>,
    lookup_timeout: Duration,
}

impl Authenticator {
    pub fn new(credential_store: Arc<dyn CredentialStore>, lookup_timeout: Duration) -> Self {
        Self {
            credential_store,
            lookup_timeout,
        }
    }

    /// Succeeds only when `token` is text that exactly matches the stored token
    /// for `device_id`. Unknown ids, wrong tokens and non-text tokens are
    /// indistinguishable to the caller.
    #[instrument(skip(self, token), fields(device_id = %device_id))]
    pub async fn authenticate(
        &self,
        device_id: &DeviceId,
        token: &PresentedToken,
    ) -> DomainResult<()> {
        let expected = tokio::time::timeout(
            self.lookup_timeout,
            self.credential_store.get_token(device_id),
        )
        .await
        .map_err(|_| DomainError::RegistryTimeout("get_token".to_string()))??;

        let matches = match (expected.as_deref(), token.as_text()) {
            (Some(expected), Some(token)) => tokens_match(expected.as_bytes(), token.as_bytes()),
            (_, presented) => {
                let presented = presented.unwrap_or_default().as_bytes();
                let _ = black_box(tokens_match(PLACEHOLDER_TOKEN, black_box(presented)));
                false
            }
        };

        if !matches {
            warn!(device_id = %device_id, "Request rejected: invalid authentication token");
            return Err(DomainError::Unauthenticated);
        }

        debug!(device_id = %device_id, "device authenticated");
        Ok(())
    }
}

fn tokens_match(expected: &[u8], presented: &[u8]) -> bool {
    expected.ct_eq(presented).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::MockCredentialStore;
    use mockall::predicate::eq;

    fn authenticator(store: MockCredentialStore) -> Authenticator {
        Authenticator::new(Arc::new(store), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let mut store = MockCredentialStore::new();
        store
            .expect_get_token()
            .with(eq(DeviceId::new("1")))
            .times(1)
            .return_once(|_| Ok(Some("42x5yz".to_string())));

        let result = authenticator(store)
            .authenticate(&DeviceId::new("1"), &PresentedToken::from("42x5yz"))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_token_rejected() {
        let mut store = MockCredentialStore::new();
        store
            .expect_get_token()
            .return_once(|_| Ok(Some("42x5yz".to_string())));

        let result = authenticator(store)
            .authenticate(&DeviceId::new("1"), &PresentedToken::from("wrong"))
            .await;

        assert!(matches!(result, Err(DomainError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_token_prefix_rejected() {
        let mut store = MockCredentialStore::new();
        store
            .expect_get_token()
            .return_once(|_| Ok(Some("42x5yz".to_string())));

        let result = authenticator(store)
            .authenticate(&DeviceId::new("1"), &PresentedToken::from("42x5"))
            .await;

        assert!(matches!(result, Err(DomainError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_unknown_device_gets_same_error() {
        let mut store = MockCredentialStore::new();
        store.expect_get_token().return_once(|_| Ok(None));

        let result = authenticator(store)
            .authenticate(&DeviceId::new("99"), &PresentedToken::from("42x5yz"))
            .await;

        match result {
            Err(e @ DomainError::Unauthenticated) => {
                assert_eq!(e.to_string(), "Invalid authentication token")
            }
            other => panic!("Expected Unauthenticated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_text_token_rejected() {
        let mut store = MockCredentialStore::new();
        store
            .expect_get_token()
            .return_once(|_| Ok(Some("12345".to_string())));

        let result = authenticator(store)
            .authenticate(&DeviceId::new("1"), &PresentedToken::NonText)
            .await;

        assert!(matches!(result, Err(DomainError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockCredentialStore::new();
        store
            .expect_get_token()
            .return_once(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("db down"))));

        let result = authenticator(store)
            .authenticate(&DeviceId::new("1"), &PresentedToken::from("42x5yz"))
            .await;

        assert!(matches!(result, Err(DomainError::RepositoryError(_))));
    }
}

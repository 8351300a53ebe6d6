//! Vendor session handling: the on-disk cache, the shared gate every camera
//! task reads through, and the authenticators that produce new sessions.

use async_trait::async_trait;
use common::{BridgeResult, Credential, LoginOutcome};
use std::sync::Arc;
use tracing::info;

use crate::vendor::VendorAuth;

pub mod gate;
pub mod prompt;
pub mod store;

pub use gate::{CredentialGate, Lease};
pub use prompt::{ConsolePrompt, NoPrompt, StaticCode, VerificationPrompt};
pub use store::CredentialStore;

/// Produces sessions for the [`CredentialGate`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Full login, including any verification handshake.
    async fn authenticate(&self) -> BridgeResult<Credential>;

    /// Cheap renewal of a still-known session.
    async fn refresh(&self, current: &Credential) -> BridgeResult<Credential>;
}

/// Username/password login against the vendor, answering challenges through
/// a [`VerificationPrompt`].
pub struct PasswordAuthenticator {
    vendor: Arc<dyn VendorAuth>,
    username: String,
    password: String,
    prompt: Arc<dyn VerificationPrompt>,
}

impl PasswordAuthenticator {
    pub fn new(
        vendor: Arc<dyn VendorAuth>,
        username: impl Into<String>,
        password: impl Into<String>,
        prompt: Arc<dyn VerificationPrompt>,
    ) -> Self {
        Self {
            vendor,
            username: username.into(),
            password: password.into(),
            prompt,
        }
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn authenticate(&self) -> BridgeResult<Credential> {
        match self.vendor.login(&self.username, &self.password).await? {
            LoginOutcome::Authenticated(credential) => Ok(credential),
            LoginOutcome::Challenge(challenge) => {
                info!("vendor requested a verification code");
                let code = self.prompt.verification_code(&challenge).await?;
                self.vendor.submit_verification_code(&challenge, &code).await
            }
        }
    }

    async fn refresh(&self, current: &Credential) -> BridgeResult<Credential> {
        self.vendor.refresh(current).await
    }
}

/// For sources that need no session.
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn authenticate(&self) -> BridgeResult<Credential> {
        Ok(Credential::anonymous())
    }

    async fn refresh(&self, _current: &Credential) -> BridgeResult<Credential> {
        Ok(Credential::anonymous())
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor session. Treated as a secret: the `Debug` impl never prints tokens.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
  pub token: String,
  pub expires_at: DateTime<Utc>,
  #[serde(default)]
  pub refresh_token: Option<String>,
  #[serde(default)]
  pub account_id: Option<u64>,
  #[serde(default)]
  pub client_id: Option<u64>,
  /// Regional API host the vendor routed this account to.
  #[serde(default)]
  pub region: Option<String>,
}

impl Credential {
  pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
    Self {
      token: token.into(),
      expires_at,
      refresh_token: None,
      account_id: None,
      client_id: None,
      region: None,
    }
  }

  /// Credential for sources that need no vendor session at all.
  pub fn anonymous() -> Self {
    Self::new(String::new(), DateTime::<Utc>::MAX_UTC)
  }

  pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
    self.refresh_token = Some(refresh_token.into());
    self
  }

  pub fn with_account(mut self, account_id: u64, client_id: u64, region: impl Into<String>) -> Self {
    self.account_id = Some(account_id);
    self.client_id = Some(client_id);
    self.region = Some(region.into());
    self
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    is_expired(self, now)
  }

  /// True once we are inside `margin` of expiry and should refresh early.
  pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
    match now.checked_add_signed(margin) {
      Some(deadline) => deadline >= self.expires_at,
      None => true,
    }
  }
}

/// Pure time comparison; a credential is expired at its expiry instant.
pub fn is_expired(credential: &Credential, now: DateTime<Utc>) -> bool {
  now >= credential.expires_at
}

impl fmt::Debug for Credential {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credential")
      .field("token", &"<redacted>")
      .field("expires_at", &self.expires_at)
      .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
      .field("account_id", &self.account_id)
      .field("client_id", &self.client_id)
      .field("region", &self.region)
      .finish()
  }
}

/// Issued by the vendor when a login needs a one-time code before it
/// produces a session.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationChallenge {
  pub pending: Credential,
  pub message: Option<String>,
}

impl fmt::Debug for VerificationChallenge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("VerificationChallenge")
      .field("pending", &self.pending)
      .field("message", &self.message)
      .finish()
  }
}

/// Result of the first login step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
  Authenticated(Credential),
  Challenge(VerificationChallenge),
}

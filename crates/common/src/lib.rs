pub mod cameras;
pub mod clips;
pub mod credentials;
pub mod error;
pub mod validation;

pub use cameras::{Camera, PollState};
pub use clips::{Clip, ClipSource};
pub use credentials::{Credential, LoginOutcome, VerificationChallenge};
pub use error::{BridgeError, BridgeResult};

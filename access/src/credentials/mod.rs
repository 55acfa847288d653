//! Sealed ticket credentials.
//!
//! [`CredentialCodec`] owns the cryptography and token format;
//! [`CredentialStore`] owns the lifecycle (issue, inspect, redeem, sweep).

pub mod codec;
pub mod store;

pub use codec::{CredentialCodec, CredentialPayload, SealedCredential, SlotPolicy};
pub use store::{CredentialStore, InspectedCredential};

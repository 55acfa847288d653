//! # Festival Access
//!
//! Secure ticket validation and credential lifecycle for festival entry.
//!
//! ## Features
//!
//! - **Single-use credentials**: QR tokens backed by AES-256-GCM sealed records
//! - **Proximity sessions**: BLE beacon checks with hard TTLs
//! - **Biometric verification**: Encrypted templates, swappable matchers
//! - **Key rotation**: Versioned data keys wrapped under a master key
//! - **Audit trail**: Every redemption attempt is recorded
//!
//! ## Architecture
//!
//! ```text
//! KeyManager ─► CredentialCodec ─► CredentialStore ─┐
//!                                                   ├─► TicketValidationEngine
//! ProximitySessionManager ──────────────────────────┤
//! BiometricVerifier ────────────────────────────────┘
//! ```
//!
//! Storage sits behind the traits in [`providers`]. The engine never
//! takes application-level locks: single-use guarantees come from the
//! conditional updates each backend performs.
//!
//! ## Example: Validating a scan
//!
//! ```rust,ignore
//! use festival_access::*;
//!
//! let verdict = engine
//!     .validate(ValidationRequest::new(scanned_token, "gate-a-scanner-3"))
//!     .await?;
//!
//! if verdict.valid {
//!     // open the turnstile
//! } else {
//!     println!("{}: {}", verdict.code, verdict.message);
//! }
//! ```

#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod biometric;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod engine;
pub mod environment;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod providers;
pub mod proximity;
pub mod state;
pub mod stores;
pub mod sweep;
pub mod tickets;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use biometric::{BiometricVerifier, EnrollmentReceipt, VerificationOutcome};
pub use config::AccessConfig;
pub use credentials::{CredentialCodec, CredentialStore, SlotPolicy};
pub use engine::{TicketValidationEngine, ValidationRequest, ValidationVerdict, VerdictCode};
pub use error::{AccessError, Result};
pub use keys::KeyManager;
pub use proximity::{ProximityEvidence, ProximitySessionManager, ProximityValidation};
pub use state::{Credential, ProximitySession, Ticket, TicketId, UserId, ValidationRecord};
pub use sweep::{SweepReport, Sweeper};
pub use tickets::TicketService;

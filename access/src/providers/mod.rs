//! Storage and capability providers.
//!
//! This module defines traits for every external dependency of the access
//! engine. The engine depends on these traits; the runtime provides
//! concrete implementations.
//!
//! # Atomicity
//!
//! Single-use guarantees live in the providers, never in the services:
//!
//! ```text
//! Service (check → decide)          Provider (conditional write)
//! ┌──────────────────────┐          ┌───────────────────────────────┐
//! │ CredentialStore      │ redeem → │ UPDATE ... WHERE is_used=false│
//! │ ProximityManager     │ trans. → │ state = 'pending' guard       │
//! │ ValidationEngine     │ commit → │ one transaction, three writes │
//! └──────────────────────┘          └───────────────────────────────┘
//! ```
//!
//! This enables:
//! - **Testing**: in-memory mocks guarded by a single mutex
//! - **Production**: `PostgreSQL` and `Redis`
//! - **Horizontal scaling**: every engine instance shares the backing store

pub mod admission;
pub mod biometric;
pub mod credentials;
pub mod key_store;
pub mod proximity;
pub mod tickets;

// Re-export provider traits
pub use admission::{AdmissionLedger, AdmissionOutcome};
pub use biometric::{BiometricRepository, Matcher};
pub use credentials::{CredentialRepository, RedeemOutcome};
pub use key_store::KeyStore;
pub use proximity::{BeaconRegistry, ProximitySessionRepository};
pub use tickets::TicketRepository;

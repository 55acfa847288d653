//! Key management.
//!
//! A master key (derived from configuration) wraps per-purpose data keys
//! that are persisted through [`KeyStore`](crate::providers::KeyStore).
//! Every ciphertext records the ID of the data key that produced it, so
//! rotation never strands existing credentials or templates.

pub mod cipher;
pub mod manager;
pub mod master;

pub use cipher::KeyMaterial;
pub use manager::{ActiveKey, KeyManager};
pub use master::MasterKey;

//! Daproxy Core - trust boundary of a data-availability proxy
//!
//! Accepts certificates for blobs dispersed to a DA network, validates
//! them, and serves the blobs from:
//! - a primary backend selected by the certificate's version byte
//! - cache targets written through on every put
//! - fallback targets read when the primary fails

pub mod cert;
pub mod codec;
pub mod config;
pub mod ephemeral;
pub mod error;
pub mod hash;
pub mod secondary;
pub mod store;
pub mod verify;

pub use cert::{BlobInfo, BlobKey, CertV2, G1Commitment, VersionByte, VersionedCert};
pub use config::{
    BackendVersion, KzgConfig, MemstoreConfig, MemstoreConfigPatch, Network, RedisConfig,
    S3Config, SafeConfig, SecondaryBackend, StoreConfig, VerifierConfig,
};
pub use ephemeral::EphemeralStore;
pub use error::{DerivationError, ProxyError, Result, VerificationError};
pub use secondary::{SecondaryManager, SecondaryStatsSnapshot, SecondaryStore};
pub use store::{
    BackgroundTasks, BuiltStorage, DaBackend, DisperserClient, StorageManager,
    StorageManagerBuilder,
};
pub use verify::{
    CertVerifierSnapshot, CommitmentProver, CommitmentVerifier, DigestCommitter, Verifier,
};

//! Primary DA backends and the manager routing reads and writes across
//! them and the secondary tiers.

pub mod builder;
pub mod manager;
pub mod memstore_v1;
pub mod memstore_v2;
pub mod network;

pub use builder::{BackgroundTasks, BuiltStorage, StorageManagerBuilder};
pub use manager::StorageManager;
pub use memstore_v1::MemstoreV1;
pub use memstore_v2::MemstoreV2;
pub use network::{DisperserClient, NetworkV1Store};

use crate::cert::{G1Commitment, VersionedCert};
use crate::codec;
use crate::config::BackendVersion;
use crate::error::Result;
use crate::verify::{CommitmentProver, Verifier};
use async_trait::async_trait;
use bytes::Bytes;

/// A primary backend serving one DA protocol version.
#[async_trait]
pub trait DaBackend: Send + Sync {
    fn version(&self) -> BackendVersion;

    fn name(&self) -> &'static str;

    async fn put(&self, payload: Bytes) -> Result<VersionedCert>;

    /// Returns the payload behind `cert`, checked against its commitment.
    async fn get(&self, cert: &VersionedCert) -> Result<Bytes>;

    /// Checks that need only the cert. Runs before any storage tier is read.
    fn verify_cert(&self, cert: &VersionedCert) -> Result<()>;

    /// Checks a payload obtained elsewhere (cache, fallback) against `cert`.
    fn verify_payload(&self, cert: &VersionedCert, payload: &[u8]) -> Result<()>;
}

/// Encodes `payload` into a blob and commits to its field elements.
pub(crate) fn commit_payload(
    prover: &dyn CommitmentProver,
    payload: &[u8],
) -> Result<(G1Commitment, usize)> {
    let blob = codec::encode_payload(payload)?;
    let elements = codec::to_field_elements(&blob)?;
    Ok((prover.commit(&elements)?, elements.len()))
}

pub(crate) fn verify_payload_commitment(
    verifier: &Verifier,
    commitment: &G1Commitment,
    payload: &[u8],
) -> Result<()> {
    let blob = codec::encode_payload(payload)?;
    verifier.verify_commitment(commitment, &blob)
}

//! Certificate containers and their wire encoding.
//!
//! A commitment handed to clients is `version_byte ++ serialized_cert`.
//! The version byte selects both the certificate schema and the backend
//! that can serve it.

pub mod legacy;
pub mod v2;

use crate::config::BackendVersion;
use crate::error::{ProxyError, Result};
use crate::hash::{Hash32, keccak256};
use bincode::Options;
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub use legacy::{
    BatchHeader, BatchMetadata, BlobHeader, BlobInfo, BlobVerificationProof, QuorumBlobParam,
};
pub use v2::{BatchHeaderV2, BlobHeaderV2, CertV2};

/// Upper bound on a decoded certificate. Legitimate certs are a few KiB.
pub const MAX_CERT_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VersionByte {
    /// Legacy `BlobInfo` certificate served by the V1 protocol.
    Legacy = 0x00,
    /// `CertV2` certificate served by the V2 protocol.
    V2 = 0x01,
}

impl VersionByte {
    pub fn backend(self) -> BackendVersion {
        match self {
            Self::Legacy => BackendVersion::V1,
            Self::V2 => BackendVersion::V2,
        }
    }
}

impl TryFrom<u8> for VersionByte {
    type Error = ProxyError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Legacy),
            0x01 => Ok(Self::V2),
            other => Err(ProxyError::InvalidRequest(format!(
                "unknown certificate version byte: {:#04x}",
                other
            ))),
        }
    }
}

/// A point on G1 as affine coordinates. Widths are validated separately,
/// so the wire form accepts any length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct G1Commitment {
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedCert {
    pub version: VersionByte,
    pub serialized_cert: Bytes,
}

impl VersionedCert {
    pub fn new(version: VersionByte, serialized_cert: impl Into<Bytes>) -> Self {
        Self {
            version,
            serialized_cert: serialized_cert.into(),
        }
    }

    pub fn from_commitment(commitment: &[u8]) -> Result<Self> {
        let Some((&version, cert)) = commitment.split_first() else {
            return Err(ProxyError::InvalidRequest(
                "commitment is empty".to_string(),
            ));
        };
        if cert.is_empty() {
            return Err(ProxyError::InvalidRequest(
                "commitment carries no certificate".to_string(),
            ));
        }

        Ok(Self::new(
            VersionByte::try_from(version)?,
            Bytes::copy_from_slice(cert),
        ))
    }

    pub fn to_commitment(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.serialized_cert.len());
        out.push(self.version as u8);
        out.extend_from_slice(&self.serialized_cert);
        out
    }

    pub fn blob_key(&self) -> BlobKey {
        BlobKey(keccak256(&self.serialized_cert))
    }

    pub fn to_legacy(&self) -> Result<BlobInfo> {
        self.expect_version(VersionByte::Legacy)?;
        BlobInfo::from_bytes(&self.serialized_cert)
    }

    pub fn to_v2(&self) -> Result<CertV2> {
        self.expect_version(VersionByte::V2)?;
        CertV2::from_bytes(&self.serialized_cert)
    }

    fn expect_version(&self, expected: VersionByte) -> Result<()> {
        if self.version != expected {
            return Err(ProxyError::InvalidRequest(format!(
                "certificate version mismatch: expected {:?}, got {:?}",
                expected, self.version
            )));
        }
        Ok(())
    }
}

/// Content-derived storage key: Keccak-256 of the serialized certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobKey(pub Hash32);

impl BlobKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_CERT_SIZE)
        .reject_trailing_bytes()
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(wire_options().serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    wire_options()
        .deserialize(bytes)
        .map_err(|error| ProxyError::MalformedCert(error.to_string()))
}

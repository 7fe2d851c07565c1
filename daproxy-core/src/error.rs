use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed certificate: {0}")]
    MalformedCert(String),

    #[error("certificate verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error("blob codec error: {0}")]
    Codec(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob already exists: {0}")]
    AlreadyExists(String),

    /// Signals the caller that the primary backend refused the write and an
    /// alternate backend should be tried.
    #[error("failover: {0}")]
    Failover(String),

    #[error("derivation error: {0}")]
    Derivation(DerivationError),

    #[error("payload too large: size={size} max={max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Every fallback target failed; distinct from `NotFound`.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("secondary write failed: {0}")]
    SecondaryWrite(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Structural, cryptographic and quorum failures are never worth retrying.
    pub fn is_fatal_cert_error(&self) -> bool {
        matches!(self, Self::MalformedCert(_) | Self::Verification(_))
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for ProxyError {
    fn from(error: bincode::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Error injected into ephemeral entries to emulate a blob that is
/// semantically invalid once read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationError {
    pub status_code: u8,
    pub msg: String,
}

impl std::fmt::Display for DerivationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status_code={} msg={}", self.status_code, self.msg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid length for {field}: expected {expected}, got {actual}")]
    InvalidFieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("inclusion proof length must be a multiple of 32, got {0}")]
    InvalidProofLength(usize),

    #[error(
        "cannot verify commitment because the number of stored srs in the memory is insufficient, have {have} need {need}"
    )]
    InsufficientSrs { have: usize, need: usize },

    #[error("commitment does not match blob")]
    CommitmentMismatch,

    #[error("batch header hash mismatch: expected {expected}, computed {actual}")]
    BatchHeaderHashMismatch { expected: String, actual: String },

    #[error("inclusion proof does not reproduce batch root: expected {expected}, computed {actual}")]
    InclusionProofMismatch { expected: String, actual: String },

    #[error(
        "blob has more quorum parameters than available quorums: got {got} quorum params, available quorums: {available}"
    )]
    TooManyQuorumParams { got: usize, available: usize },

    #[error("quorum number mismatch, expected: {expected}, got: {got}")]
    QuorumNumberMismatch { expected: u8, got: u8 },

    #[error(
        "adversary threshold percentage must be greater than or equal to confirmation threshold percentage"
    )]
    ThresholdInversion { quorum: u8, adversary: u8, confirmation: u8 },

    #[error("adversary threshold percentage must be >= quorum adversary threshold percentage")]
    AdversaryThresholdTooLow { quorum: u8, got: u8, required: u8 },

    #[error("signed stake for quorum must be >= to confirmation threshold percentage")]
    InsufficientSignedStake { quorum: u8, signed: u8, confirmation: u8 },

    #[error("quorum {0} is required but not present in confirmed quorums")]
    RequiredQuorumMissing(u8),

    #[error("cert verifier snapshot not loaded")]
    SnapshotUnavailable,

    #[error("key does not match keccak256 of value: key {key}, computed {computed}")]
    KeccakKeyMismatch { key: String, computed: String },
}

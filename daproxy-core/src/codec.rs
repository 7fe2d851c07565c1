//! Payload <-> blob codec.
//!
//! A blob is a sequence of 32-byte big-endian field elements. The first
//! element is a header carrying the codec version and the payload length;
//! every following element carries 31 payload bytes behind a zero guard
//! byte so that it always stays below the BN254 scalar modulus.

use crate::error::{ProxyError, Result};

pub const BYTES_PER_FIELD_ELEMENT: usize = 32;
pub const PAYLOAD_BYTES_PER_ELEMENT: usize = BYTES_PER_FIELD_ELEMENT - 1;
pub const CODEC_VERSION: u8 = 0;

pub type FieldElement = [u8; BYTES_PER_FIELD_ELEMENT];

/// BN254 scalar field modulus, big-endian.
const BN254_MODULUS: FieldElement = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

pub fn encoded_blob_len(payload_len: usize) -> usize {
    BYTES_PER_FIELD_ELEMENT * (1 + payload_len.div_ceil(PAYLOAD_BYTES_PER_ELEMENT))
}

pub fn encode_payload(payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len()).map_err(|_| ProxyError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut blob = Vec::with_capacity(encoded_blob_len(payload.len()));
    let mut header = [0u8; BYTES_PER_FIELD_ELEMENT];
    header[1] = CODEC_VERSION;
    header[2..6].copy_from_slice(&length.to_be_bytes());
    blob.extend_from_slice(&header);

    for chunk in payload.chunks(PAYLOAD_BYTES_PER_ELEMENT) {
        let mut element = [0u8; BYTES_PER_FIELD_ELEMENT];
        element[1..1 + chunk.len()].copy_from_slice(chunk);
        blob.extend_from_slice(&element);
    }

    Ok(blob)
}

pub fn decode_blob(blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < BYTES_PER_FIELD_ELEMENT {
        return Err(ProxyError::Codec(format!(
            "blob shorter than header: len={}",
            blob.len()
        )));
    }

    let (header, body) = blob.split_at(BYTES_PER_FIELD_ELEMENT);
    if header[0] != 0 {
        return Err(ProxyError::Codec("header guard byte is not zero".to_string()));
    }
    if header[1] != CODEC_VERSION {
        return Err(ProxyError::Codec(format!(
            "unsupported codec version: {}",
            header[1]
        )));
    }

    let mut length_bytes = [0u8; 4];
    length_bytes.copy_from_slice(&header[2..6]);
    let length = u32::from_be_bytes(length_bytes) as usize;

    let capacity = body.len().div_ceil(BYTES_PER_FIELD_ELEMENT) * PAYLOAD_BYTES_PER_ELEMENT;
    if length > capacity {
        return Err(ProxyError::Codec(format!(
            "declared payload length {} exceeds blob capacity {}",
            length, capacity
        )));
    }

    let mut payload = Vec::with_capacity(capacity);
    for element in body.chunks(BYTES_PER_FIELD_ELEMENT) {
        if element[0] != 0 {
            return Err(ProxyError::Codec(
                "field element guard byte is not zero".to_string(),
            ));
        }
        payload.extend_from_slice(&element[1..]);
    }
    payload.truncate(length);

    Ok(payload)
}

/// Splits a blob into field elements, zero padding the final chunk.
/// Fails if any element is not a canonical BN254 scalar.
pub fn to_field_elements(blob: &[u8]) -> Result<Vec<FieldElement>> {
    let mut elements = Vec::with_capacity(blob.len().div_ceil(BYTES_PER_FIELD_ELEMENT));
    for (index, chunk) in blob.chunks(BYTES_PER_FIELD_ELEMENT).enumerate() {
        let mut element = [0u8; BYTES_PER_FIELD_ELEMENT];
        element[..chunk.len()].copy_from_slice(chunk);
        if element >= BN254_MODULUS {
            return Err(ProxyError::Codec(format!(
                "field element {} is not below the BN254 modulus",
                index
            )));
        }
        elements.push(element);
    }
    Ok(elements)
}

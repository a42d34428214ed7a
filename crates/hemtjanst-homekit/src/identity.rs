//! Stable identity derivation
//!
//! Accessory ids come from a hash of the device topic so that a restarted
//! bridge presents known devices under the same id. Service and
//! characteristic ids come from their type code. Both are offset away from
//! the low range the bridge assigns automatically.

use sha2::{Digest, Sha256};

/// Tag byte placed above the digest bytes of a topic id
pub const TOPIC_ID_TAG: u8 = 0x0F;

/// Offset added to type-code ids
pub const TYPE_ID_BASE: u64 = 0x1_0000_0000;

/// Accessory id for a device topic: tag byte followed by the first 7 bytes
/// of the SHA-256 digest, read big-endian
pub fn topic_to_id(topic: &str) -> u64 {
    let digest = Sha256::digest(topic.as_bytes());
    let mut bytes = [0u8; 8];
    bytes[0] = TOPIC_ID_TAG;
    bytes[1..].copy_from_slice(&digest[..7]);
    u64::from_be_bytes(bytes)
}

/// Id for a hex type code (`"25"`, `"11A"`), read big-endian plus [`TYPE_ID_BASE`]
///
/// Odd-length codes are left-padded with `0`. Returns `None` for empty,
/// non-hex or oversized codes.
pub fn type_to_id(type_code: &str) -> Option<u64> {
    if type_code.is_empty() {
        return None;
    }
    let padded = if type_code.len() % 2 == 1 {
        format!("0{}", type_code)
    } else {
        type_code.to_string()
    };
    let bytes = hex::decode(padded).ok()?;
    if bytes.len() > 8 {
        return None;
    }
    let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    value.checked_add(TYPE_ID_BASE)
}

//! Mutex name validation and hashing of arbitrary identifiers into lock-file-safe tokens.

use sha2::{Digest, Sha224};

use crate::errors::MutexError;

/// Characters rejected in mutex names: anything that is not portable in a file name.
const INVALID_NAME_CHARS: &[char] = &['*', '?', '"', '<', '>', '|', '/', '\\', ':', '\0'];

/// Number of hex digits kept from the digest.
const TOKEN_HEX_LEN: usize = 16;

/// Check that `name` can be used as a lock file name on every supported platform.
pub fn check_valid_mutex_name(name: &str) -> Result<(), MutexError> {
    if name.is_empty() || name.contains(INVALID_NAME_CHARS) {
        return Err(MutexError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Derive a valid mutex name from an arbitrary string.
///
/// The result is `prefix` followed by the first 16 lowercase hex digits of the
/// SHA-224 digest of `raw_name`. It is valid whenever `prefix` is.
pub fn generate_mutex_name(raw_name: &str, prefix: &str) -> String {
    let digest = format!("{:x}", Sha224::digest(raw_name.as_bytes()));
    format!("{prefix}{}", &digest[..TOKEN_HEX_LEN])
}

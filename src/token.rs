/// Token generation for pending auth requests
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

/// Token size in bytes before encoding (256 bits of entropy)
const TOKEN_BYTES: usize = 32;

/// Generate an unguessable, URL-safe request token
///
/// Collisions at this key size are treated as negligible; the store's primary
/// key constraint is the only dedup.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

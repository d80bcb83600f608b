use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// A random, URL-safe, unpadded base64 encoding of 128 random bits.
///
/// Used both as the `id` attribute of a `<stream:stream>` open and, when a
/// resource bind doesn't name one, as the fallback resource itself.
pub fn generate() -> String {
    let mut rng = ChaCha20Rng::from_entropy();
    let mut raw = [0u8; 16];
    rng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

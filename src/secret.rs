//! Handshake secret generation.

use rand::Rng;

/// Characters a secret may consist of. Alphanumerics plus a handful of
/// punctuation characters that survive JSON string encoding unescaped.
const SECRET_CHARS: &[u8] = b"0123456789\
    ABCDEFGHIJKLMNOPQRSTUVWXYZ\
    abcdefghijklmnopqrstuvwxyz\
    +-*/()[]{}";

/// Length of both the broker secret and per-client secrets.
pub(crate) const SECRET_LEN: usize = 12;

/// Generate a random secret of `len` characters.
///
/// The trust boundary is local to the machine, so an ordinary PRNG is
/// sufficient here; possession of the secret is what is being tested, not
/// its unguessability against an offline attacker.
pub(crate) fn generate_secret(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| SECRET_CHARS[rng.gen_range(0..SECRET_CHARS.len())] as char)
        .collect()
}

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};

pub const CREDENTIAL_PREFIX: &str = "tok_";
const CREDENTIAL_BYTES: usize = 32;

/// Fresh opaque bearer secret: 256 bits from the OS RNG, nothing user-derived.
pub fn issue_credential() -> String {
    let mut bytes = [0u8; CREDENTIAL_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{CREDENTIAL_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

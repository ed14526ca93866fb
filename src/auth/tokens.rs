use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};

pub const VERIFICATION_TTL: Duration = Duration::hours(24);
pub const RESET_TTL: Duration = Duration::hours(1);

const TOKEN_BYTES: usize = 32;

/// A single-use random token together with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: OffsetDateTime,
}

/// 32 bytes from the OS RNG, hex encoded (64 chars).
pub fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn issue(ttl: Duration, now: OffsetDateTime) -> IssuedToken {
    IssuedToken {
        value: generate_token(),
        expires_at: now + ttl,
    }
}

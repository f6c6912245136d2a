//! Random SIP tokens (Call-ID, tags, branches, pseudo hosts)
//!
//! These only need to be unique, so a small non-cryptographic generator is
//! used.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// RFC 3261 magic cookie that prefixes every branch parameter
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a lowercase alphanumeric token of `len` characters
pub fn random_token(len: usize) -> String {
    let mut rng = SmallRng::from_entropy();
    (0..len)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Generate a Via branch: the magic cookie followed by `len` random characters
pub fn random_branch(len: usize) -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, random_token(len))
}

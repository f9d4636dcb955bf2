//! API key generation

use rand::Rng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANDOM_PART_LEN: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 12;

/// New secret: `prefix` followed by 32 random base36 characters
pub fn generate_api_key(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..RANDOM_PART_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}{}", prefix, random)
}

/// Non-secret prefix shown in listings
pub fn display_prefix(key: &str) -> String {
    key.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// Whether `token` looks like a key issued with `prefix`
pub fn is_api_key(token: &str, prefix: &str) -> bool {
    token
        .strip_prefix(prefix)
        .map_or(false, |rest| {
            rest.len() == RANDOM_PART_LEN && rest.bytes().all(|b| ALPHABET.contains(&b))
        })
}

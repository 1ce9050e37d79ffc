use std::sync::Arc;

use rand::Rng;

use crate::storage::MetaRepository;

/// Upper-case alphanumeric token alphabet.
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default public token length.
pub const TOKEN_LEN: usize = 8;

/// Escalated length used when the short space keeps colliding.
pub const EXTENDED_TOKEN_LEN: usize = 12;

/// Collision retries at the default length before escalating.
const MAX_ATTEMPTS: usize = 100;

/// Allocates short public tokens, unique against the in-memory metadata
/// cache. No backend I/O: uniqueness across process restarts is
/// probabilistic by design, which the token length makes acceptably safe.
pub struct TokenAllocator {
    repo: Arc<MetaRepository>,
}

impl TokenAllocator {
    pub fn new(repo: Arc<MetaRepository>) -> Self {
        Self { repo }
    }

    /// Never fails: exhausting the bounded retries at the default length
    /// deterministically escalates to the longer form instead of erroring.
    pub async fn allocate(&self) -> String {
        for _ in 0..MAX_ATTEMPTS {
            let token = random_token(TOKEN_LEN);
            if !self.repo.contains(&token).await {
                return token;
            }
        }
        loop {
            let token = random_token(EXTENDED_TOKEN_LEN);
            if !self.repo.contains(&token).await {
                return token;
            }
        }
    }
}

pub fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_use_the_fixed_alphabet() {
        for _ in 0..50 {
            let token = random_token(TOKEN_LEN);
            assert_eq!(token.len(), TOKEN_LEN);
            assert!(token.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn extended_tokens_are_longer() {
        assert_eq!(random_token(EXTENDED_TOKEN_LEN).len(), EXTENDED_TOKEN_LEN);
    }
}

//! Proof-key-for-code-exchange material.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A PKCE verifier and its S256 challenge, both url-safe base64 without
/// padding.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    /// 32 random bytes of verifier, SHA-256 of the encoded verifier as
    /// the challenge.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self { verifier, challenge }
    }
}

/// 16 random bytes for the OAuth state parameter.
pub fn random_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_and_challenge_shapes() {
        let pkce = Pkce::generate();
        // 32 bytes → 43 base64 chars without padding.
        assert_eq!(pkce.verifier.len(), 43);
        // SHA-256 → 32 bytes → 43 chars.
        assert_eq!(pkce.challenge.len(), 43);
        assert!(!pkce.verifier.contains('='));
        assert!(!pkce.challenge.contains('='));
    }

    #[test]
    fn challenge_is_s256_of_verifier() {
        let pkce = Pkce::generate();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn state_is_unique_enough() {
        // 16 bytes → 22 chars; two draws must differ.
        let a = random_state();
        let b = random_state();
        assert_eq!(a.len(), 22);
        assert_ne!(a, b);
    }
}

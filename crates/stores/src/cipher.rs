//! Content encryption at rest.
//!
//! Turn content is sealed with XChaCha20-Poly1305 under a key supplied in
//! configuration (hex-encoded, 32 bytes). Without a key the cipher is
//! disabled and content is stored as plaintext — development mode.
//!
//! Decrypt is forgiving on purpose: anything that does not decode as
//! ciphertext under the current key is returned unchanged, so plaintext
//! rows written before encryption was enabled stay readable.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use dg_domain::config::EncryptionConfig;

const NONCE_LEN: usize = 24;

pub struct ContentCipher {
    cipher: Option<XChaCha20Poly1305>,
}

impl ContentCipher {
    /// Build from configuration. An undecodable key disables encryption
    /// with a warning rather than refusing to boot.
    pub fn from_config(config: &EncryptionConfig) -> Self {
        let cipher = config.content_key_hex.as_deref().and_then(|key_hex| {
            let key = match hex::decode(key_hex) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "content key is not valid hex — encryption disabled");
                    return None;
                }
            };
            match XChaCha20Poly1305::new_from_slice(&key) {
                Ok(cipher) => Some(cipher),
                Err(_) => {
                    tracing::warn!(
                        key_bytes = key.len(),
                        "content key must be 32 bytes — encryption disabled"
                    );
                    None
                }
            }
        });
        Self { cipher }
    }

    pub fn disabled() -> Self {
        Self { cipher: None }
    }

    pub fn enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seal `plaintext`; hex(nonce ‖ ciphertext). Passthrough when disabled.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let Some(cipher) = &self.cipher else {
            return plaintext.to_owned();
        };
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        match cipher.encrypt(&nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => {
                let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                sealed.extend_from_slice(&nonce);
                sealed.extend_from_slice(&ciphertext);
                hex::encode(sealed)
            }
            Err(_) => plaintext.to_owned(),
        }
    }

    /// Open `stored`; returns the input unchanged when disabled or when the
    /// value does not verify as ciphertext under the current key.
    pub fn decrypt(&self, stored: &str) -> String {
        let Some(cipher) = &self.cipher else {
            return stored.to_owned();
        };
        let Ok(sealed) = hex::decode(stored) else {
            return stored.to_owned();
        };
        if sealed.len() <= NONCE_LEN {
            return stored.to_owned();
        }
        let nonce = XNonce::from_slice(&sealed[..NONCE_LEN]);
        match cipher.decrypt(nonce, &sealed[NONCE_LEN..]) {
            Ok(plaintext) => String::from_utf8(plaintext).unwrap_or_else(|_| stored.to_owned()),
            Err(_) => stored.to_owned(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> ContentCipher {
        ContentCipher::from_config(&EncryptionConfig {
            content_key_hex: Some("11".repeat(32)),
        })
    }

    #[test]
    fn roundtrip() {
        let cipher = keyed();
        assert!(cipher.enabled());
        let sealed = cipher.encrypt("the content");
        assert_ne!(sealed, "the content");
        assert_eq!(cipher.decrypt(&sealed), "the content");
    }

    #[test]
    fn nonces_differ_per_call() {
        let cipher = keyed();
        assert_ne!(cipher.encrypt("same"), cipher.encrypt("same"));
    }

    #[test]
    fn disabled_is_passthrough() {
        let cipher = ContentCipher::disabled();
        assert!(!cipher.enabled());
        assert_eq!(cipher.encrypt("plain"), "plain");
        assert_eq!(cipher.decrypt("plain"), "plain");
    }

    #[test]
    fn decrypt_of_plaintext_returns_it_unchanged() {
        let cipher = keyed();
        assert_eq!(cipher.decrypt("never encrypted"), "never encrypted");
    }

    #[test]
    fn tampered_ciphertext_falls_back_to_stored_value() {
        let cipher = keyed();
        let sealed = cipher.encrypt("secret");
        let mut tampered = sealed.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert_eq!(cipher.decrypt(&tampered), tampered);
    }

    #[test]
    fn bad_key_disables_encryption() {
        let cipher = ContentCipher::from_config(&EncryptionConfig {
            content_key_hex: Some("too-short".into()),
        });
        assert!(!cipher.enabled());
    }
}

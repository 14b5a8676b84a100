//! Real AEAD and ECDH primitives plugged into `octane-proto`'s [`octane_proto::Aead`] and
//! [`octane_proto::KeyExchange`] collaborator traits (§6). The engine never reaches into these
//! directly; it only ever sees the trait objects.

use chacha20poly1305::aead::{Aead as _, NewAead};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use octane_proto::{Aead, AuthError, KeyExchange};
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// ChaCha20-Poly1305 keyed with the shared secret derived from the handshake.
///
/// The wire format has no nonce field (§3); the 64-bit nonce the engine hands us is the one
/// derived from the packet number (see `octane_proto::connection`'s `nonce_for`), zero-extended
/// to the 96-bit nonce this cipher needs.
pub struct ChaChaAead {
    cipher: ChaCha20Poly1305,
}

impl ChaChaAead {
    /// `shared_secret` must be exactly 32 bytes; shorter/longer key material is a programmer
    /// error, not a runtime condition, since it only ever comes from `X25519KeyExchange`.
    pub fn new(shared_secret: &[u8]) -> Self {
        assert_eq!(shared_secret.len(), 32, "expected a 32-byte shared secret");
        let key = Key::from_slice(shared_secret);
        ChaChaAead {
            cipher: ChaCha20Poly1305::new(key),
        }
    }

    fn expand_nonce(nonce: u64) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&nonce.to_be_bytes());
        bytes
    }
}

impl Aead for ChaChaAead {
    fn encrypt(&self, plaintext: &[u8], nonce: u64) -> Vec<u8> {
        let nonce = Nonce::from_slice(&Self::expand_nonce(nonce));
        self.cipher
            .encrypt(nonce, plaintext)
            .expect("encryption under a freshly derived nonce cannot fail")
    }

    fn decrypt(&self, ciphertext: &[u8], nonce: u64) -> Result<Vec<u8>, AuthError> {
        let nonce = Nonce::from_slice(&Self::expand_nonce(nonce));
        self.cipher.decrypt(nonce, ciphertext).map_err(|_| AuthError)
    }
}

/// X25519 Diffie-Hellman, generating the shared secret [`ChaChaAead`] is keyed with.
pub struct X25519KeyExchange {
    secret: StaticSecret,
}

impl KeyExchange for X25519KeyExchange {
    type PublicValue = [u8; 32];

    fn generate() -> (Self, Self::PublicValue) {
        let secret = StaticSecret::new(OsRng);
        let public = PublicKey::from(&secret);
        (X25519KeyExchange { secret }, *public.as_bytes())
    }

    fn derive_shared_secret(&self, peer_public: &Self::PublicValue) -> Vec<u8> {
        let peer_public = PublicKey::from(*peer_public);
        self.secret.diffie_hellman(&peer_public).as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_under_the_same_nonce() {
        let aead = ChaChaAead::new(&[0x42; 32]);
        let ciphertext = aead.encrypt(b"hello octane", 7);
        let plaintext = aead.decrypt(&ciphertext, 7).unwrap();
        assert_eq!(plaintext, b"hello octane");
    }

    #[test]
    fn wrong_nonce_fails_authentication() {
        let aead = ChaChaAead::new(&[0x42; 32]);
        let ciphertext = aead.encrypt(b"hello octane", 7);
        assert!(aead.decrypt(&ciphertext, 8).is_err());
    }

    #[test]
    fn x25519_exchange_agrees_on_a_shared_secret() {
        let (alice, alice_public) = X25519KeyExchange::generate();
        let (bob, bob_public) = X25519KeyExchange::generate();
        assert_eq!(
            alice.derive_shared_secret(&bob_public),
            bob.derive_shared_secret(&alice_public)
        );
    }
}

//! Device identity and session crypto: per-installation identity, X25519 keypairs, session keys,
//! wire encryption.

use std::sync::{Arc, OnceLock};

use chacha20poly1305::aead::{Aead, KeyInit};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Stable per-installation identity. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub identifier: String,
    pub created_at: DateTime<Utc>,
}

/// Platform service that knows this installation's identifier.
pub trait DeviceIdentifierService: Send + Sync {
    fn device_identifier(&self) -> String;
}

/// Lazily builds the [`DeviceIdentity`] and caches it for the lifetime of the use case.
pub struct DeviceIdentificationUseCase {
    service: Arc<dyn DeviceIdentifierService>,
    identity: OnceLock<DeviceIdentity>,
}

impl DeviceIdentificationUseCase {
    pub fn new(service: Arc<dyn DeviceIdentifierService>) -> Self {
        Self {
            service,
            identity: OnceLock::new(),
        }
    }

    /// The identifier is taken verbatim from the service, empty string included.
    pub fn get_or_create_device_identity(&self) -> DeviceIdentity {
        self.identity
            .get_or_init(|| {
                let identity = DeviceIdentity {
                    identifier: self.service.device_identifier(),
                    created_at: Utc::now(),
                };
                tracing::debug!(identifier = %identity.identifier, "device identity created");
                identity
            })
            .clone()
    }
}

/// Session public key (32 bytes, X25519). Sent in the transport handshake.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// X25519 keypair. The relay generates a fresh one for every handshake.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Shared secret with the peer's public key. Used to derive the session key.
    pub fn shared_secret(&self, other_public: &PublicKey) -> [u8; 32] {
        let other = X25519PublicKey::from(other_public.0);
        self.secret.diffie_hellman(&other).to_bytes()
    }
}

/// Direction labels mixed into the session keys.
pub const PHONE_TO_WATCH: &[u8] = b"phone->watch";
pub const WATCH_TO_PHONE: &[u8] = b"watch->phone";

/// ChaCha20-Poly1305 tag appended to every sealed frame.
pub const WIRE_TAG_LEN: usize = 16;

/// Derive a 32-byte ChaCha20-Poly1305 key for one direction from the shared secret.
pub fn derive_session_key(shared_secret: &[u8; 32], direction: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"wristsync-session-v1");
    hasher.update(direction);
    hasher.update(shared_secret);
    hasher.finalize().into()
}

/// One key per direction; each side's `send` is the other side's `recv`.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub send: [u8; 32],
    pub recv: [u8; 32],
}

impl SessionKeys {
    pub fn for_phone(shared_secret: &[u8; 32]) -> Self {
        Self {
            send: derive_session_key(shared_secret, PHONE_TO_WATCH),
            recv: derive_session_key(shared_secret, WATCH_TO_PHONE),
        }
    }

    pub fn for_watch(shared_secret: &[u8; 32]) -> Self {
        Self {
            send: derive_session_key(shared_secret, WATCH_TO_PHONE),
            recv: derive_session_key(shared_secret, PHONE_TO_WATCH),
        }
    }
}

fn nonce_bytes(nonce: u64) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[4..12].copy_from_slice(&nonce.to_le_bytes());
    out
}

/// Wire encryption. Nonce is a 64-bit counter per direction; never reuse.
pub fn encrypt_wire(
    key: &[u8; 32],
    nonce: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    let nonce = nonce_bytes(nonce);
    cipher
        .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| WireCryptoError::Encrypt)
}

pub fn decrypt_wire(
    key: &[u8; 32],
    nonce: u64,
    ciphertext: &[u8],
) -> Result<Vec<u8>, WireCryptoError> {
    let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WireCryptoError::Key)?;
    let nonce = nonce_bytes(nonce);
    cipher
        .decrypt(chacha20poly1305::Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| WireCryptoError::Decrypt)
}

#[derive(Debug, thiserror::Error)]
pub enum WireCryptoError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedIdentifier {
        value: &'static str,
        calls: AtomicUsize,
    }

    impl DeviceIdentifierService for FixedIdentifier {
        fn device_identifier(&self) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value.to_string()
        }
    }

    fn fixed(value: &'static str) -> Arc<FixedIdentifier> {
        Arc::new(FixedIdentifier {
            value,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn identity_uses_service_identifier_and_current_time() {
        let service = fixed("A1B2-C3D4");
        let use_case = DeviceIdentificationUseCase::new(service);
        let before = Utc::now();
        let identity = use_case.get_or_create_device_identity();
        assert_eq!(identity.identifier, "A1B2-C3D4");
        let delta = identity.created_at - before;
        assert!(delta.num_seconds().abs() < 5);
    }

    #[test]
    fn empty_identifier_is_kept_verbatim() {
        let use_case = DeviceIdentificationUseCase::new(fixed(""));
        assert_eq!(use_case.get_or_create_device_identity().identifier, "");
    }

    #[test]
    fn identity_is_created_once() {
        let service = fixed("watch-1");
        let use_case = DeviceIdentificationUseCase::new(service.clone());
        let first = use_case.get_or_create_device_identity();
        let second = use_case.get_or_create_device_identity();
        assert_eq!(first, second);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn key_exchange_symmetric() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_eq!(a.shared_secret(b.public_key()), b.shared_secret(a.public_key()));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = derive_session_key(&[9u8; 32], PHONE_TO_WATCH);
        let cipher = encrypt_wire(&key, 4, b"recent exercises").unwrap();
        assert_eq!(decrypt_wire(&key, 4, &cipher).unwrap(), b"recent exercises");
        assert!(matches!(
            decrypt_wire(&key, 5, &cipher),
            Err(WireCryptoError::Decrypt)
        ));
    }

    #[test]
    fn directions_never_share_a_keystream() {
        let phone = Keypair::generate();
        let watch = Keypair::generate();
        let phone_keys = SessionKeys::for_phone(&phone.shared_secret(watch.public_key()));
        let watch_keys = SessionKeys::for_watch(&watch.shared_secret(phone.public_key()));
        assert_eq!(phone_keys.send, watch_keys.recv);
        assert_eq!(phone_keys.recv, watch_keys.send);
        assert_ne!(phone_keys.send, phone_keys.recv);

        let plain = [0x41u8; 32];
        let from_phone = encrypt_wire(&phone_keys.send, 0, &plain).unwrap();
        let from_watch = encrypt_wire(&watch_keys.send, 0, &plain).unwrap();
        assert_ne!(from_phone, from_watch);
        assert_eq!(decrypt_wire(&watch_keys.recv, 0, &from_phone).unwrap(), plain);
        assert!(decrypt_wire(&phone_keys.send, 0, &from_watch).is_err());
    }

    #[test]
    fn fresh_keypairs_give_fresh_session_keys() {
        let phone = Keypair::generate();
        let first = SessionKeys::for_phone(&phone.shared_secret(Keypair::generate().public_key()));
        let second = SessionKeys::for_phone(&phone.shared_secret(Keypair::generate().public_key()));
        assert_ne!(first.send, second.send);
    }

    #[test]
    fn sealed_frame_adds_tag_only() {
        let key = derive_session_key(&[3u8; 32], WATCH_TO_PHONE);
        let sealed = encrypt_wire(&key, 7, b"ping").unwrap();
        assert_eq!(sealed.len(), 4 + WIRE_TAG_LEN);
    }
}

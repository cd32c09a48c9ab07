use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Nonce},
    ChaCha20Poly1305, Key,
};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use hkdf::Hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use std::io::{Read, Write};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::SignalingError;
use crate::signaling::SignalMessage;

/// Upper bound on an opened payload (zip-bomb guard)
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

const NONCE_LEN: usize = 12;

/// Key material with memory cleared on drop
#[derive(Zeroize, ZeroizeOnDrop)]
struct ZeroizedKey {
    key: [u8; 32],
}

/// Topic name and envelope key, both derived from the connector id.
///
/// Relays only ever see the topic hash; the connector id and the SDP stay
/// inside the sealed payload.
pub struct TopicKeys {
    topic: String,
    cipher: ChaCha20Poly1305,
    _key: ZeroizedKey,
    rng: SystemRandom,
}

impl TopicKeys {
    pub fn derive(connector_id: &str) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(&b"starlight-signaling"[..]), connector_id.as_bytes());

        // 16 bytes of topic, 32 bytes of key
        let mut okm = [0u8; 48];
        // 48 bytes is far below the HKDF-SHA256 output limit
        let _ = hk.expand(b"topic+envelope", &mut okm);

        let topic = hex::encode(&okm[..16]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&okm[16..]);
        okm.zeroize();

        let cipher = ChaCha20Poly1305::new(&Key::from(key));
        let wrapped = ZeroizedKey { key };
        key.zeroize();

        Self {
            topic,
            cipher,
            _key: wrapped,
            rng: SystemRandom::new(),
        }
    }

    /// Hex tag the signaling events are published under
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// JSON -> gzip -> ChaCha20-Poly1305 -> base64(nonce || ciphertext)
    pub fn seal(&self, msg: &SignalMessage) -> Result<String, SignalingError> {
        let json = serde_json::to_vec(msg)?;

        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(&json)
            .map_err(|e| SignalingError::Envelope(e.to_string()))?;
        let compressed = gz
            .finish()
            .map_err(|e| SignalingError::Envelope(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| SignalingError::Envelope("nonce generation failed".into()))?;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::<ChaCha20Poly1305>::from_slice(&nonce), compressed.as_slice())
            .map_err(|_| SignalingError::Envelope("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<SignalMessage, SignalingError> {
        let raw = general_purpose::STANDARD
            .decode(sealed.trim())
            .map_err(|e| SignalingError::Envelope(e.to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(SignalingError::Envelope("envelope too short".into()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

        let compressed = self
            .cipher
            .decrypt(Nonce::<ChaCha20Poly1305>::from_slice(nonce), ciphertext)
            .map_err(|_| SignalingError::Envelope("authentication failed".into()))?;

        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .take(MAX_DECOMPRESSED_SIZE)
            .read_to_end(&mut json)
            .map_err(|e| SignalingError::Envelope(e.to_string()))?;

        Ok(serde_json::from_slice(&json)?)
    }
}

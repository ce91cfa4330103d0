use base58::ToBase58;
use secp256k1::{Message, PublicKey, Signature, SECP256K1};
use sha2::{Digest, Sha256};

pub type SynapseHash = [u8; 32];

/// The identity a dendrite signs with. A chain hotkey in production, any
/// secp256k1 [`Keypair`](crate::keypair::Keypair) in tests.
pub trait Signer: Send + Sync {
    /// Network identity (hotkey address).
    fn address(&self) -> String;
    /// Serialized public key bytes.
    fn public_key(&self) -> Vec<u8>;
    /// Hash and sign message bytes.
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

pub fn hash(data: &[u8]) -> SynapseHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(hash(data))
}

/// Address derived from a serialized public key, as used for hotkeys.
pub fn address_from_public_key(public_key: &[u8]) -> Option<String> {
    PublicKey::from_slice(public_key)
        .ok()
        .map(|key| key.serialize().to_base58())
}

/// Hex encode a signature with the `0x` prefix used on the wire.
pub fn encode_signature(signature: &[u8]) -> String {
    format!("0x{}", hex::encode(signature))
}

pub fn decode_signature(signature: &str) -> Option<Vec<u8>> {
    hex::decode(signature.trim_start_matches("0x")).ok()
}

/// Verify a compact secp256k1 signature over sha256(message).
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let digest = hash(message);
    let message = match Message::from_slice(&digest) {
        Ok(message) => message,
        Err(_) => return false,
    };
    let signature = match Signature::from_compact(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    match PublicKey::from_slice(public_key) {
        Ok(public_key) => SECP256K1.verify(&message, &signature, &public_key).is_ok(),
        Err(_) => false,
    }
}

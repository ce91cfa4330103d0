use crate::crypto::{hash, Signer};
use base58::ToBase58;
use secp256k1::{Message, PublicKey, SecretKey, Signature, SECP256K1};
use std::fmt;

/// An secp256k1 keypair for signing and verifying messages
#[derive(Debug, PartialEq)]
pub struct Keypair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Keypair {
    /// Create and return a keypair with a randomly generated private key.
    pub fn new() -> Keypair {
        let (secret_key, public_key) =
            SECP256K1.generate_keypair(&mut secp256k1::rand::thread_rng());
        Keypair {
            secret_key,
            public_key,
        }
    }

    /// Create and return a keypair with the given u8 array as the private key
    pub fn from_secret_slice(slice: &[u8]) -> Result<Keypair, secp256k1::Error> {
        let secret_key = SecretKey::from_slice(slice)?;
        let public_key = PublicKey::from_secret_key(&SECP256K1, &secret_key);

        Ok(Keypair {
            secret_key,
            public_key,
        })
    }

    /// Create and return a keypair with the given hex string as the private key
    pub fn from_secret_hex(secret_hex: &str) -> crate::Result<Keypair> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret_hex, &mut bytes as &mut [u8])
            .map_err(|err| crate::Error::Key(err.to_string()))?;
        Keypair::from_secret_slice(&bytes).map_err(|err| crate::Error::Key(err.to_string()))
    }

    /// Get the public key of the keypair in base58(i.e. address) format
    pub fn address(&self) -> String {
        self.public_key.serialize().to_base58()
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Hash and sign message bytes
    pub fn sign_message(&self, message_bytes: &[u8]) -> Result<Signature, secp256k1::Error> {
        let msg = Message::from_slice(&hash(message_bytes))?;
        Ok(SECP256K1.sign(&msg, &self.secret_key))
    }
}

impl Default for Keypair {
    fn default() -> Self {
        Keypair::new()
    }
}

impl Signer for Keypair {
    fn address(&self) -> String {
        Keypair::address(self)
    }

    fn public_key(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        // a 32 byte digest always makes a valid message, an empty signature
        // simply fails verification on the other side
        self.sign_message(message)
            .map(|signature| signature.serialize_compact().to_vec())
            .unwrap_or_default()
    }
}

impl fmt::Display for Keypair {
    /// formats a Keypair for println! without leaking the secret
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keypair({})", self.address())
    }
}

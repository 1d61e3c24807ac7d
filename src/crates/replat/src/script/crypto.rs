use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rhai::{EvalAltResult, Module};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha2::Sha256;

use crate::error::EngineError;
use crate::script::script_err;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

const SALT_LEN: usize = 8;
const PBKDF2_ROUNDS: u32 = 10_000;

/// Builds the `crypto` module exposed to scripts.
pub fn module() -> Module {
    let mut module = Module::new();
    module.set_native_fn(
        "enc_aes_cbc_pbkdf",
        |key: &str, data: &str| -> Result<String, Box<EvalAltResult>> {
            encrypt_aes_cbc_pbkdf(key, data.as_bytes()).map_err(|e| script_err(e.to_string()))
        },
    );
    module.set_native_fn(
        "enc_rsa_cert",
        |certificate: &str, data: &str| -> Result<String, Box<EvalAltResult>> {
            encrypt_rsa_cert(certificate, data.as_bytes()).map_err(|e| script_err(e.to_string()))
        },
    );
    module
}

/// AES-256-CBC with a PBKDF2-HMAC-SHA256 derived key and iv, wrapped in the
/// OpenSSL `Salted__` envelope and base64 encoded.
pub fn encrypt_aes_cbc_pbkdf(key: &str, data: &[u8]) -> Result<String, EngineError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    // 32 key bytes followed by 16 iv bytes.
    let mut derived = [0u8; 48];
    pbkdf2::pbkdf2_hmac::<Sha256>(key.as_bytes(), &salt, PBKDF2_ROUNDS, &mut derived);

    let cipher = Aes256CbcEnc::new_from_slices(&derived[..32], &derived[32..])
        .map_err(|e| EngineError::Script(format!("failed to set up the cipher: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(data);

    let mut envelope = Vec::with_capacity(8 + SALT_LEN + ciphertext.len());
    envelope.extend_from_slice(b"Salted__");
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(envelope))
}

/// PKCS#1 v1.5 encryption against the RSA public key of a PEM certificate,
/// base64 encoded.
pub fn encrypt_rsa_cert(certificate: &str, data: &[u8]) -> Result<String, EngineError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(certificate.as_bytes())
        .map_err(|e| EngineError::Script(format!("failed to parse the certificate PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| EngineError::Script(format!("failed to parse the certificate: {e}")))?;
    let key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|e| EngineError::Script(format!("the certificate key is not RSA: {e}")))?;
    let ciphertext = key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, data)
        .map_err(|e| EngineError::Script(format!("encryption failed: {e}")))?;
    Ok(BASE64.encode(ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_envelope_carries_the_openssl_salt_header() {
        let encoded = encrypt_aes_cbc_pbkdf("passphrase", b"payload").unwrap();
        let raw = BASE64.decode(encoded).unwrap();
        assert_eq!(&raw[..8], b"Salted__");
        // 8-byte salt plus at least one padded block.
        assert!(raw.len() >= 8 + SALT_LEN + 16);
    }

    #[test]
    fn aes_output_varies_with_the_salt() {
        let a = encrypt_aes_cbc_pbkdf("passphrase", b"payload").unwrap();
        let b = encrypt_aes_cbc_pbkdf("passphrase", b"payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rsa_rejects_garbage_certificates() {
        assert!(encrypt_rsa_cert("not a pem", b"payload").is_err());
    }
}

/*
 * FeatherMail SMTP server framework
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use sha2::{Digest, Sha256};

/// The password supplied by a provisioned client: a base64 JSON document
/// `{"iv": b64, "ciphertext": b64, "tag": b64}` where the ciphertext is the
/// AES-256-GCM encryption of the clear-text password, AAD empty, and the
/// AEAD key is `SHA-256(secret_key)`.
#[derive(Debug, serde::Deserialize)]
struct PasswordEnvelope {
    iv: String,
    ciphertext: String,
    tag: String,
}

/// Error while opening a password envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Not base64, or not the JSON document expected inside.
    #[error("ill-formed password envelope: {0}")]
    Format(String),
    /// The IV is not 96 bits long.
    #[error("invalid iv length: expected 12 bytes but got {0}")]
    BadIvLength(usize),
    /// Wrong key or corrupted ciphertext.
    #[error("decryption failed")]
    Decrypt,
    /// The decrypted password is not valid UTF-8.
    #[error("decrypted password is not utf8")]
    Utf8,
}

/// Open the envelope and return the clear-text password.
///
/// # Errors
///
/// * the envelope is ill-formed, see [`EnvelopeError`]
pub fn decrypt_password(envelope_b64: &str, secret_key: &str) -> Result<String, EnvelopeError> {
    let document = base64::decode(envelope_b64.trim())
        .map_err(|error| EnvelopeError::Format(error.to_string()))?;

    let envelope = serde_json::from_slice::<PasswordEnvelope>(&document)
        .map_err(|error| EnvelopeError::Format(error.to_string()))?;

    let (iv, mut ciphertext, tag) = (
        base64::decode(&envelope.iv).map_err(|error| EnvelopeError::Format(error.to_string()))?,
        base64::decode(&envelope.ciphertext)
            .map_err(|error| EnvelopeError::Format(error.to_string()))?,
        base64::decode(&envelope.tag).map_err(|error| EnvelopeError::Format(error.to_string()))?,
    );

    if iv.len() != 12 {
        return Err(EnvelopeError::BadIvLength(iv.len()));
    }

    let key = Sha256::digest(secret_key.as_bytes());
    let cipher = Aes256Gcm::new_from_slice(&key).expect("sha256 digest is a valid aes256 key");

    // the aead crate expects the tag appended to the ciphertext
    ciphertext.extend_from_slice(&tag);

    let clear = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| EnvelopeError::Decrypt)?;

    String::from_utf8(clear).map_err(|_| EnvelopeError::Utf8)
}

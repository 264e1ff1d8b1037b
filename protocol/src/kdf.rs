// SPDX-License-Identifier: CC0-1.0

//! Session key derivation for `AuthenticateEV2First`.
//!
//! Both session keys are the AES-CMAC of a 32 byte session vector under the
//! authentication key. The vectors mix the reader's nonce RndA with the tag's
//! nonce RndB and only differ in their two byte label.
//!
//! Byte positions are numbered the way the datasheet numbers them, byte 15 being the
//! most significant byte of a nonce, which is the first byte transmitted.
//!
//! | Bytes | Content |
//! |-------|---------|
//! | 0..2 | Label, `A5 5A` for SV1 and `5A A5` for SV2 |
//! | 2..6 | `00 01 00 80` |
//! | 6..8 | RndA\[15..14\] |
//! | 8..14 | RndA\[13..8\] XOR RndB\[15..10\] |
//! | 14..24 | RndB\[9..0\] |
//! | 24..32 | RndA\[7..0\] |

use zeroize::Zeroize;

use crate::crypto;
use crate::{Error, SessionKeyMaterial, NUM_KEY_BYTES, NUM_NONCE_BYTES, NUM_SESSION_VECTOR_BYTES};

/// Label of SV1, the vector of the session encryption key.
pub const SV1_LABEL: [u8; 2] = [0xA5, 0x5A];
/// Label of SV2, the vector of the session MAC key.
pub const SV2_LABEL: [u8; 2] = [0x5A, 0xA5];

// Fixed counter and length fields following the label.
const SV_CONSTANT: [u8; 4] = [0x00, 0x01, 0x00, 0x80];
// Number of bytes where the two nonces are XORed together.
const NUM_XOR_BYTES: usize = 6;

/// Build a session vector from its label and both nonces.
///
/// # Arguments
///
/// * `prefix1`, `prefix2` - The two label bytes.
/// * `rnd_a` - Nonce generated by the reader.
/// * `rnd_b` - Nonce generated by the tag.
///
/// # Errors
///
/// * `InvalidLength` - A nonce is not exactly 16 bytes.
pub fn session_vector(
    prefix1: u8,
    prefix2: u8,
    rnd_a: &[u8],
    rnd_b: &[u8],
) -> Result<[u8; NUM_SESSION_VECTOR_BYTES], Error> {
    let rnd_a = nonce(rnd_a)?;
    let rnd_b = nonce(rnd_b)?;
    Ok(build_session_vector([prefix1, prefix2], rnd_a, rnd_b))
}

/// Derive session key material from a 16 byte key and both nonces.
///
/// # Errors
///
/// * `InvalidLength` - The key or a nonce is not exactly 16 bytes.
pub fn derive_session_keys(
    auth_key: &[u8],
    rnd_a: &[u8],
    rnd_b: &[u8],
) -> Result<SessionKeyMaterial, Error> {
    let auth_key: &[u8; NUM_KEY_BYTES] =
        auth_key.try_into().map_err(|_| Error::InvalidLength {
            expected: NUM_KEY_BYTES,
            received: auth_key.len(),
        })?;
    let (enc_key, mac_key) = derive_keys(auth_key, nonce(rnd_a)?, nonce(rnd_b)?);
    Ok(SessionKeyMaterial::from_keys(enc_key, mac_key))
}

pub(crate) fn derive_keys(
    auth_key: &[u8; NUM_KEY_BYTES],
    rnd_a: &[u8; NUM_NONCE_BYTES],
    rnd_b: &[u8; NUM_NONCE_BYTES],
) -> ([u8; NUM_KEY_BYTES], [u8; NUM_KEY_BYTES]) {
    let mut sv1 = build_session_vector(SV1_LABEL, rnd_a, rnd_b);
    let mut sv2 = build_session_vector(SV2_LABEL, rnd_a, rnd_b);
    let enc_key = crypto::cmac(auth_key, &[&sv1]);
    let mac_key = crypto::cmac(auth_key, &[&sv2]);
    sv1.zeroize();
    sv2.zeroize();
    (enc_key, mac_key)
}

fn build_session_vector(
    label: [u8; 2],
    rnd_a: &[u8; NUM_NONCE_BYTES],
    rnd_b: &[u8; NUM_NONCE_BYTES],
) -> [u8; NUM_SESSION_VECTOR_BYTES] {
    let mut sv = [0u8; NUM_SESSION_VECTOR_BYTES];
    sv[..2].copy_from_slice(&label);
    sv[2..6].copy_from_slice(&SV_CONSTANT);
    sv[6..8].copy_from_slice(&rnd_a[..2]);
    for i in 0..NUM_XOR_BYTES {
        sv[8 + i] = rnd_a[2 + i] ^ rnd_b[i];
    }
    sv[14..24].copy_from_slice(&rnd_b[NUM_XOR_BYTES..]);
    sv[24..].copy_from_slice(&rnd_a[8..]);
    sv
}

fn nonce(bytes: &[u8]) -> Result<&[u8; NUM_NONCE_BYTES], Error> {
    bytes.try_into().map_err(|_| Error::InvalidLength {
        expected: NUM_NONCE_BYTES,
        received: bytes.len(),
    })
}

// SPDX-License-Identifier: CC0-1.0

//! Secure messaging transform.
//!
//! Stateless building blocks of the per-command contract. Every function takes the
//! transaction identifier and command counter explicitly, [`crate::SecureChannel`]
//! supplies them from the session.

use alloc::vec::Vec;

use crate::apdu::StatusWord;
use crate::crypto;
use crate::{Error, NUM_BLOCK_BYTES, NUM_KEY_BYTES, NUM_MAC_BYTES, NUM_TI_BYTES};

/// Direction of a message, selects the IV label.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Reader to tag.
    Command,
    /// Tag to reader.
    Response,
}

impl Direction {
    /// Two byte label prefixed to the IV input.
    pub fn label(&self) -> [u8; 2] {
        match self {
            Direction::Command => [0xA5, 0x5A],
            Direction::Response => [0x5A, 0xA5],
        }
    }
}

/// Compute the IV for one message.
///
/// `IV = E(KSesAuthENC, label || TI || CmdCtr || 0^8)` with the counter little-endian.
pub fn iv(
    enc_key: &[u8; NUM_KEY_BYTES],
    direction: Direction,
    transaction_id: &[u8; NUM_TI_BYTES],
    command_counter: u16,
) -> [u8; NUM_BLOCK_BYTES] {
    let mut input = [0u8; NUM_BLOCK_BYTES];
    input[..2].copy_from_slice(&direction.label());
    input[2..6].copy_from_slice(transaction_id);
    input[6..8].copy_from_slice(&command_counter.to_le_bytes());
    crypto::encrypt_block(enc_key, input)
}

/// Pad and encrypt message data.
pub fn encrypt(
    enc_key: &[u8; NUM_KEY_BYTES],
    iv: &[u8; NUM_BLOCK_BYTES],
    plaintext: &[u8],
) -> Vec<u8> {
    crypto::cbc_encrypt_padded(enc_key, iv, plaintext)
}

/// Decrypt message data and strip the padding.
///
/// # Errors
///
/// * `ProtocolViolation` - Ciphertext length or padding is malformed.
pub fn decrypt(
    enc_key: &[u8; NUM_KEY_BYTES],
    iv: &[u8; NUM_BLOCK_BYTES],
    ciphertext: &[u8],
) -> Result<Vec<u8>, Error> {
    crypto::cbc_decrypt_padded(enc_key, iv, ciphertext)
}

/// Truncated MAC of a command.
///
/// Covers `INS || CmdCtr || TI || header || data`, where data is the ciphertext
/// in Full mode and the plaintext in MAC mode.
pub fn command_mac(
    mac_key: &[u8; NUM_KEY_BYTES],
    ins: u8,
    command_counter: u16,
    transaction_id: &[u8; NUM_TI_BYTES],
    header: &[u8],
    data: &[u8],
) -> [u8; NUM_MAC_BYTES] {
    truncate_mac(&crypto::cmac(
        mac_key,
        &[
            &[ins],
            &command_counter.to_le_bytes(),
            transaction_id,
            header,
            data,
        ],
    ))
}

/// Truncated MAC of a response.
///
/// Covers `SW1 SW2 || CmdCtr || TI || data` where the counter already includes the
/// increment for this command.
pub fn response_mac(
    mac_key: &[u8; NUM_KEY_BYTES],
    status: StatusWord,
    command_counter: u16,
    transaction_id: &[u8; NUM_TI_BYTES],
    data: &[u8],
) -> [u8; NUM_MAC_BYTES] {
    truncate_mac(&crypto::cmac(
        mac_key,
        &[
            &status.value().to_be_bytes(),
            &command_counter.to_le_bytes(),
            transaction_id,
            data,
        ],
    ))
}

/// Keep the odd indexed bytes of a full CMAC.
pub fn truncate_mac(full_mac: &[u8; NUM_BLOCK_BYTES]) -> [u8; NUM_MAC_BYTES] {
    let mut mact = [0u8; NUM_MAC_BYTES];
    for (i, byte) in mact.iter_mut().enumerate() {
        *byte = full_mac[2 * i + 1];
    }
    mact
}

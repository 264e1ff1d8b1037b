// SPDX-License-Identifier: CC0-1.0

//! AES-128 primitives shared by the handshake and the secure messaging transform.

use alloc::vec;
use alloc::vec::Vec;

use aes::cipher::{
    block_padding::{Iso7816, NoPadding},
    generic_array::GenericArray,
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::{Error, Violation, NUM_BLOCK_BYTES, NUM_KEY_BYTES};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Encrypt a single block with AES-128 in ECB mode.
pub(crate) fn encrypt_block(
    key: &[u8; NUM_KEY_BYTES],
    block: [u8; NUM_BLOCK_BYTES],
) -> [u8; NUM_BLOCK_BYTES] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// AES-128-CBC encryption of whole blocks in place.
///
/// # Errors
///
/// * `InvalidLength` - The buffer is not a multiple of the block size.
pub(crate) fn cbc_encrypt_blocks(
    key: &[u8; NUM_KEY_BYTES],
    iv: &[u8; NUM_BLOCK_BYTES],
    buffer: &mut [u8],
) -> Result<(), Error> {
    let len = buffer.len();
    check_block_aligned(len)?;
    Aes128CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_mut::<NoPadding>(buffer, len)
        .map_err(|_| Error::InvalidLength {
            expected: len - len % NUM_BLOCK_BYTES,
            received: len,
        })?;
    Ok(())
}

/// AES-128-CBC decryption of whole blocks in place.
///
/// # Errors
///
/// * `InvalidLength` - The buffer is not a multiple of the block size.
pub(crate) fn cbc_decrypt_blocks(
    key: &[u8; NUM_KEY_BYTES],
    iv: &[u8; NUM_BLOCK_BYTES],
    buffer: &mut [u8],
) -> Result<(), Error> {
    let len = buffer.len();
    check_block_aligned(len)?;
    Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_mut::<NoPadding>(buffer)
        .map_err(|_| Error::InvalidLength {
            expected: len - len % NUM_BLOCK_BYTES,
            received: len,
        })?;
    Ok(())
}

/// Pad with ISO/IEC 7816-4 and encrypt with AES-128-CBC.
///
/// A block aligned plaintext still gains a full padding block, so the
/// ciphertext is never empty.
pub(crate) fn cbc_encrypt_padded(
    key: &[u8; NUM_KEY_BYTES],
    iv: &[u8; NUM_BLOCK_BYTES],
    plaintext: &[u8],
) -> Vec<u8> {
    let mut buffer = vec![0u8; padded_len(plaintext.len())];
    buffer[..plaintext.len()].copy_from_slice(plaintext);
    let ciphertext_len =
        Aes128CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
            .encrypt_padded_mut::<Iso7816>(&mut buffer, plaintext.len())
            .expect("buffer sized for one padding block")
            .len();
    buffer.truncate(ciphertext_len);
    buffer
}

/// Decrypt with AES-128-CBC and strip ISO/IEC 7816-4 padding.
///
/// # Errors
///
/// * `ProtocolViolation` - The ciphertext is empty or not block aligned, or the
///   plaintext does not end in a `0x80` terminated zero run.
pub(crate) fn cbc_decrypt_padded(
    key: &[u8; NUM_KEY_BYTES],
    iv: &[u8; NUM_BLOCK_BYTES],
    ciphertext: &[u8],
) -> Result<Vec<u8>, Error> {
    if ciphertext.is_empty() || ciphertext.len() % NUM_BLOCK_BYTES != 0 {
        return Err(Violation::ResponseLength {
            received_bytes: ciphertext.len(),
        }
        .into());
    }
    let mut buffer = ciphertext.to_vec();
    let plaintext_len =
        Aes128CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
            .decrypt_padded_mut::<Iso7816>(&mut buffer)
            .map_err(|_| Violation::Padding)?
            .len();
    buffer.truncate(plaintext_len);
    Ok(buffer)
}

/// AES-CMAC (NIST SP 800-38B) over the concatenation of `parts`.
pub(crate) fn cmac(key: &[u8; NUM_KEY_BYTES], parts: &[&[u8]]) -> [u8; NUM_BLOCK_BYTES] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Cyclic rotation of a nonce one byte to the left.
pub(crate) fn rotate_left(block: &[u8; NUM_BLOCK_BYTES]) -> [u8; NUM_BLOCK_BYTES] {
    let mut rotated = *block;
    rotated.rotate_left(1);
    rotated
}

/// Length of a plaintext after ISO/IEC 7816-4 padding.
pub(crate) const fn padded_len(plaintext_len: usize) -> usize {
    (plaintext_len / NUM_BLOCK_BYTES + 1) * NUM_BLOCK_BYTES
}

fn check_block_aligned(len: usize) -> Result<(), Error> {
    if len % NUM_BLOCK_BYTES != 0 {
        return Err(Error::InvalidLength {
            expected: padded_len(len),
            received: len,
        });
    }
    Ok(())
}

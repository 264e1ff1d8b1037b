// SPDX-License-Identifier: CC0-1.0

//! Provisioning commands carried by the secure channel.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use zeroize::Zeroizing;

use crate::apdu::{CommandApdu, Response, MAX_DATA_BYTES};
use crate::envelope::{self, Protection};
use crate::settings::FileSettings;
use crate::{AuthKey, Error, SecureChannel, NUM_APPLICATION_KEYS, NUM_KEY_BYTES, NUM_MAC_BYTES};

/// Instruction byte of `ChangeFileSettings`.
pub const INS_CHANGE_FILE_SETTINGS: u8 = 0x5F;
/// Instruction byte of `ChangeKey`.
pub const INS_CHANGE_KEY: u8 = 0xC4;
/// Instruction byte of `WriteData`.
pub const INS_WRITE_DATA: u8 = 0x8D;
/// Instruction byte of `ReadData`.
pub const INS_READ_DATA: u8 = 0xAD;
/// Instruction byte of `GetCardUID`.
pub const INS_GET_CARD_UID: u8 = 0x51;
/// Instruction byte of ISO `SELECT FILE`.
pub const INS_ISO_SELECT_FILE: u8 = 0xA4;

/// DF name of the NTAG 424 DNA application.
pub const APPLICATION_DF_NAME: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

// Header of WriteData and ReadData: file number, offset and length.
const NUM_DATA_HEADER_BYTES: usize = 7;
// Offsets and lengths of data commands are three byte little-endian values.
const MAX_DATA_OFFSET: u32 = 0x00FF_FFFF;

/// A command ready to be protected by a [`SecureChannel`].
#[derive(Clone)]
pub struct SecureCommand {
    ins: u8,
    header: Vec<u8>,
    data: Zeroizing<Vec<u8>>,
    protection: Protection,
    ends_session: bool,
}

impl SecureCommand {
    /// A generic secure command.
    pub fn new(ins: u8, header: Vec<u8>, data: Vec<u8>, protection: Protection) -> Self {
        SecureCommand {
            ins,
            header,
            data: Zeroizing::new(data),
            protection,
            ends_session: false,
        }
    }

    /// `ChangeFileSettings`, always sent in Full mode.
    pub fn change_file_settings(file_number: u8, settings: &FileSettings) -> Self {
        Self::new(
            INS_CHANGE_FILE_SETTINGS,
            vec![file_number],
            settings.to_bytes().to_vec(),
            Protection::Full,
        )
    }

    /// `ChangeKey`, always sent in Full mode.
    ///
    /// Changing the key the session is authenticated with sends the new key directly and
    /// ends the session. Any other key is sent XORed with its old value and followed by
    /// the CRC32 of the new key.
    ///
    /// # Arguments
    ///
    /// * `authenticated_key` - Key number of the current session.
    /// * `key_number` - Key to change.
    /// * `new_key` - The new key value.
    /// * `key_version` - Version stored next to the new key.
    /// * `old_key` - Current value of the key, ignored for the authenticated key.
    ///
    /// # Errors
    ///
    /// * `InvalidKeyNumber` - The tag has no such application key.
    pub fn change_key(
        authenticated_key: u8,
        key_number: u8,
        new_key: &AuthKey,
        key_version: u8,
        old_key: &AuthKey,
    ) -> Result<Self, Error> {
        if key_number >= NUM_APPLICATION_KEYS {
            return Err(Error::InvalidKeyNumber(key_number));
        }
        let ends_session = key_number == authenticated_key;

        let mut data = Vec::with_capacity(NUM_KEY_BYTES + 5);
        if ends_session {
            data.extend_from_slice(new_key.as_bytes());
            data.push(key_version);
        } else {
            data.extend(
                new_key
                    .as_bytes()
                    .iter()
                    .zip(old_key.as_bytes())
                    .map(|(new, old)| new ^ old),
            );
            data.push(key_version);
            data.extend_from_slice(&crc32nk(new_key.as_bytes()));
        }

        Ok(SecureCommand {
            ins: INS_CHANGE_KEY,
            header: vec![key_number],
            data: Zeroizing::new(data),
            protection: Protection::Full,
            ends_session,
        })
    }

    /// `WriteData` of a single chunk.
    ///
    /// # Errors
    ///
    /// * `InvalidLength` - Offset or length do not fit three bytes.
    /// * `PayloadTooLarge` - The chunk does not fit a short APDU, see [`max_write_chunk`].
    pub fn write_data(
        file_number: u8,
        offset: u32,
        data: &[u8],
        protection: Protection,
    ) -> Result<Self, Error> {
        let max = max_write_chunk(protection);
        if data.len() > max {
            return Err(Error::PayloadTooLarge { max_bytes: max });
        }
        let header = data_header(file_number, offset, data.len() as u32)?;
        Ok(Self::new(INS_WRITE_DATA, header, data.to_vec(), protection))
    }

    /// `ReadData` of `length` bytes, zero reads to the end of the file.
    ///
    /// # Errors
    ///
    /// * `InvalidLength` - Offset or length do not fit three bytes.
    pub fn read_data(
        file_number: u8,
        offset: u32,
        length: u32,
        protection: Protection,
    ) -> Result<Self, Error> {
        let header = data_header(file_number, offset, length)?;
        Ok(Self::new(INS_READ_DATA, header, Vec::new(), protection))
    }

    /// `GetCardUID`, the answer carries the encrypted UID.
    pub fn get_card_uid() -> Self {
        Self::new(INS_GET_CARD_UID, Vec::new(), Vec::new(), Protection::Full)
    }

    /// Instruction byte.
    pub fn ins(&self) -> u8 {
        self.ins
    }

    /// Plaintext header.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Protection of the command data.
    pub fn protection(&self) -> Protection {
        self.protection
    }

    /// Whether the tag ends the session after this command.
    pub fn ends_session(&self) -> bool {
        self.ends_session
    }

    /// Protect the command under the channel's current counter.
    ///
    /// # Errors
    ///
    /// See [`envelope::build_command`].
    pub fn to_bytes(&self, channel: &mut SecureChannel) -> Result<Vec<u8>, Error> {
        envelope::build_command(channel, self.protection, self.ins, &self.header, &self.data)
    }

    /// Verify and unwrap the tag's answer to this command.
    ///
    /// # Errors
    ///
    /// See [`envelope::parse_response`] and [`envelope::parse_session_end`].
    pub fn parse_response(
        &self,
        channel: &mut SecureChannel,
        response: &Response,
    ) -> Result<Vec<u8>, Error> {
        if self.ends_session {
            envelope::parse_session_end(channel, response)?;
            return Ok(Vec::new());
        }
        envelope::parse_response(channel, self.protection, response)
    }
}

impl fmt::Debug for SecureCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCommand")
            .field("ins", &self.ins)
            .field("header", &self.header)
            .field("data_len", &self.data.len())
            .field("protection", &self.protection)
            .field("ends_session", &self.ends_session)
            .finish()
    }
}

/// Largest `WriteData` chunk which fits a short APDU.
pub fn max_write_chunk(protection: Protection) -> usize {
    let available = MAX_DATA_BYTES - NUM_DATA_HEADER_BYTES - NUM_MAC_BYTES;
    match protection {
        Protection::Mac => available,
        // Padding always adds at least one byte.
        Protection::Full => available / 16 * 16 - 1,
    }
}

/// Check that `length` bytes starting at `offset` stay within the three byte address range
/// of data commands.
///
/// # Errors
///
/// * `InvalidLength` - The range ends beyond `0xFFFFFF`.
pub fn check_data_range(offset: u32, length: usize) -> Result<(), Error> {
    let available = (MAX_DATA_OFFSET as usize + 1).saturating_sub(offset as usize);
    if length > available {
        return Err(Error::InvalidLength {
            expected: available,
            received: length,
        });
    }
    Ok(())
}

/// ISO `SELECT FILE` of the NTAG 424 DNA application by DF name, sent in plain.
pub fn select_application() -> Vec<u8> {
    CommandApdu::new(
        0x00,
        INS_ISO_SELECT_FILE,
        0x04,
        0x00,
        APPLICATION_DF_NAME.to_vec(),
        Some(0x00),
    )
    .expect("7 byte DF name")
    .to_bytes()
}

/// CRC32 of a new key as the tag checks it, the IEEE CRC-32 without the final inversion.
pub fn crc32nk(key: &[u8; NUM_KEY_BYTES]) -> [u8; 4] {
    (!crc32fast::hash(key)).to_le_bytes()
}

fn data_header(file_number: u8, offset: u32, length: u32) -> Result<Vec<u8>, Error> {
    for value in [offset, length] {
        if value > MAX_DATA_OFFSET {
            return Err(Error::InvalidLength {
                expected: MAX_DATA_OFFSET as usize,
                received: value as usize,
            });
        }
    }
    let mut header = Vec::with_capacity(NUM_DATA_HEADER_BYTES);
    header.push(file_number);
    header.extend_from_slice(&offset.to_le_bytes()[..3]);
    header.extend_from_slice(&length.to_le_bytes()[..3]);
    Ok(header)
}

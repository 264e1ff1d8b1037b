// SPDX-License-Identifier: CC0-1.0

//! File settings records sent with `ChangeFileSettings`.
//!
//! Access conditions are four bit values, a key number from `0` to `4`, `E` for free
//! access or `F` for no access. They are packed high nibble first.
//!
//! | Field | Bytes |
//! |-------|-------|
//! | FileOption | `0x40` if SDM is enabled, OR the communication mode |
//! | AccessRights | `RW << 4 \| Change`, `Read << 4 \| Write` |
//! | SDMOptions | Bit set, see [`SdmOptions`] |
//! | SDMAccessRights | `0xF0 \| CtrRet`, `MetaRead << 4 \| FileRead` |
//! | Offsets | Three bytes little-endian each, present depending on the fields above |

use alloc::vec::Vec;
use core::ops::BitOr;

use crate::{Error, NUM_APPLICATION_KEYS};

// FileOption bit enabling secure dynamic messaging.
const SDM_ENABLED: u8 = 0x40;
// Offsets and lengths are three byte little-endian values.
const MAX_OFFSET: u32 = 0x00FF_FFFF;
// Encrypted file data is mirrored in blocks of 32 ASCII characters.
const ENC_LENGTH_MULTIPLE: u32 = 32;

/// Communication mode of a file, how its data travels once authenticated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommMode {
    /// No protection.
    Plain,
    /// Plaintext data with a truncated MAC.
    Mac,
    /// Encrypted data with a truncated MAC.
    Full,
}

impl CommMode {
    /// The two low bits of FileOption.
    pub fn bits(&self) -> u8 {
        match self {
            CommMode::Plain => 0b00,
            CommMode::Mac => 0b01,
            CommMode::Full => 0b11,
        }
    }
}

/// Who may perform an operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessCondition {
    /// Authenticated with the application key of this number.
    Key(u8),
    /// Always allowed, `E`.
    Free,
    /// Never allowed, `F`.
    Never,
}

impl AccessCondition {
    /// The four bit encoding.
    pub fn nibble(&self) -> u8 {
        match self {
            AccessCondition::Key(n) => *n & 0x0F,
            AccessCondition::Free => 0x0E,
            AccessCondition::Never => 0x0F,
        }
    }

    /// Decode a four bit value, `None` for the reserved values `5` to `D`.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble & 0x0F {
            n if n < NUM_APPLICATION_KEYS => Some(AccessCondition::Key(n)),
            0x0E => Some(AccessCondition::Free),
            0x0F => Some(AccessCondition::Never),
            _ => None,
        }
    }

    fn is_key(&self) -> bool {
        matches!(self, AccessCondition::Key(_))
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            AccessCondition::Key(n) if *n >= NUM_APPLICATION_KEYS => {
                Err(Error::InvalidFileSettings("access condition names a key above 4"))
            }
            _ => Ok(()),
        }
    }
}

/// Access rights of a file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AccessRights {
    pub read_write: AccessCondition,
    pub change: AccessCondition,
    pub read: AccessCondition,
    pub write: AccessCondition,
}

impl AccessRights {
    /// Access rights in wire order.
    pub fn new(
        read_write: AccessCondition,
        change: AccessCondition,
        read: AccessCondition,
        write: AccessCondition,
    ) -> Self {
        AccessRights {
            read_write,
            change,
            read,
            write,
        }
    }

    /// The two byte encoding.
    pub fn to_bytes(&self) -> [u8; 2] {
        [
            self.read_write.nibble() << 4 | self.change.nibble(),
            self.read.nibble() << 4 | self.write.nibble(),
        ]
    }

    /// Decode the two byte encoding, `None` if a nibble is reserved.
    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        Some(AccessRights {
            read_write: AccessCondition::from_nibble(bytes[0] >> 4)?,
            change: AccessCondition::from_nibble(bytes[0])?,
            read: AccessCondition::from_nibble(bytes[1] >> 4)?,
            write: AccessCondition::from_nibble(bytes[1])?,
        })
    }

    fn validate(&self) -> Result<(), Error> {
        self.read_write.validate()?;
        self.change.validate()?;
        self.read.validate()?;
        self.write.validate()
    }
}

/// Secure dynamic messaging option bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SdmOptions(u8);

impl SdmOptions {
    /// Mirror the UID.
    pub const UID: SdmOptions = SdmOptions(0x80);
    /// Mirror the SDM read counter.
    pub const READ_COUNTER: SdmOptions = SdmOptions(0x40);
    /// Enforce a limit on the SDM read counter.
    pub const READ_COUNTER_LIMIT: SdmOptions = SdmOptions(0x20);
    /// Mirror encrypted file data.
    pub const ENC_FILE_DATA: SdmOptions = SdmOptions(0x10);
    /// Mirror as ASCII hex.
    pub const ASCII: SdmOptions = SdmOptions(0x01);

    /// Raw bits.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Whether all bits of `other` are set.
    pub const fn contains(&self, other: SdmOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SdmOptions {
    type Output = SdmOptions;

    fn bitor(self, rhs: SdmOptions) -> SdmOptions {
        SdmOptions(self.0 | rhs.0)
    }
}

/// Access rights specific to secure dynamic messaging.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SdmAccessRights {
    /// Retrieval of the SDM read counter.
    pub counter_retrieval: AccessCondition,
    /// Key for the encrypted PICC data, or `Free` for plain mirroring.
    pub meta_read: AccessCondition,
    /// Key for the SDM MAC and encrypted file data, or `Never` to disable them.
    pub file_read: AccessCondition,
}

impl SdmAccessRights {
    /// The two byte encoding, the first nibble is reserved and always `F`.
    pub fn to_bytes(&self) -> [u8; 2] {
        [
            0xF0 | self.counter_retrieval.nibble(),
            self.meta_read.nibble() << 4 | self.file_read.nibble(),
        ]
    }
}

/// Secure dynamic messaging configuration of a file.
///
/// Which offsets are required depends on the options and access rights, the
/// others are ignored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SdmSettings {
    pub options: SdmOptions,
    pub access_rights: SdmAccessRights,
    /// Plain UID mirror, required with `UID` when MetaRead is free.
    pub uid_offset: Option<u32>,
    /// Plain read counter mirror, required with `READ_COUNTER` when MetaRead is free.
    pub read_counter_offset: Option<u32>,
    /// Encrypted PICC data mirror, required when MetaRead is a key.
    pub picc_data_offset: Option<u32>,
    /// Start of the MAC input, required when FileRead is a key.
    pub mac_input_offset: Option<u32>,
    /// Encrypted file data mirror, required with `ENC_FILE_DATA`.
    pub enc_offset: Option<u32>,
    /// Length of the encrypted file data mirror, required with `ENC_FILE_DATA`.
    pub enc_length: Option<u32>,
    /// SDM MAC mirror, required when FileRead is a key.
    pub mac_offset: Option<u32>,
    /// Read counter limit, required with `READ_COUNTER_LIMIT`.
    pub read_counter_limit: Option<u32>,
}

impl SdmSettings {
    /// Settings with all offsets unset.
    pub fn new(options: SdmOptions, access_rights: SdmAccessRights) -> Self {
        SdmSettings {
            options,
            access_rights,
            uid_offset: None,
            read_counter_offset: None,
            picc_data_offset: None,
            mac_input_offset: None,
            enc_offset: None,
            enc_length: None,
            mac_offset: None,
            read_counter_limit: None,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        let rights = &self.access_rights;
        rights.counter_retrieval.validate()?;
        rights.meta_read.validate()?;
        rights.file_read.validate()?;

        out.push(self.options.bits());
        out.extend_from_slice(&rights.to_bytes());

        match rights.meta_read {
            AccessCondition::Free => {
                if self.options.contains(SdmOptions::UID) {
                    push_offset(out, self.uid_offset, "UID mirroring requires a UID offset")?;
                }
                if self.options.contains(SdmOptions::READ_COUNTER) {
                    push_offset(
                        out,
                        self.read_counter_offset,
                        "read counter mirroring requires a read counter offset",
                    )?;
                }
            }
            AccessCondition::Key(_) => {
                push_offset(
                    out,
                    self.picc_data_offset,
                    "encrypted PICC data requires a PICC data offset",
                )?;
            }
            AccessCondition::Never => {}
        }

        if rights.file_read.is_key() {
            push_offset(
                out,
                self.mac_input_offset,
                "SDM MAC requires a MAC input offset",
            )?;
            if self.options.contains(SdmOptions::ENC_FILE_DATA) {
                push_offset(
                    out,
                    self.enc_offset,
                    "encrypted file data requires an offset",
                )?;
                match self.enc_length {
                    Some(len) if len == 0 || len % ENC_LENGTH_MULTIPLE != 0 => {
                        return Err(Error::InvalidFileSettings(
                            "encrypted file data length must be a non-zero multiple of 32",
                        ));
                    }
                    len => push_offset(
                        out,
                        len,
                        "encrypted file data requires a length",
                    )?,
                }
            }
            push_offset(out, self.mac_offset, "SDM MAC requires a MAC offset")?;
        } else if self.options.contains(SdmOptions::ENC_FILE_DATA) {
            return Err(Error::InvalidFileSettings(
                "encrypted file data requires FileRead to be a key",
            ));
        }

        if self.options.contains(SdmOptions::READ_COUNTER_LIMIT) {
            push_offset(
                out,
                self.read_counter_limit,
                "read counter limit option requires a limit",
            )?;
        }
        Ok(())
    }
}

/// A validated settings record for `ChangeFileSettings`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSettings {
    comm_mode: CommMode,
    access_rights: AccessRights,
    sdm: Option<SdmSettings>,
    encoded: Vec<u8>,
}

impl FileSettings {
    /// Validate and encode a settings record.
    ///
    /// # Errors
    ///
    /// * `InvalidFileSettings` - A key number is out of range, an offset the options
    ///   require is missing, or an offset does not fit three bytes.
    pub fn new(
        comm_mode: CommMode,
        access_rights: AccessRights,
        sdm: Option<SdmSettings>,
    ) -> Result<Self, Error> {
        access_rights.validate()?;

        let mut encoded = Vec::with_capacity(32);
        let file_option = match sdm {
            Some(_) => SDM_ENABLED | comm_mode.bits(),
            None => comm_mode.bits(),
        };
        encoded.push(file_option);
        encoded.extend_from_slice(&access_rights.to_bytes());
        if let Some(sdm) = &sdm {
            sdm.encode(&mut encoded)?;
        }

        Ok(FileSettings {
            comm_mode,
            access_rights,
            sdm,
            encoded,
        })
    }

    /// Communication mode of the file.
    pub fn comm_mode(&self) -> CommMode {
        self.comm_mode
    }

    /// Access rights of the file.
    pub fn access_rights(&self) -> AccessRights {
        self.access_rights
    }

    /// Secure dynamic messaging configuration, if enabled.
    pub fn sdm(&self) -> Option<&SdmSettings> {
        self.sdm.as_ref()
    }

    /// The encoded record.
    pub fn to_bytes(&self) -> &[u8] {
        &self.encoded
    }
}

fn push_offset(out: &mut Vec<u8>, value: Option<u32>, missing: &'static str) -> Result<(), Error> {
    let value = value.ok_or(Error::InvalidFileSettings(missing))?;
    if value > MAX_OFFSET {
        return Err(Error::InvalidFileSettings("offset does not fit three bytes"));
    }
    out.extend_from_slice(&value.to_le_bytes()[..3]);
    Ok(())
}

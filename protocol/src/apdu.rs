// SPDX-License-Identifier: CC0-1.0

//! Short ISO/IEC 7816-4 command and response APDUs.

use alloc::vec::Vec;
use core::fmt;

use crate::{Error, Violation};

/// Maximum number of bytes in the data field of a short command APDU.
pub const MAX_DATA_BYTES: usize = 255;

// Number of bytes in the trailing status word of a response.
const NUM_STATUS_BYTES: usize = 2;

/// The two byte status word `SW1 SW2` ending every response.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct StatusWord(u16);

impl StatusWord {
    /// Native command completed.
    pub const OPERATION_OK: StatusWord = StatusWord(0x9100);
    /// ISO command completed.
    pub const NORMAL_PROCESSING: StatusWord = StatusWord(0x9000);
    /// The tag expects another frame from the reader.
    pub const ADDITIONAL_FRAME: StatusWord = StatusWord(0x91AF);
    /// Wrong key or session state for the command.
    pub const AUTHENTICATION_ERROR: StatusWord = StatusWord(0x91AE);
    /// CMAC, CRC or padding check failed on the tag.
    pub const INTEGRITY_ERROR: StatusWord = StatusWord(0x911E);
    /// Command length does not match the command definition.
    pub const LENGTH_ERROR: StatusWord = StatusWord(0x917E);
    /// Access rights forbid the command.
    pub const PERMISSION_DENIED: StatusWord = StatusWord(0x919D);

    /// Wrap a raw status word.
    pub const fn new(sw: u16) -> Self {
        StatusWord(sw)
    }

    /// Build from `SW1` and `SW2`.
    pub const fn from_bytes(sw1: u8, sw2: u8) -> Self {
        StatusWord(u16::from_be_bytes([sw1, sw2]))
    }

    /// The raw value.
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// `SW2`, which native commands use as their return code.
    pub const fn return_code(&self) -> u8 {
        self.0.to_be_bytes()[1]
    }

    /// `9100` or `9000`.
    pub fn is_success(&self) -> bool {
        *self == Self::OPERATION_OK || *self == Self::NORMAL_PROCESSING
    }

    /// Symbolic name and short description of the status word, if known.
    pub fn describe(&self) -> Option<(&'static str, &'static str)> {
        let description = match self.0 {
            0x9100 => ("OPERATION_OK", "successful operation"),
            0x910B => ("COMMAND_NOT_FOUND", "command code not supported"),
            0x910C => ("COMMAND_FORMAT_ERROR", "invalid command length or address format"),
            0x911C => ("ILLEGAL_COMMAND_CODE", "instruction not allowed with CLA 90"),
            0x911E => ("INTEGRITY_ERROR", "CMAC, CRC or padding verification failed"),
            0x9140 => ("NO_SUCH_KEY", "key number does not exist"),
            0x917E => ("LENGTH_ERROR", "command data length is invalid"),
            0x919D => ("PERMISSION_DENIED", "current access rights forbid the command"),
            0x919E => ("PARAMETER_ERROR", "parameter value out of range"),
            0x91AD => ("AUTHENTICATION_DELAY", "failed authentications, delay in progress"),
            0x91AE => ("AUTHENTICATION_ERROR", "wrong authentication or session state"),
            0x91AF => ("ADDITIONAL_FRAME", "additional frame expected"),
            0x91BE => ("BOUNDARY_ERROR", "access beyond the file boundary"),
            0x91CA => ("COMMAND_ABORTED", "chained command not completed"),
            0x91EE => ("MEMORY_ERROR", "non-volatile memory failure"),
            0x91F0 => ("FILE_NOT_FOUND", "file number does not exist"),
            0x9000 => ("NORMAL_PROCESSING", "successful operation"),
            0x6300 => ("VERIFICATION_FAILED", "verification failed"),
            0x6581 => ("MEMORY_FAILURE", "non-volatile memory failure"),
            0x6700 => ("WRONG_LENGTH", "wrong length"),
            0x6982 => ("SECURITY_STATUS_NOT_SATISFIED", "security status not satisfied"),
            0x6985 => ("CONDITIONS_OF_USE_NOT_SATISFIED", "conditions of use not satisfied"),
            0x6A80 => ("INCORRECT_PARAMETERS_IN_DATA", "incorrect parameters in the data field"),
            0x6A82 => ("FILE_OR_APPLICATION_NOT_FOUND", "file or application not found"),
            0x6A86 => ("INCORRECT_P1P2", "incorrect P1 or P2"),
            0x6A87 => ("LC_INCONSISTENT_WITH_P1P2", "Lc inconsistent with P1 and P2"),
            0x6D00 => ("INSTRUCTION_NOT_SUPPORTED", "instruction not supported"),
            0x6E00 => ("CLASS_NOT_SUPPORTED", "class not supported"),
            sw if sw & 0xFF00 == 0x6C00 => ("WRONG_LE", "wrong Le, SW2 holds the exact length"),
            _ => return None,
        };
        Some(description)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.describe() {
            Some((name, description)) => write!(f, "{:04X} {name} ({description})", self.0),
            None => write!(f, "{:04X}", self.0),
        }
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord({:04X})", self.0)
    }
}

impl From<u16> for StatusWord {
    fn from(sw: u16) -> Self {
        StatusWord(sw)
    }
}

/// A response from the tag, data followed by the status word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    status: StatusWord,
    data: Vec<u8>,
}

impl Response {
    /// Create a response from an already split status word and data.
    pub fn new(status: u16, data: Vec<u8>) -> Self {
        Response {
            status: StatusWord(status),
            data,
        }
    }

    /// Split raw response bytes into data and the trailing status word.
    ///
    /// # Errors
    ///
    /// * `ProtocolViolation` - Fewer than two bytes, so no status word.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < NUM_STATUS_BYTES {
            return Err(Violation::ResponseLength {
                received_bytes: raw.len(),
            }
            .into());
        }
        let (data, sw) = raw.split_at(raw.len() - NUM_STATUS_BYTES);
        Ok(Response {
            status: StatusWord::from_bytes(sw[0], sw[1]),
            data: data.to_vec(),
        })
    }

    /// The status word.
    pub fn status(&self) -> StatusWord {
        self.status
    }

    /// The response data, without the status word.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the response data.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// A short command APDU, `CLA INS P1 P2 [Lc Data] [Le]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandApdu {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl CommandApdu {
    /// Create a command.
    ///
    /// # Errors
    ///
    /// * `PayloadTooLarge` - The data field does not fit a one byte Lc.
    pub fn new(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: Vec<u8>,
        le: Option<u8>,
    ) -> Result<Self, Error> {
        if data.len() > MAX_DATA_BYTES {
            return Err(Error::PayloadTooLarge {
                max_bytes: MAX_DATA_BYTES,
            });
        }
        Ok(CommandApdu {
            cla,
            ins,
            p1,
            p2,
            data,
            le,
        })
    }

    /// Instruction byte.
    pub fn ins(&self) -> u8 {
        self.ins
    }

    /// Data field.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serialize to the bytes handed to the transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + 6);
        bytes.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            bytes.push(self.data.len() as u8);
            bytes.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            bytes.push(le);
        }
        bytes
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use std::format;
    use std::vec;

    #[test]
    fn test_status_word_classes() {
        assert!(StatusWord::new(0x9100).is_success());
        assert!(StatusWord::new(0x9000).is_success());
        assert!(!StatusWord::ADDITIONAL_FRAME.is_success());
        assert!(!StatusWord::new(0x6982).is_success());
        assert_eq!(StatusWord::from_bytes(0x91, 0xAE), StatusWord::AUTHENTICATION_ERROR);
        assert_eq!(StatusWord::new(0x91AF).return_code(), 0xAF);
        assert_eq!(StatusWord::OPERATION_OK.return_code(), 0x00);
    }

    #[test]
    fn test_status_word_display() {
        assert_eq!(
            format!("{}", StatusWord::INTEGRITY_ERROR),
            "911E INTEGRITY_ERROR (CMAC, CRC or padding verification failed)"
        );
        assert_eq!(format!("{}", StatusWord::new(0x1234)), "1234");
        assert_eq!(StatusWord::new(0x6C10).describe().unwrap().0, "WRONG_LE");
    }

    #[test]
    fn test_response_from_bytes() {
        let response = Response::from_bytes(&[0x01, 0x02, 0x91, 0x00]).unwrap();
        assert_eq!(response.status(), StatusWord::OPERATION_OK);
        assert_eq!(response.data(), &[0x01, 0x02]);

        let status_only = Response::from_bytes(&[0x91, 0xAF]).unwrap();
        assert!(status_only.data().is_empty());

        assert_eq!(
            Response::from_bytes(&[0x91]),
            Err(Error::ProtocolViolation(Violation::ResponseLength {
                received_bytes: 1
            }))
        );
    }

    #[test]
    fn test_command_serialization() {
        let select = CommandApdu::new(0x00, 0xA4, 0x04, 0x00, vec![0xD2, 0x76], Some(0x00)).unwrap();
        assert_eq!(select.to_bytes(), vec![0x00, 0xA4, 0x04, 0x00, 0x02, 0xD2, 0x76, 0x00]);

        let no_data = CommandApdu::new(0x90, 0x51, 0x00, 0x00, vec![], Some(0x00)).unwrap();
        assert_eq!(no_data.to_bytes(), vec![0x90, 0x51, 0x00, 0x00, 0x00]);

        assert_eq!(
            CommandApdu::new(0x90, 0x8D, 0x00, 0x00, vec![0u8; 256], Some(0x00)),
            Err(Error::PayloadTooLarge { max_bytes: 255 })
        );
    }
}

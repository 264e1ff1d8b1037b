// SPDX-License-Identifier: CC0-1.0

//! EV2 secure channel for NXP NTAG 424 DNA tags.
//!
//! This crate implements the reader (PCD) side of the NTAG 424 DNA EV2 secure channel:
//! the three pass `AuthenticateEV2First` mutual authentication, the derivation of the
//! encryption and MAC session keys from the two nonces, and the secure messaging transform
//! which encrypts, MACs and replay protects every command exchanged afterwards.
//!
//! # Quick Start
//!
//! The high-level [`io::Protocol`] drives a whole session over any [`io::Transport`], the
//! port to a physical reader which the caller supplies.
//!
//! ```no_run
//! # #[cfg(feature = "std")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use ntag424::apdu::Response;
//! use ntag424::io::{Protocol, Transport};
//! use ntag424::settings::{AccessCondition, AccessRights, CommMode, FileSettings};
//! use ntag424::AuthKey;
//!
//! struct Reader;
//!
//! impl Transport for Reader {
//!     type Error = std::io::Error;
//!
//!     fn transmit(&mut self, command: &[u8]) -> Result<Response, Self::Error> {
//!         // Hand the command to a PC/SC reader and split off the status word.
//!         # let _ = command;
//!         # unimplemented!()
//!     }
//! }
//!
//! let mut protocol = Protocol::new(Reader);
//! protocol.select_application()?;
//! protocol.authenticate(0, AuthKey::factory_default())?;
//!
//! let rights = AccessRights::new(
//!     AccessCondition::Key(0),
//!     AccessCondition::Key(0),
//!     AccessCondition::Free,
//!     AccessCondition::Key(0),
//! );
//! let settings = FileSettings::new(CommMode::Plain, rights, None)?;
//! protocol.change_file_settings(0x02, &settings)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "std"))]
//! # fn main() {}
//! ```
//!
//! # Advanced Usage
//!
//! For more control, such as no-std environments, you can use the lower level components.
//!
//! - [`Handshake`] - Type-safe `AuthenticateEV2First` state machine.
//! - [`SecureChannel`] - Session keys, transaction identifier and command counter.
//! - [`envelope`] - Wire framing of MAC and Full communication mode commands.
//!
//! # Protocol Details
//!
//! After authentication every secure command is framed as a short APDU.
//!
//! | Field | Size | Description |
//! |-------|------|-------------|
//! | CLA INS P1 P2 | 4 bytes | `90 INS 00 00` |
//! | Lc | 1 byte | Length of the data field |
//! | Header | Variable | Plaintext command header, e.g. the file number |
//! | Data | Variable | Command data, encrypted in Full mode |
//! | MACt | 8 bytes | Truncated CMAC over counter, TI, header and data |
//! | Le | 1 byte | Always `00` |
//!
//! The command counter is bound into every IV and MAC, so each exchange can only be
//! accepted once per session.
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod apdu;
mod channel;
pub mod commands;
mod crypto;
pub mod envelope;
mod handshake;
pub mod io;
pub mod kdf;
pub mod messaging;
pub mod settings;

use core::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

pub use apdu::StatusWord;
pub use channel::{ChannelState, SecureChannel};
pub use handshake::{Handshake, Initialized, ReceivedChallenge};

/// Number of bytes in an AES-128 key.
pub const NUM_KEY_BYTES: usize = 16;
/// Number of bytes in an authentication nonce, RndA or RndB.
pub const NUM_NONCE_BYTES: usize = 16;
/// Number of bytes in the transaction identifier issued by the tag.
pub const NUM_TI_BYTES: usize = 4;
/// Number of bytes in a truncated message authentication code.
pub const NUM_MAC_BYTES: usize = 8;
/// Number of bytes in an AES block, and so in every IV.
pub const NUM_BLOCK_BYTES: usize = 16;
/// Number of bytes in a session vector.
pub const NUM_SESSION_VECTOR_BYTES: usize = 32;
/// Number of application keys on the tag, numbered from zero.
pub const NUM_APPLICATION_KEYS: u8 = 5;

// Number of bytes in the handshake's second response: TI, RndA', PDcap2 and PCDcap2.
const NUM_CONFIRMATION_BYTES: usize = 32;

/// Errors encountered throughout the lifetime of a secure channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The tag answered with an unexpected status word or a malformed response.
    ProtocolViolation(Violation),
    /// The tag could not prove it holds the authentication key.
    AuthenticationFailure,
    /// A response MAC did not verify, the response must be treated as tampered.
    IntegrityFailure,
    /// The command counter cannot advance without repeating a value under the same TI.
    CounterExhausted,
    /// The channel was torn down and must be re-established with a fresh handshake.
    ChannelClosed,
    /// Command data does not fit into a short APDU.
    PayloadTooLarge { max_bytes: usize },
    /// A byte string handed in by the caller has the wrong length.
    InvalidLength { expected: usize, received: usize },
    /// Application key number outside of the tag's five keys.
    InvalidKeyNumber(u8),
    /// A file settings record is not encodable.
    InvalidFileSettings(&'static str),
}

impl Error {
    /// Whether the channel must be discarded after this error.
    ///
    /// Errors raised before anything was sent to the tag leave the channel usable,
    /// all others leave counter or key state ambiguous.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Error::ProtocolViolation(_)
            | Error::AuthenticationFailure
            | Error::IntegrityFailure
            | Error::CounterExhausted
            | Error::ChannelClosed => true,
            Error::PayloadTooLarge { .. }
            | Error::InvalidLength { .. }
            | Error::InvalidKeyNumber(_)
            | Error::InvalidFileSettings(_) => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ProtocolViolation(v) => write!(f, "Protocol violation: {v}."),
            Error::AuthenticationFailure => write!(
                f,
                "Tag returned the wrong RndA', it does not hold the authentication key."
            ),
            Error::IntegrityFailure => write!(f, "Response MAC mismatch."),
            Error::CounterExhausted => write!(
                f,
                "Command counter exhausted, a new authentication is required."
            ),
            Error::ChannelClosed => write!(f, "Secure channel is closed."),
            Error::PayloadTooLarge { max_bytes } => {
                write!(f, "Command data exceeds {max_bytes} bytes.")
            }
            Error::InvalidLength { expected, received } => {
                write!(f, "Expected {expected} bytes, received {received} bytes.")
            }
            Error::InvalidKeyNumber(n) => write!(f, "Key number {n} does not exist."),
            Error::InvalidFileSettings(reason) => write!(f, "Invalid file settings: {reason}."),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ProtocolViolation(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Violation> for Error {
    fn from(v: Violation) -> Self {
        Error::ProtocolViolation(v)
    }
}

/// Ways a tag response can break the protocol sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// The status word is not the one the protocol step requires.
    UnexpectedStatus(StatusWord),
    /// The response data has a length the protocol step cannot accept.
    ResponseLength { received_bytes: usize },
    /// Decrypted response data does not end in ISO/IEC 7816-4 padding.
    Padding,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UnexpectedStatus(sw) => write!(f, "unexpected status {sw}"),
            Violation::ResponseLength { received_bytes } => {
                write!(f, "response of {received_bytes} bytes has an invalid length")
            }
            Violation::Padding => write!(f, "malformed padding in decrypted response"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Violation {}

/// An application key used to authenticate with the tag.
///
/// The bytes are wiped when the key is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthKey([u8; NUM_KEY_BYTES]);

impl AuthKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; NUM_KEY_BYTES]) -> Self {
        AuthKey(bytes)
    }

    /// All zero key every application key is set to when the tag leaves the factory.
    pub fn factory_default() -> Self {
        AuthKey([0u8; NUM_KEY_BYTES])
    }

    /// Copy a key out of a byte slice.
    ///
    /// # Errors
    ///
    /// * `InvalidLength` - The slice is not exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let key: [u8; NUM_KEY_BYTES] = bytes.try_into().map_err(|_| Error::InvalidLength {
            expected: NUM_KEY_BYTES,
            received: bytes.len(),
        })?;
        Ok(AuthKey(key))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; NUM_KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthKey(..)")
    }
}

/// Session keys derived from a successful authentication.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyMaterial {
    enc_key: [u8; NUM_KEY_BYTES],
    mac_key: [u8; NUM_KEY_BYTES],
}

impl SessionKeyMaterial {
    /// Derive session key material from the authentication key and both nonces.
    ///
    /// # Arguments
    ///
    /// * `auth_key` - The application key the handshake authenticated with.
    /// * `rnd_a` - Nonce generated by the reader.
    /// * `rnd_b` - Nonce generated by the tag.
    ///
    /// # Returns
    ///
    /// `KSesAuthENC` and `KSesAuthMAC`, each the full CMAC of one session vector.
    pub fn derive(
        auth_key: &AuthKey,
        rnd_a: &[u8; NUM_NONCE_BYTES],
        rnd_b: &[u8; NUM_NONCE_BYTES],
    ) -> Self {
        let (enc_key, mac_key) = kdf::derive_keys(auth_key.as_bytes(), rnd_a, rnd_b);
        SessionKeyMaterial { enc_key, mac_key }
    }

    /// Use already known session keys, e.g. the ones published in reference vectors.
    pub fn from_keys(enc_key: [u8; NUM_KEY_BYTES], mac_key: [u8; NUM_KEY_BYTES]) -> Self {
        SessionKeyMaterial { enc_key, mac_key }
    }

    /// Session encryption key, `KSesAuthENC`.
    pub fn enc_key(&self) -> &[u8; NUM_KEY_BYTES] {
        &self.enc_key
    }

    /// Session MAC key, `KSesAuthMAC`.
    pub fn mac_key(&self) -> &[u8; NUM_KEY_BYTES] {
        &self.mac_key
    }
}

impl fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeyMaterial(..)")
    }
}

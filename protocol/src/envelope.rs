// SPDX-License-Identifier: CC0-1.0

//! Wire framing of secure commands and their responses.
//!
//! A secure command is the short APDU `90 INS 00 00 Lc Header Data MACt 00`. The header
//! travels in plaintext, the data is encrypted in Full mode and plaintext in MAC mode.
//! The response is `Data MACt SW1 SW2` with the same protection.

use alloc::vec::Vec;

use crate::apdu::{CommandApdu, Response, MAX_DATA_BYTES};
use crate::handshake::INS_ADDITIONAL_FRAME;
use crate::{Error, SecureChannel, Violation, NUM_MAC_BYTES};

/// Class byte of native NTAG 424 commands.
pub const CLA: u8 = 0x90;

/// Protection of a secure command's data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protection {
    /// Plaintext data with a truncated MAC.
    Mac,
    /// Encrypted data with a truncated MAC.
    Full,
}

/// Assemble a secure command under the channel's current counter.
///
/// Empty data in Full mode is sent without a ciphertext block.
///
/// # Arguments
///
/// * `channel` - The authenticated channel.
/// * `protection` - How to protect `data`.
/// * `ins` - Instruction byte.
/// * `header` - Plaintext header fields, e.g. the file or key number.
/// * `data` - Command data.
///
/// # Returns
///
/// The APDU bytes to hand to the transport.
///
/// # Errors
///
/// * `ChannelClosed` - The channel was torn down.
/// * `CounterExhausted` - No counter value is left for the response, the channel is closed.
/// * `PayloadTooLarge` - Header, protected data and MAC exceed a short APDU.
pub fn build_command(
    channel: &mut SecureChannel,
    protection: Protection,
    ins: u8,
    header: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let body = match protection {
        Protection::Full if !data.is_empty() => channel.encrypt_command(data)?,
        Protection::Full => Vec::new(),
        Protection::Mac => data.to_vec(),
    };
    if header.len() + body.len() + NUM_MAC_BYTES > MAX_DATA_BYTES {
        return Err(Error::PayloadTooLarge {
            max_bytes: MAX_DATA_BYTES,
        });
    }
    let mac = channel.command_mac(ins, header, &body)?;

    let mut field = Vec::with_capacity(header.len() + body.len() + NUM_MAC_BYTES);
    field.extend_from_slice(header);
    field.extend_from_slice(&body);
    field.extend_from_slice(&mac);

    log::debug!(
        "Secure command {ins:02X} ({protection:?}) at command counter {}.",
        channel.command_counter()
    );
    log::trace!("Secure command {ins:02X} carries {} data bytes.", field.len());
    Ok(CommandApdu::new(CLA, ins, 0x00, 0x00, field, Some(0x00))?.to_bytes())
}

/// Assemble a Full mode command, see [`build_command`].
pub fn build_full_mode_command(
    channel: &mut SecureChannel,
    ins: u8,
    header: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    build_command(channel, Protection::Full, ins, header, payload)
}

/// Verify and unwrap the response to a secure command.
///
/// On a success status the counter advances first, the MAC and the response IV are
/// computed under the advanced counter. Any failure closes the channel.
///
/// # Returns
///
/// The response data, decrypted in Full mode.
///
/// # Errors
///
/// * `ChannelClosed` - The channel was torn down.
/// * `ProtocolViolation` - Unexpected status, missing MAC or malformed ciphertext.
/// * `CounterExhausted` - The counter cannot advance.
/// * `IntegrityFailure` - The response MAC does not verify.
pub fn parse_response(
    channel: &mut SecureChannel,
    protection: Protection,
    response: &Response,
) -> Result<Vec<u8>, Error> {
    if !channel.is_open() {
        return Err(Error::ChannelClosed);
    }
    let status = response.status();
    log::debug!("Secure command answered with {status}.");
    if !status.is_success() {
        channel.close();
        return Err(Violation::UnexpectedStatus(status).into());
    }
    channel.advance()?;

    let data = response.data();
    if data.len() < NUM_MAC_BYTES {
        channel.close();
        return Err(Violation::ResponseLength {
            received_bytes: data.len(),
        }
        .into());
    }
    let (body, mac) = data.split_at(data.len() - NUM_MAC_BYTES);
    channel.verify_response_mac(status, body, mac)?;

    match protection {
        Protection::Mac => Ok(body.to_vec()),
        Protection::Full if body.is_empty() => Ok(Vec::new()),
        Protection::Full => channel.decrypt_response(body),
    }
}

/// Verify and unwrap the response to a Full mode command, see [`parse_response`].
pub fn parse_full_mode_response(
    channel: &mut SecureChannel,
    response: &Response,
) -> Result<Vec<u8>, Error> {
    parse_response(channel, Protection::Full, response)
}

/// Request the next frame of a response the tag split with `91AF`.
pub fn additional_frame_command() -> Vec<u8> {
    CommandApdu::new(CLA, INS_ADDITIONAL_FRAME, 0x00, 0x00, Vec::new(), Some(0x00))
        .expect("empty data field")
        .to_bytes()
}

/// Handle the unauthenticated acknowledgement of a command which ends the session.
///
/// Changing the key the session was authenticated with invalidates the session on the
/// tag, which then answers without a MAC. The channel is closed in every case.
///
/// # Errors
///
/// * `ChannelClosed` - The channel was already torn down.
/// * `ProtocolViolation` - Unexpected status.
pub fn parse_session_end(channel: &mut SecureChannel, response: &Response) -> Result<(), Error> {
    if !channel.is_open() {
        return Err(Error::ChannelClosed);
    }
    channel.close();
    let status = response.status();
    log::debug!("Session ending command answered with {status}.");
    if !status.is_success() {
        return Err(Violation::UnexpectedStatus(status).into());
    }
    Ok(())
}

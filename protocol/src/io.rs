// SPDX-License-Identifier: CC0-1.0

//! High-level interface for authenticating with a tag and exchanging secure
//! commands over an APDU transport.

use alloc::vec::Vec;
use core::fmt;

use rand::{CryptoRng, RngCore};

use crate::apdu::{Response, StatusWord};
use crate::commands::{self, SecureCommand};
use crate::envelope::{self, Protection};
use crate::settings::FileSettings;
use crate::{AuthKey, Error, Handshake, SecureChannel, Violation};

/// Upper bound on the frames of one chained response.
const MAX_RESPONSE_FRAMES: usize = 16;

/// Port to a physical reader.
///
/// One call is one half-duplex exchange. Implementations own timeouts and
/// cancellation, a failed exchange leaves the session state with the tag unknown
/// and the session is discarded.
pub trait Transport {
    /// Reader specific error.
    type Error;

    /// Send a command APDU and wait for the tag's response.
    fn transmit(&mut self, command: &[u8]) -> Result<Response, Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn transmit(&mut self, command: &[u8]) -> Result<Response, Self::Error> {
        (**self).transmit(command)
    }
}

/// High level error type for the protocol interface.
#[derive(Debug)]
pub enum ProtocolError<E> {
    /// Wrap all transport errors, the session is discarded.
    Transport(E),
    /// Internal protocol specific errors.
    Internal(Error),
}

impl<E> From<Error> for ProtocolError<E> {
    fn from(error: Error) -> Self {
        ProtocolError::Internal(error)
    }
}

impl<E> From<Violation> for ProtocolError<E> {
    fn from(violation: Violation) -> Self {
        ProtocolError::Internal(violation.into())
    }
}

#[cfg(feature = "std")]
impl<E: std::error::Error + 'static> std::error::Error for ProtocolError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Transport(e) => Some(e),
            ProtocolError::Internal(e) => Some(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for ProtocolError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Transport(e) => write!(f, "Transport error: {e}."),
            ProtocolError::Internal(e) => write!(f, "Internal error: {e}"),
        }
    }
}

/// A session with one tag over a transport.
///
/// Holds at most one [`SecureChannel`]. Any session-fatal failure drops the channel,
/// later secure commands fail with `ChannelClosed` until the next successful
/// [`Protocol::authenticate`].
pub struct Protocol<T> {
    transport: T,
    channel: Option<SecureChannel>,
}

impl<T: Transport> Protocol<T> {
    /// New protocol session over `transport`, not yet authenticated.
    pub fn new(transport: T) -> Self {
        Protocol {
            transport,
            channel: None,
        }
    }

    /// The current secure channel, if authenticated.
    pub fn channel(&self) -> Option<&SecureChannel> {
        self.channel.as_ref()
    }

    /// Select the NTAG 424 DNA application, which also resets authentication.
    ///
    /// # Errors
    ///
    /// * `Transport` - The exchange failed.
    /// * `Internal(ProtocolViolation)` - The tag did not answer with success.
    pub fn select_application(&mut self) -> Result<(), ProtocolError<T::Error>> {
        self.close();
        let response = self
            .transport
            .transmit(&commands::select_application())
            .map_err(ProtocolError::Transport)?;
        log::debug!("Select application answered with {}.", response.status());
        if !response.status().is_success() {
            return Err(Violation::UnexpectedStatus(response.status()).into());
        }
        Ok(())
    }

    /// Run `AuthenticateEV2First` with a random RndA from the operating system.
    ///
    /// See [`Protocol::authenticate_with_rng`].
    #[cfg(feature = "std")]
    pub fn authenticate(
        &mut self,
        key_number: u8,
        auth_key: AuthKey,
    ) -> Result<(), ProtocolError<T::Error>> {
        let mut rng = rand::thread_rng();
        self.authenticate_with_rng(key_number, auth_key, &mut rng)
    }

    /// Run `AuthenticateEV2First`, replacing any previous channel.
    ///
    /// # Arguments
    ///
    /// * `key_number` - Application key to authenticate with.
    /// * `auth_key` - Value of that key, wiped once the handshake completes.
    /// * `rng` - Source of RndA.
    ///
    /// # Errors
    ///
    /// * `Transport` - An exchange failed.
    /// * `Internal` - The handshake failed, see [`Handshake::receive_challenge`] and
    ///   [`Handshake::receive_confirmation`].
    pub fn authenticate_with_rng(
        &mut self,
        key_number: u8,
        auth_key: AuthKey,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(), ProtocolError<T::Error>> {
        self.close();
        let handshake = Handshake::new_with_rng(key_number, auth_key, rng)?;

        let response = self
            .transport
            .transmit(&handshake.first_command())
            .map_err(ProtocolError::Transport)?;
        let handshake = handshake.receive_challenge(&response)?;

        let response = self
            .transport
            .transmit(&handshake.second_command())
            .map_err(ProtocolError::Transport)?;
        self.channel = Some(handshake.receive_confirmation(&response)?);
        Ok(())
    }

    /// Protect, send and unwrap one secure command.
    ///
    /// # Returns
    ///
    /// The response data, decrypted in Full mode.
    ///
    /// # Errors
    ///
    /// * `Transport` - The exchange failed, the channel is dropped.
    /// * `Internal` - See [`crate::envelope::build_command`] and
    ///   [`crate::envelope::parse_response`]. Session-fatal errors drop the channel.
    pub fn execute(&mut self, command: &SecureCommand) -> Result<Vec<u8>, ProtocolError<T::Error>> {
        let channel = self.channel.as_mut().ok_or(Error::ChannelClosed)?;
        let apdu = match command.to_bytes(channel) {
            Ok(apdu) => apdu,
            Err(e) => {
                if e.is_session_fatal() {
                    log::debug!("Command {:02X} not sent, dropping channel: {e}", command.ins());
                    self.close();
                }
                return Err(e.into());
            }
        };

        let response = match self.exchange(&apdu) {
            Ok(response) => response,
            Err(e) => {
                log::debug!(
                    "Exchange failed during command {:02X}, dropping channel.",
                    command.ins()
                );
                self.close();
                return Err(e);
            }
        };

        let channel = self.channel.as_mut().ok_or(Error::ChannelClosed)?;
        let result = command.parse_response(channel, &response);
        if !channel.is_open() {
            self.channel = None;
        }
        Ok(result?)
    }

    /// Send `apdu` and collect every frame of the answer.
    ///
    /// A tag splits long responses with `91AF` and hands out the rest one frame per
    /// additional frame request. The frames are joined and carry the final status.
    fn exchange(&mut self, apdu: &[u8]) -> Result<Response, ProtocolError<T::Error>> {
        let mut response = self.transport.transmit(apdu).map_err(ProtocolError::Transport)?;
        if response.status() != StatusWord::ADDITIONAL_FRAME {
            return Ok(response);
        }

        let mut data = Vec::new();
        let mut frames = 1;
        while response.status() == StatusWord::ADDITIONAL_FRAME {
            if frames == MAX_RESPONSE_FRAMES {
                return Err(Violation::ResponseLength {
                    received_bytes: data.len() + response.data().len(),
                }
                .into());
            }
            data.extend_from_slice(response.data());
            response = self
                .transport
                .transmit(&envelope::additional_frame_command())
                .map_err(ProtocolError::Transport)?;
            frames += 1;
        }
        log::trace!("Collected {frames} response frames.");
        let status = response.status();
        data.extend_from_slice(&response.into_data());
        Ok(Response::new(status.value(), data))
    }

    /// Change the settings of a file.
    pub fn change_file_settings(
        &mut self,
        file_number: u8,
        settings: &FileSettings,
    ) -> Result<(), ProtocolError<T::Error>> {
        self.execute(&SecureCommand::change_file_settings(file_number, settings))?;
        Ok(())
    }

    /// Change an application key.
    ///
    /// Changing the key of the current session ends it, a new authentication with the
    /// new key is then required.
    pub fn change_key(
        &mut self,
        key_number: u8,
        new_key: &AuthKey,
        key_version: u8,
        old_key: &AuthKey,
    ) -> Result<(), ProtocolError<T::Error>> {
        let authenticated_key = self
            .channel
            .as_ref()
            .ok_or(Error::ChannelClosed)?
            .key_number();
        let command =
            SecureCommand::change_key(authenticated_key, key_number, new_key, key_version, old_key)?;
        self.execute(&command)?;
        Ok(())
    }

    /// Write `data` at `offset`, split into as many commands as needed.
    ///
    /// The whole range is checked before the first command goes out, so an out of range
    /// write never lands partially.
    pub fn write_data(
        &mut self,
        file_number: u8,
        offset: u32,
        data: &[u8],
        protection: Protection,
    ) -> Result<(), ProtocolError<T::Error>> {
        commands::check_data_range(offset, data.len())?;
        let chunk_len = commands::max_write_chunk(protection);
        let mut chunk_offset = offset;
        for chunk in data.chunks(chunk_len) {
            let command = SecureCommand::write_data(file_number, chunk_offset, chunk, protection)?;
            self.execute(&command)?;
            chunk_offset += chunk.len() as u32;
        }
        Ok(())
    }

    /// Read `length` bytes at `offset`, zero reads to the end of the file.
    pub fn read_data(
        &mut self,
        file_number: u8,
        offset: u32,
        length: u32,
        protection: Protection,
    ) -> Result<Vec<u8>, ProtocolError<T::Error>> {
        self.execute(&SecureCommand::read_data(file_number, offset, length, protection)?)
    }

    /// Read the tag's UID, which is hidden when random ID is enabled.
    pub fn card_uid(&mut self) -> Result<Vec<u8>, ProtocolError<T::Error>> {
        self.execute(&SecureCommand::get_card_uid())
    }

    /// Tear down the secure channel, wiping the session keys.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    /// Close the session and hand back the transport.
    pub fn into_transport(mut self) -> T {
        self.close();
        self.transport
    }
}

// SPDX-License-Identifier: CC0-1.0

//! The authenticated session with a tag.

use alloc::vec::Vec;

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::apdu::StatusWord;
use crate::messaging::{self, Direction};
use crate::{Error, SessionKeyMaterial, NUM_BLOCK_BYTES, NUM_MAC_BYTES, NUM_TI_BYTES};

/// Lifecycle of a [`SecureChannel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Keys are live and commands can be exchanged.
    Authenticated,
    /// Torn down, keys are wiped.
    Closed,
}

/// Session state shared with the tag after `AuthenticateEV2First`.
///
/// Only a completed [`crate::Handshake`] creates a channel. The command counter is the
/// only value which changes during the session, it advances by one for every secure
/// command the tag confirms. Any cryptographic or sequencing failure closes the channel
/// and wipes the session keys.
pub struct SecureChannel {
    /// Application key number the session was authenticated with.
    key_number: u8,
    /// Transaction identifier chosen by the tag.
    transaction_id: [u8; NUM_TI_BYTES],
    keys: SessionKeyMaterial,
    command_counter: u16,
    state: ChannelState,
}

impl SecureChannel {
    pub(crate) fn new(
        key_number: u8,
        transaction_id: [u8; NUM_TI_BYTES],
        keys: SessionKeyMaterial,
    ) -> Self {
        SecureChannel {
            key_number,
            transaction_id,
            keys,
            command_counter: 0,
            state: ChannelState::Authenticated,
        }
    }

    /// Application key number the session was authenticated with.
    pub fn key_number(&self) -> u8 {
        self.key_number
    }

    /// Transaction identifier of the session.
    pub fn transaction_id(&self) -> [u8; NUM_TI_BYTES] {
        self.transaction_id
    }

    /// Counter value the next command is protected with.
    pub fn command_counter(&self) -> u16 {
        self.command_counter
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether the channel can still protect commands.
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Authenticated
    }

    /// IV for a message in `direction` at the current counter.
    ///
    /// # Errors
    ///
    /// * `ChannelClosed` - The channel was torn down.
    pub fn iv(&self, direction: Direction) -> Result<[u8; NUM_BLOCK_BYTES], Error> {
        self.ensure_open()?;
        Ok(messaging::iv(
            self.keys.enc_key(),
            direction,
            &self.transaction_id,
            self.command_counter,
        ))
    }

    /// Encrypt command data under the current counter.
    ///
    /// # Errors
    ///
    /// * `ChannelClosed` - The channel was torn down.
    /// * `CounterExhausted` - No counter value is left for the response, the channel
    ///   is closed.
    pub fn encrypt_command(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.ensure_sendable()?;
        let iv = self.iv(Direction::Command)?;
        Ok(messaging::encrypt(self.keys.enc_key(), &iv, plaintext))
    }

    /// Truncated MAC of a command under the current counter.
    ///
    /// # Arguments
    ///
    /// * `ins` - Instruction byte.
    /// * `header` - Plaintext command header.
    /// * `data` - Command data as sent, ciphertext in Full mode.
    ///
    /// # Errors
    ///
    /// * `ChannelClosed` - The channel was torn down.
    /// * `CounterExhausted` - No counter value is left for the response, the channel
    ///   is closed.
    pub fn command_mac(
        &mut self,
        ins: u8,
        header: &[u8],
        data: &[u8],
    ) -> Result<[u8; NUM_MAC_BYTES], Error> {
        self.ensure_sendable()?;
        Ok(messaging::command_mac(
            self.keys.mac_key(),
            ins,
            self.command_counter,
            &self.transaction_id,
            header,
            data,
        ))
    }

    /// Advance the counter after the tag confirmed a command.
    ///
    /// # Errors
    ///
    /// * `ChannelClosed` - The channel was torn down.
    /// * `CounterExhausted` - The counter is at `0xFFFF`, the channel is closed.
    pub fn advance(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        match self.command_counter.checked_add(1) {
            Some(next) => {
                self.command_counter = next;
                log::trace!("Command counter advanced to {next}.");
                Ok(())
            }
            None => {
                self.close();
                Err(Error::CounterExhausted)
            }
        }
    }

    /// Verify the truncated MAC of a response, closing the channel on mismatch.
    ///
    /// Must be called after [`SecureChannel::advance`] for the command.
    ///
    /// # Errors
    ///
    /// * `ChannelClosed` - The channel was torn down.
    /// * `IntegrityFailure` - The MAC does not verify.
    pub fn verify_response_mac(
        &mut self,
        status: StatusWord,
        data: &[u8],
        mac: &[u8],
    ) -> Result<(), Error> {
        self.ensure_open()?;
        let expected = messaging::response_mac(
            self.keys.mac_key(),
            status,
            self.command_counter,
            &self.transaction_id,
            data,
        );
        if bool::from(expected[..].ct_eq(mac)) {
            Ok(())
        } else {
            log::warn!(
                "Response MAC mismatch at command counter {}, closing channel.",
                self.command_counter
            );
            self.close();
            Err(Error::IntegrityFailure)
        }
    }

    /// Decrypt response data under the current counter, closing the channel on failure.
    ///
    /// Must be called after the response MAC verified.
    ///
    /// # Errors
    ///
    /// * `ChannelClosed` - The channel was torn down.
    /// * `ProtocolViolation` - Ciphertext length or padding is malformed.
    pub fn decrypt_response(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let iv = self.iv(Direction::Response)?;
        messaging::decrypt(self.keys.enc_key(), &iv, ciphertext).map_err(|e| {
            self.close();
            e
        })
    }

    /// Tear the channel down and wipe the session keys.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        log::debug!(
            "Closing secure channel at command counter {}.",
            self.command_counter
        );
        self.keys.zeroize();
        self.state = ChannelState::Closed;
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            ChannelState::Authenticated => Ok(()),
            ChannelState::Closed => Err(Error::ChannelClosed),
        }
    }

    // A command sent at 0xFFFF would be answered under a counter which does not exist.
    fn ensure_sendable(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        if self.command_counter == u16::MAX {
            self.close();
            return Err(Error::CounterExhausted);
        }
        Ok(())
    }
}

impl core::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("key_number", &self.key_number)
            .field("transaction_id", &self.transaction_id)
            .field("command_counter", &self.command_counter)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "std"))]
pub(crate) fn channel_at(
    keys: SessionKeyMaterial,
    transaction_id: [u8; NUM_TI_BYTES],
    command_counter: u16,
) -> SecureChannel {
    let mut channel = SecureChannel::new(0, transaction_id, keys);
    channel.command_counter = command_counter;
    channel
}

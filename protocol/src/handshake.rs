// SPDX-License-Identifier: CC0-1.0

//! # AuthenticateEV2First Handshake
//!
//! 1. **Challenge**: The reader names the key to authenticate with, the tag answers with
//!    its nonce RndB encrypted under that key.
//! 2. **Answer**: The reader sends its own nonce RndA together with RndB rotated one byte
//!    to the left, proving it could decrypt the challenge.
//! 3. **Confirmation**: The tag answers with the transaction identifier and RndA rotated
//!    one byte to the left, proving it holds the same key.
//! 4. **Session Establishment**: Both sides derive the session keys and the secure channel
//!    is ready for commands.

use alloc::vec::Vec;

use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::apdu::{CommandApdu, Response, StatusWord};
use crate::crypto;
use crate::envelope::CLA;
use crate::{
    AuthKey, Error, SecureChannel, SessionKeyMaterial, Violation, NUM_APPLICATION_KEYS,
    NUM_BLOCK_BYTES, NUM_CONFIRMATION_BYTES, NUM_NONCE_BYTES, NUM_TI_BYTES,
};

/// Instruction byte of `AuthenticateEV2First`.
pub const INS_AUTHENTICATE_EV2_FIRST: u8 = 0x71;
/// Instruction byte of an additional frame.
pub const INS_ADDITIONAL_FRAME: u8 = 0xAF;

// Number of bytes in the reader's answer, RndA followed by RndB'.
const NUM_ANSWER_BYTES: usize = 2 * NUM_NONCE_BYTES;
// Number of bytes of the capability fields closing the confirmation, PDcap2 and PCDcap2.
const NUM_CAPABILITY_BYTES: usize = 6;

/// **Initial state** of the handshake which holds the reader's nonce.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Initialized {
    rnd_a: [u8; NUM_NONCE_BYTES],
}

/// **Second state** after decrypting the tag's challenge, awaiting its confirmation.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ReceivedChallenge {
    rnd_a: [u8; NUM_NONCE_BYTES],
    rnd_b: [u8; NUM_NONCE_BYTES],
    answer: [u8; NUM_ANSWER_BYTES],
}

/// Handshake state-machine to authenticate with a tag and establish a secure channel.
///
/// The handshake progresses through its states consuming itself on every step, so a
/// failed handshake cannot be reused.
///
/// 1. `Initialized` - Reader nonce generated, first command ready.
/// 2. `ReceivedChallenge` - Tag nonce decrypted, answer ready.
/// 3. Complete - Tag proved it holds the key, [`SecureChannel`] established.
pub struct Handshake<State> {
    /// Application key number to authenticate with.
    key_number: u8,
    /// Authentication key, wiped when the handshake is dropped.
    auth_key: AuthKey,
    /// State-specific data.
    state: State,
}

// Methods available in all states
impl<State> Handshake<State> {
    /// Application key number the handshake authenticates with.
    pub fn key_number(&self) -> u8 {
        self.key_number
    }
}

// Initialized state implementation
impl Handshake<Initialized> {
    /// Initialize a handshake with a random RndA from the operating system.
    ///
    /// # Errors
    ///
    /// * `InvalidKeyNumber` - The tag has no such application key.
    #[cfg(feature = "std")]
    pub fn new(key_number: u8, auth_key: AuthKey) -> Result<Self, Error> {
        let mut rng = rand::thread_rng();
        Self::new_with_rng(key_number, auth_key, &mut rng)
    }

    /// Initialize a handshake drawing RndA from the supplied RNG.
    ///
    /// # Errors
    ///
    /// * `InvalidKeyNumber` - The tag has no such application key.
    pub fn new_with_rng(
        key_number: u8,
        auth_key: AuthKey,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, Error> {
        if key_number >= NUM_APPLICATION_KEYS {
            return Err(Error::InvalidKeyNumber(key_number));
        }
        let mut rnd_a = [0u8; NUM_NONCE_BYTES];
        rng.fill_bytes(&mut rnd_a);

        Ok(Handshake {
            key_number,
            auth_key,
            state: Initialized { rnd_a },
        })
    }

    /// First command, `AuthenticateEV2First` with an empty capability list.
    pub fn first_command(&self) -> Vec<u8> {
        CommandApdu::new(
            CLA,
            INS_AUTHENTICATE_EV2_FIRST,
            0x00,
            0x00,
            alloc::vec![self.key_number, 0x00],
            Some(0x00),
        )
        .expect("two byte data field")
        .to_bytes()
    }

    /// Process the tag's challenge.
    ///
    /// # Arguments
    ///
    /// * `response` - Tag answer to [`Handshake::first_command`].
    ///
    /// # Errors
    ///
    /// * `ProtocolViolation` - Status is not additional frame, or the data is not a
    ///   single encrypted block.
    pub fn receive_challenge(self, response: &Response) -> Result<Handshake<ReceivedChallenge>, Error> {
        log::debug!(
            "AuthenticateEV2First key {} answered with {}.",
            self.key_number,
            response.status()
        );
        if response.status() != StatusWord::ADDITIONAL_FRAME {
            return Err(Violation::UnexpectedStatus(response.status()).into());
        }
        let encrypted_rnd_b: [u8; NUM_NONCE_BYTES] =
            response.data().try_into().map_err(|_| Violation::ResponseLength {
                received_bytes: response.data().len(),
            })?;

        let mut rnd_b = Zeroizing::new(encrypted_rnd_b);
        crypto::cbc_decrypt_blocks(self.auth_key.as_bytes(), &[0u8; NUM_BLOCK_BYTES], &mut *rnd_b)?;

        let mut rotated_rnd_b = crypto::rotate_left(&rnd_b);
        let mut answer = [0u8; NUM_ANSWER_BYTES];
        answer[..NUM_NONCE_BYTES].copy_from_slice(&self.state.rnd_a);
        answer[NUM_NONCE_BYTES..].copy_from_slice(&rotated_rnd_b);
        rotated_rnd_b.zeroize();
        crypto::cbc_encrypt_blocks(self.auth_key.as_bytes(), &encrypted_rnd_b, &mut answer)?;

        Ok(Handshake {
            key_number: self.key_number,
            state: ReceivedChallenge {
                rnd_a: self.state.rnd_a,
                rnd_b: *rnd_b,
                answer,
            },
            auth_key: self.auth_key,
        })
    }
}

// ReceivedChallenge state implementation
impl Handshake<ReceivedChallenge> {
    /// Second command, the additional frame carrying `E(RndA || RndB')`.
    pub fn second_command(&self) -> Vec<u8> {
        CommandApdu::new(
            CLA,
            INS_ADDITIONAL_FRAME,
            0x00,
            0x00,
            self.state.answer.to_vec(),
            Some(0x00),
        )
        .expect("32 byte data field")
        .to_bytes()
    }

    /// Process the tag's confirmation and establish the secure channel.
    ///
    /// # Arguments
    ///
    /// * `response` - Tag answer to [`Handshake::second_command`].
    ///
    /// # Returns
    ///
    /// A `Result` containing:
    ///   * `Ok(SecureChannel)`: The authenticated channel with its counter at zero.
    ///   * `Err(Error)`: The handshake failed and must be restarted from scratch.
    ///
    /// # Errors
    ///
    /// * `ProtocolViolation` - Status is not success, or the data is not two encrypted blocks.
    /// * `AuthenticationFailure` - RndA' does not match, the tag does not hold the key.
    pub fn receive_confirmation(self, response: &Response) -> Result<SecureChannel, Error> {
        log::debug!(
            "AuthenticateEV2First additional frame answered with {}.",
            response.status()
        );
        if !response.status().is_success() {
            return Err(Violation::UnexpectedStatus(response.status()).into());
        }
        let mut confirmation: [u8; NUM_CONFIRMATION_BYTES] =
            response.data().try_into().map_err(|_| Violation::ResponseLength {
                received_bytes: response.data().len(),
            })?;
        crypto::cbc_decrypt_blocks(
            self.auth_key.as_bytes(),
            &[0u8; NUM_BLOCK_BYTES],
            &mut confirmation,
        )?;

        let (transaction_id, rest) = confirmation.split_at(NUM_TI_BYTES);
        let (rotated_rnd_a, capabilities) = rest.split_at(NUM_NONCE_BYTES);
        debug_assert_eq!(capabilities.len(), 2 * NUM_CAPABILITY_BYTES);

        let mut expected = crypto::rotate_left(&self.state.rnd_a);
        let matches = bool::from(expected[..].ct_eq(rotated_rnd_a));
        expected.zeroize();
        if !matches {
            log::warn!(
                "Tag failed to prove key {} during AuthenticateEV2First.",
                self.key_number
            );
            confirmation.zeroize();
            return Err(Error::AuthenticationFailure);
        }

        let transaction_id: [u8; NUM_TI_BYTES] = transaction_id
            .try_into()
            .expect("4 byte transaction identifier");
        confirmation.zeroize();

        let keys = SessionKeyMaterial::derive(&self.auth_key, &self.state.rnd_a, &self.state.rnd_b);
        log::debug!("Authenticated with key {}.", self.key_number);
        Ok(SecureChannel::new(self.key_number, transaction_id, keys))
    }
}

// SPDX-License-Identifier: CC0-1.0

//! Fuzz test for the receive_confirmation function.
//!
//! The first 16 bytes are the challenge, the rest is the confirmation data.

#![no_main]
use libfuzzer_sys::fuzz_target;
use ntag424::apdu::Response;
use ntag424::{AuthKey, Error, Handshake};

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }
    let (challenge, confirmation) = data.split_at(16);

    let handshake = Handshake::new(0, AuthKey::factory_default()).unwrap();
    let handshake = handshake
        .receive_challenge(&Response::new(0x91AF, challenge.to_vec()))
        .unwrap();

    match handshake.receive_confirmation(&Response::new(0x9100, confirmation.to_vec())) {
        // Only a tag holding the key can echo the random RndA.
        Ok(_) => panic!("confirmation forged without the key"),
        Err(Error::AuthenticationFailure) => assert_eq!(confirmation.len(), 32),
        Err(Error::ProtocolViolation(_)) => assert_ne!(confirmation.len(), 32),
        Err(e) => panic!("unexpected error {e}"),
    }
});

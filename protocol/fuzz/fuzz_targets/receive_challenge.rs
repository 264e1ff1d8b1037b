// SPDX-License-Identifier: CC0-1.0

//! Fuzz test for the receive_challenge function.
//!
//! The first byte picks the status word, the rest is the response data.

#![no_main]
use libfuzzer_sys::fuzz_target;
use ntag424::apdu::Response;
use ntag424::{AuthKey, Error, Handshake};

fuzz_target!(|data: &[u8]| {
    let Some((&status, data)) = data.split_first() else {
        return;
    };
    let sw = if status & 0x01 == 0 { 0x91AF } else { 0x9100 | status as u16 };

    let handshake = Handshake::new(0, AuthKey::factory_default()).unwrap();
    match handshake.receive_challenge(&Response::new(sw, data.to_vec())) {
        Ok(handshake) => {
            // Any single block is a valid challenge.
            assert_eq!(sw, 0x91AF);
            assert_eq!(data.len(), 16);
            assert_eq!(handshake.second_command().len(), 38);
        }
        Err(Error::ProtocolViolation(_)) => {}
        Err(e) => panic!("unexpected error {e}"),
    }
});

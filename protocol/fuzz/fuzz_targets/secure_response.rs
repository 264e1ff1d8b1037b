// SPDX-License-Identifier: CC0-1.0

//! Fuzz test for unwrapping the raw bytes of a secure response.
//!
//! Splits off the status word and the truncated MAC, then verifies and decrypts
//! the rest under fixed session keys.

#![no_main]
use libfuzzer_sys::fuzz_target;
use ntag424::apdu::Response;
use ntag424::messaging::{self, Direction};
use ntag424::NUM_MAC_BYTES;

const ENC_KEY: [u8; 16] = [0x13; 16];
const MAC_KEY: [u8; 16] = [0x4C; 16];
const TI: [u8; 4] = [0x9D, 0x00, 0xC4, 0xDF];

fuzz_target!(|data: &[u8]| {
    let Ok(response) = Response::from_bytes(data) else {
        assert!(data.len() < 2);
        return;
    };
    let body = response.data();
    if body.len() < NUM_MAC_BYTES {
        return;
    }
    let (ciphertext, mac) = body.split_at(body.len() - NUM_MAC_BYTES);
    // Random input is not expected to carry a valid MAC, decrypt regardless.
    let verified =
        messaging::response_mac(&MAC_KEY, response.status(), 1, &TI, ciphertext)[..] == mac[..];
    std::hint::black_box(verified);

    let iv = messaging::iv(&ENC_KEY, Direction::Response, &TI, 1);
    if let Ok(plaintext) = messaging::decrypt(&ENC_KEY, &iv, ciphertext) {
        assert!(plaintext.len() < ciphertext.len());
        assert_eq!(ciphertext.len() % 16, 0);
    }
});

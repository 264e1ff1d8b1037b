// SPDX-License-Identifier: CC0-1.0

#![feature(test)]

extern crate test;

use ntag424::kdf::derive_session_keys;
use ntag424::messaging::{self, Direction};
use ntag424::{SessionKeyMaterial, StatusWord};
use test::{black_box, Bencher};

const TI: [u8; 4] = [0x9D, 0x00, 0xC4, 0xDF];
const RND_A: [u8; 16] = [
    0x13, 0xC5, 0xDB, 0x8A, 0x59, 0x30, 0x43, 0x9F, 0xC3, 0xDE, 0xF9, 0xA4, 0xC6, 0x75, 0x36, 0x0F,
];
const RND_B: [u8; 16] = [
    0xB9, 0xE2, 0xFC, 0x78, 0x9B, 0x64, 0xBF, 0x23, 0x7C, 0xCC, 0xAA, 0x20, 0xEC, 0x7E, 0x6E, 0x48,
];

fn session_keys() -> SessionKeyMaterial {
    derive_session_keys(&[0u8; 16], &RND_A, &RND_B).unwrap()
}

// Reader protects a command, tag answers with the same data protected in the response direction.
fn round_trip(keys: &SessionKeyMaterial, counter: u16, plaintext: &[u8]) -> Vec<u8> {
    let iv = messaging::iv(keys.enc_key(), Direction::Command, &TI, counter);
    let ciphertext = messaging::encrypt(keys.enc_key(), &iv, plaintext);
    let mac = messaging::command_mac(keys.mac_key(), 0x8D, counter, &TI, &[0x02], &ciphertext);

    let response_iv = messaging::iv(keys.enc_key(), Direction::Response, &TI, counter + 1);
    let response = messaging::encrypt(keys.enc_key(), &response_iv, plaintext);
    let response_mac = messaging::response_mac(
        keys.mac_key(),
        StatusWord::OPERATION_OK,
        counter + 1,
        &TI,
        &response,
    );
    assert_ne!(mac, response_mac);

    messaging::decrypt(keys.enc_key(), &response_iv, &response).unwrap()
}

#[bench]
fn bench_session_key_derivation(b: &mut Bencher) {
    b.iter(|| derive_session_keys(black_box(&[0u8; 16]), black_box(&RND_A), black_box(&RND_B)));
}

#[bench]
fn bench_round_trip_small_command(b: &mut Bencher) {
    let plaintext = [0x40, 0x00, 0xE0]; // File settings without SDM.
    let keys = session_keys();

    b.iter(|| black_box(round_trip(&keys, black_box(1), black_box(&plaintext))));
}

#[bench]
fn bench_round_trip_max_chunk(b: &mut Bencher) {
    let plaintext = vec![0u8; 239]; // Largest Full mode WriteData chunk.
    let keys = session_keys();

    b.iter(|| black_box(round_trip(&keys, black_box(1), black_box(&plaintext))));
}

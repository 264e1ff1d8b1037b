// SPDX-License-Identifier: CC0-1.0

//! Full sessions against a simulated NTAG 424 DNA.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use ntag424::apdu::{Response, StatusWord};
use ntag424::commands::{crc32nk, select_application};
use ntag424::envelope::Protection;
use ntag424::io::{Protocol, ProtocolError, Transport};
use ntag424::kdf::derive_session_keys;
use ntag424::messaging::{self, Direction};
use ntag424::settings::{
    AccessCondition, AccessRights, CommMode, FileSettings, SdmAccessRights, SdmOptions,
    SdmSettings,
};
use ntag424::{AuthKey, Error, SessionKeyMaterial, Violation};
use rand::rngs::StdRng;
use rand::SeedableRng;

const RND_B: [u8; 16] = [
    0xB9, 0xE2, 0xFC, 0x78, 0x9B, 0x64, 0xBF, 0x23, 0x7C, 0xCC, 0xAA, 0x20, 0xEC, 0x7E, 0x6E, 0x48,
];
const TI: [u8; 4] = [0x9D, 0x00, 0xC4, 0xDF];
const UID: [u8; 7] = [0x04, 0x96, 0x8C, 0xAA, 0x5C, 0x5E, 0x80];
// Longest response frame before the tag asks for an additional frame.
const FRAME_BYTES: usize = 256;

fn cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut chain = *iv;
    for block in data.chunks_mut(16) {
        for (b, c) in block.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        chain.copy_from_slice(block);
    }
}

fn cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut chain = *iv;
    for block in data.chunks_mut(16) {
        let mut next = [0u8; 16];
        next.copy_from_slice(block);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, c) in block.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        chain = next;
    }
}

fn rotate_left(block: &[u8; 16]) -> [u8; 16] {
    let mut rotated = *block;
    rotated.rotate_left(1);
    rotated
}

struct Session {
    key_number: u8,
    keys: SessionKeyMaterial,
    counter: u16,
}

struct Pending {
    key_number: u8,
    challenge: [u8; 16],
}

/// Tag side of the protocol, just enough of it to exercise the reader.
struct SimulatedTag {
    keys: [[u8; 16]; 5],
    key_versions: [u8; 5],
    file_settings: Vec<Option<Vec<u8>>>,
    file: Vec<u8>,
    // Protection of the data file, as the tag derives it from the file settings.
    file_protection: Protection,
    pending: Option<Pending>,
    session: Option<Session>,
    // Rest of a chained response, served on additional frame requests.
    chained: Vec<u8>,
    // Flip a bit of the next response MAC.
    tamper_next_mac: bool,
    // Confirm with an unrotated RndA, as a tag holding a different key would appear.
    fake_confirmation: bool,
    log: Vec<Vec<u8>>,
}

impl SimulatedTag {
    fn new() -> Self {
        SimulatedTag {
            keys: [[0u8; 16]; 5],
            key_versions: [0u8; 5],
            file_settings: vec![None; 3],
            file: vec![0u8; 256],
            file_protection: Protection::Full,
            pending: None,
            session: None,
            chained: Vec::new(),
            tamper_next_mac: false,
            fake_confirmation: false,
            log: Vec::new(),
        }
    }

    fn status(sw: u16) -> Response {
        Response::new(sw, Vec::new())
    }

    fn authenticate_first(&mut self, data: &[u8]) -> Response {
        self.session = None;
        let key_number = data[0];
        if key_number as usize >= self.keys.len() {
            return Self::status(0x9140);
        }
        let mut challenge = RND_B;
        cbc_encrypt(&self.keys[key_number as usize], &[0u8; 16], &mut challenge);
        self.pending = Some(Pending {
            key_number,
            challenge,
        });
        Response::new(0x91AF, challenge.to_vec())
    }

    fn authenticate_answer(&mut self, data: &[u8]) -> Response {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => return Self::status(0x91CA),
        };
        let key = self.keys[pending.key_number as usize];
        let mut answer: [u8; 32] = data.try_into().unwrap();
        cbc_decrypt(&key, &pending.challenge, &mut answer);
        if answer[16..] != rotate_left(&RND_B) {
            return Self::status(0x91AE);
        }
        let rnd_a: [u8; 16] = answer[..16].try_into().unwrap();

        let mut confirmation = [0u8; 32];
        confirmation[..4].copy_from_slice(&TI);
        if self.fake_confirmation {
            confirmation[4..20].copy_from_slice(&rnd_a);
        } else {
            confirmation[4..20].copy_from_slice(&rotate_left(&rnd_a));
        }
        cbc_encrypt(&key, &[0u8; 16], &mut confirmation);

        self.session = Some(Session {
            key_number: pending.key_number,
            keys: derive_session_keys(&key, &rnd_a, &RND_B).unwrap(),
            counter: 0,
        });
        Response::new(0x9100, confirmation.to_vec())
    }

    fn secure_command(&mut self, ins: u8, field: &[u8]) -> Response {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Self::status(0x91AE),
        };
        let header_len = match ins {
            0x5F | 0xC4 => 1,
            0x8D | 0xAD => 7,
            _ => 0,
        };
        let protection = match ins {
            0x8D | 0xAD => self.file_protection,
            _ => Protection::Full,
        };
        let (header, rest) = field.split_at(header_len);
        let (body, mac) = rest.split_at(rest.len() - 8);

        let expected =
            messaging::command_mac(session.keys.mac_key(), ins, session.counter, &TI, header, body);
        if expected[..] != mac[..] {
            self.session = None;
            return Self::status(0x911E);
        }
        let data = match protection {
            Protection::Full if !body.is_empty() => {
                let iv = messaging::iv(session.keys.enc_key(), Direction::Command, &TI, session.counter);
                messaging::decrypt(session.keys.enc_key(), &iv, body).unwrap()
            }
            _ => body.to_vec(),
        };

        let answer = match ins {
            0x5F => {
                self.file_settings[header[0] as usize] = Some(data);
                Vec::new()
            }
            0xC4 => {
                let key_number = header[0] as usize;
                if key_number as u8 == session.key_number {
                    self.keys[key_number].copy_from_slice(&data[..16]);
                    self.key_versions[key_number] = data[16];
                    self.session = None;
                    return Self::status(0x9100);
                }
                let new_key: [u8; 16] =
                    core::array::from_fn(|i| data[i] ^ self.keys[key_number][i]);
                if crc32nk(&new_key)[..] != data[17..21] {
                    self.session = None;
                    return Self::status(0x911E);
                }
                self.keys[key_number] = new_key;
                self.key_versions[key_number] = data[16];
                Vec::new()
            }
            0x8D => {
                let offset = u32::from_le_bytes([header[1], header[2], header[3], 0]) as usize;
                let length = u32::from_le_bytes([header[4], header[5], header[6], 0]) as usize;
                assert_eq!(length, data.len());
                self.file[offset..offset + length].copy_from_slice(&data);
                Vec::new()
            }
            0xAD => {
                let offset = u32::from_le_bytes([header[1], header[2], header[3], 0]) as usize;
                let length = match u32::from_le_bytes([header[4], header[5], header[6], 0]) {
                    0 => self.file.len() - offset,
                    length => length as usize,
                };
                self.file[offset..offset + length].to_vec()
            }
            0x51 => UID.to_vec(),
            _ => return Self::status(0x911C),
        };

        session.counter += 1;
        let mut body = match protection {
            Protection::Full if !answer.is_empty() => {
                let iv =
                    messaging::iv(session.keys.enc_key(), Direction::Response, &TI, session.counter);
                messaging::encrypt(session.keys.enc_key(), &iv, &answer)
            }
            _ => answer,
        };
        let mut mac = messaging::response_mac(
            session.keys.mac_key(),
            StatusWord::OPERATION_OK,
            session.counter,
            &TI,
            &body,
        );
        if self.tamper_next_mac {
            self.tamper_next_mac = false;
            mac[3] ^= 0x40;
        }
        body.extend_from_slice(&mac);
        if body.len() > FRAME_BYTES {
            self.chained = body.split_off(FRAME_BYTES);
            return Response::new(0x91AF, body);
        }
        Response::new(0x9100, body)
    }

    fn additional_frame(&mut self) -> Response {
        if self.chained.len() > FRAME_BYTES {
            let rest = self.chained.split_off(FRAME_BYTES);
            let frame = core::mem::replace(&mut self.chained, rest);
            return Response::new(0x91AF, frame);
        }
        Response::new(0x9100, core::mem::take(&mut self.chained))
    }

    fn secure_commands_sent(&self, ins: u8) -> usize {
        self.log.iter().filter(|c| c[0] == 0x90 && c[1] == ins).count()
    }
}

impl Transport for SimulatedTag {
    type Error = std::io::Error;

    fn transmit(&mut self, command: &[u8]) -> Result<Response, Self::Error> {
        self.log.push(command.to_vec());
        if command == select_application().as_slice() {
            self.session = None;
            return Ok(Self::status(0x9000));
        }
        let ins = command[1];
        let field = if command.len() > 5 {
            &command[5..5 + command[4] as usize]
        } else {
            &[][..]
        };
        if ins == 0xAF && !self.chained.is_empty() {
            return Ok(self.additional_frame());
        }
        self.chained.clear();
        Ok(match ins {
            0x71 => self.authenticate_first(field),
            0xAF => self.authenticate_answer(field),
            _ => self.secure_command(ins, field),
        })
    }
}

fn authenticated(tag: &mut SimulatedTag, key_number: u8, key: AuthKey) -> Protocol<&mut SimulatedTag> {
    let mut protocol = Protocol::new(tag);
    protocol.select_application().unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    protocol.authenticate_with_rng(key_number, key, &mut rng).unwrap();
    protocol
}

fn counter<T: Transport>(protocol: &Protocol<T>) -> u16 {
    protocol.channel().unwrap().command_counter()
}

#[test]
fn test_provisioning_session() {
    let mut tag = SimulatedTag::new();
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());
    assert_eq!(protocol.channel().unwrap().transaction_id(), TI);
    assert_eq!(counter(&protocol), 0);

    let rights = AccessRights::new(
        AccessCondition::Key(0),
        AccessCondition::Key(0),
        AccessCondition::Free,
        AccessCondition::Key(0),
    );
    let sdm_rights = SdmAccessRights {
        counter_retrieval: AccessCondition::Key(1),
        meta_read: AccessCondition::Free,
        file_read: AccessCondition::Key(1),
    };
    let mut sdm = SdmSettings::new(SdmOptions::UID | SdmOptions::READ_COUNTER | SdmOptions::ASCII, sdm_rights);
    sdm.uid_offset = Some(0x20);
    sdm.read_counter_offset = Some(0x37);
    sdm.mac_input_offset = Some(0x43);
    sdm.mac_offset = Some(0x43);
    let settings = FileSettings::new(CommMode::Plain, rights, Some(sdm)).unwrap();
    protocol.change_file_settings(0x02, &settings).unwrap();
    assert_eq!(counter(&protocol), 1);

    assert_eq!(protocol.card_uid().unwrap(), UID.to_vec());
    assert_eq!(counter(&protocol), 2);

    protocol.write_data(0x02, 0x10, b"https://example.com", Protection::Full).unwrap();
    assert_eq!(
        protocol.read_data(0x02, 0x10, 19, Protection::Full).unwrap(),
        b"https://example.com".to_vec()
    );
    assert_eq!(counter(&protocol), 4);

    drop(protocol);
    assert_eq!(tag.file_settings[2].as_deref(), Some(settings.to_bytes()));
}

#[test]
fn test_mac_mode_file_access() {
    let mut tag = SimulatedTag::new();
    tag.file_protection = Protection::Mac;
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());

    protocol.write_data(0x02, 0, &[0xA5; 32], Protection::Mac).unwrap();
    assert_eq!(
        protocol.read_data(0x02, 0, 32, Protection::Mac).unwrap(),
        vec![0xA5; 32]
    );
    assert_eq!(counter(&protocol), 2);
}

#[test]
fn test_write_data_is_chunked() {
    let mut tag = SimulatedTag::new();
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());

    let data: Vec<u8> = (0..250u8).collect();
    protocol.write_data(0x02, 0, &data, Protection::Full).unwrap();
    assert_eq!(counter(&protocol), 2);
    // The second chunk starts right after the first.
    assert_eq!(
        protocol.read_data(0x02, 230, 20, Protection::Full).unwrap(),
        data[230..].to_vec()
    );

    drop(protocol);
    assert_eq!(tag.secure_commands_sent(0x8D), 2);
    assert_eq!(&tag.file[..250], &data[..]);
}

#[test]
fn test_full_file_read_spans_frames() {
    let mut tag = SimulatedTag::new();
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());

    let data: Vec<u8> = (0..=255u8).rev().collect();
    protocol.write_data(0x02, 0, &data, Protection::Full).unwrap();
    assert_eq!(counter(&protocol), 2);
    // 256 bytes encrypt to 272, plus the MAC that is two frames.
    assert_eq!(protocol.read_data(0x02, 0, 0, Protection::Full).unwrap(), data);
    assert_eq!(
        protocol.read_data(0x02, 10, 241, Protection::Full).unwrap(),
        data[10..251].to_vec()
    );
    assert_eq!(counter(&protocol), 4);

    drop(protocol);
    assert_eq!(tag.secure_commands_sent(0xAD), 2);
    assert_eq!(tag.log.iter().filter(|c| c[..] == [0x90, 0xAF, 0x00, 0x00, 0x00]).count(), 2);
}

#[test]
fn test_wrong_key_fails_authentication() {
    let mut tag = SimulatedTag::new();
    let mut protocol = Protocol::new(&mut tag);
    let result = protocol.authenticate(0, AuthKey::new([0x01; 16]));
    // The tag cannot find RndB' in the answer and refuses it.
    assert!(matches!(
        result,
        Err(ProtocolError::Internal(Error::ProtocolViolation(
            Violation::UnexpectedStatus(StatusWord::AUTHENTICATION_ERROR)
        )))
    ));
    assert!(protocol.channel().is_none());
}

#[test]
fn test_tag_failing_to_prove_key() {
    let mut tag = SimulatedTag::new();
    tag.fake_confirmation = true;
    let mut protocol = Protocol::new(&mut tag);
    assert!(matches!(
        protocol.authenticate(0, AuthKey::factory_default()),
        Err(ProtocolError::Internal(Error::AuthenticationFailure))
    ));
    assert!(protocol.channel().is_none());
}

#[test]
fn test_tampered_response_closes_session() {
    let mut tag = SimulatedTag::new();
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());
    protocol.card_uid().unwrap();

    protocol.into_transport().tamper_next_mac = true;
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());
    assert!(matches!(
        protocol.card_uid(),
        Err(ProtocolError::Internal(Error::IntegrityFailure))
    ));
    assert!(protocol.channel().is_none());
    assert!(matches!(
        protocol.card_uid(),
        Err(ProtocolError::Internal(Error::ChannelClosed))
    ));
}

#[test]
fn test_error_status_closes_session() {
    let mut tag = SimulatedTag::new();
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());
    // The simulated tag does not know instruction 0x3D.
    let command = ntag424::commands::SecureCommand::new(0x3D, vec![], vec![], Protection::Full);
    assert!(matches!(
        protocol.execute(&command),
        Err(ProtocolError::Internal(Error::ProtocolViolation(
            Violation::UnexpectedStatus(sw)
        ))) if sw == StatusWord::new(0x911C)
    ));
    assert!(protocol.channel().is_none());
}

#[test]
fn test_change_other_key() {
    let mut tag = SimulatedTag::new();
    let new_key = AuthKey::new(core::array::from_fn(|i| 0x10 + i as u8));
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());
    protocol
        .change_key(3, &new_key, 0x01, &AuthKey::factory_default())
        .unwrap();
    assert_eq!(counter(&protocol), 1);

    // The session survives, the changed key authenticates.
    protocol.card_uid().unwrap();
    let mut rng = StdRng::seed_from_u64(9);
    protocol.authenticate_with_rng(3, new_key, &mut rng).unwrap();
    assert_eq!(protocol.channel().unwrap().key_number(), 3);

    drop(protocol);
    assert_eq!(tag.keys[3], core::array::from_fn::<u8, 16, _>(|i| 0x10 + i as u8));
    assert_eq!(tag.key_versions[3], 0x01);
}

#[test]
fn test_change_authenticated_key_ends_session() {
    let mut tag = SimulatedTag::new();
    let new_key = AuthKey::new([0x5A; 16]);
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());
    protocol
        .change_key(0, &new_key, 0x02, &AuthKey::factory_default())
        .unwrap();
    assert!(protocol.channel().is_none());
    assert!(matches!(
        protocol.card_uid(),
        Err(ProtocolError::Internal(Error::ChannelClosed))
    ));

    protocol.authenticate(0, new_key).unwrap();
    assert_eq!(protocol.card_uid().unwrap(), UID.to_vec());

    drop(protocol);
    assert_eq!(tag.keys[0], [0x5A; 16]);
    assert_eq!(tag.key_versions[0], 0x02);
}

#[test]
fn test_reauthentication_resets_counter() {
    let mut tag = SimulatedTag::new();
    let mut protocol = authenticated(&mut tag, 0, AuthKey::factory_default());
    for _ in 0..3 {
        protocol.card_uid().unwrap();
    }
    assert_eq!(counter(&protocol), 3);

    protocol.authenticate(0, AuthKey::factory_default()).unwrap();
    assert_eq!(counter(&protocol), 0);
    assert_eq!(protocol.card_uid().unwrap(), UID.to_vec());
}

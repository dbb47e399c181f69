/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! In-place framing of messages: AES-CCM protection of the payload region
//! with the encoded message header as additional authenticated data.

use log::{error, trace};
use zeroize::Zeroize;

use crate::crypto::{self, AeadKey, AEAD_MIC_LEN_BYTES, AEAD_NONCE_LEN_BYTES};
use crate::error::{Error, ErrorCode};
use crate::utils::{ParseBuf, WriteBuf};

use super::network::MAX_RX_PACKET_SIZE;
use super::packet::FramedBuf;
use super::plain_hdr::{max_plain_hdr_len, PlainHdr};
use super::proto_hdr::ProtoHdr;

/// Largest payload region (exchange header plus application payload) that
/// is accepted for framing. Keeps a full frame below the path MTU.
pub const MAX_SECURE_SDU_LEN: usize = 1024;

/// PASE sessions run before either side has an operational node id.
const UNSPECIFIED_NODE_ID: u64 = 0;

fn get_iv(ctr: u32, nodeid: u64) -> Result<[u8; AEAD_NONCE_LEN_BYTES], Error> {
    let mut iv = [0; AEAD_NONCE_LEN_BYTES];

    let mut wb = WriteBuf::new(&mut iv);
    // Security flags
    wb.le_u8(0)?;
    wb.le_u32(ctr)?;
    wb.le_u64(nodeid)?;

    Ok(iv)
}

/// Frames and unframes the messages of one session.
///
/// A codec without keys handles the unsecured session used during PASE.
/// Keys are installed once, when the handshake that produced them
/// completes, and are zeroed when the codec is dropped.
#[derive(Debug, Default)]
pub struct SessionCodec {
    enc_key: Option<AeadKey>,
    dec_key: Option<AeadKey>,
}

impl SessionCodec {
    pub const fn plain() -> Self {
        Self {
            enc_key: None,
            dec_key: None,
        }
    }

    pub fn secure(enc_key: AeadKey, dec_key: AeadKey) -> Self {
        Self {
            enc_key: Some(enc_key),
            dec_key: Some(dec_key),
        }
    }

    pub fn is_secure(&self) -> bool {
        self.enc_key.is_some()
    }

    /// Frames the payload region of `frame` for the wire, encrypting it
    /// when the session is secure.
    pub fn encode(&self, plain: &PlainHdr, frame: &mut FramedBuf) -> Result<(), Error> {
        if self.is_secure() {
            self.encrypt(plain, frame)
        } else {
            if frame.payload_region().len() > MAX_SECURE_SDU_LEN {
                error!(
                    "Payload of {} bytes does not fit in a frame",
                    frame.payload_region().len()
                );
                Err(ErrorCode::NoSpace)?;
            }

            prepend_plain_hdr(plain, frame)
        }
    }

    /// Reverses `encode` on a frame whose plain header has already been
    /// consumed with `decode_plain_hdr`.
    pub fn decode(&self, plain: &PlainHdr, frame: &mut FramedBuf) -> Result<(), Error> {
        if plain.is_encrypted() {
            self.decrypt(plain, frame)
        } else if self.dec_key.is_some() {
            error!("Unencrypted message on a secure session");
            Err(ErrorCode::InvalidState.into())
        } else {
            Ok(())
        }
    }

    /// Encrypts the payload region in place, appends the tag and prepends
    /// the plain header. The frame is left untouched on error.
    pub fn encrypt(&self, plain: &PlainHdr, frame: &mut FramedBuf) -> Result<(), Error> {
        let Some(key) = self.enc_key.as_ref() else {
            error!("Cannot encrypt without an established session key");
            return Err(ErrorCode::Crypto.into());
        };

        let len = frame.payload_region().len();
        if len > MAX_SECURE_SDU_LEN {
            error!("Payload of {} bytes exceeds the secure SDU limit", len);
            Err(ErrorCode::Crypto)?;
        }

        let mut hdr = [0; max_plain_hdr_len()];
        let mut wb = WriteBuf::new(&mut hdr);
        plain.encode(&mut wb)?;
        let aad = wb.as_slice();

        if frame.tail_room() < AEAD_MIC_LEN_BYTES || frame.head_room() < aad.len() {
            Err(ErrorCode::NoSpace)?;
        }

        let iv = get_iv(plain.ctr, UNSPECIFIED_NODE_ID)?;
        let tag = crypto::encrypt_in_place(key.access(), &iv, aad, frame.payload_region_mut())?;

        frame.append_tail(&tag)?;
        frame.prepend_header(aad)?;

        trace!("Encrypted frame {}", plain);

        Ok(())
    }

    /// Verifies and decrypts the payload region in place, dropping the tag.
    ///
    /// Verification runs on a scratch copy, so the frame is unchanged when
    /// it fails with `AuthenticationFailure`.
    pub fn decrypt(&self, plain: &PlainHdr, frame: &mut FramedBuf) -> Result<(), Error> {
        let Some(key) = self.dec_key.as_ref() else {
            error!("Cannot decrypt without an established session key");
            return Err(ErrorCode::Crypto.into());
        };

        let payload = frame.payload_region();
        if payload.len() < AEAD_MIC_LEN_BYTES {
            Err(ErrorCode::TruncatedPacket)?;
        }

        let text_len = payload.len() - AEAD_MIC_LEN_BYTES;
        let (text, tag) = payload.split_at(text_len);

        let iv = get_iv(plain.ctr, UNSPECIFIED_NODE_ID)?;

        let mut scratch = [0; MAX_RX_PACKET_SIZE];
        scratch[..text_len].copy_from_slice(text);

        let res = crypto::decrypt_in_place(
            key.access(),
            &iv,
            frame.header_region(),
            &mut scratch[..text_len],
            tag,
        );

        if res.is_ok() {
            frame.payload_region_mut()[..text_len].copy_from_slice(&scratch[..text_len]);
            frame.truncate_tail(AEAD_MIC_LEN_BYTES)?;
        }

        scratch.zeroize();

        res
    }
}

fn prepend_plain_hdr(plain: &PlainHdr, frame: &mut FramedBuf) -> Result<(), Error> {
    let mut hdr = [0; max_plain_hdr_len()];
    let mut wb = WriteBuf::new(&mut hdr);
    plain.encode(&mut wb)?;

    frame.prepend_header(wb.as_slice())
}

/// Parses the plain header at the start of a received frame and moves it
/// into the frame's header region.
pub fn decode_plain_hdr(frame: &mut FramedBuf) -> Result<PlainHdr, Error> {
    let mut plain = PlainHdr::default();

    let mut pb = ParseBuf::new(frame.payload_region());
    plain.decode(&mut pb)?;
    let len = pb.parsed_len();

    frame.consume_header(len)?;

    Ok(plain)
}

/// Parses the exchange header at the start of a decrypted payload region
/// and consumes it, leaving only the application payload.
pub fn decode_proto_hdr(frame: &mut FramedBuf) -> Result<ProtoHdr, Error> {
    let mut proto = ProtoHdr::default();

    let mut pb = ParseBuf::new(frame.payload_region());
    proto.decode(&mut pb)?;
    let len = pb.parsed_len();

    frame.consume_header(len)?;

    Ok(proto)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: [u8; 16]) -> AeadKey {
        AeadKey::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_decrypt_success() {
        // These values are captured from an execution run of the chip-tool binary
        let input: [u8; 71] = [
            0x0, 0x2, 0x0, 0x0, 0xf2, 0x43, 0xe9, 0x0, 0x31, 0xb5, 0x66, 0xec, 0x8b, 0x5b, 0xf4,
            0x17, 0xe4, 0x80, 0xf3, 0xd5, 0x11, 0x59, 0x19, 0xb5, 0x23, 0x91, 0x35, 0x37, 0xb,
            0xf9, 0xbf, 0x69, 0x55, 0x11, 0x75, 0x87, 0x77, 0x19, 0xfc, 0xf3, 0x5d, 0x4b, 0x47,
            0x1f, 0xb0, 0x5e, 0xbe, 0xb5, 0x10, 0xad, 0xc6, 0x78, 0x94, 0x50, 0xe5, 0xd2, 0xe0,
            0x80, 0xef, 0xa8, 0x3a, 0xf0, 0xa6, 0xaf, 0x1b, 0x2, 0x35, 0xa7, 0xd1, 0xc6, 0x32,
        ];
        let dec = key([
            0x66, 0x63, 0x31, 0x97, 0x43, 0x9c, 0x17, 0xb9, 0x7e, 0x10, 0xee, 0x47, 0xc8, 0x8,
            0x80, 0x4a,
        ]);
        let codec = SessionCodec::secure(AeadKey::new(), dec);

        let mut frame = FramedBuf::from_bytes(&input).unwrap();
        let plain = decode_plain_hdr(&mut frame).unwrap();
        assert_eq!(plain.sess_id, 2);
        assert_eq!(plain.ctr, 15287282);

        codec.decrypt(&plain, &mut frame).unwrap();
        assert_eq!(
            frame.payload_region(),
            [
                0x5, 0x8, 0x70, 0x0, 0x1, 0x0, 0x15, 0x28, 0x0, 0x28, 0x1, 0x36, 0x2, 0x15, 0x37,
                0x0, 0x24, 0x0, 0x0, 0x24, 0x1, 0x30, 0x24, 0x2, 0x2, 0x18, 0x35, 0x1, 0x24, 0x0,
                0x0, 0x2c, 0x1, 0x2, 0x57, 0x57, 0x24, 0x2, 0x3, 0x25, 0x3, 0xb8, 0xb, 0x18, 0x18,
                0x18, 0x18
            ]
        );

        let proto = decode_proto_hdr(&mut frame).unwrap();
        assert_eq!(proto.proto_id, 1);
        assert_eq!(proto.proto_opcode, 8);
    }

    #[test]
    fn test_encrypt_success() {
        // These values are captured from an execution run of the chip-tool binary
        let plain_text: [u8; 28] = [
            5, 8, 0x58, 0x28, 0x01, 0x00, 0x15, 0x36, 0x00, 0x15, 0x37, 0x00, 0x24, 0x00, 0x01,
            0x24, 0x02, 0x06, 0x24, 0x03, 0x01, 0x18, 0x35, 0x01, 0x18, 0x18, 0x18, 0x18,
        ];
        let enc = key([
            0x44, 0xd4, 0x3c, 0x91, 0xd2, 0x27, 0xf3, 0xba, 0x08, 0x24, 0xc5, 0xd8, 0x7c, 0xb8,
            0x1b, 0x33,
        ]);
        let codec = SessionCodec::secure(enc, AeadKey::new());

        let mut frame = FramedBuf::new();
        frame.write_payload(|wb| wb.append(&plain_text)).unwrap();

        codec
            .encrypt(&PlainHdr::new(0x11, 41), &mut frame)
            .unwrap();

        assert_eq!(
            frame.header_region(),
            [0x0, 0x11, 0x0, 0x0, 0x29, 0x0, 0x0, 0x0]
        );
        assert_eq!(
            frame.payload_region(),
            [
                189, 83, 250, 121, 38, 87, 97, 17, 153, 78, 243, 20, 36, 11, 131, 142, 136, 165,
                227, 107, 204, 129, 193, 153, 42, 131, 138, 254, 22, 190, 76, 244, 116, 45, 156,
                215, 229, 130, 215, 147, 73, 21, 88, 216
            ]
        );
    }

    fn pair() -> (SessionCodec, SessionCodec) {
        let k1 = [0x11; 16];
        let k2 = [0x22; 16];

        (
            SessionCodec::secure(key(k1), key(k2)),
            SessionCodec::secure(key(k2), key(k1)),
        )
    }

    fn wire(codec: &SessionCodec, ctr: u32, payload: &[u8]) -> Vec<u8> {
        let mut frame = FramedBuf::new();
        frame.write_payload(|wb| wb.append(payload)).unwrap();
        codec.encrypt(&PlainHdr::new(7, ctr), &mut frame).unwrap();

        frame.as_slice().to_vec()
    }

    #[test]
    fn test_round_trip_up_to_sdu_limit() {
        let (a, b) = pair();

        for len in [0, 1, 17, 600, MAX_SECURE_SDU_LEN - 1] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let bytes = wire(&a, len as u32, &payload);

            let mut frame = FramedBuf::from_bytes(&bytes).unwrap();
            let plain = decode_plain_hdr(&mut frame).unwrap();
            b.decode(&plain, &mut frame).unwrap();

            assert_eq!(frame.payload_region(), payload.as_slice());
        }
    }

    #[test]
    fn test_tampered_byte_rejected_without_mutation() {
        let (a, b) = pair();
        let bytes = wire(&a, 99, b"tamper evident");

        // Every byte is covered: header as AAD, payload and tag
        for pos in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[pos] ^= 0x01;

            let mut frame = FramedBuf::from_bytes(&tampered).unwrap();
            let Ok(plain) = decode_plain_hdr(&mut frame) else {
                continue;
            };
            let before = frame.payload_region().to_vec();

            let err = b.decrypt(&plain, &mut frame).unwrap_err();
            assert_eq!(err.code(), ErrorCode::AuthenticationFailure);
            assert_eq!(frame.payload_region(), before.as_slice());
        }
    }

    #[test]
    fn test_encrypt_requires_key_and_size() {
        let mut frame = FramedBuf::new();
        frame.write_payload(|wb| wb.append(&[1, 2, 3])).unwrap();

        let err = SessionCodec::plain()
            .encrypt(&PlainHdr::new(0, 1), &mut frame)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Crypto);
        assert_eq!(frame.as_slice(), [1, 2, 3]);

        let (a, _) = pair();
        let mut frame = FramedBuf::new();
        frame
            .write_payload(|wb| wb.append(&[0; MAX_SECURE_SDU_LEN + 1]))
            .unwrap();

        let err = a.encrypt(&PlainHdr::new(0, 1), &mut frame).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Crypto);
    }

    #[test]
    fn test_plain_session() {
        let codec = SessionCodec::plain();

        let mut frame = FramedBuf::new();
        frame.write_payload(|wb| wb.append(&[5, 6])).unwrap();
        codec.encode(&PlainHdr::new(0, 3), &mut frame).unwrap();
        assert_eq!(frame.as_slice(), [0, 0, 0, 0, 3, 0, 0, 0, 5, 6]);

        let mut frame = FramedBuf::from_bytes(&[0, 0, 0, 0, 3, 0, 0, 0, 5, 6]).unwrap();
        let plain = decode_plain_hdr(&mut frame).unwrap();
        codec.decode(&plain, &mut frame).unwrap();
        assert_eq!(frame.payload_region(), [5, 6]);
    }
}

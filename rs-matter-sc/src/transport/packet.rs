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

use core::fmt;

use crate::crypto::AEAD_MIC_LEN_BYTES;
use crate::error::{Error, ErrorCode};
use crate::sc::PROTO_ID_SECURE_CHANNEL;
use crate::utils::WriteBuf;

use super::exchange::MessageMeta;
use super::network::{Address, MAX_RX_PACKET_SIZE};
use super::plain_hdr::{max_plain_hdr_len, PlainHdr};
use super::proto_hdr::ProtoHdr;

/// Space kept in front of the payload for the message header.
pub const HDR_RESERVE: usize = max_plain_hdr_len();
/// Space kept after the payload for the AEAD tag.
pub const TAIL_RESERVE: usize = AEAD_MIC_LEN_BYTES;

/// A contiguous byte arena holding one datagram, split into a header region
/// followed by a payload region.
///
/// On transmit the payload region is filled first, leaving `HDR_RESERVE`
/// bytes of headroom and `TAIL_RESERVE` bytes of tailroom, so the codec can
/// frame the message in place. On receive the whole arena is handed to the
/// socket and the split moves forward as headers are consumed.
pub struct FramedBuf {
    buf: Box<[u8]>,
    start: usize,
    split: usize,
    end: usize,
}

impl FramedBuf {
    pub fn new() -> Self {
        Self {
            buf: vec![0; MAX_RX_PACKET_SIZE].into_boxed_slice(),
            start: HDR_RESERVE,
            split: HDR_RESERVE,
            end: HDR_RESERVE,
        }
    }

    /// A received datagram, nothing consumed yet.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let mut this = Self::new();
        let space = this.rx_space();
        if data.len() > space.len() {
            Err(ErrorCode::NoSpace)?;
        }
        space[..data.len()].copy_from_slice(data);
        this.set_rx_len(data.len())?;

        Ok(this)
    }

    pub fn header_region(&self) -> &[u8] {
        &self.buf[self.start..self.split]
    }

    pub fn payload_region(&self) -> &[u8] {
        &self.buf[self.split..self.end]
    }

    pub fn payload_region_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.split..self.end]
    }

    /// The whole frame: header region followed by payload region.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn head_room(&self) -> usize {
        self.start
    }

    pub fn tail_room(&self) -> usize {
        self.buf.len() - self.end
    }

    /// Appends to the payload region through a `WriteBuf`, never eating
    /// into the tail reservation. Nothing is appended if `f` fails.
    pub fn write_payload<F, R>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut WriteBuf) -> Result<R, Error>,
    {
        let limit = self.buf.len() - TAIL_RESERVE;
        if self.end > limit {
            Err(ErrorCode::NoSpace)?;
        }

        let (res, len) = {
            let mut wb = WriteBuf::new(&mut self.buf[self.end..limit]);
            let res = f(&mut wb)?;
            (res, wb.len())
        };
        self.end += len;

        Ok(res)
    }

    pub(crate) fn append_tail(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.tail_room() {
            Err(ErrorCode::NoSpace)?;
        }

        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();

        Ok(())
    }

    pub(crate) fn truncate_tail(&mut self, len: usize) -> Result<(), Error> {
        if len > self.end - self.split {
            Err(ErrorCode::TruncatedPacket)?;
        }

        self.end -= len;

        Ok(())
    }

    pub(crate) fn prepend_header(&mut self, hdr: &[u8]) -> Result<(), Error> {
        if hdr.len() > self.start {
            Err(ErrorCode::NoSpace)?;
        }

        self.start -= hdr.len();
        self.buf[self.start..self.start + hdr.len()].copy_from_slice(hdr);

        Ok(())
    }

    /// Moves `len` bytes from the front of the payload region into the
    /// header region.
    pub(crate) fn consume_header(&mut self, len: usize) -> Result<(), Error> {
        if len > self.end - self.split {
            Err(ErrorCode::TruncatedPacket)?;
        }

        self.split += len;

        Ok(())
    }

    pub(crate) fn rx_space(&mut self) -> &mut [u8] {
        self.start = 0;
        self.split = 0;
        self.end = 0;

        &mut self.buf
    }

    pub(crate) fn set_rx_len(&mut self, len: usize) -> Result<(), Error> {
        if len > self.buf.len() {
            Err(ErrorCode::NoSpace)?;
        }

        self.start = 0;
        self.split = 0;
        self.end = len;

        Ok(())
    }
}

impl Default for FramedBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FramedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FramedBuf {{ hdr: {}, payload: {} }}",
            self.split - self.start,
            self.end - self.split
        )
    }
}

/// One message, either on its way out or just received.
///
/// For outbound packets the payload region carries the encoded exchange
/// header followed by the application payload. For received packets both
/// headers have been consumed and `payload()` is the application payload.
#[derive(Debug)]
pub struct Packet {
    pub peer: Address,
    pub plain: PlainHdr,
    pub proto: ProtoHdr,
    pub buf: FramedBuf,
}

impl Packet {
    pub fn new_tx(peer: Address, proto: ProtoHdr, payload: &[u8]) -> Result<Self, Error> {
        let mut buf = FramedBuf::new();
        buf.write_payload(|wb| {
            proto.encode(wb)?;
            wb.append(payload)
        })?;

        Ok(Self {
            peer,
            plain: PlainHdr::default(),
            proto,
            buf,
        })
    }

    pub fn new_rx() -> Self {
        Self {
            peer: Address::default(),
            plain: PlainHdr::default(),
            proto: ProtoHdr::default(),
            buf: FramedBuf::new(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        self.buf.payload_region()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.buf.payload_region_mut()
    }

    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            proto_id: self.proto.proto_id,
            proto_opcode: self.proto.proto_opcode,
            reliable: self.proto.is_reliable(),
        }
    }

    pub fn is_standalone_ack(&self) -> bool {
        self.proto.proto_id == PROTO_ID_SECURE_CHANNEL
            && self.proto.proto_opcode == crate::sc::OpCode::MRPStandAloneAck as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_regions() {
        let mut frame = FramedBuf::new();
        frame.write_payload(|wb| wb.append(&[1, 2, 3])).unwrap();

        assert!(frame.header_region().is_empty());
        assert_eq!(frame.payload_region(), [1, 2, 3]);
        assert_eq!(frame.head_room(), HDR_RESERVE);

        frame.prepend_header(&[9, 9]).unwrap();
        assert_eq!(frame.header_region(), [9, 9]);
        assert_eq!(frame.as_slice(), [9, 9, 1, 2, 3]);

        frame.append_tail(&[7; TAIL_RESERVE]).unwrap();
        assert_eq!(frame.payload_region().len(), 3 + TAIL_RESERVE);
    }

    #[test]
    fn test_payload_never_eats_tail_reserve() {
        let mut frame = FramedBuf::new();
        let max = MAX_RX_PACKET_SIZE - HDR_RESERVE - TAIL_RESERVE;

        let big = vec![0u8; max + 1];
        assert!(frame.write_payload(|wb| wb.append(&big)).is_err());
        assert!(frame.payload_region().is_empty());

        frame.write_payload(|wb| wb.append(&big[..max])).unwrap();
        assert_eq!(frame.tail_room(), TAIL_RESERVE);
    }

    #[test]
    fn test_rx_split() {
        let mut frame = FramedBuf::from_bytes(&[1, 2, 3, 4, 5]).unwrap();
        frame.consume_header(2).unwrap();
        assert_eq!(frame.header_region(), [1, 2]);
        assert_eq!(frame.payload_region(), [3, 4, 5]);

        frame.truncate_tail(1).unwrap();
        assert_eq!(frame.payload_region(), [3, 4]);
        assert!(frame.consume_header(3).is_err());
    }
}

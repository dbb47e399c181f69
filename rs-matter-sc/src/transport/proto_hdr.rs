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

use log::trace;

use crate::error::{Error, ErrorCode};
use crate::utils::{ParseBuf, WriteBuf};

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct ExchFlags: u8 {
        const VENDOR = 0x10;
        const SECEX = 0x08;
        const RELIABLE = 0x04;
        const ACK = 0x02;
        const INITIATOR = 0x01;
    }
}

impl fmt::Display for ExchFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = false;
        for (flag, name) in [
            (Self::INITIATOR, "I"),
            (Self::ACK, "A"),
            (Self::RELIABLE, "R"),
            (Self::SECEX, "SX"),
            (Self::VENDOR, "V"),
        ] {
            if self.contains(flag) {
                if sep {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                sep = true;
            }
        }

        Ok(())
    }
}

/// The exchange (protocol) header. Travels encrypted on secure sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtoHdr {
    pub exch_id: u16,
    exch_flags: ExchFlags,
    pub proto_id: u16,
    pub proto_opcode: u8,
    proto_vendor_id: u16,
    ack_msg_ctr: u32,
}

impl ProtoHdr {
    pub const fn new(exch_id: u16, proto_id: u16, proto_opcode: u8) -> Self {
        Self {
            exch_id,
            exch_flags: ExchFlags::empty(),
            proto_id,
            proto_opcode,
            proto_vendor_id: 0,
            ack_msg_ctr: 0,
        }
    }

    pub fn opcode<T: num_traits::FromPrimitive>(&self) -> Result<T, Error> {
        num_traits::FromPrimitive::from_u8(self.proto_opcode).ok_or(ErrorCode::InvalidOpcode.into())
    }

    pub fn get_vendor(&self) -> Option<u16> {
        self.exch_flags
            .contains(ExchFlags::VENDOR)
            .then_some(self.proto_vendor_id)
    }

    pub fn set_vendor(&mut self, vendor_id: Option<u16>) {
        self.exch_flags.set(ExchFlags::VENDOR, vendor_id.is_some());
        self.proto_vendor_id = vendor_id.unwrap_or(0);
    }

    pub fn is_reliable(&self) -> bool {
        self.exch_flags.contains(ExchFlags::RELIABLE)
    }

    pub fn set_reliable(&mut self, reliable: bool) {
        self.exch_flags.set(ExchFlags::RELIABLE, reliable);
    }

    pub fn get_ack(&self) -> Option<u32> {
        self.exch_flags
            .contains(ExchFlags::ACK)
            .then_some(self.ack_msg_ctr)
    }

    pub fn set_ack(&mut self, ack_msg_ctr: Option<u32>) {
        self.exch_flags.set(ExchFlags::ACK, ack_msg_ctr.is_some());
        self.ack_msg_ctr = ack_msg_ctr.unwrap_or(0);
    }

    pub fn is_initiator(&self) -> bool {
        self.exch_flags.contains(ExchFlags::INITIATOR)
    }

    pub fn set_initiator(&mut self, initiator: bool) {
        self.exch_flags.set(ExchFlags::INITIATOR, initiator);
    }

    pub fn decode(&mut self, parsebuf: &mut ParseBuf) -> Result<(), Error> {
        self.exch_flags = ExchFlags::from_bits(parsebuf.le_u8()?).ok_or(ErrorCode::Invalid)?;
        self.proto_opcode = parsebuf.le_u8()?;
        self.exch_id = parsebuf.le_u16()?;
        self.proto_id = parsebuf.le_u16()?;

        if self.exch_flags.contains(ExchFlags::VENDOR) {
            self.proto_vendor_id = parsebuf.le_u16()?;
        }
        if self.exch_flags.contains(ExchFlags::ACK) {
            self.ack_msg_ctr = parsebuf.le_u32()?;
        }

        trace!("[decode] {}", self);
        Ok(())
    }

    pub fn encode(&self, resp_buf: &mut WriteBuf) -> Result<(), Error> {
        trace!("[encode] {}", self);
        resp_buf.le_u8(self.exch_flags.bits())?;
        resp_buf.le_u8(self.proto_opcode)?;
        resp_buf.le_u16(self.exch_id)?;
        resp_buf.le_u16(self.proto_id)?;
        if let Some(vendor_id) = self.get_vendor() {
            resp_buf.le_u16(vendor_id)?;
        }
        if let Some(ack_msg_ctr) = self.get_ack() {
            resp_buf.le_u32(ack_msg_ctr)?;
        }
        Ok(())
    }
}

impl fmt::Display for ProtoHdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.exch_flags.is_empty() {
            write!(f, "{},", self.exch_flags)?;
        }

        write!(
            f,
            "EID:{:x},PROTO:{:x},OP:{:x}",
            self.exch_id, self.proto_id, self.proto_opcode
        )?;

        if let Some(ack_msg_ctr) = self.get_ack() {
            write!(f, ",ACTR:{:x}", ack_msg_ctr)?;
        }

        if let Some(vendor_id) = self.get_vendor() {
            write!(f, ",VID:{:x}", vendor_id)?;
        }

        Ok(())
    }
}

pub const fn max_proto_hdr_len() -> usize {
    // exchange flags
    1 +
    // protocol opcode
        1 +
    // exchange ID
        2 +
    // protocol ID
        2 +
    // [optional] protocol vendor ID
        2 +
    // [optional] acknowledged message counter
        4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standalone_ack_layout() {
        let mut hdr = ProtoHdr::new(0x2858, 0, 0x10);
        hdr.set_initiator(true);
        hdr.set_ack(Some(0x0e9043f2));

        let mut buf = [0u8; 16];
        let mut wb = WriteBuf::new(&mut buf);
        hdr.encode(&mut wb).unwrap();
        assert_eq!(
            wb.as_slice(),
            [0x03, 0x10, 0x58, 0x28, 0, 0, 0xf2, 0x43, 0x90, 0x0e]
        );

        let mut decoded = ProtoHdr::default();
        decoded.decode(&mut ParseBuf::new(wb.as_slice())).unwrap();
        assert_eq!(decoded, hdr);
        assert!(!decoded.is_reliable());
        assert_eq!(hdr.to_string(), "I|A,EID:2858,PROTO:0,OP:10,ACTR:e9043f2");
    }

    #[test]
    fn test_vendor_and_reliable() {
        let mut hdr = ProtoHdr::new(1, 0x0001, 0x02);
        hdr.set_vendor(Some(0xfff1));
        hdr.set_reliable(true);

        let mut buf = [0u8; 16];
        let mut wb = WriteBuf::new(&mut buf);
        hdr.encode(&mut wb).unwrap();

        let mut decoded = ProtoHdr::default();
        let mut pb = ParseBuf::new(wb.as_slice());
        decoded.decode(&mut pb).unwrap();
        assert_eq!(decoded.get_vendor(), Some(0xfff1));
        assert!(decoded.is_reliable());
        assert_eq!(decoded.get_ack(), None);
        assert_eq!(pb.parsed_len(), 8);
    }

    #[test]
    fn test_reserved_exchange_flags() {
        let b = [0x80, 0x20, 0, 0, 0, 0];
        let mut hdr = ProtoHdr::default();
        assert!(hdr.decode(&mut ParseBuf::new(&b)).is_err());
    }
}

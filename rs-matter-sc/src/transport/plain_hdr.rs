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

use bitflags::bitflags;
use log::trace;

use crate::error::{Error, ErrorCode};
use crate::utils::{ParseBuf, WriteBuf};

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MsgFlags: u8 {
        const DSIZ_UNICAST_NODEID = 0x01;
        const DSIZ_GROUPCAST_NODEID = 0x02;
        const SRC_ADDR_PRESENT = 0x04;
    }
}

impl fmt::Display for MsgFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = false;
        for (flag, name) in [
            (Self::SRC_ADDR_PRESENT, "S"),
            (Self::DSIZ_UNICAST_NODEID, "U"),
            (Self::DSIZ_GROUPCAST_NODEID, "G"),
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

/// The unencrypted message header. Its encoded form is the AAD of the
/// message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlainHdr {
    flags: MsgFlags,
    pub sess_id: u16,
    pub ctr: u32,
    src_nodeid: u64,
    dst_nodeid: u64,
}

impl PlainHdr {
    pub const fn new(sess_id: u16, ctr: u32) -> Self {
        Self {
            flags: MsgFlags::empty(),
            sess_id,
            ctr,
            src_nodeid: 0,
            dst_nodeid: 0,
        }
    }

    pub fn get_src_nodeid(&self) -> Option<u64> {
        self.flags
            .contains(MsgFlags::SRC_ADDR_PRESENT)
            .then_some(self.src_nodeid)
    }

    pub fn set_src_nodeid(&mut self, id: Option<u64>) {
        self.flags.set(MsgFlags::SRC_ADDR_PRESENT, id.is_some());
        self.src_nodeid = id.unwrap_or(0);
    }

    pub fn get_dst_unicast_nodeid(&self) -> Option<u64> {
        self.flags
            .contains(MsgFlags::DSIZ_UNICAST_NODEID)
            .then_some(self.dst_nodeid)
    }

    pub fn set_dst_unicast_nodeid(&mut self, id: Option<u64>) {
        self.flags.remove(MsgFlags::DSIZ_GROUPCAST_NODEID);
        self.flags.set(MsgFlags::DSIZ_UNICAST_NODEID, id.is_some());
        self.dst_nodeid = id.unwrap_or(0);
    }

    pub fn is_encrypted(&self) -> bool {
        self.sess_id != 0
    }

    pub fn decode(&mut self, msg: &mut ParseBuf) -> Result<(), Error> {
        self.flags = MsgFlags::from_bits(msg.le_u8()?).ok_or(ErrorCode::Invalid)?;
        self.sess_id = msg.le_u16()?;
        let _sec_flags = msg.le_u8()?;
        self.ctr = msg.le_u32()?;

        if self.flags.contains(MsgFlags::SRC_ADDR_PRESENT) {
            self.src_nodeid = msg.le_u64()?;
        }

        if self
            .flags
            .contains(MsgFlags::DSIZ_UNICAST_NODEID | MsgFlags::DSIZ_GROUPCAST_NODEID)
        {
            Err(ErrorCode::Invalid)?;
        } else if self.flags.contains(MsgFlags::DSIZ_UNICAST_NODEID) {
            self.dst_nodeid = msg.le_u64()?;
        } else if self.flags.contains(MsgFlags::DSIZ_GROUPCAST_NODEID) {
            self.dst_nodeid = msg.le_u16()? as u64;
        }

        trace!("[decode] {}", self);
        Ok(())
    }

    pub fn encode(&self, resp_buf: &mut WriteBuf) -> Result<(), Error> {
        trace!("[encode] {}", self);
        resp_buf.le_u8(self.flags.bits())?;
        resp_buf.le_u16(self.sess_id)?;
        resp_buf.le_u8(0)?;
        resp_buf.le_u32(self.ctr)?;

        if self.flags.contains(MsgFlags::SRC_ADDR_PRESENT) {
            resp_buf.le_u64(self.src_nodeid)?;
        }

        if self.flags.contains(MsgFlags::DSIZ_UNICAST_NODEID) {
            resp_buf.le_u64(self.dst_nodeid)?;
        } else if self.flags.contains(MsgFlags::DSIZ_GROUPCAST_NODEID) {
            resp_buf.le_u16(self.dst_nodeid as u16)?;
        }

        Ok(())
    }
}

impl fmt::Display for PlainHdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.flags.is_empty() {
            write!(f, "{},", self.flags)?;
        }

        write!(f, "SID:{:x},CTR:{:x}", self.sess_id, self.ctr)?;

        if let Some(src_nodeid) = self.get_src_nodeid() {
            write!(f, ",SRC:{:x}", src_nodeid)?;
        }

        if let Some(dst_nodeid) = self.get_dst_unicast_nodeid() {
            write!(f, ",DST:{:x}", dst_nodeid)?;
        }

        Ok(())
    }
}

pub const fn max_plain_hdr_len() -> usize {
    // flags
    1 +
    // security flags
        1 +
    // session ID
        2 +
    // message ctr
        4 +
    // [optional] source node ID
        8 +
    // [optional] destination node ID
        8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_header() {
        let hdr = PlainHdr::new(0x1234, 0x41);
        let mut buf = [0u8; 32];
        let mut wb = WriteBuf::new(&mut buf);
        hdr.encode(&mut wb).unwrap();
        assert_eq!(wb.as_slice(), [0, 0x34, 0x12, 0, 0x41, 0, 0, 0]);

        let mut decoded = PlainHdr::default();
        decoded.decode(&mut ParseBuf::new(wb.as_slice())).unwrap();
        assert_eq!(decoded, hdr);
        assert!(decoded.is_encrypted());
    }

    #[test]
    fn test_node_ids() {
        let mut hdr = PlainHdr::new(0, 7);
        hdr.set_src_nodeid(Some(0x1122334455667788));
        hdr.set_dst_unicast_nodeid(Some(5));

        let mut buf = [0u8; 32];
        let mut wb = WriteBuf::new(&mut buf);
        hdr.encode(&mut wb).unwrap();
        assert_eq!(wb.len(), max_plain_hdr_len());

        let mut decoded = PlainHdr::default();
        let mut pb = ParseBuf::new(wb.as_slice());
        decoded.decode(&mut pb).unwrap();
        assert_eq!(decoded.get_src_nodeid(), Some(0x1122334455667788));
        assert_eq!(decoded.get_dst_unicast_nodeid(), Some(5));
        assert!(pb.as_slice().is_empty());
    }

    #[test]
    fn test_both_dsiz_is_invalid() {
        let b = [0x03, 0, 0, 0, 1, 0, 0, 0, 1, 0];
        let mut hdr = PlainHdr::default();
        assert!(hdr.decode(&mut ParseBuf::new(&b)).is_err());
    }
}

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

use super::{ElementType, TagType, TAG_SHIFT_BITS};
use crate::error::{Error, ErrorCode};
use crate::utils::writebuf::WriteBuf;

pub struct TLVWriter<'a, 'b> {
    buf: &'a mut WriteBuf<'b>,
}

impl<'a, 'b> TLVWriter<'a, 'b> {
    pub fn new(buf: &'a mut WriteBuf<'b>) -> Self {
        Self { buf }
    }

    fn put_control_tag(&mut self, tag_type: TagType, val_type: ElementType) -> Result<(), Error> {
        let (tag_id, tag_val, tag_len) = match tag_type {
            TagType::Anonymous => (0_u8, 0, 0),
            TagType::Context(v) => (1, v as u64, 1),
            TagType::CommonPrf16(v) => (2, v as u64, 2),
            TagType::CommonPrf32(v) => (3, v as u64, 4),
            TagType::ImplPrf16(v) => (4, v as u64, 2),
            TagType::ImplPrf32(v) => (5, v as u64, 4),
            TagType::FullQual48(v) => (6, v, 6),
            TagType::FullQual64(v) => (7, v, 8),
        };

        self.buf.le_u8((tag_id << TAG_SHIFT_BITS) | val_type as u8)?;
        self.buf.append(&tag_val.to_le_bytes()[..tag_len])
    }

    pub fn u8(&mut self, tag_type: TagType, data: u8) -> Result<(), Error> {
        self.put_control_tag(tag_type, ElementType::U8)?;
        self.buf.le_u8(data)
    }

    pub fn u16(&mut self, tag_type: TagType, data: u16) -> Result<(), Error> {
        if data <= 0xff {
            self.u8(tag_type, data as u8)
        } else {
            self.put_control_tag(tag_type, ElementType::U16)?;
            self.buf.le_u16(data)
        }
    }

    pub fn u32(&mut self, tag_type: TagType, data: u32) -> Result<(), Error> {
        if data <= 0xffff {
            self.u16(tag_type, data as u16)
        } else {
            self.put_control_tag(tag_type, ElementType::U32)?;
            self.buf.le_u32(data)
        }
    }

    pub fn u64(&mut self, tag_type: TagType, data: u64) -> Result<(), Error> {
        if data <= 0xffff_ffff {
            self.u32(tag_type, data as u32)
        } else {
            self.put_control_tag(tag_type, ElementType::U64)?;
            self.buf.le_u64(data)
        }
    }

    pub fn bool(&mut self, tag_type: TagType, data: bool) -> Result<(), Error> {
        let val_type = if data {
            ElementType::True
        } else {
            ElementType::False
        };
        self.put_control_tag(tag_type, val_type)
    }

    pub fn str(&mut self, tag_type: TagType, data: &[u8]) -> Result<(), Error> {
        if data.len() <= 0xff {
            self.put_control_tag(tag_type, ElementType::Str8l)?;
            self.buf.le_u8(data.len() as u8)?;
        } else if data.len() <= 0xffff {
            self.put_control_tag(tag_type, ElementType::Str16l)?;
            self.buf.le_u16(data.len() as u16)?;
        } else {
            Err(ErrorCode::NoSpace)?;
        }
        self.buf.append(data)
    }

    pub fn start_struct(&mut self, tag_type: TagType) -> Result<(), Error> {
        self.put_control_tag(tag_type, ElementType::Struct)
    }

    pub fn end_container(&mut self) -> Result<(), Error> {
        self.put_control_tag(TagType::Anonymous, ElementType::EndCnt)
    }

    pub fn get_tail(&self) -> usize {
        self.buf.get_tail()
    }

    pub fn rewind_to(&mut self, anchor: usize) {
        self.buf.rewind_tail_to(anchor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_success() {
        let mut backing = [0u8; 20];
        let mut wb = WriteBuf::new(&mut backing);
        let mut tw = TLVWriter::new(&mut wb);

        tw.start_struct(TagType::Anonymous).unwrap();
        tw.u8(TagType::Anonymous, 12).unwrap();
        tw.u8(TagType::Context(1), 13).unwrap();
        tw.u16(TagType::Anonymous, 0x1212).unwrap();
        tw.u16(TagType::Context(2), 0x1313).unwrap();
        tw.start_struct(TagType::Context(3)).unwrap();
        tw.bool(TagType::Context(4), true).unwrap();
        tw.end_container().unwrap();
        tw.end_container().unwrap();

        assert_eq!(
            wb.as_slice(),
            [21, 4, 12, 36, 1, 13, 5, 0x12, 0x012, 37, 2, 0x13, 0x13, 53, 3, 41, 4, 24, 24]
        );
    }

    #[test]
    fn test_minimal_width_integers() {
        let mut backing = [0u8; 20];
        let mut wb = WriteBuf::new(&mut backing);
        let mut tw = TLVWriter::new(&mut wb);

        tw.u32(TagType::Context(1), 2000).unwrap();
        tw.u32(TagType::Context(2), 100_000).unwrap();

        assert_eq!(
            wb.as_slice(),
            [0x25, 1, 0xd0, 0x07, 0x26, 2, 0xa0, 0x86, 0x01, 0x00]
        );
    }

    #[test]
    fn test_put_str8() {
        let mut backing = [0u8; 20];
        let mut wb = WriteBuf::new(&mut backing);
        let mut tw = TLVWriter::new(&mut wb);

        tw.u8(TagType::Context(1), 13).unwrap();
        tw.str(TagType::Anonymous, &[10, 11, 12, 13, 14]).unwrap();
        tw.u16(TagType::Context(2), 0x1214).unwrap();

        assert_eq!(
            wb.as_slice(),
            [36, 1, 13, 16, 5, 10, 11, 12, 13, 14, 37, 2, 0x14, 0x12]
        );
    }

    #[test]
    fn test_no_space() {
        let mut backing = [0u8; 6];
        let mut wb = WriteBuf::new(&mut backing);
        let mut tw = TLVWriter::new(&mut wb);

        assert!(tw.str(TagType::Context(1), &[1, 2, 3, 4, 5]).is_err());
    }
}

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

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, ErrorCode};

/// Read cursor over a received frame. Fields are consumed from the head,
/// trailers (e.g. the AEAD tag) from the tail.
pub struct ParseBuf<'a> {
    buf: &'a [u8],
    read_off: usize,
    left: usize,
}

impl<'a> ParseBuf<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            read_off: 0,
            left: buf.len(),
        }
    }

    pub fn as_slice(&self) -> &'a [u8] {
        &self.buf[self.read_off..self.read_off + self.left]
    }

    pub fn parsed_len(&self) -> usize {
        self.read_off
    }

    pub fn parsed_as_slice(&self) -> &'a [u8] {
        &self.buf[..self.read_off]
    }

    pub fn tail(&mut self, size: usize) -> Result<&'a [u8], Error> {
        if size > self.left {
            Err(ErrorCode::TruncatedPacket)?;
        }

        let end = self.read_off + self.left;
        self.left -= size;

        Ok(&self.buf[end - size..end])
    }

    pub fn head(&mut self, size: usize) -> Result<&'a [u8], Error> {
        if size > self.left {
            Err(ErrorCode::TruncatedPacket)?;
        }

        let head = &self.buf[self.read_off..self.read_off + size];
        self.read_off += size;
        self.left -= size;

        Ok(head)
    }

    pub fn le_u8(&mut self) -> Result<u8, Error> {
        Ok(self.head(1)?[0])
    }

    pub fn le_u16(&mut self) -> Result<u16, Error> {
        Ok(LittleEndian::read_u16(self.head(2)?))
    }

    pub fn le_u32(&mut self) -> Result<u32, Error> {
        Ok(LittleEndian::read_u32(self.head(4)?))
    }

    pub fn le_u64(&mut self) -> Result<u64, Error> {
        Ok(LittleEndian::read_u64(self.head(8)?))
    }
}

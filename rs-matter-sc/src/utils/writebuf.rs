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

/// A cursor over a borrowed byte slice that can grow in both directions:
/// towards the tail with the `le_*`/`append` writers and towards the head
/// with `prepend`, into the space set aside with `reserve`.
#[derive(Debug)]
pub struct WriteBuf<'a> {
    buf: &'a mut [u8],
    start: usize,
    end: usize,
}

impl<'a> WriteBuf<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            start: 0,
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn get_tail(&self) -> usize {
        self.end
    }

    pub fn rewind_tail_to(&mut self, new_end: usize) {
        self.end = new_end.max(self.start);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..self.end]
    }

    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Leaves `reserve` bytes at the head for later `prepend` calls.
    /// Only valid on an empty buffer.
    pub fn reserve(&mut self, reserve: usize) -> Result<(), Error> {
        if self.end != 0 || self.start != 0 {
            Err(ErrorCode::Invalid)?;
        }

        if reserve > self.buf.len() {
            Err(ErrorCode::NoSpace)?;
        }

        self.start = reserve;
        self.end = reserve;

        Ok(())
    }

    pub fn prepend(&mut self, src: &[u8]) -> Result<(), Error> {
        if src.len() > self.start {
            Err(ErrorCode::NoSpace)?;
        }

        self.start -= src.len();
        self.buf[self.start..self.start + src.len()].copy_from_slice(src);

        Ok(())
    }

    fn append_with<F>(&mut self, size: usize, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut [u8]),
    {
        if self.end + size > self.buf.len() {
            Err(ErrorCode::NoSpace)?;
        }

        f(&mut self.buf[self.end..self.end + size]);
        self.end += size;

        Ok(())
    }

    pub fn append(&mut self, src: &[u8]) -> Result<(), Error> {
        self.append_with(src.len(), |dst| dst.copy_from_slice(src))
    }

    pub fn le_u8(&mut self, data: u8) -> Result<(), Error> {
        self.append_with(1, |dst| dst[0] = data)
    }

    pub fn le_u16(&mut self, data: u16) -> Result<(), Error> {
        self.append_with(2, |dst| LittleEndian::write_u16(dst, data))
    }

    pub fn le_u32(&mut self, data: u32) -> Result<(), Error> {
        self.append_with(4, |dst| LittleEndian::write_u32(dst, data))
    }

    pub fn le_u64(&mut self, data: u64) -> Result<(), Error> {
        self.append_with(8, |dst| LittleEndian::write_u64(dst, data))
    }
}

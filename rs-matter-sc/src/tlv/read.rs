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
use log::error;

use super::{ElementType, TagType, TAG_MASK, TAG_SHIFT_BITS, TAG_SIZE_MAP, TYPE_MASK};
use crate::error::{Error, ErrorCode};

/// A lazily decoded TLV element. `data` starts at the control byte and may
/// extend beyond the element itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TLVElement<'a> {
    data: &'a [u8],
}

impl<'a> TLVElement<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn control(&self) -> Result<u8, Error> {
        self.data.first().copied().ok_or(ErrorCode::TruncatedPacket.into())
    }

    fn tag_len(&self) -> Result<usize, Error> {
        Ok(TAG_SIZE_MAP[((self.control()? & TAG_MASK) >> TAG_SHIFT_BITS) as usize])
    }

    pub fn element_type(&self) -> Result<ElementType, Error> {
        ElementType::from_u8(self.control()? & TYPE_MASK).ok_or(ErrorCode::InvalidData.into())
    }

    pub fn tag(&self) -> Result<TagType, Error> {
        let form = (self.control()? & TAG_MASK) >> TAG_SHIFT_BITS;
        let raw = self.bytes(1, TAG_SIZE_MAP[form as usize])?;
        let val = if raw.is_empty() {
            0
        } else {
            LittleEndian::read_uint(raw, raw.len())
        };

        Ok(match form {
            0 => TagType::Anonymous,
            1 => TagType::Context(val as u8),
            2 => TagType::CommonPrf16(val as u16),
            3 => TagType::CommonPrf32(val as u32),
            4 => TagType::ImplPrf16(val as u16),
            5 => TagType::ImplPrf32(val as u32),
            6 => TagType::FullQual48(val),
            _ => TagType::FullQual64(val),
        })
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], Error> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(ErrorCode::TruncatedPacket.into())
    }

    /// Offset of the value (or of the length prefix for strings).
    fn value_offset(&self) -> Result<usize, Error> {
        Ok(1 + self.tag_len()?)
    }

    fn fixed_len(elem_type: ElementType) -> Option<usize> {
        use ElementType::*;

        match elem_type {
            S8 | U8 => Some(1),
            S16 | U16 => Some(2),
            S32 | U32 | F32 => Some(4),
            S64 | U64 | F64 => Some(8),
            False | True | Null | EndCnt => Some(0),
            _ => None,
        }
    }

    fn string_len_size(elem_type: ElementType) -> Option<usize> {
        use ElementType::*;

        match elem_type {
            Utf8l | Str8l => Some(1),
            Utf16l | Str16l => Some(2),
            Utf32l | Str32l => Some(4),
            Utf64l | Str64l => Some(8),
            _ => None,
        }
    }

    /// Total encoded length of this element, including nested members and the
    /// closing end-of-container marker.
    pub fn encoded_len(&self) -> Result<usize, Error> {
        let elem_type = self.element_type()?;
        let off = self.value_offset()?;

        if let Some(len) = Self::fixed_len(elem_type) {
            self.bytes(off, len)?;
            Ok(off + len)
        } else if let Some(len_size) = Self::string_len_size(elem_type) {
            let len = LittleEndian::read_uint(self.bytes(off, len_size)?, len_size) as usize;
            self.bytes(off + len_size, len)?;
            Ok(off + len_size + len)
        } else {
            let mut pos = off;
            loop {
                let child = TLVElement::new(self.data.get(pos..).unwrap_or(&[]));
                if child.element_type()? == ElementType::EndCnt {
                    return Ok(pos + 1);
                }
                pos += child.encoded_len()?;
            }
        }
    }

    fn uint(&self) -> Result<u64, Error> {
        let off = self.value_offset()?;
        let len = match self.element_type()? {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::U32 => 4,
            ElementType::U64 => 8,
            _ => Err(ErrorCode::TLVTypeMismatch)?,
        };

        Ok(LittleEndian::read_uint(self.bytes(off, len)?, len))
    }

    pub fn u8(&self) -> Result<u8, Error> {
        u8::try_from(self.uint()?).map_err(|_| ErrorCode::InvalidData.into())
    }

    pub fn u16(&self) -> Result<u16, Error> {
        u16::try_from(self.uint()?).map_err(|_| ErrorCode::InvalidData.into())
    }

    pub fn u32(&self) -> Result<u32, Error> {
        u32::try_from(self.uint()?).map_err(|_| ErrorCode::InvalidData.into())
    }

    pub fn u64(&self) -> Result<u64, Error> {
        self.uint()
    }

    pub fn bool(&self) -> Result<bool, Error> {
        match self.element_type()? {
            ElementType::False => Ok(false),
            ElementType::True => Ok(true),
            _ => Err(ErrorCode::TLVTypeMismatch.into()),
        }
    }

    pub fn str(&self) -> Result<&'a [u8], Error> {
        let elem_type = self.element_type()?;
        if !matches!(
            elem_type,
            ElementType::Str8l | ElementType::Str16l | ElementType::Str32l | ElementType::Str64l
        ) {
            Err(ErrorCode::TLVTypeMismatch)?;
        }

        let off = self.value_offset()?;
        let len_size = Self::string_len_size(elem_type).ok_or(ErrorCode::TLVTypeMismatch)?;
        let len = LittleEndian::read_uint(self.bytes(off, len_size)?, len_size) as usize;

        self.bytes(off + len_size, len)
    }

    pub fn structure(&self) -> Result<TLVElement<'a>, Error> {
        if self.element_type()? == ElementType::Struct {
            Ok(*self)
        } else {
            Err(ErrorCode::TLVTypeMismatch.into())
        }
    }

    /// Iterates over the members of a container element.
    pub fn iter(&self) -> Result<TLVContainerIter<'a>, Error> {
        if !self.element_type()?.is_container() {
            Err(ErrorCode::TLVTypeMismatch)?;
        }

        let off = self.value_offset()?;
        Ok(TLVContainerIter {
            data: self.data.get(off..).unwrap_or(&[]),
            done: false,
        })
    }

    /// Looks up a context-tagged member of a container.
    pub fn find_ctx(&self, tag: u8) -> Result<Option<TLVElement<'a>>, Error> {
        for child in self.iter()? {
            let child = child?;
            if child.tag()? == TagType::Context(tag) {
                return Ok(Some(child));
            }
        }

        Ok(None)
    }

    pub fn ctx(&self, tag: u8) -> Result<TLVElement<'a>, Error> {
        self.find_ctx(tag)?.ok_or_else(|| {
            error!("Mandatory TLV tag {} not found", tag);
            ErrorCode::TLVNotFound.into()
        })
    }
}

pub struct TLVContainerIter<'a> {
    data: &'a [u8],
    done: bool,
}

impl<'a> Iterator for TLVContainerIter<'a> {
    type Item = Result<TLVElement<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let element = TLVElement::new(self.data);
        let res = element.element_type().and_then(|elem_type| {
            if elem_type == ElementType::EndCnt {
                Ok(None)
            } else {
                element.encoded_len().map(Some)
            }
        });

        match res {
            Ok(Some(len)) => {
                self.data = &self.data[len..];
                Some(Ok(element))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Returns the anonymous root structure of a message payload.
pub fn get_root_node_struct(b: &[u8]) -> Result<TLVElement, Error> {
    let root = TLVElement::new(b);
    if root.tag()? != TagType::Anonymous {
        Err(ErrorCode::InvalidData)?;
    }
    root.encoded_len()?;

    root.structure()
}

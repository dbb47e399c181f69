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

//! The Matter TLV subset carried by the secure channel messages.

use crate::error::Error;

mod read;
mod write;

pub use read::*;
pub use write::*;

pub(crate) const TAG_SHIFT_BITS: u8 = 5;
pub(crate) const TAG_MASK: u8 = 0xe0;
pub(crate) const TYPE_MASK: u8 = 0x1f;
pub(crate) const TAG_SIZE_MAP: [usize; 8] = [0, 1, 2, 4, 2, 4, 6, 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    Anonymous,
    Context(u8),
    CommonPrf16(u16),
    CommonPrf32(u32),
    ImplPrf16(u16),
    ImplPrf32(u32),
    FullQual48(u64),
    FullQual64(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    S8 = 0,
    S16 = 1,
    S32 = 2,
    S64 = 3,
    U8 = 4,
    U16 = 5,
    U32 = 6,
    U64 = 7,
    False = 8,
    True = 9,
    F32 = 10,
    F64 = 11,
    Utf8l = 12,
    Utf16l = 13,
    Utf32l = 14,
    Utf64l = 15,
    Str8l = 16,
    Str16l = 17,
    Str32l = 18,
    Str64l = 19,
    Null = 20,
    Struct = 21,
    Array = 22,
    List = 23,
    EndCnt = 24,
}

impl ElementType {
    pub fn from_u8(val: u8) -> Option<Self> {
        use ElementType::*;

        const ALL: [ElementType; 25] = [
            S8, S16, S32, S64, U8, U16, U32, U64, False, True, F32, F64, Utf8l, Utf16l,
            Utf32l, Utf64l, Str8l, Str16l, Str32l, Str64l, Null, Struct, Array, List, EndCnt,
        ];

        ALL.get(val as usize).copied()
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Self::Struct | Self::Array | Self::List)
    }
}

/// An octet string borrowed from the message being encoded or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OctetStr<'a>(pub &'a [u8]);

impl<'a> OctetStr<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self(data)
    }
}

pub trait ToTLV {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error>;
}

pub trait FromTLV<'a>: Sized {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error>;
}

impl ToTLV for u8 {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.u8(tag, *self)
    }
}

impl ToTLV for u16 {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.u16(tag, *self)
    }
}

impl ToTLV for u32 {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.u32(tag, *self)
    }
}

impl ToTLV for bool {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.bool(tag, *self)
    }
}

impl ToTLV for OctetStr<'_> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.str(tag, self.0)
    }
}

impl<T: ToTLV> ToTLV for Option<T> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        match self {
            Some(v) => v.to_tlv(tw, tag),
            None => Ok(()),
        }
    }
}

impl<'a> FromTLV<'a> for u8 {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        t.u8()
    }
}

impl<'a> FromTLV<'a> for u16 {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        t.u16()
    }
}

impl<'a> FromTLV<'a> for u32 {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        t.u32()
    }
}

impl<'a> FromTLV<'a> for bool {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        t.bool()
    }
}

impl<'a> FromTLV<'a> for OctetStr<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        t.str().map(OctetStr)
    }
}

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

use num_derive::FromPrimitive;

use crate::error::{Error, ErrorCode};
use crate::utils::{ParseBuf, WriteBuf};

#[derive(FromPrimitive, PartialEq, Eq, Debug, Copy, Clone)]
pub enum GeneralCode {
    Success = 0,
    Failure = 1,
    BadPrecondition = 2,
    OutOfRange = 3,
    BadRequest = 4,
    Unsupported = 5,
    Unexpected = 6,
    ResourceExhausted = 7,
    Busy = 8,
    Timeout = 9,
    Continue = 10,
    Aborted = 11,
    InvalidArgument = 12,
    NotFound = 13,
    AlreadyExists = 14,
    PermissionDenied = 15,
    DataLoss = 16,
}

/// A Status Report message, as per "Appendix D: Status Report Messages" of the Matter Spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport<'a> {
    pub general_code: GeneralCode,
    pub proto_id: u32,
    pub proto_code: u16,
    pub proto_data: &'a [u8],
}

impl<'a> StatusReport<'a> {
    pub fn read(pb: &mut ParseBuf<'a>) -> Result<Self, Error> {
        Ok(Self {
            general_code: num_traits::FromPrimitive::from_u16(pb.le_u16()?)
                .ok_or(ErrorCode::InvalidOpcode)?,
            proto_id: pb.le_u32()?,
            proto_code: pb.le_u16()?,
            proto_data: pb.as_slice(),
        })
    }

    pub fn from_payload(payload: &'a [u8]) -> Result<Self, Error> {
        Self::read(&mut ParseBuf::new(payload))
    }

    pub fn write(&self, wb: &mut WriteBuf) -> Result<(), Error> {
        wb.le_u16(self.general_code as u16)?;
        wb.le_u32(self.proto_id)?;
        wb.le_u16(self.proto_code)?;
        wb.append(self.proto_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let report = StatusReport {
            general_code: GeneralCode::Failure,
            proto_id: 0,
            proto_code: 2,
            proto_data: &[],
        };

        let mut buf = [0u8; 16];
        let mut wb = WriteBuf::new(&mut buf);
        report.write(&mut wb).unwrap();
        assert_eq!(wb.as_slice(), [1, 0, 0, 0, 0, 0, 2, 0]);

        let parsed = StatusReport::from_payload(wb.as_slice()).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_unknown_general_code() {
        let b = [0xff, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            StatusReport::from_payload(&b).unwrap_err().code(),
            ErrorCode::InvalidOpcode
        );
    }

    #[test]
    fn test_truncated() {
        let b = [1, 0, 0, 0];
        assert_eq!(
            StatusReport::from_payload(&b).unwrap_err().code(),
            ErrorCode::TruncatedPacket
        );
    }
}

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

//! The secure channel protocol: opcodes, status reports and PASE.

use log::warn;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::{Error, ErrorCode};
use crate::tlv::{FromTLV, TLVElement, TLVWriter, TagType, ToTLV};
use crate::transport::exchange::{ExchangeSender, MessageMeta, SendFlags};
use crate::utils::writebuf::WriteBuf;

use self::status_report::{GeneralCode, StatusReport};

pub mod pase;
pub mod status_report;

pub const PROTO_ID_SECURE_CHANNEL: u16 = 0x00;

/// Largest status report the secure channel emits (no protocol data).
const MAX_STATUS_REPORT_LEN: usize = 8;

#[derive(FromPrimitive, Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpCode {
    MRPStandAloneAck = 0x10,
    PBKDFParamRequest = 0x20,
    PBKDFParamResponse = 0x21,
    PASEPake1 = 0x22,
    PASEPake2 = 0x23,
    PASEPake3 = 0x24,
    StatusReport = 0x40,
}

impl OpCode {
    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            proto_id: PROTO_ID_SECURE_CHANNEL,
            proto_opcode: *self as u8,
            reliable: !matches!(self, Self::MRPStandAloneAck),
        }
    }
}

impl From<OpCode> for MessageMeta {
    fn from(op: OpCode) -> Self {
        op.meta()
    }
}

#[derive(FromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
pub enum SCStatusCodes {
    SessionEstablishmentSuccess = 0,
    NoSharedTrustRoots = 1,
    InvalidParameter = 2,
    CloseSession = 3,
    Busy = 4,
    SessionNotFound = 5,
}

impl SCStatusCodes {
    pub fn reliable(&self) -> bool {
        // CloseSession and Busy are sent without the R flag raised
        !matches!(self, SCStatusCodes::CloseSession | SCStatusCodes::Busy)
    }

    pub fn as_report<'a>(&self, payload: &'a [u8]) -> StatusReport<'a> {
        let general_code = match self {
            SCStatusCodes::SessionEstablishmentSuccess => GeneralCode::Success,
            SCStatusCodes::CloseSession => GeneralCode::Success,
            SCStatusCodes::Busy => GeneralCode::Busy,
            SCStatusCodes::InvalidParameter
            | SCStatusCodes::NoSharedTrustRoots
            | SCStatusCodes::SessionNotFound => GeneralCode::Failure,
        };

        StatusReport {
            general_code,
            proto_id: PROTO_ID_SECURE_CHANNEL as u32,
            proto_code: *self as u16,
            proto_data: payload,
        }
    }

    /// The report a local handshake failure is sent to the peer with.
    ///
    /// `(Failure, InvalidParameter)` is kept for a failed key confirmation.
    /// Every other failure carries its cause in the general code.
    pub fn failure_report(err: &Error) -> StatusReport<'static> {
        let general_code = match err.code() {
            ErrorCode::Busy => return Self::Busy.as_report(&[]),
            ErrorCode::NoSession => return Self::SessionNotFound.as_report(&[]),
            ErrorCode::InvalidKeyConfirmation => GeneralCode::Failure,
            ErrorCode::ParameterOutOfRange => GeneralCode::OutOfRange,
            ErrorCode::UnexpectedMessage => GeneralCode::Unexpected,
            ErrorCode::Timeout => GeneralCode::Timeout,
            _ => GeneralCode::Aborted,
        };

        StatusReport {
            general_code,
            proto_id: PROTO_ID_SECURE_CHANNEL as u32,
            proto_code: Self::InvalidParameter as u16,
            proto_data: &[],
        }
    }
}

/// Maps a status report received from the peer onto the local error taxonomy.
/// Returns `None` for a successful report.
pub fn status_to_error(report: &StatusReport) -> Option<Error> {
    if report.general_code == GeneralCode::Success {
        return None;
    }

    let sc_code: Option<SCStatusCodes> = FromPrimitive::from_u16(report.proto_code);

    let code = if report.proto_id != PROTO_ID_SECURE_CHANNEL as u32 {
        ErrorCode::FailureStatusReport
    } else {
        match (report.general_code, sc_code) {
            (GeneralCode::Failure, Some(SCStatusCodes::InvalidParameter)) => {
                ErrorCode::InvalidKeyConfirmation
            }
            (GeneralCode::Busy, _) | (_, Some(SCStatusCodes::Busy)) => ErrorCode::Busy,
            (_, Some(SCStatusCodes::SessionNotFound)) => ErrorCode::NoSession,
            (GeneralCode::OutOfRange, _) => ErrorCode::ParameterOutOfRange,
            (GeneralCode::Unexpected, _) => ErrorCode::UnexpectedMessage,
            (GeneralCode::Timeout, _) => ErrorCode::Timeout,
            _ => ErrorCode::FailureStatusReport,
        }
    };

    warn!(
        "Peer reported {:?}/{:x}, mapped to {:?}",
        report.general_code, report.proto_code, code
    );

    Some(code.into())
}

/// Sends a secure channel status report on `exchange`.
pub fn sc_write<X>(exchange: &mut X, status_code: SCStatusCodes) -> Result<(), Error>
where
    X: ExchangeSender + ?Sized,
{
    write_report(exchange, &status_code.as_report(&[]), status_code.reliable())
}

/// Tells the peer why the local side gave up.
pub fn sc_write_failure<X>(exchange: &mut X, err: &Error) -> Result<(), Error>
where
    X: ExchangeSender + ?Sized,
{
    let report = SCStatusCodes::failure_report(err);
    let reliable = report.general_code != GeneralCode::Busy;

    write_report(exchange, &report, reliable)
}

fn write_report<X>(exchange: &mut X, report: &StatusReport, reliable: bool) -> Result<(), Error>
where
    X: ExchangeSender + ?Sized,
{
    let mut buf = [0u8; MAX_STATUS_REPORT_LEN];
    let mut wb = WriteBuf::new(&mut buf);
    report.write(&mut wb)?;

    exchange.send_message(
        OpCode::StatusReport.meta().reliable(reliable),
        wb.as_slice(),
        SendFlags::empty(),
    )
}

/// MRP parameters a node advertises during session establishment.
/// All intervals are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParameters {
    pub idle_interval_ms: Option<u32>,
    pub active_interval_ms: Option<u32>,
    pub active_threshold_ms: Option<u16>,
}

impl SessionParameters {
    pub const DEFAULT_IDLE_INTERVAL_MS: u32 = 500;
    pub const DEFAULT_ACTIVE_INTERVAL_MS: u32 = 300;
    pub const DEFAULT_ACTIVE_THRESHOLD_MS: u16 = 4000;

    pub const fn new() -> Self {
        Self {
            idle_interval_ms: Some(Self::DEFAULT_IDLE_INTERVAL_MS),
            active_interval_ms: Some(Self::DEFAULT_ACTIVE_INTERVAL_MS),
            active_threshold_ms: Some(Self::DEFAULT_ACTIVE_THRESHOLD_MS),
        }
    }

    pub fn idle_interval_ms(&self) -> u32 {
        self.idle_interval_ms
            .unwrap_or(Self::DEFAULT_IDLE_INTERVAL_MS)
    }

    pub fn active_interval_ms(&self) -> u32 {
        self.active_interval_ms
            .unwrap_or(Self::DEFAULT_ACTIVE_INTERVAL_MS)
    }

    pub fn active_threshold_ms(&self) -> u16 {
        self.active_threshold_ms
            .unwrap_or(Self::DEFAULT_ACTIVE_THRESHOLD_MS)
    }
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self::new()
    }
}

impl ToTLV for SessionParameters {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.idle_interval_ms.to_tlv(tw, TagType::Context(1))?;
        self.active_interval_ms.to_tlv(tw, TagType::Context(2))?;
        self.active_threshold_ms.to_tlv(tw, TagType::Context(3))?;
        tw.end_container()
    }
}

impl<'a> FromTLV<'a> for SessionParameters {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.structure()?;

        Ok(Self {
            idle_interval_ms: t.find_ctx(1)?.map(|e| e.u32()).transpose()?,
            active_interval_ms: t.find_ctx(2)?.map(|e| e.u32()).transpose()?,
            active_threshold_ms: t.find_ctx(3)?.map(|e| e.u16()).transpose()?,
        })
    }
}

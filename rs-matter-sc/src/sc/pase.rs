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

//! Passcode-authenticated session establishment (PASE).
//!
//! A [`PaseSession`] drives one handshake on one exchange, either as the
//! commissioner (initiator, prover) or as the commissionee (responder,
//! verifier):
//!
//! ```text
//! initiator                           responder
//!   PBKDFParamRequest   ------------>
//!                       <------------  PBKDFParamResponse
//!   Pake1 (pA)          ------------>
//!                       <------------  Pake2 (pB, cB)
//!   Pake3 (cA)          ------------>
//!                       <------------  StatusReport (success)
//! ```
//!
//! Exactly one message is expected at any time. On success both sides hold
//! identical [`SessionKeys`], handed over in a [`PairingResult`].

use core::time::Duration;

use log::{debug, error, info, warn};
use subtle::ConstantTimeEq;

use crate::crypto::{hkdf_sha256, AeadKey, CryptoSensitive};
use crate::error::{Error, ErrorCode};
use crate::tlv::{get_root_node_struct, FromTLV, OctetStr, TLVElement, TLVWriter, TagType, ToTLV};
use crate::transport::exchange::{ExchangeSender, MessageMeta, Role, SendFlags};
use crate::utils::epoch::Epoch;
use crate::utils::rand::Rand;
use crate::utils::writebuf::WriteBuf;

use super::status_report::StatusReport;
use super::{sc_write, sc_write_failure, status_to_error, OpCode, SCStatusCodes, SessionParameters};

use self::spake2p::{Spake2P, VerifierData, MAX_SALT_SIZE_BYTES, SPAKE2_ITERATION_COUNT};

pub mod crypto;
pub mod spake2p;

const PASE_DISCARD_TIMEOUT_SECS: Duration = Duration::from_secs(60);
const SPAKE2_SESSION_KEYS_INFO: &[u8] = b"SessionKeys";

const RANDOM_LEN: usize = 32;
const MAX_PASE_MSG_LEN: usize = 256;

/// Bounds and defaults for the PBKDF2 parameters plus the MRP parameters
/// advertised to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaseConfig {
    pub min_iterations: u32,
    pub max_iterations: u32,
    pub min_salt_len: usize,
    pub max_salt_len: usize,
    pub default_iterations: u32,
    pub timeout: Duration,
    pub local_params: SessionParameters,
}

impl PaseConfig {
    pub const MIN_ITERATIONS: u32 = 1000;
    pub const MAX_ITERATIONS: u32 = 100000;
    pub const MIN_SALT_LEN: usize = 16;
    pub const MAX_SALT_LEN: usize = MAX_SALT_SIZE_BYTES;

    pub const fn new() -> Self {
        Self {
            min_iterations: Self::MIN_ITERATIONS,
            max_iterations: Self::MAX_ITERATIONS,
            min_salt_len: Self::MIN_SALT_LEN,
            max_salt_len: Self::MAX_SALT_LEN,
            default_iterations: SPAKE2_ITERATION_COUNT,
            timeout: PASE_DISCARD_TIMEOUT_SECS,
            local_params: SessionParameters::new(),
        }
    }

    /// Rejects PBKDF2 parameters outside of the configured bounds.
    pub fn check_params(&self, iterations: u32, salt_len: usize) -> Result<(), Error> {
        if !(self.min_iterations..=self.max_iterations).contains(&iterations) {
            error!("PBKDF2 iteration count {} out of range", iterations);
            Err(ErrorCode::ParameterOutOfRange)?;
        }

        // Salts longer than the storage are never accepted
        if !(self.min_salt_len..=self.max_salt_len.min(MAX_SALT_SIZE_BYTES)).contains(&salt_len) {
            error!("PBKDF2 salt length {} out of range", salt_len);
            Err(ErrorCode::ParameterOutOfRange)?;
        }

        Ok(())
    }
}

impl Default for PaseConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The keys of a PASE session: one per direction plus the attestation
/// challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    i2r: AeadKey,
    r2i: AeadKey,
    att_challenge: CryptoSensitive<16>,
}

impl SessionKeys {
    pub fn new(i2r: AeadKey, r2i: AeadKey, att_challenge: CryptoSensitive<16>) -> Self {
        Self {
            i2r,
            r2i,
            att_challenge,
        }
    }

    /// I2RKey || R2IKey || AttestationChallenge = HKDF(nil, Ke, "SessionKeys")
    pub fn derive(ke: &[u8]) -> Result<Self, Error> {
        let mut material = CryptoSensitive::<48>::new();
        hkdf_sha256(&[], ke, SPAKE2_SESSION_KEYS_INFO, material.access_mut())?;

        let material = material.access();
        Ok(Self::new(
            AeadKey::from_slice(&material[0..16])?,
            AeadKey::from_slice(&material[16..32])?,
            CryptoSensitive::from_slice(&material[32..48])?,
        ))
    }

    /// The key `role` encrypts with.
    pub fn enc_key(&self, role: Role) -> &AeadKey {
        match role {
            Role::Initiator => &self.i2r,
            Role::Responder => &self.r2i,
        }
    }

    pub fn dec_key(&self, role: Role) -> &AeadKey {
        match role {
            Role::Initiator => &self.r2i,
            Role::Responder => &self.i2r,
        }
    }

    pub fn attestation_challenge(&self) -> &CryptoSensitive<16> {
        &self.att_challenge
    }
}

/// Everything a secure session needs from a completed handshake.
#[derive(Debug)]
pub struct PairingResult {
    pub keys: SessionKeys,
    pub local_sess_id: u16,
    pub peer_sess_id: u16,
    pub role: Role,
    pub peer_params: SessionParameters,
}

/// Gets told how the handshake ended. Called at most once per session.
pub trait PairingDelegate {
    fn on_pairing_complete(&mut self);

    fn on_pairing_error(&mut self, err: &Error);
}

impl<T> PairingDelegate for &mut T
where
    T: PairingDelegate + ?Sized,
{
    fn on_pairing_complete(&mut self) {
        (**self).on_pairing_complete()
    }

    fn on_pairing_error(&mut self, err: &Error) {
        (**self).on_pairing_error(err)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PaseState {
    Idle,
    WaitingForPBKDFParamRequest,
    PBKDFParamRequestSent,
    PBKDFParamsExchanged,
    Msg1Sent,
    Msg2Sent,
    Msg3Sent,
    Complete,
    Failed,
}

impl PaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// The one message accepted next, if any.
    pub fn expected_msg(&self) -> Option<OpCode> {
        match self {
            Self::WaitingForPBKDFParamRequest => Some(OpCode::PBKDFParamRequest),
            Self::PBKDFParamRequestSent => Some(OpCode::PBKDFParamResponse),
            Self::PBKDFParamsExchanged => Some(OpCode::PASEPake1),
            Self::Msg1Sent => Some(OpCode::PASEPake2),
            Self::Msg2Sent => Some(OpCode::PASEPake3),
            Self::Msg3Sent => Some(OpCode::StatusReport),
            Self::Idle | Self::Complete | Self::Failed => None,
        }
    }
}

/// PBKDF2 inputs as carried in a PBKDFParamResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbkdfParams {
    pub iterations: u32,
    pub salt: heapless::Vec<u8, MAX_SALT_SIZE_BYTES>,
}

enum Secret {
    Passcode(u32),
    Verifier(VerifierData),
}

/// One PASE handshake, bound to a single exchange.
pub struct PaseSession {
    role: Role,
    state: PaseState,
    config: PaseConfig,
    rand: Rand,
    secret: Secret,
    known_params: Option<PbkdfParams>,
    spake2p: Spake2P,
    local_sess_id: u16,
    peer_sess_id: u16,
    local_random: [u8; RANDOM_LEN],
    peer_params: SessionParameters,
    keys: Option<SessionKeys>,
    result: Option<PairingResult>,
}

impl PaseSession {
    /// A commissionee waiting for the commissioner's PBKDFParamRequest.
    pub fn new_responder(
        verifier: VerifierData,
        local_sess_id: u16,
        config: PaseConfig,
        rand: Rand,
    ) -> Self {
        Self::new(
            Role::Responder,
            PaseState::WaitingForPBKDFParamRequest,
            Secret::Verifier(verifier),
            local_sess_id,
            config,
            rand,
        )
    }

    /// A commissioner knowing the setup passcode. Call [`Self::start`] to
    /// send the first message.
    pub fn new_initiator(passcode: u32, local_sess_id: u16, config: PaseConfig, rand: Rand) -> Self {
        Self::new(
            Role::Initiator,
            PaseState::Idle,
            Secret::Passcode(passcode),
            local_sess_id,
            config,
            rand,
        )
    }

    /// Uses PBKDF2 parameters learnt out of band. The responder is then
    /// asked not to send its own.
    pub fn with_pbkdf_params(mut self, iterations: u32, salt: &[u8]) -> Result<Self, Error> {
        self.config.check_params(iterations, salt.len())?;

        self.known_params = Some(PbkdfParams {
            iterations,
            salt: heapless::Vec::from_slice(salt).map_err(|_| ErrorCode::ParameterOutOfRange)?,
        });

        Ok(self)
    }

    fn new(
        role: Role,
        state: PaseState,
        secret: Secret,
        local_sess_id: u16,
        config: PaseConfig,
        rand: Rand,
    ) -> Self {
        Self {
            role,
            state,
            config,
            rand,
            secret,
            known_params: None,
            spake2p: Spake2P::new(),
            local_sess_id,
            peer_sess_id: 0,
            local_random: [0; RANDOM_LEN],
            peer_params: SessionParameters::new(),
            keys: None,
            result: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> PaseState {
        self.state
    }

    pub fn expected_msg(&self) -> Option<OpCode> {
        self.state.expected_msg()
    }

    pub fn is_complete(&self) -> bool {
        self.state == PaseState::Complete
    }

    pub fn local_sess_id(&self) -> u16 {
        self.local_sess_id
    }

    pub fn result(&self) -> Option<&PairingResult> {
        self.result.as_ref()
    }

    /// Hands the keys over to the session layer.
    pub fn take_result(&mut self) -> Option<PairingResult> {
        self.result.take()
    }

    /// Sends the PBKDFParamRequest. Initiator only.
    pub fn start<X>(&mut self, exchange: &mut X) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
    {
        if self.role != Role::Initiator || self.state != PaseState::Idle {
            Err(ErrorCode::IncorrectState)?;
        }

        let res = self.send_pbkdf_param_request(exchange);
        if res.is_err() {
            self.state = PaseState::Failed;
            self.clear_secrets();
        }

        res
    }

    /// Feeds one received secure channel message to the handshake.
    ///
    /// Anything but the expected message (or a status report) fails the
    /// handshake. Messages reaching a finished handshake are rejected with
    /// `UnexpectedMessage` and change nothing.
    pub fn on_message_received<X, D>(
        &mut self,
        exchange: &mut X,
        meta: &MessageMeta,
        payload: &[u8],
        delegate: &mut D,
    ) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
        D: PairingDelegate + ?Sized,
    {
        if self.state.is_terminal() {
            warn!("PASE already {:?}, rejecting {:x}", self.state, meta.proto_opcode);
            Err(ErrorCode::UnexpectedMessage)?;
        }

        let opcode = if meta.is_secure_channel() {
            meta.opcode::<OpCode>().ok()
        } else {
            None
        };

        if opcode == Some(OpCode::StatusReport) && self.state != PaseState::Idle {
            return self.handle_status_report(exchange, payload, delegate);
        }

        let Some(opcode) = opcode.filter(|op| Some(*op) == self.expected_msg()) else {
            error!(
                "PASE in {:?} expected {:?}, got {:x}/{:x}",
                self.state,
                self.expected_msg(),
                meta.proto_id,
                meta.proto_opcode
            );
            return Err(self.fail(exchange, ErrorCode::UnexpectedMessage.into(), true, delegate));
        };

        debug!("PASE {:?}: handling {:?}", self.state, opcode);

        let res = match opcode {
            OpCode::PBKDFParamRequest => self.handle_pbkdf_param_request(exchange, payload),
            OpCode::PBKDFParamResponse => self.handle_pbkdf_param_response(exchange, payload),
            OpCode::PASEPake1 => self.handle_pake1(exchange, payload),
            OpCode::PASEPake2 => self.handle_pake2(exchange, payload),
            OpCode::PASEPake3 => self.handle_pake3(exchange, payload),
            _ => Err(ErrorCode::UnexpectedMessage.into()),
        };

        match res {
            Ok(()) => {
                if self.state == PaseState::Complete {
                    delegate.on_pairing_complete();
                }
                Ok(())
            }
            Err(err) => Err(self.fail(exchange, err, true, delegate)),
        }
    }

    /// The peer went silent. This is final, retransmissions are the
    /// exchange's business.
    pub fn on_response_timeout<D>(&mut self, delegate: &mut D)
    where
        D: PairingDelegate + ?Sized,
    {
        if self.state.is_terminal() {
            return;
        }

        error!("PASE timed out in {:?}", self.state);
        self.state = PaseState::Failed;
        self.clear_secrets();

        delegate.on_pairing_error(&ErrorCode::Timeout.into());
    }

    /// Abandons the handshake without telling the peer or the delegate.
    pub fn abort(&mut self) {
        if self.state != PaseState::Complete {
            self.state = PaseState::Failed;
        }
        self.clear_secrets();
    }

    fn send_pbkdf_param_request<X>(&mut self, exchange: &mut X) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
    {
        (self.rand)(&mut self.local_random);

        let req = PBKDFParamReq {
            initiator_random: OctetStr::new(&self.local_random),
            initiator_ssid: self.local_sess_id,
            passcode_id: 0,
            has_params: self.known_params.is_some(),
            params: Some(self.config.local_params),
        };

        let mut buf = [0; MAX_PASE_MSG_LEN];
        let payload = encode(&req, &mut buf)?;

        self.spake2p.set_context();
        self.spake2p.update_context(payload)?;

        exchange.send_message(
            OpCode::PBKDFParamRequest.meta(),
            payload,
            SendFlags::EXPECT_RESPONSE,
        )?;

        self.state = PaseState::PBKDFParamRequestSent;
        Ok(())
    }

    fn handle_pbkdf_param_request<X>(&mut self, exchange: &mut X, payload: &[u8]) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
    {
        let req = decode::<PBKDFParamReq>(payload)?;
        if req.passcode_id != 0 {
            error!("Can't yet handle passcode_id != 0");
            Err(ErrorCode::ParameterOutOfRange)?;
        }
        if req.initiator_random.0.len() != RANDOM_LEN {
            Err(ErrorCode::ParameterOutOfRange)?;
        }

        let Secret::Verifier(verifier) = &self.secret else {
            return Err(ErrorCode::IncorrectState.into());
        };
        self.config
            .check_params(verifier.count, verifier.salt.len())?;

        self.peer_sess_id = req.initiator_ssid;
        self.peer_params = req.params.unwrap_or_default();

        (self.rand)(&mut self.local_random);

        let resp = PBKDFParamResp {
            init_random: req.initiator_random,
            our_random: OctetStr::new(&self.local_random),
            local_sessid: self.local_sess_id,
            params: (!req.has_params).then(|| PBKDFParamRespParams {
                count: verifier.count,
                salt: OctetStr::new(&verifier.salt),
            }),
            session_params: Some(self.config.local_params),
        };

        let mut buf = [0; MAX_PASE_MSG_LEN];
        let resp_payload = encode(&resp, &mut buf)?;

        self.spake2p.set_context();
        self.spake2p.update_context(payload)?;
        self.spake2p.update_context(resp_payload)?;

        exchange.send_message(
            OpCode::PBKDFParamResponse.meta(),
            resp_payload,
            SendFlags::EXPECT_RESPONSE,
        )?;

        self.state = PaseState::PBKDFParamsExchanged;
        Ok(())
    }

    #[allow(non_snake_case)]
    fn handle_pbkdf_param_response<X>(
        &mut self,
        exchange: &mut X,
        payload: &[u8],
    ) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
    {
        let resp = decode::<PBKDFParamResp>(payload)?;

        // A tampered echo means the transcripts can't match anyway
        if resp.init_random.0.ct_eq(&self.local_random).unwrap_u8() != 1 {
            error!("Initiator random not echoed back");
            Err(ErrorCode::InvalidKeyConfirmation)?;
        }
        if resp.our_random.0.len() != RANDOM_LEN {
            Err(ErrorCode::ParameterOutOfRange)?;
        }

        let (iterations, salt) = match (&self.known_params, &resp.params) {
            (Some(known), _) => (known.iterations, known.salt.as_slice()),
            (None, Some(params)) => (params.count, params.salt.0),
            (None, None) => {
                error!("PBKDF2 parameters neither known nor sent");
                Err(ErrorCode::ParameterOutOfRange)?
            }
        };

        // Bounds are checked before any PBKDF2 work
        self.config.check_params(iterations, salt.len())?;

        let Secret::Passcode(passcode) = &self.secret else {
            return Err(ErrorCode::IncorrectState.into());
        };

        self.spake2p.update_context(payload)?;
        self.spake2p.start_prover(*passcode, iterations, salt)?;
        let pA = self.spake2p.get_pA(self.rand)?;

        self.peer_sess_id = resp.local_sessid;
        self.peer_params = resp.session_params.unwrap_or_default();

        let mut buf = [0; MAX_PASE_MSG_LEN];
        let pake1 = encode(
            &Pake1 {
                pa: OctetStr::new(&pA),
            },
            &mut buf,
        )?;

        exchange.send_message(OpCode::PASEPake1.meta(), pake1, SendFlags::EXPECT_RESPONSE)?;

        self.state = PaseState::Msg1Sent;
        Ok(())
    }

    #[allow(non_snake_case)]
    fn handle_pake1<X>(&mut self, exchange: &mut X, payload: &[u8]) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
    {
        let pake1 = decode::<Pake1>(payload)?;

        let Secret::Verifier(verifier) = &self.secret else {
            return Err(ErrorCode::IncorrectState.into());
        };

        self.spake2p.start_verifier(verifier)?;
        let (pB, cB) = self.spake2p.handle_pA(pake1.pa.0, self.rand)?;

        let mut buf = [0; MAX_PASE_MSG_LEN];
        let pake2 = encode(
            &Pake2 {
                pb: OctetStr::new(&pB),
                cb: OctetStr::new(&cB),
            },
            &mut buf,
        )?;

        exchange.send_message(OpCode::PASEPake2.meta(), pake2, SendFlags::EXPECT_RESPONSE)?;

        self.state = PaseState::Msg2Sent;
        Ok(())
    }

    #[allow(non_snake_case)]
    fn handle_pake2<X>(&mut self, exchange: &mut X, payload: &[u8]) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
    {
        let pake2 = decode::<Pake2>(payload)?;

        let cA = self.spake2p.handle_pB(pake2.pb.0, pake2.cb.0)?;
        let keys = SessionKeys::derive(self.spake2p.ke()?.access())?;
        self.spake2p.clear();

        let mut buf = [0; MAX_PASE_MSG_LEN];
        let pake3 = encode(
            &Pake3 {
                ca: OctetStr::new(&cA),
            },
            &mut buf,
        )?;

        exchange.send_message(OpCode::PASEPake3.meta(), pake3, SendFlags::EXPECT_RESPONSE)?;

        // Kept back until the responder confirms
        self.keys = Some(keys);
        self.state = PaseState::Msg3Sent;
        Ok(())
    }

    #[allow(non_snake_case)]
    fn handle_pake3<X>(&mut self, exchange: &mut X, payload: &[u8]) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
    {
        let pake3 = decode::<Pake3>(payload)?;

        self.spake2p.handle_cA(pake3.ca.0)?;
        let keys = SessionKeys::derive(self.spake2p.ke()?.access())?;
        self.spake2p.clear();

        sc_write(exchange, SCStatusCodes::SessionEstablishmentSuccess)?;

        self.complete(keys);
        Ok(())
    }

    fn handle_status_report<X, D>(
        &mut self,
        exchange: &mut X,
        payload: &[u8],
        delegate: &mut D,
    ) -> Result<(), Error>
    where
        X: ExchangeSender + ?Sized,
        D: PairingDelegate + ?Sized,
    {
        let report = match StatusReport::from_payload(payload) {
            Ok(report) => report,
            Err(err) => return Err(self.fail(exchange, err, true, delegate)),
        };

        if let Some(err) = status_to_error(&report) {
            // The peer already gave up, nothing to report back
            return Err(self.fail(exchange, err, false, delegate));
        }

        match (self.state, self.keys.take()) {
            (PaseState::Msg3Sent, Some(keys)) => {
                self.complete(keys);
                delegate.on_pairing_complete();
                Ok(())
            }
            _ => {
                error!("Success status in {:?}", self.state);
                Err(self.fail(exchange, ErrorCode::UnexpectedMessage.into(), true, delegate))
            }
        }
    }

    fn complete(&mut self, keys: SessionKeys) {
        info!(
            "PASE complete as {:?}: local session {}, peer session {}",
            self.role, self.local_sess_id, self.peer_sess_id
        );

        self.result = Some(PairingResult {
            keys,
            local_sess_id: self.local_sess_id,
            peer_sess_id: self.peer_sess_id,
            role: self.role,
            peer_params: self.peer_params,
        });
        self.local_random.fill(0);
        self.state = PaseState::Complete;
    }

    fn fail<X, D>(&mut self, exchange: &mut X, err: Error, notify_peer: bool, delegate: &mut D) -> Error
    where
        X: ExchangeSender + ?Sized,
        D: PairingDelegate + ?Sized,
    {
        error!("PASE failed in {:?}: {:?}", self.state, err);

        self.state = PaseState::Failed;
        self.clear_secrets();

        if notify_peer {
            if let Err(e) = sc_write_failure(exchange, &err) {
                warn!("Could not report PASE failure to peer: {:?}", e);
            }
        }

        delegate.on_pairing_error(&err);

        err
    }

    fn clear_secrets(&mut self) {
        self.spake2p.clear();
        self.keys = None;
        self.local_random.fill(0);
    }
}

fn encode<'a, T: ToTLV>(msg: &T, buf: &'a mut [u8]) -> Result<&'a [u8], Error> {
    let mut wb = WriteBuf::new(buf);
    let mut tw = TLVWriter::new(&mut wb);
    msg.to_tlv(&mut tw, TagType::Anonymous)?;

    let len = wb.as_slice().len();
    Ok(&buf[..len])
}

/// Parses a handshake message. Malformed ones count as bad parameters.
fn decode<'a, T: FromTLV<'a>>(payload: &'a [u8]) -> Result<T, Error> {
    get_root_node_struct(payload)
        .and_then(|root| T::from_tlv(&root))
        .map_err(Error::map_invalid_param)
}

struct Timeout {
    start_time: Duration,
    exch_id: u16,
}

impl Timeout {
    fn new(exch_id: u16, epoch: Epoch) -> Self {
        Self {
            start_time: epoch(),
            exch_id,
        }
    }

    fn is_sess_expired(&self, epoch: Epoch, timeout: Duration) -> bool {
        epoch().saturating_sub(self.start_time) > timeout
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PaseSessionType {
    Basic,
    Enhanced,
}

/// Commissioning window bookkeeping on the commissionee: the verifier to
/// authenticate commissioners with, and the one establishment allowed at a
/// time.
pub struct PaseMgr {
    verifier: Option<(VerifierData, PaseSessionType)>,
    timeout: Option<Timeout>,
    config: PaseConfig,
    epoch: Epoch,
    rand: Rand,
}

impl PaseMgr {
    pub fn new(config: PaseConfig, epoch: Epoch, rand: Rand) -> Self {
        Self {
            verifier: None,
            timeout: None,
            config,
            epoch,
            rand,
        }
    }

    pub fn config(&self) -> &PaseConfig {
        &self.config
    }

    pub fn session_type(&self) -> Option<PaseSessionType> {
        self.verifier.as_ref().map(|(_, t)| *t)
    }

    pub fn enable_basic_pase_session(&mut self, password: u32) -> Result<(), Error> {
        if self.verifier.is_some() {
            Err(ErrorCode::IncorrectState)?;
        }

        let mut salt = [0; MAX_SALT_SIZE_BYTES];
        (self.rand)(&mut salt);
        let salt = &salt[..self.config.max_salt_len.min(MAX_SALT_SIZE_BYTES)];

        self.config
            .check_params(self.config.default_iterations, salt.len())?;
        let verifier =
            VerifierData::new_with_pw_and_salt(password, salt, self.config.default_iterations)?;

        self.verifier = Some((verifier, PaseSessionType::Basic));
        Ok(())
    }

    pub fn enable_pase_session(&mut self, verifier: &[u8], salt: &[u8], count: u32) -> Result<(), Error> {
        if self.verifier.is_some() {
            Err(ErrorCode::IncorrectState)?;
        }

        self.config.check_params(count, salt.len())?;
        let verifier = VerifierData::new(verifier, salt, count)?;

        self.verifier = Some((verifier, PaseSessionType::Enhanced));
        Ok(())
    }

    pub fn disable_pase_session(&mut self) -> bool {
        self.timeout = None;
        self.verifier.take().is_some()
    }

    /// True while an establishment is running and not yet stale.
    pub fn is_busy(&self) -> bool {
        self.timeout
            .as_ref()
            .map(|t| !t.is_sess_expired(self.epoch, self.config.timeout))
            .unwrap_or(false)
    }

    /// Starts a responder handshake on `exch_id`, the exchange the
    /// PBKDFParamRequest arrived on.
    ///
    /// While another exchange is establishing a session the peer is told
    /// `Busy`. When PASE is not enabled the request is refused with a
    /// generic failure.
    pub fn begin<X>(&mut self, exchange: &mut X, exch_id: u16, local_sess_id: u16) -> Result<PaseSession, Error>
    where
        X: ExchangeSender + ?Sized,
    {
        let Some((verifier, _)) = self.verifier.as_ref() else {
            error!("PASE not enabled");
            let err: Error = ErrorCode::IncorrectState.into();
            sc_write_failure(exchange, &err)?;
            return Err(err);
        };

        if let Some(timeout) = self.timeout.as_ref() {
            if timeout.is_sess_expired(self.epoch, self.config.timeout) {
                debug!("Discarding stale PASE on exchange {}", timeout.exch_id);
                self.timeout = None;
            } else if timeout.exch_id != exch_id {
                debug!("Other PAKE session in progress");
                sc_write(exchange, SCStatusCodes::Busy)?;
                return Err(ErrorCode::Busy.into());
            }
        }

        self.timeout = Some(Timeout::new(exch_id, self.epoch));

        Ok(PaseSession::new_responder(
            verifier.clone(),
            local_sess_id,
            self.config.clone(),
            self.rand,
        ))
    }

    /// Frees the establishment slot held by `exch_id`.
    pub fn end(&mut self, exch_id: u16) {
        if self
            .timeout
            .as_ref()
            .map(|t| t.exch_id == exch_id)
            .unwrap_or(false)
        {
            self.timeout = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PBKDFParamReq<'a> {
    pub initiator_random: OctetStr<'a>,
    pub initiator_ssid: u16,
    pub passcode_id: u16,
    pub has_params: bool,
    pub params: Option<SessionParameters>,
}

impl ToTLV for PBKDFParamReq<'_> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.initiator_random.to_tlv(tw, TagType::Context(1))?;
        self.initiator_ssid.to_tlv(tw, TagType::Context(2))?;
        self.passcode_id.to_tlv(tw, TagType::Context(3))?;
        self.has_params.to_tlv(tw, TagType::Context(4))?;
        self.params.to_tlv(tw, TagType::Context(5))?;
        tw.end_container()
    }
}

impl<'a> FromTLV<'a> for PBKDFParamReq<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.structure()?;

        Ok(Self {
            initiator_random: OctetStr::from_tlv(&t.ctx(1)?)?,
            initiator_ssid: t.ctx(2)?.u16()?,
            passcode_id: t.ctx(3)?.u16()?,
            has_params: t.ctx(4)?.bool()?,
            params: t
                .find_ctx(5)?
                .map(|e| SessionParameters::from_tlv(&e))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PBKDFParamRespParams<'a> {
    pub count: u32,
    pub salt: OctetStr<'a>,
}

impl ToTLV for PBKDFParamRespParams<'_> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.count.to_tlv(tw, TagType::Context(1))?;
        self.salt.to_tlv(tw, TagType::Context(2))?;
        tw.end_container()
    }
}

impl<'a> FromTLV<'a> for PBKDFParamRespParams<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.structure()?;

        Ok(Self {
            count: t.ctx(1)?.u32()?,
            salt: OctetStr::from_tlv(&t.ctx(2)?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PBKDFParamResp<'a> {
    pub init_random: OctetStr<'a>,
    pub our_random: OctetStr<'a>,
    pub local_sessid: u16,
    pub params: Option<PBKDFParamRespParams<'a>>,
    pub session_params: Option<SessionParameters>,
}

impl ToTLV for PBKDFParamResp<'_> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.init_random.to_tlv(tw, TagType::Context(1))?;
        self.our_random.to_tlv(tw, TagType::Context(2))?;
        self.local_sessid.to_tlv(tw, TagType::Context(3))?;
        self.params.to_tlv(tw, TagType::Context(4))?;
        self.session_params.to_tlv(tw, TagType::Context(5))?;
        tw.end_container()
    }
}

impl<'a> FromTLV<'a> for PBKDFParamResp<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.structure()?;

        Ok(Self {
            init_random: OctetStr::from_tlv(&t.ctx(1)?)?,
            our_random: OctetStr::from_tlv(&t.ctx(2)?)?,
            local_sessid: t.ctx(3)?.u16()?,
            params: t
                .find_ctx(4)?
                .map(|e| PBKDFParamRespParams::from_tlv(&e))
                .transpose()?,
            session_params: t
                .find_ctx(5)?
                .map(|e| SessionParameters::from_tlv(&e))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pake1<'a> {
    pub pa: OctetStr<'a>,
}

impl ToTLV for Pake1<'_> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.pa.to_tlv(tw, TagType::Context(1))?;
        tw.end_container()
    }
}

impl<'a> FromTLV<'a> for Pake1<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        Ok(Self {
            pa: OctetStr::from_tlv(&t.structure()?.ctx(1)?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pake2<'a> {
    pub pb: OctetStr<'a>,
    pub cb: OctetStr<'a>,
}

impl ToTLV for Pake2<'_> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.pb.to_tlv(tw, TagType::Context(1))?;
        self.cb.to_tlv(tw, TagType::Context(2))?;
        tw.end_container()
    }
}

impl<'a> FromTLV<'a> for Pake2<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        let t = t.structure()?;

        Ok(Self {
            pb: OctetStr::from_tlv(&t.ctx(1)?)?,
            cb: OctetStr::from_tlv(&t.ctx(2)?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pake3<'a> {
    pub ca: OctetStr<'a>,
}

impl ToTLV for Pake3<'_> {
    fn to_tlv(&self, tw: &mut TLVWriter, tag: TagType) -> Result<(), Error> {
        tw.start_struct(tag)?;
        self.ca.to_tlv(tw, TagType::Context(1))?;
        tw.end_container()
    }
}

impl<'a> FromTLV<'a> for Pake3<'a> {
    fn from_tlv(t: &TLVElement<'a>) -> Result<Self, Error> {
        Ok(Self {
            ca: OctetStr::from_tlv(&t.structure()?.ctx(1)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    use crate::sc::status_report::GeneralCode;
    use crate::utils::epoch::dummy_epoch;
    use crate::utils::rand::dummy_rand;

    const PASSCODE: u32 = 20202021;
    const SALT: [u8; 16] = [0x53; 16];

    #[derive(Default)]
    struct Recorder {
        queue: VecDeque<(MessageMeta, Vec<u8>)>,
        log: Vec<(MessageMeta, Vec<u8>)>,
    }

    impl Recorder {
        fn statuses(&self) -> Vec<StatusReport<'_>> {
            self.log
                .iter()
                .filter(|(meta, _)| meta.proto_opcode == OpCode::StatusReport as u8)
                .map(|(_, payload)| StatusReport::from_payload(payload).unwrap())
                .collect()
        }
    }

    impl ExchangeSender for Recorder {
        fn send_message(
            &mut self,
            meta: MessageMeta,
            payload: &[u8],
            _flags: SendFlags,
        ) -> Result<(), Error> {
            self.queue.push_back((meta, payload.to_vec()));
            self.log.push((meta, payload.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Outcome {
        completed: usize,
        errors: Vec<ErrorCode>,
    }

    impl PairingDelegate for Outcome {
        fn on_pairing_complete(&mut self) {
            self.completed += 1;
        }

        fn on_pairing_error(&mut self, err: &Error) {
            self.errors.push(err.code());
        }
    }

    struct Peer {
        pase: PaseSession,
        ex: Recorder,
        outcome: Outcome,
    }

    impl Peer {
        fn new(pase: PaseSession) -> Self {
            Self {
                pase,
                ex: Recorder::default(),
                outcome: Outcome::default(),
            }
        }

        fn deliver(&mut self, meta: &MessageMeta, payload: &[u8]) -> Result<(), Error> {
            self.pase
                .on_message_received(&mut self.ex, meta, payload, &mut self.outcome)
        }
    }

    fn responder(pw: u32, count: u32) -> Peer {
        let verifier = VerifierData::new_with_pw_and_salt(pw, &SALT, count).unwrap();
        Peer::new(PaseSession::new_responder(
            verifier,
            2,
            PaseConfig::new(),
            dummy_rand,
        ))
    }

    fn initiator(pw: u32) -> Peer {
        Peer::new(PaseSession::new_initiator(
            pw,
            1,
            PaseConfig::new(),
            dummy_rand,
        ))
    }

    fn run(init: &mut Peer, resp: &mut Peer) {
        init.pase.start(&mut init.ex).unwrap();

        loop {
            let mut progressed = false;

            while let Some((meta, payload)) = init.ex.queue.pop_front() {
                let _ = resp.deliver(&meta, &payload);
                progressed = true;
            }
            while let Some((meta, payload)) = resp.ex.queue.pop_front() {
                let _ = init.deliver(&meta, &payload);
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    #[test]
    fn test_pase_success() {
        let mut init = initiator(PASSCODE);
        let mut resp = responder(PASSCODE, 1000);

        run(&mut init, &mut resp);

        assert_eq!(init.outcome.completed, 1);
        assert_eq!(resp.outcome.completed, 1);
        assert!(init.outcome.errors.is_empty());
        assert!(resp.outcome.errors.is_empty());

        let i = init.pase.result().unwrap();
        let r = resp.pase.result().unwrap();
        assert_eq!(i.keys, r.keys);
        assert_eq!(i.keys.enc_key(Role::Initiator), r.keys.dec_key(Role::Responder));
        assert_eq!((i.local_sess_id, i.peer_sess_id), (1, 2));
        assert_eq!((r.local_sess_id, r.peer_sess_id), (2, 1));
        assert_eq!(i.role, Role::Initiator);

        let status = resp.ex.statuses();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].general_code, GeneralCode::Success);
    }

    #[test]
    fn test_pase_known_params() {
        let mut init = Peer::new(
            PaseSession::new_initiator(PASSCODE, 1, PaseConfig::new(), dummy_rand)
                .with_pbkdf_params(1000, &SALT)
                .unwrap(),
        );
        let mut resp = responder(PASSCODE, 1000);

        run(&mut init, &mut resp);

        assert_eq!(init.outcome.completed, 1);
        assert_eq!(resp.outcome.completed, 1);

        // The response carries no PBKDF2 parameters
        let (_, payload) = &resp.ex.log[0];
        let parsed = PBKDFParamResp::from_tlv(&get_root_node_struct(payload).unwrap()).unwrap();
        assert!(parsed.params.is_none());
        assert_eq!(parsed.session_params, Some(SessionParameters::new()));
    }

    #[test]
    fn test_pase_wrong_passcode() {
        let mut init = initiator(PASSCODE + 1);
        let mut resp = responder(PASSCODE, 1000);

        run(&mut init, &mut resp);

        assert_eq!(init.pase.state(), PaseState::Failed);
        assert_eq!(resp.pase.state(), PaseState::Failed);
        assert_eq!(init.outcome.errors, [ErrorCode::InvalidKeyConfirmation]);
        assert_eq!(resp.outcome.errors, [ErrorCode::InvalidKeyConfirmation]);
        assert_eq!(init.outcome.completed + resp.outcome.completed, 0);
        assert!(init.pase.result().is_none());

        // No success report went out
        assert!(resp.ex.statuses().is_empty());
        let status = init.ex.statuses();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].general_code, GeneralCode::Failure);
        assert_eq!(status[0].proto_code, SCStatusCodes::InvalidParameter as u16);
    }

    #[test]
    fn test_no_processing_after_completion() {
        let mut init = initiator(PASSCODE);
        let mut resp = responder(PASSCODE, 1000);

        run(&mut init, &mut resp);
        let keys = resp.pase.result().unwrap().keys.clone();
        let sent = resp.ex.log.len();

        for (meta, payload) in init.ex.log.clone() {
            assert_eq!(
                resp.deliver(&meta, &payload).map_err(|e| e.code()),
                Err(ErrorCode::UnexpectedMessage)
            );
        }

        assert_eq!(resp.pase.state(), PaseState::Complete);
        assert_eq!(resp.pase.result().unwrap().keys, keys);
        assert_eq!(resp.ex.log.len(), sent);
        assert_eq!(resp.outcome.completed, 1);
        assert!(resp.outcome.errors.is_empty());
    }

    #[test]
    fn test_unexpected_message() {
        let mut resp = responder(PASSCODE, 1000);
        assert_eq!(resp.pase.expected_msg(), Some(OpCode::PBKDFParamRequest));

        let pake1 = [0x15, 0x30, 0x01, 0x01, 0x00, 0x18];
        assert_eq!(
            resp.deliver(&OpCode::PASEPake1.meta(), &pake1)
                .map_err(|e| e.code()),
            Err(ErrorCode::UnexpectedMessage)
        );
        assert_eq!(resp.pase.state(), PaseState::Failed);
        assert_eq!(resp.pase.expected_msg(), None);
        assert_eq!(resp.outcome.errors, [ErrorCode::UnexpectedMessage]);

        let status = resp.ex.statuses();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].general_code, GeneralCode::Unexpected);

        // Other protocols are no better
        let mut resp = responder(PASSCODE, 1000);
        assert_eq!(
            resp.deliver(&MessageMeta::new(1, 0x20, true), &[])
                .map_err(|e| e.code()),
            Err(ErrorCode::UnexpectedMessage)
        );
    }

    #[test]
    fn test_malformed_request() {
        let mut resp = responder(PASSCODE, 1000);

        // An empty structure: no initiator random
        assert_eq!(
            resp.deliver(&OpCode::PBKDFParamRequest.meta(), &[0x15, 0x18])
                .map_err(|e| e.code()),
            Err(ErrorCode::ParameterOutOfRange)
        );
        assert_eq!(resp.pase.state(), PaseState::Failed);
        assert_eq!(resp.ex.statuses()[0].general_code, GeneralCode::OutOfRange);
    }

    #[test]
    fn test_iterations_out_of_range() {
        // The responder refuses to advertise parameters it would reject itself
        let mut init = initiator(PASSCODE);
        let mut resp = responder(PASSCODE, 500);
        run(&mut init, &mut resp);
        assert_eq!(resp.outcome.errors, [ErrorCode::ParameterOutOfRange]);
        assert_eq!(init.pase.state(), PaseState::Failed);
        assert_eq!(init.outcome.errors, [ErrorCode::ParameterOutOfRange]);

        // A lenient responder gets turned down by the initiator
        let mut init = initiator(PASSCODE);
        let verifier = VerifierData::new_with_pw_and_salt(PASSCODE, &SALT, 500).unwrap();
        let config = PaseConfig {
            min_iterations: 1,
            ..PaseConfig::new()
        };
        let mut resp = Peer::new(PaseSession::new_responder(verifier, 2, config, dummy_rand));
        run(&mut init, &mut resp);

        assert_eq!(init.outcome.errors, [ErrorCode::ParameterOutOfRange]);
        assert_eq!(init.ex.log.len(), 2);
        assert_eq!(init.ex.log[1].0.proto_opcode, OpCode::StatusReport as u8);

        assert_eq!(
            PaseSession::new_initiator(PASSCODE, 1, PaseConfig::new(), dummy_rand)
                .with_pbkdf_params(1000, &[0; 8])
                .map(|_| ())
                .map_err(|e| e.code()),
            Err(ErrorCode::ParameterOutOfRange)
        );
    }

    #[test]
    fn test_response_timeout_and_abort() {
        let mut init = initiator(PASSCODE);
        init.pase.start(&mut init.ex).unwrap();
        assert_eq!(init.pase.expected_msg(), Some(OpCode::PBKDFParamResponse));

        init.pase.on_response_timeout(&mut init.outcome);
        assert_eq!(init.pase.state(), PaseState::Failed);
        assert_eq!(init.outcome.errors, [ErrorCode::Timeout]);

        // Only reported once
        init.pase.on_response_timeout(&mut init.outcome);
        assert_eq!(init.outcome.errors.len(), 1);

        let mut resp = responder(PASSCODE, 1000);
        resp.pase.abort();
        assert_eq!(resp.pase.state(), PaseState::Failed);
        assert!(resp.outcome.errors.is_empty());
        assert!(resp.ex.log.is_empty());
    }

    #[test]
    fn test_start_is_initiator_only() {
        let mut resp = responder(PASSCODE, 1000);
        assert_eq!(
            resp.pase.start(&mut resp.ex).map_err(|e| e.code()),
            Err(ErrorCode::IncorrectState)
        );

        let mut init = initiator(PASSCODE);
        init.pase.start(&mut init.ex).unwrap();
        assert_eq!(
            init.pase.start(&mut init.ex).map_err(|e| e.code()),
            Err(ErrorCode::IncorrectState)
        );
    }

    fn late_epoch() -> Duration {
        Duration::from_secs(1000)
    }

    #[test]
    fn test_pase_mgr_busy() {
        let mut mgr = PaseMgr::new(PaseConfig::new(), dummy_epoch, dummy_rand);
        let mut ex = Recorder::default();

        assert_eq!(
            mgr.begin(&mut ex, 1, 10).map(|_| ()).map_err(|e| e.code()),
            Err(ErrorCode::IncorrectState)
        );
        assert_eq!(ex.statuses()[0].general_code, GeneralCode::Aborted);

        mgr.enable_basic_pase_session(PASSCODE).unwrap();
        assert_eq!(mgr.session_type(), Some(PaseSessionType::Basic));
        assert_eq!(
            mgr.enable_basic_pase_session(PASSCODE)
                .map_err(|e| e.code()),
            Err(ErrorCode::IncorrectState)
        );

        let session = mgr.begin(&mut ex, 1, 10).unwrap();
        assert_eq!(session.role(), Role::Responder);
        assert!(mgr.is_busy());

        ex.log.clear();
        assert_eq!(
            mgr.begin(&mut ex, 2, 11).map(|_| ()).map_err(|e| e.code()),
            Err(ErrorCode::Busy)
        );
        let status = ex.statuses();
        assert_eq!(status[0].general_code, GeneralCode::Busy);
        assert_eq!(status[0].proto_code, SCStatusCodes::Busy as u16);

        mgr.end(1);
        assert!(mgr.begin(&mut ex, 2, 11).is_ok());

        // A stale attempt does not block forever
        mgr.epoch = late_epoch;
        assert!(!mgr.is_busy());
        assert!(mgr.begin(&mut ex, 3, 12).is_ok());

        assert!(mgr.disable_pase_session());
        assert_eq!(mgr.session_type(), None);
    }

    #[test]
    fn test_enhanced_pase_mgr() {
        let computed = VerifierData::compute_verifier(PASSCODE, 1000, &SALT).unwrap();

        let mut mgr = PaseMgr::new(PaseConfig::new(), dummy_epoch, dummy_rand);
        assert_eq!(
            mgr.enable_pase_session(computed.access(), &SALT, 10)
                .map_err(|e| e.code()),
            Err(ErrorCode::ParameterOutOfRange)
        );
        mgr.enable_pase_session(computed.access(), &SALT, 1000)
            .unwrap();
        assert_eq!(mgr.session_type(), Some(PaseSessionType::Enhanced));

        let mut ex = Recorder::default();
        let mut resp = Peer::new(mgr.begin(&mut ex, 1, 2).unwrap());
        let mut init = initiator(PASSCODE);
        run(&mut init, &mut resp);

        assert_eq!(init.outcome.completed, 1);
        assert_eq!(resp.outcome.completed, 1);
    }
}

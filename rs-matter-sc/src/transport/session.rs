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
use core::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::crypto::CryptoSensitive;
use crate::error::{Error, ErrorCode};
use crate::sc::pase::PairingResult;
use crate::sc::SessionParameters;
use crate::utils::epoch::Epoch;
use crate::utils::rand::Rand;

use super::codec::{decode_plain_hdr, decode_proto_hdr, SessionCodec};
use super::dedup::RxCtrState;
use super::exchange::{Exchange, Role};
use super::mrp::{MrpConfig, RxFlags};
use super::network::Address;
use super::packet::{FramedBuf, Packet};
use super::plain_hdr::PlainHdr;

pub const MAX_SESSIONS: usize = 16;

const MATTER_MSG_CTR_RANGE: u32 = 0x0fffffff;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionMode {
    /// The unsecured session PASE runs on.
    PlainText,
    /// A session secured with keys from a PASE handshake.
    Pase,
}

pub struct Session {
    local_sess_id: u16,
    peer_sess_id: u16,
    peer_addr: Address,
    mode: SessionMode,
    role: Option<Role>,
    codec: SessionCodec,
    att_challenge: CryptoSensitive<16>,
    peer_params: SessionParameters,
    msg_ctr: u32,
    rx_ctr_state: Option<RxCtrState>,
    last_use: Duration,
}

impl Session {
    pub fn new_plain(peer_addr: Address, msg_ctr: u32, epoch: Epoch) -> Self {
        Self {
            local_sess_id: 0,
            peer_sess_id: 0,
            peer_addr,
            mode: SessionMode::PlainText,
            role: None,
            codec: SessionCodec::plain(),
            att_challenge: CryptoSensitive::new(),
            peer_params: SessionParameters::new(),
            msg_ctr: msg_ctr & MATTER_MSG_CTR_RANGE,
            rx_ctr_state: None,
            last_use: epoch(),
        }
    }

    /// Binds the outcome of a completed handshake into a secure session.
    /// The keys are moved in and zeroed when the session is dropped.
    pub fn new_pase(peer_addr: Address, msg_ctr: u32, result: PairingResult, epoch: Epoch) -> Self {
        let codec = SessionCodec::secure(
            result.keys.enc_key(result.role).clone(),
            result.keys.dec_key(result.role).clone(),
        );

        Self {
            local_sess_id: result.local_sess_id,
            peer_sess_id: result.peer_sess_id,
            peer_addr,
            mode: SessionMode::Pase,
            role: Some(result.role),
            codec,
            att_challenge: result.keys.attestation_challenge().clone(),
            peer_params: result.peer_params,
            msg_ctr: msg_ctr & MATTER_MSG_CTR_RANGE,
            rx_ctr_state: None,
            last_use: epoch(),
        }
    }

    pub fn get_local_sess_id(&self) -> u16 {
        self.local_sess_id
    }

    pub fn get_peer_sess_id(&self) -> u16 {
        self.peer_sess_id
    }

    pub fn get_peer_addr(&self) -> Address {
        self.peer_addr
    }

    pub fn get_session_mode(&self) -> SessionMode {
        self.mode
    }

    pub fn get_role(&self) -> Option<Role> {
        self.role
    }

    pub fn get_att_challenge(&self) -> Option<&CryptoSensitive<16>> {
        match self.mode {
            SessionMode::Pase => Some(&self.att_challenge),
            SessionMode::PlainText => None,
        }
    }

    pub fn get_peer_params(&self) -> &SessionParameters {
        &self.peer_params
    }

    /// Retransmission timing towards this session's peer. Unsecured sessions
    /// use the defaults, a secure one what the peer advertised during PASE.
    pub fn mrp_config(&self) -> MrpConfig {
        MrpConfig::from_params(&self.peer_params)
    }

    /// Opens an exchange on this session, timed for its peer.
    pub fn new_exchange(
        &self,
        exch_id: u16,
        role: Role,
        epoch: Epoch,
        outbox_capacity: usize,
    ) -> Exchange {
        Exchange::new(
            exch_id,
            role,
            self.local_sess_id,
            self.peer_addr,
            self.mrp_config(),
            epoch,
            outbox_capacity,
        )
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.mode, SessionMode::Pase)
    }

    pub fn is_for_rx(&self, rx_peer: &Address, rx_plain: &PlainHdr) -> bool {
        let addr_matches = self.is_encrypted() || self.peer_addr == *rx_peer;

        addr_matches
            && self.local_sess_id == rx_plain.sess_id
            && self.is_encrypted() == rx_plain.is_encrypted()
    }

    /// Frames the payload of `frame` for the wire and returns the counter
    /// the message went out with. The counter only advances on success.
    pub fn encode(&mut self, frame: &mut FramedBuf, epoch: Epoch) -> Result<u32, Error> {
        let ctr = self.msg_ctr;
        let plain = PlainHdr::new(self.peer_sess_id, ctr);

        self.codec.encode(&plain, frame)?;

        self.msg_ctr = ctr.wrapping_add(1) & MATTER_MSG_CTR_RANGE;
        self.last_use = epoch();

        trace!("Session {:x}: encoded {}", self.local_sess_id, plain);

        Ok(ctr)
    }

    /// Unframes a received frame whose plain header has been consumed.
    ///
    /// Nothing about the session changes unless the frame authenticates.
    /// A replayed counter is reported as `RxFlags::DUPLICATE` so the
    /// exchange layer can re-acknowledge it.
    pub fn decode(
        &mut self,
        plain: &PlainHdr,
        frame: &mut FramedBuf,
        epoch: Epoch,
    ) -> Result<RxFlags, Error> {
        self.codec.decode(plain, frame)?;

        let encrypted = self.is_encrypted();
        let fresh = match self.rx_ctr_state.as_mut() {
            Some(state) => state.post_recv(plain.ctr, encrypted),
            None => {
                self.rx_ctr_state = Some(RxCtrState::new(plain.ctr));
                true
            }
        };

        self.last_use = epoch();

        if fresh {
            Ok(RxFlags::empty())
        } else {
            debug!(
                "Session {:x}: duplicate counter {:x}",
                self.local_sess_id, plain.ctr
            );
            Ok(RxFlags::DUPLICATE)
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "peer: {}, local: {:x}, remote: {:x}, msg_ctr: {:x}, mode: {:?}, ts: {:?}",
            self.peer_addr,
            self.local_sess_id,
            self.peer_sess_id,
            self.msg_ctr,
            self.mode,
            self.last_use,
        )
    }
}

/// The session table of one node.
pub struct SessionMgr {
    next_sess_id: u16,
    sessions: heapless::Vec<Session, MAX_SESSIONS>,
    rand: Rand,
    epoch: Epoch,
}

impl SessionMgr {
    pub fn new(rand: Rand, epoch: Epoch) -> Self {
        Self {
            next_sess_id: 1,
            sessions: heapless::Vec::new(),
            rand,
            epoch,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Next free local session id. Never 0, which is the unsecured session.
    pub fn get_next_sess_id(&mut self) -> u16 {
        let mut next_sess_id: u16;
        loop {
            next_sess_id = self.next_sess_id;

            self.next_sess_id = self.next_sess_id.overflowing_add(1).0;
            if self.next_sess_id == 0 {
                self.next_sess_id = 1;
            }

            if self
                .sessions
                .iter()
                .all(|sess| sess.get_local_sess_id() != next_sess_id)
            {
                break;
            }
        }
        next_sess_id
    }

    fn initial_msg_ctr(&self) -> u32 {
        let mut buf = [0; 4];
        (self.rand)(&mut buf);

        (u32::from_le_bytes(buf) & MATTER_MSG_CTR_RANGE) + 1
    }

    /// Index of the session to drop when the table is full: the least
    /// recently used unsecured session, then, unless `plain_only` is set,
    /// the least recently used secure one.
    fn get_session_for_eviction(&self, plain_only: bool) -> Option<usize> {
        let lru = |encrypted: bool| {
            self.sessions
                .iter()
                .enumerate()
                .filter(|(_, sess)| sess.is_encrypted() == encrypted)
                .min_by_key(|(_, sess)| sess.last_use)
                .map(|(index, _)| index)
        };

        lru(false).or_else(|| if plain_only { None } else { lru(true) })
    }

    /// Adds a session, evicting one when the table is full.
    ///
    /// Unsecured sessions are created by unauthenticated traffic, so they
    /// only ever displace each other.
    pub fn add(&mut self, session: Session) -> Result<&mut Session, Error> {
        if self.sessions.is_full() {
            let Some(index) = self.get_session_for_eviction(!session.is_encrypted()) else {
                error!("Session table full, dropping {}", session);
                return Err(ErrorCode::NoSpaceSessions.into());
            };

            let evicted = self.sessions.swap_remove(index);
            debug!("Evicting session {} to make room", evicted);
        }

        let index = self.sessions.len();
        self.sessions
            .push(session)
            .map_err(|_| ErrorCode::NoSpaceSessions)?;

        Ok(&mut self.sessions[index])
    }

    /// Installs the secure session produced by a completed handshake.
    pub fn add_pase(&mut self, peer_addr: Address, result: PairingResult) -> Result<u16, Error> {
        let local_sess_id = result.local_sess_id;

        if local_sess_id == 0 || self.get(local_sess_id).is_some() {
            error!("Local session id {:x} is not available", local_sess_id);
            Err(ErrorCode::Duplicate)?;
        }

        let session = Session::new_pase(peer_addr, self.initial_msg_ctr(), result, self.epoch);
        let session = self.add(session)?;
        info!("New secure session {}", session);

        Ok(local_sess_id)
    }

    /// The unsecured session towards `peer`, created when missing.
    pub fn get_or_add_plain(&mut self, peer: Address) -> Result<&mut Session, Error> {
        let index = self
            .sessions
            .iter()
            .position(|sess| !sess.is_encrypted() && sess.get_peer_addr() == peer);

        match index {
            Some(index) => Ok(&mut self.sessions[index]),
            None => {
                let session = Session::new_plain(peer, self.initial_msg_ctr(), self.epoch);
                self.add(session)
            }
        }
    }

    pub fn get(&self, local_sess_id: u16) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|sess| sess.is_encrypted() && sess.get_local_sess_id() == local_sess_id)
    }

    pub fn get_mut(&mut self, local_sess_id: u16) -> Option<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|sess| sess.is_encrypted() && sess.get_local_sess_id() == local_sess_id)
    }

    /// The session a message on local session `sess_id` towards `peer` goes
    /// out on. Session id 0 is the unsecured session of that peer.
    pub fn get_for_tx(&mut self, sess_id: u16, peer: Address) -> Result<&mut Session, Error> {
        if sess_id == 0 {
            self.get_or_add_plain(peer)
        } else {
            self.get_mut(sess_id).ok_or_else(|| {
                warn!("No session {:x} to send on", sess_id);
                ErrorCode::NoSession.into()
            })
        }
    }

    pub fn get_for_rx(&mut self, rx_peer: Address, rx_plain: &PlainHdr) -> Result<&mut Session, Error> {
        if rx_plain.is_encrypted() {
            self.sessions
                .iter_mut()
                .find(|sess| sess.is_for_rx(&rx_peer, rx_plain))
                .ok_or_else(|| ErrorCode::NoSession.into())
        } else {
            self.get_or_add_plain(rx_peer)
        }
    }

    /// Frames an outbound packet on local session `sess_id` and returns the
    /// message counter it was assigned.
    pub fn encode(&mut self, sess_id: u16, packet: &mut Packet) -> Result<u32, Error> {
        let epoch = self.epoch;
        let session = self.get_for_tx(sess_id, packet.peer)?;

        let ctr = session.encode(&mut packet.buf, epoch)?;
        packet.plain = PlainHdr::new(session.get_peer_sess_id(), ctr);

        Ok(ctr)
    }

    /// Parses, authenticates and unframes a received packet, filling in both
    /// of its headers.
    pub fn decode(&mut self, packet: &mut Packet) -> Result<RxFlags, Error> {
        let epoch = self.epoch;

        packet.plain = decode_plain_hdr(&mut packet.buf)?;

        let session = self.get_for_rx(packet.peer, &packet.plain)?;
        let rx_flags = session.decode(&packet.plain, &mut packet.buf, epoch)?;

        packet.proto = decode_proto_hdr(&mut packet.buf)?;

        trace!("Received {} {}", packet.plain, packet.proto);

        Ok(rx_flags)
    }

    /// Forgets the unsecured session towards `peer`, if any.
    pub fn remove_plain(&mut self, peer: Address) -> Option<Session> {
        let index = self
            .sessions
            .iter()
            .position(|sess| !sess.is_encrypted() && sess.get_peer_addr() == peer)?;

        let session = self.sessions.swap_remove(index);
        debug!("Removed session {}", session);

        Some(session)
    }

    /// Opens an exchange on local session `sess_id`. Session id 0 is the
    /// unsecured session towards `peer`.
    pub fn new_exchange(
        &mut self,
        sess_id: u16,
        peer: Address,
        exch_id: u16,
        role: Role,
        outbox_capacity: usize,
    ) -> Result<Exchange, Error> {
        let epoch = self.epoch;
        let session = self.get_for_tx(sess_id, peer)?;

        Ok(session.new_exchange(exch_id, role, epoch, outbox_capacity))
    }

    /// Tears a session down. Its keys are zeroed as it is dropped.
    pub fn remove(&mut self, local_sess_id: u16) -> Option<Session> {
        let index = self
            .sessions
            .iter()
            .position(|sess| sess.is_encrypted() && sess.get_local_sess_id() == local_sess_id)?;

        let session = self.sessions.swap_remove(index);
        debug!("Removed session {}", session);

        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }
}

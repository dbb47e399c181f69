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

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use rs_matter_sc::error::Error;
use rs_matter_sc::sc::pase::{PairingDelegate, PaseConfig, PaseSession};
use rs_matter_sc::sc::pase::spake2p::VerifierData;
use rs_matter_sc::transport::exchange::{Exchange, Role};
use rs_matter_sc::transport::network::Address;
use rs_matter_sc::transport::packet::{FramedBuf, Packet};
use rs_matter_sc::transport::session::SessionMgr;
use rs_matter_sc::utils::epoch::dummy_epoch;
use rs_matter_sc::utils::rand::dummy_rand;

pub const PASSCODE: u32 = 20202021;
pub const EXCH_ID: u16 = 0x4e21;

pub fn init_env_logger() {
    let _ = env_logger::try_init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
}

pub fn addr(last: u8) -> Address {
    Address::Udp(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 5540))
}

#[derive(Default, Debug)]
pub struct Outcome {
    pub completed: usize,
    pub errors: Vec<rs_matter_sc::error::ErrorCode>,
}

impl PairingDelegate for Outcome {
    fn on_pairing_complete(&mut self) {
        self.completed += 1;
    }

    fn on_pairing_error(&mut self, err: &Error) {
        self.errors.push(err.code());
    }
}

/// One side of an in-memory PASE run: its session table, the exchange the
/// handshake runs on and the handshake itself.
pub struct Node {
    pub addr: Address,
    pub sessions: SessionMgr,
    pub exchange: Exchange,
    pub pase: PaseSession,
    pub outcome: Outcome,
}

impl Node {
    pub fn new(addr: Address, peer: Address, role: Role, pase: PaseSession) -> Self {
        let mut sessions = SessionMgr::new(dummy_rand, dummy_epoch);
        let exchange = sessions.new_exchange(0, peer, EXCH_ID, role, 8).unwrap();

        Self {
            addr,
            sessions,
            exchange,
            pase,
            outcome: Outcome::default(),
        }
    }

    pub fn initiator(passcode: u32, config: PaseConfig) -> Self {
        Self::new(
            addr(1),
            addr(2),
            Role::Initiator,
            PaseSession::new_initiator(passcode, 1, config, dummy_rand),
        )
    }

    pub fn responder(passcode: u32, salt: &[u8], count: u32, config: PaseConfig) -> Self {
        let verifier = VerifierData::new_with_pw_and_salt(passcode, salt, count).unwrap();

        Self::new(
            addr(2),
            addr(1),
            Role::Responder,
            PaseSession::new_responder(verifier, 2, config, dummy_rand),
        )
    }

    /// Frames everything the exchange queued, as it would hit the wire.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        while let Some(mut packet) = self.exchange.take_outbound() {
            let ctr = self
                .sessions
                .encode(self.exchange.sess_id(), &mut packet)
                .unwrap();
            self.exchange.mrp_mut().on_message_sent(&packet.proto, ctr);

            frames.push(packet.buf.as_slice().to_vec());
        }

        frames
    }

    /// Unframes one datagram and runs it through the exchange and the
    /// handshake. `tamper` sees the opcode and the decoded payload first.
    pub fn receive<F>(&mut self, from: Address, frame: &[u8], tamper: &mut F)
    where
        F: FnMut(u8, &mut [u8]),
    {
        let mut packet = Packet::new_rx();
        packet.buf = FramedBuf::from_bytes(frame).unwrap();
        packet.peer = from;

        let rx_flags = self.sessions.decode(&mut packet).unwrap();
        if !self.exchange.is_for_rx(&packet) {
            return;
        }

        tamper(packet.proto.proto_opcode, packet.payload_mut());

        if let Some(meta) = self.exchange.on_message_received(&packet, rx_flags).unwrap() {
            let _ = self.pase.on_message_received(
                &mut self.exchange,
                &meta,
                packet.payload(),
                &mut self.outcome,
            );
        }
    }
}

/// Moves datagrams back and forth until both sides go quiet.
pub fn pump<F>(init: &mut Node, resp: &mut Node, mut tamper: F)
where
    F: FnMut(u8, &mut [u8]),
{
    loop {
        let to_resp = init.drain();
        let to_init = resp.drain();

        if to_resp.is_empty() && to_init.is_empty() {
            break;
        }

        for frame in to_resp {
            resp.receive(init.addr, &frame, &mut tamper);
        }
        for frame in to_init {
            init.receive(resp.addr, &frame, &mut tamper);
        }
    }
}

pub fn no_tamper(_: u8, _: &mut [u8]) {}

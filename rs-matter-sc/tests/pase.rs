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

mod common;

use rs_matter_sc::error::ErrorCode;
use rs_matter_sc::sc::pase::{PaseConfig, PaseState};
use rs_matter_sc::sc::OpCode;
use rs_matter_sc::transport::exchange::{ExchangeSender, Role, SendFlags};
use rs_matter_sc::transport::packet::{FramedBuf, Packet};
use rs_matter_sc::transport::proto_hdr::ProtoHdr;

use common::{addr, init_env_logger, no_tamper, pump, Node, PASSCODE};

const SALT: &[u8] = b"SPAKE2P Key Salt";
const ITERATIONS: u32 = 1000;

fn handshake(init_passcode: u32) -> (Node, Node) {
    let mut init = Node::initiator(init_passcode, PaseConfig::new());
    let mut resp = Node::responder(PASSCODE, SALT, ITERATIONS, PaseConfig::new());

    init.pase.start(&mut init.exchange).unwrap();
    pump(&mut init, &mut resp, no_tamper);

    (init, resp)
}

/// Frames `payload` on the secure session `sess_id` of `from` and unframes it
/// on `to`.
fn carry(from: &mut Node, sess_id: u16, to: &mut Node, payload: &[u8]) -> Packet {
    let mut tx = Packet::new_tx(to.addr, ProtoHdr::new(7, 0x0001, 0x02), payload).unwrap();
    from.sessions.encode(sess_id, &mut tx).unwrap();

    let mut rx = Packet::new_rx();
    rx.buf = FramedBuf::from_bytes(tx.buf.as_slice()).unwrap();
    rx.peer = from.addr;
    to.sessions.decode(&mut rx).unwrap();

    rx
}

#[test]
fn pase_establishes_a_working_session() {
    init_env_logger();

    let (mut init, mut resp) = handshake(PASSCODE);

    assert_eq!(init.pase.state(), PaseState::Complete);
    assert_eq!(resp.pase.state(), PaseState::Complete);
    assert_eq!(init.outcome.completed, 1);
    assert_eq!(resp.outcome.completed, 1);
    assert!(init.outcome.errors.is_empty());
    assert!(resp.outcome.errors.is_empty());

    let init_res = init.pase.take_result().unwrap();
    let resp_res = resp.pase.take_result().unwrap();

    assert_eq!(init_res.role, Role::Initiator);
    assert_eq!(resp_res.role, Role::Responder);
    assert_eq!(init_res.peer_sess_id, resp_res.local_sess_id);
    assert_eq!(resp_res.peer_sess_id, init_res.local_sess_id);
    assert_eq!(init_res.keys, resp_res.keys);

    let init_sess = init.sessions.add_pase(resp.addr, init_res).unwrap();
    let resp_sess = resp.sessions.add_pase(init.addr, resp_res).unwrap();

    let rx = carry(&mut init, init_sess, &mut resp, b"hello");
    assert!(rx.plain.is_encrypted());
    assert_eq!(rx.plain.sess_id, resp_sess);
    assert_eq!(rx.payload(), b"hello");

    let rx = carry(&mut resp, resp_sess, &mut init, b"world");
    assert_eq!(rx.plain.sess_id, init_sess);
    assert_eq!(rx.payload(), b"world");

    assert_eq!(
        init.sessions.get(init_sess).unwrap().get_att_challenge(),
        resp.sessions.get(resp_sess).unwrap().get_att_challenge()
    );
}

#[test]
fn pase_with_known_pbkdf_params() {
    init_env_logger();

    let pase = rs_matter_sc::sc::pase::PaseSession::new_initiator(
        PASSCODE,
        1,
        PaseConfig::new(),
        rs_matter_sc::utils::rand::dummy_rand,
    )
    .with_pbkdf_params(ITERATIONS, SALT)
    .unwrap();

    let mut init = Node::new(addr(1), addr(2), Role::Initiator, pase);
    let mut resp = Node::responder(PASSCODE, SALT, ITERATIONS, PaseConfig::new());

    init.pase.start(&mut init.exchange).unwrap();
    pump(&mut init, &mut resp, no_tamper);

    assert!(init.pase.is_complete());
    assert!(resp.pase.is_complete());
    assert_eq!(
        init.pase.result().unwrap().keys,
        resp.pase.result().unwrap().keys
    );
}

#[test]
fn pase_short_salt_when_allowed() {
    init_env_logger();

    let config = PaseConfig {
        min_salt_len: 4,
        ..PaseConfig::new()
    };

    let mut init = Node::initiator(PASSCODE, config.clone());
    let mut resp = Node::responder(PASSCODE, b"salt", ITERATIONS, config);

    init.pase.start(&mut init.exchange).unwrap();
    pump(&mut init, &mut resp, no_tamper);

    assert_eq!(init.outcome.completed, 1);
    assert_eq!(resp.outcome.completed, 1);
    assert_eq!(
        init.pase.result().unwrap().keys,
        resp.pase.result().unwrap().keys
    );
}

#[test]
fn pase_short_salt_rejected_by_default() {
    init_env_logger();

    let mut init = Node::initiator(PASSCODE, PaseConfig::new());
    let mut resp = Node::responder(PASSCODE, b"salt", ITERATIONS, PaseConfig::new());

    init.pase.start(&mut init.exchange).unwrap();
    pump(&mut init, &mut resp, no_tamper);

    assert_eq!(resp.pase.state(), PaseState::Failed);
    assert_eq!(resp.outcome.errors, [ErrorCode::ParameterOutOfRange]);
    assert_eq!(init.pase.state(), PaseState::Failed);
    assert_eq!(init.outcome.errors, [ErrorCode::ParameterOutOfRange]);
    assert_eq!(init.outcome.completed, 0);
}

#[test]
fn pase_bounds_failure_is_not_a_security_failure() {
    init_env_logger();

    let mut init = Node::initiator(PASSCODE, PaseConfig::new());
    let mut resp = Node::responder(PASSCODE, SALT, 500, PaseConfig::new());

    init.pase.start(&mut init.exchange).unwrap();
    pump(&mut init, &mut resp, no_tamper);

    assert_eq!(resp.outcome.errors, [ErrorCode::ParameterOutOfRange]);
    assert_eq!(init.outcome.errors, [ErrorCode::ParameterOutOfRange]);
    assert_ne!(init.outcome.errors, [ErrorCode::InvalidKeyConfirmation]);
    assert_eq!(init.outcome.completed + resp.outcome.completed, 0);
}

#[test]
fn pase_wrong_passcode() {
    init_env_logger();

    let (init, resp) = handshake(PASSCODE + 1);

    assert_eq!(init.pase.state(), PaseState::Failed);
    assert_eq!(resp.pase.state(), PaseState::Failed);
    assert_eq!(init.outcome.completed, 0);
    assert_eq!(resp.outcome.completed, 0);
    assert_eq!(init.outcome.errors, [ErrorCode::InvalidKeyConfirmation]);
    assert_eq!(resp.outcome.errors, [ErrorCode::InvalidKeyConfirmation]);
    assert!(init.pase.result().is_none());
    assert!(resp.pase.result().is_none());
}

#[test]
fn pase_tampering_fails_key_confirmation() {
    init_env_logger();

    // Payload byte ranges carrying the fields the handshake authenticates
    let targets = [
        (OpCode::PBKDFParamRequest, 4..36),
        (OpCode::PBKDFParamResponse, 4..36),
        (OpCode::PBKDFParamResponse, 39..71),
        (OpCode::PASEPake1, 4..69),
        (OpCode::PASEPake2, 4..69),
        (OpCode::PASEPake2, 72..104),
        (OpCode::PASEPake3, 4..36),
    ];

    for (opcode, range) in targets {
        for offset in [range.start, range.end - 1] {
            let mut init = Node::initiator(PASSCODE, PaseConfig::new());
            let mut resp = Node::responder(PASSCODE, SALT, ITERATIONS, PaseConfig::new());

            init.pase.start(&mut init.exchange).unwrap();

            let mut tampered = false;
            pump(&mut init, &mut resp, |op, payload| {
                if !tampered && op == opcode as u8 {
                    payload[offset] ^= 0x01;
                    tampered = true;
                }
            });

            assert!(tampered, "{:?} was never sent", opcode);
            assert!(!init.pase.is_complete(), "{:?}@{}", opcode, offset);
            assert!(!resp.pase.is_complete(), "{:?}@{}", opcode, offset);
            assert_eq!(init.outcome.completed, 0);
            assert_eq!(resp.outcome.completed, 0);
            assert_eq!(
                init.outcome.errors,
                [ErrorCode::InvalidKeyConfirmation],
                "{:?}@{}",
                opcode,
                offset
            );
            assert_eq!(
                resp.outcome.errors,
                [ErrorCode::InvalidKeyConfirmation],
                "{:?}@{}",
                opcode,
                offset
            );
        }
    }
}

#[test]
fn pase_ignores_messages_once_complete() {
    init_env_logger();

    let (mut init, mut resp) = handshake(PASSCODE);
    assert!(resp.pase.is_complete());

    let keys = resp.pase.result().unwrap().keys.clone();

    // A replayed Pake3 reaches the finished handshake
    init.exchange
        .send_message(OpCode::PASEPake3.meta(), &[0x15, 0x18], SendFlags::empty())
        .unwrap();
    pump(&mut init, &mut resp, no_tamper);

    assert_eq!(resp.pase.state(), PaseState::Complete);
    assert_eq!(resp.outcome.completed, 1);
    assert!(resp.outcome.errors.is_empty());
    assert_eq!(resp.pase.result().unwrap().keys, keys);
}

#[test]
fn pase_rejects_out_of_order_message() {
    init_env_logger();

    let mut init = Node::initiator(PASSCODE, PaseConfig::new());
    let mut resp = Node::responder(PASSCODE, SALT, ITERATIONS, PaseConfig::new());

    // The request is lost and a Pake1 reaches the responder first
    init.pase.start(&mut init.exchange).unwrap();
    init.drain();
    init.exchange
        .send_message(OpCode::PASEPake1.meta(), &[0x15, 0x18], SendFlags::empty())
        .unwrap();

    for frame in init.drain() {
        resp.receive(init.addr, &frame, &mut no_tamper);
    }

    assert_eq!(resp.pase.state(), PaseState::Failed);
    assert_eq!(resp.outcome.errors, [ErrorCode::UnexpectedMessage]);

    // The failure goes back as a status report and keeps its cause
    let frames = resp.drain();
    assert_eq!(frames.len(), 1);

    let mut opcodes = Vec::new();
    let mut seen = |op: u8, _: &mut [u8]| opcodes.push(op);
    init.receive(resp.addr, &frames[0], &mut seen);

    assert_eq!(opcodes, [OpCode::StatusReport as u8]);
    assert_eq!(init.pase.state(), PaseState::Failed);
    assert_eq!(init.outcome.errors, [ErrorCode::UnexpectedMessage]);
}

#[test]
fn pase_trailing_ack() {
    init_env_logger();

    let (mut init, mut resp) = handshake(PASSCODE);

    // The success status is reliable and its ack is still owed
    assert!(resp.exchange.mrp().is_waiting_for_ack());
    assert!(init.exchange.mrp().has_piggyback_ack_pending());

    init.exchange.acknowledge().unwrap();
    pump(&mut init, &mut resp, no_tamper);

    assert!(!init.exchange.mrp().has_piggyback_ack_pending());
    assert!(!resp.exchange.mrp().is_waiting_for_ack());
    assert!(init.pase.is_complete());
    assert!(resp.pase.is_complete());
}

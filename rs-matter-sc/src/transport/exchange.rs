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

use std::collections::VecDeque;

use bitflags::bitflags;
use log::{debug, trace, warn};

use crate::error::{Error, ErrorCode};
use crate::sc::PROTO_ID_SECURE_CHANNEL;
use crate::utils::epoch::Epoch;

use super::codec::MAX_SECURE_SDU_LEN;
use super::mrp::{MrpConfig, ReliableMessageContext, RxFlags};
use super::network::Address;
use super::packet::Packet;
use super::proto_hdr::{max_proto_hdr_len, ProtoHdr};

/// Meta-data when sending/receving messages via an Exchange.
/// Basically, the protocol ID, the protocol opcode and whether the message should be set in a reliable manner.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct MessageMeta {
    pub proto_id: u16,
    pub proto_opcode: u8,
    pub reliable: bool,
}

impl MessageMeta {
    pub const fn new(proto_id: u16, proto_opcode: u8, reliable: bool) -> Self {
        Self {
            proto_id,
            proto_opcode,
            reliable,
        }
    }

    /// Try to cast the protocol opcode to a specific type
    pub fn opcode<T: num_traits::FromPrimitive>(&self) -> Result<T, Error> {
        num_traits::FromPrimitive::from_u8(self.proto_opcode).ok_or(ErrorCode::InvalidOpcode.into())
    }

    pub fn is_secure_channel(&self) -> bool {
        self.proto_id == PROTO_ID_SECURE_CHANNEL
    }

    pub fn set_into(&self, proto: &mut ProtoHdr) {
        proto.proto_id = self.proto_id;
        proto.proto_opcode = self.proto_opcode;
        proto.set_vendor(None);
        proto.set_reliable(self.reliable);
    }

    pub fn reliable(self, reliable: bool) -> Self {
        Self { reliable, ..self }
    }
}

bitflags! {
    #[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct SendFlags: u8 {
        /// The peer is expected to answer on this exchange.
        const EXPECT_RESPONSE = 0x01;
        /// Do not request an acknowledgment, whatever the exchange policy.
        const NO_AUTO_REQUEST_ACK = 0x02;
    }
}

/// What the handshake needs from the exchange it runs on.
pub trait ExchangeSender {
    fn send_message(
        &mut self,
        meta: MessageMeta,
        payload: &[u8],
        flags: SendFlags,
    ) -> Result<(), Error>;
}

impl<T> ExchangeSender for &mut T
where
    T: ExchangeSender + ?Sized,
{
    fn send_message(
        &mut self,
        meta: MessageMeta,
        payload: &[u8],
        flags: SendFlags,
    ) -> Result<(), Error> {
        (**self).send_message(meta, payload, flags)
    }
}

/// Accepts an already stamped exchange header plus payload for transmission.
pub trait MessageSender {
    fn send_frame(&mut self, proto: ProtoHdr, payload: &[u8]) -> Result<(), Error>;
}

impl<T> MessageSender for &mut T
where
    T: MessageSender + ?Sized,
{
    fn send_frame(&mut self, proto: ProtoHdr, payload: &[u8]) -> Result<(), Error> {
        (**self).send_frame(proto, payload)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn is_initiator(&self) -> bool {
        matches!(self, Self::Initiator)
    }
}

/// Bounded queue of packets waiting for the transport.
#[derive(Debug)]
pub struct Outbox {
    peer: Address,
    queue: VecDeque<Packet>,
    capacity: usize,
}

impl Outbox {
    pub fn new(peer: Address, capacity: usize) -> Self {
        Self {
            peer,
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }
}

impl MessageSender for Outbox {
    fn send_frame(&mut self, proto: ProtoHdr, payload: &[u8]) -> Result<(), Error> {
        if self.is_full() {
            Err(ErrorCode::ResourceExhausted)?;
        }

        let packet = Packet::new_tx(self.peer, proto, payload)?;
        trace!("Queued {}", packet.proto);

        self.queue.push_back(packet);

        Ok(())
    }
}

/// One exchange: its reliable messaging state and its outbound queue.
pub struct Exchange {
    id: u16,
    role: Role,
    sess_id: u16,
    mrp: ReliableMessageContext,
    outbox: Outbox,
}

impl Exchange {
    pub fn new(
        id: u16,
        role: Role,
        sess_id: u16,
        peer: Address,
        config: MrpConfig,
        epoch: Epoch,
        outbox_capacity: usize,
    ) -> Self {
        Self {
            id,
            role,
            sess_id,
            mrp: ReliableMessageContext::new(role.is_initiator(), config, epoch),
            outbox: Outbox::new(peer, outbox_capacity),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Local id of the session the exchange runs on.
    pub fn sess_id(&self) -> u16 {
        self.sess_id
    }

    pub fn peer(&self) -> Address {
        self.outbox.peer
    }

    pub fn mrp(&self) -> &ReliableMessageContext {
        &self.mrp
    }

    pub fn mrp_mut(&mut self) -> &mut ReliableMessageContext {
        &mut self.mrp
    }

    /// True when a received packet belongs to this exchange: same id, sent
    /// by the other side.
    pub fn is_for_rx(&self, rx: &Packet) -> bool {
        rx.proto.exch_id == self.id && rx.proto.is_initiator() != self.role.is_initiator()
    }

    /// Runs the reliable messaging bookkeeping of a received packet.
    ///
    /// Returns the meta-data of the message when it has to be handed over
    /// to the protocol, `None` for standalone acks, duplicates and anything
    /// arriving after close.
    pub fn on_message_received(
        &mut self,
        rx: &Packet,
        rx_flags: RxFlags,
    ) -> Result<Option<MessageMeta>, Error> {
        if let Some(ack) = rx.proto.get_ack() {
            self.mrp.handle_rcvd_ack(ack);
        }

        if rx.proto.is_reliable() {
            self.mrp
                .handle_needs_ack(self.id, rx.plain.ctr, rx_flags, &mut self.outbox)?;
        }

        if rx_flags.contains(RxFlags::DUPLICATE) {
            debug!("Dropping duplicate {}", rx.plain);
            return Ok(None);
        }

        if rx.is_standalone_ack() {
            return Ok(None);
        }

        if self.mrp.is_closed() {
            warn!("Exchange {} is closed, dropping {}", self.id, rx.proto);
            return Ok(None);
        }

        self.mrp.on_message_received();

        Ok(Some(rx.meta()))
    }

    /// Flushes an owed acknowledgment that waited too long for a message to
    /// ride on.
    pub fn on_ack_timeout(&mut self) -> Result<(), Error> {
        self.mrp.on_ack_timeout(self.id, &mut self.outbox)
    }

    /// Acknowledges right away whatever is owed.
    pub fn acknowledge(&mut self) -> Result<(), Error> {
        if self.mrp.has_piggyback_ack_pending() {
            self.mrp.send_standalone_ack(self.id, &mut self.outbox)
        } else {
            Ok(())
        }
    }

    pub fn take_outbound(&mut self) -> Option<Packet> {
        self.outbox.pop()
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn close(&mut self) {
        self.mrp.close();
    }
}

impl ExchangeSender for Exchange {
    fn send_message(
        &mut self,
        meta: MessageMeta,
        payload: &[u8],
        flags: SendFlags,
    ) -> Result<(), Error> {
        if payload.len() + max_proto_hdr_len() > MAX_SECURE_SDU_LEN {
            Err(ErrorCode::NoSpace)?;
        }

        let mut proto = ProtoHdr::new(self.id, 0, 0);
        meta.set_into(&mut proto);

        // Only commit the ack/wait bookkeeping once the packet is queued
        let mut mrp = self.mrp.clone();
        mrp.pre_send(&mut proto, flags)?;
        self.outbox.send_frame(proto, payload)?;
        self.mrp = mrp;

        Ok(())
    }
}

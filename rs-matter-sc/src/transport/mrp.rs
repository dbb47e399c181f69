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

use bitflags::bitflags;
use log::{debug, error, trace, warn};

use crate::error::{Error, ErrorCode};
use crate::sc::{OpCode, SessionParameters, PROTO_ID_SECURE_CHANNEL};
use crate::utils::epoch::Epoch;

use super::exchange::{MessageSender, SendFlags};
use super::proto_hdr::ProtoHdr;

const MRP_MAX_TRANSMISSIONS: usize = 10;
const MRP_BACKOFF_THRESHOLD: usize = 3;
const MRP_BACKOFF_BASE: (u64, u64) = (16, 10); // 1.6
const MRP_STANDALONE_ACK_TIMEOUT_MS: u64 = 200;

bitflags! {
    #[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct MrpFlags: u16 {
        /// This side initiated the exchange.
        const INITIATOR = 0x0001;
        const RESPONSE_EXPECTED = 0x0002;
        /// Outbound messages request an acknowledgment.
        const AUTO_REQUEST_ACK = 0x0004;
        const WAITING_FOR_ACK = 0x0008;
        /// An acknowledgment is owed to the peer.
        const ACK_PENDING = 0x0010;
        /// `pending_peer_ack_ctr` holds a counter.
        const ACK_COUNTER_VALID = 0x0020;
        const WILL_SEND = 0x0040;
        const CLOSED = 0x0080;
        const EPHEMERAL = 0x0100;
        const IGNORE_SESSION_RELEASE = 0x0200;
        const RECEIVED_AT_LEAST_ONE_MESSAGE = 0x0400;
        const WAITING_FOR_RESPONSE_OR_ACK = 0x0800;
    }
}

bitflags! {
    /// Properties of a received message the session layer has detected.
    #[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct RxFlags: u8 {
        const DUPLICATE = 0x01;
    }
}

/// Retransmission timing of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrpConfig {
    pub idle_retrans_ms: u64,
    pub active_retrans_ms: u64,
    pub active_threshold_ms: u64,
    pub max_transmissions: usize,
    pub backoff_threshold: usize,
    pub standalone_ack_timeout_ms: u64,
}

impl MrpConfig {
    pub const fn new() -> Self {
        Self {
            idle_retrans_ms: SessionParameters::DEFAULT_IDLE_INTERVAL_MS as u64,
            active_retrans_ms: SessionParameters::DEFAULT_ACTIVE_INTERVAL_MS as u64,
            active_threshold_ms: SessionParameters::DEFAULT_ACTIVE_THRESHOLD_MS as u64,
            max_transmissions: MRP_MAX_TRANSMISSIONS,
            backoff_threshold: MRP_BACKOFF_THRESHOLD,
            standalone_ack_timeout_ms: MRP_STANDALONE_ACK_TIMEOUT_MS,
        }
    }

    /// The timing to use towards a peer that advertised `params`.
    pub fn from_params(params: &SessionParameters) -> Self {
        Self {
            idle_retrans_ms: params.idle_interval_ms() as u64,
            active_retrans_ms: params.active_interval_ms() as u64,
            active_threshold_ms: params.active_threshold_ms() as u64,
            ..Self::new()
        }
    }

    /// Delay before transmission number `attempt + 1` of a message, where
    /// `attempt` transmissions have already happened. `None` once the
    /// message has been sent `max_transmissions` times.
    pub fn retrans_delay(&self, attempt: usize, peer_active: bool) -> Option<u64> {
        if attempt >= self.max_transmissions {
            return None;
        }

        let mut delay = if peer_active {
            self.active_retrans_ms
        } else {
            self.idle_retrans_ms
        };

        if attempt > self.backoff_threshold {
            for _ in 0..attempt - self.backoff_threshold {
                delay = delay * MRP_BACKOFF_BASE.0 / MRP_BACKOFF_BASE.1;
            }
        }

        Some(delay)
    }
}

impl Default for MrpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Acknowledgment bookkeeping of one exchange.
///
/// Only the obligations are tracked here. Retransmission timers and queues
/// belong to whoever drives the exchange, which uses `retrans_delay_ms` and
/// `record_retransmission` to pace itself.
#[derive(Clone)]
pub struct ReliableMessageContext {
    flags: MrpFlags,
    pending_peer_ack_ctr: u32,
    next_ack_time_ms: Option<u64>,
    retrans_ctr: Option<u32>,
    transmissions: usize,
    config: MrpConfig,
    epoch: Epoch,
}

impl ReliableMessageContext {
    pub fn new(initiator: bool, config: MrpConfig, epoch: Epoch) -> Self {
        let mut flags = MrpFlags::AUTO_REQUEST_ACK;
        flags.set(MrpFlags::INITIATOR, initiator);

        Self {
            flags,
            pending_peer_ack_ctr: 0,
            next_ack_time_ms: None,
            retrans_ctr: None,
            transmissions: 0,
            config,
            epoch,
        }
    }

    pub fn flags(&self) -> MrpFlags {
        self.flags
    }

    pub fn config(&self) -> &MrpConfig {
        &self.config
    }

    pub fn is_initiator(&self) -> bool {
        self.flags.contains(MrpFlags::INITIATOR)
    }

    pub fn is_closed(&self) -> bool {
        self.flags.contains(MrpFlags::CLOSED)
    }

    pub fn is_ack_pending(&self) -> bool {
        self.flags.contains(MrpFlags::ACK_PENDING)
    }

    pub fn is_waiting_for_ack(&self) -> bool {
        self.flags.contains(MrpFlags::WAITING_FOR_ACK)
    }

    pub fn is_response_expected(&self) -> bool {
        self.flags.contains(MrpFlags::RESPONSE_EXPECTED)
    }

    pub fn set_auto_request_ack(&mut self, auto_request: bool) {
        self.flags.set(MrpFlags::AUTO_REQUEST_ACK, auto_request);
    }

    pub fn auto_request_ack(&self) -> bool {
        self.flags.contains(MrpFlags::AUTO_REQUEST_ACK)
    }

    pub fn set_ephemeral(&mut self, ephemeral: bool) {
        self.flags.set(MrpFlags::EPHEMERAL, ephemeral);
    }

    pub fn set_ignore_session_release(&mut self, ignore: bool) {
        self.flags.set(MrpFlags::IGNORE_SESSION_RELEASE, ignore);
    }

    pub fn set_will_send(&mut self, will_send: bool) {
        self.flags.set(MrpFlags::WILL_SEND, will_send);
    }

    /// True when an acknowledgment is owed and may ride on the next message.
    pub fn has_piggyback_ack_pending(&self) -> bool {
        self.flags
            .contains(MrpFlags::ACK_COUNTER_VALID | MrpFlags::ACK_PENDING)
    }

    /// Hands out the owed acknowledgment counter exactly once.
    pub fn take_pending_peer_ack_message_counter(&mut self) -> Result<u32, Error> {
        if !self.has_piggyback_ack_pending() {
            error!("No acknowledgment is pending");
            Err(ErrorCode::PreconditionViolation)?;
        }

        self.flags.remove(MrpFlags::ACK_PENDING);
        self.next_ack_time_ms = None;

        Ok(self.pending_peer_ack_ctr)
    }

    fn set_pending_peer_ack_message_counter(&mut self, ctr: u32) {
        self.pending_peer_ack_ctr = ctr;
        self.flags
            .insert(MrpFlags::ACK_COUNTER_VALID | MrpFlags::ACK_PENDING);
    }

    fn standalone_ack_hdr(&self, exch_id: u16, ctr: u32) -> ProtoHdr {
        let mut proto = ProtoHdr::new(
            exch_id,
            PROTO_ID_SECURE_CHANNEL,
            OpCode::MRPStandAloneAck as u8,
        );
        proto.set_initiator(self.is_initiator());
        proto.set_ack(Some(ctr));
        // An acknowledgment is never acknowledged
        proto.set_reliable(false);

        proto
    }

    /// Sends the owed acknowledgment as a message of its own.
    ///
    /// The obligation is kept when the message cannot be handed to `sink`.
    pub fn send_standalone_ack<S>(&mut self, exch_id: u16, sink: &mut S) -> Result<(), Error>
    where
        S: MessageSender + ?Sized,
    {
        let next_ack_time_ms = self.next_ack_time_ms;
        let ctr = self.take_pending_peer_ack_message_counter()?;

        if let Err(err) = sink.send_frame(self.standalone_ack_hdr(exch_id, ctr), &[]) {
            self.flags.insert(MrpFlags::ACK_PENDING);
            self.next_ack_time_ms = next_ack_time_ms;
            return Err(err);
        }

        trace!("Sent standalone ack for {:x}", ctr);

        Ok(())
    }

    /// Records that the received message `ctr` asked for an acknowledgment.
    ///
    /// A duplicate is acknowledged right away, since the peer evidently
    /// missed the earlier acknowledgment. A new counter replacing a different
    /// owed one flushes the old one first. Buffer exhaustion while flushing
    /// is logged and otherwise ignored.
    pub fn handle_needs_ack<S>(
        &mut self,
        exch_id: u16,
        ctr: u32,
        rx_flags: RxFlags,
        sink: &mut S,
    ) -> Result<(), Error>
    where
        S: MessageSender + ?Sized,
    {
        if rx_flags.contains(RxFlags::DUPLICATE) {
            debug!("Duplicate message {:x}, acknowledging immediately", ctr);

            let res = if self.has_piggyback_ack_pending() && self.pending_peer_ack_ctr == ctr {
                self.send_standalone_ack(exch_id, sink)
            } else {
                sink.send_frame(self.standalone_ack_hdr(exch_id, ctr), &[])
            };

            return soft_ack_failure(res);
        }

        if self.has_piggyback_ack_pending() {
            if self.pending_peer_ack_ctr == ctr {
                return Ok(());
            }

            soft_ack_failure(self.send_standalone_ack(exch_id, sink))?;
        }

        self.set_pending_peer_ack_message_counter(ctr);
        self.next_ack_time_ms = Some(self.now_ms() + self.config.standalone_ack_timeout_ms);

        Ok(())
    }

    /// True once an owed acknowledgment has waited the standalone ack timeout
    /// without a message to ride on.
    pub fn is_ack_due(&self) -> bool {
        self.has_piggyback_ack_pending()
            && self
                .next_ack_time_ms
                .map(|at| at <= self.now_ms())
                .unwrap_or(true)
    }

    /// Flushes the owed acknowledgment when it is due.
    pub fn on_ack_timeout<S>(&mut self, exch_id: u16, sink: &mut S) -> Result<(), Error>
    where
        S: MessageSender + ?Sized,
    {
        if self.is_ack_due() {
            soft_ack_failure(self.send_standalone_ack(exch_id, sink))
        } else {
            Ok(())
        }
    }

    /// Stamps an outbound exchange header: role, piggybacked acknowledgment
    /// and the acknowledgment request.
    pub fn pre_send(&mut self, proto: &mut ProtoHdr, send_flags: SendFlags) -> Result<(), Error> {
        if self.is_closed() {
            error!("Exchange {} is closed, refusing to send", proto.exch_id);
            Err(ErrorCode::IncorrectState)?;
        }

        proto.set_initiator(self.is_initiator());

        if self.has_piggyback_ack_pending() {
            proto.set_ack(Some(self.take_pending_peer_ack_message_counter()?));
        }

        let reliable = proto.is_reliable()
            && self.auto_request_ack()
            && !send_flags.contains(SendFlags::NO_AUTO_REQUEST_ACK);
        proto.set_reliable(reliable);

        if reliable {
            self.set_waiting_for_ack(true);
        }

        if send_flags.contains(SendFlags::EXPECT_RESPONSE) {
            self.flags.insert(MrpFlags::RESPONSE_EXPECTED);
        }

        if self.flags.intersects(MrpFlags::WAITING_FOR_ACK | MrpFlags::RESPONSE_EXPECTED) {
            self.flags.insert(MrpFlags::WAITING_FOR_RESPONSE_OR_ACK);
        }

        self.flags.remove(MrpFlags::WILL_SEND);

        Ok(())
    }

    /// Called once the message stamped by `pre_send` got its counter.
    pub fn on_message_sent(&mut self, proto: &ProtoHdr, ctr: u32) {
        if proto.is_reliable() {
            self.retrans_ctr = Some(ctr);
            self.transmissions = 1;
        }
    }

    /// Counts a retransmission of the message awaiting acknowledgment.
    /// Fails with `Timeout` once the peer has been given up on.
    pub fn record_retransmission(&mut self) -> Result<(), Error> {
        if self.retrans_ctr.is_none() {
            Err(ErrorCode::PreconditionViolation)?;
        }

        if self.transmissions >= self.config.max_transmissions {
            error!("Too many retransmissions. Giving up");

            self.retrans_ctr = None;
            self.set_waiting_for_ack(false);
            Err(ErrorCode::Timeout)?;
        }

        self.transmissions += 1;

        Ok(())
    }

    /// Delay before the next retransmission, if a message awaits an ack.
    pub fn retrans_delay_ms(&self, peer_active: bool) -> Option<u64> {
        self.retrans_ctr?;
        self.config.retrans_delay(self.transmissions, peer_active)
    }

    /// Matches an acknowledgment from the peer against the message
    /// awaiting one. Returns `false` for a stale or unknown counter.
    pub fn handle_rcvd_ack(&mut self, ack_ctr: u32) -> bool {
        match self.retrans_ctr {
            Some(ctr) if ctr == ack_ctr => {
                self.retrans_ctr = None;
                self.transmissions = 0;
                self.set_waiting_for_ack(false);

                true
            }
            Some(ctr) => {
                warn!(
                    "Mismatch in retrans msg counter and received ack: received {:x}, expected {:x}",
                    ack_ctr, ctr
                );
                false
            }
            None => {
                debug!("Ack {:x} with nothing awaiting it", ack_ctr);
                false
            }
        }
    }

    /// Notes the receipt of a message on the exchange.
    pub fn on_message_received(&mut self) {
        self.flags.insert(MrpFlags::RECEIVED_AT_LEAST_ONE_MESSAGE);

        if self.is_response_expected() {
            self.flags.remove(MrpFlags::RESPONSE_EXPECTED);
            self.update_waiting_for_response_or_ack();
        }
    }

    pub fn set_waiting_for_ack(&mut self, waiting: bool) {
        if waiting && self.is_closed() {
            debug_assert!(false, "Waiting for an ack on a closed exchange");
            return;
        }

        self.flags.set(MrpFlags::WAITING_FOR_ACK, waiting);
        self.update_waiting_for_response_or_ack();
    }

    /// No further sends are possible after this.
    pub fn close(&mut self) {
        self.flags.insert(MrpFlags::CLOSED);
        self.flags
            .remove(MrpFlags::WILL_SEND | MrpFlags::RESPONSE_EXPECTED);
        self.update_waiting_for_response_or_ack();
    }

    fn update_waiting_for_response_or_ack(&mut self) {
        let waiting = self
            .flags
            .intersects(MrpFlags::WAITING_FOR_ACK | MrpFlags::RESPONSE_EXPECTED);
        self.flags.set(MrpFlags::WAITING_FOR_RESPONSE_OR_ACK, waiting);
    }

    fn now_ms(&self) -> u64 {
        (self.epoch)().as_millis() as u64
    }
}

fn soft_ack_failure(res: Result<(), Error>) -> Result<(), Error> {
    match res {
        Err(err) if err.is_resource_exhausted() => {
            warn!("No buffer for a standalone ack, will retry: {}", err);
            Ok(())
        }
        res => res,
    }
}

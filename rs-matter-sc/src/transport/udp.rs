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

//! The UDP binding of the secure transport.

use core::ops::Deref;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_io::Async;
use log::{debug, error, info, warn};

use crate::error::{Error, ErrorCode};

use super::exchange::Exchange;
use super::mrp::RxFlags;
use super::network::{NetworkReceive, NetworkSend, MATTER_PORT, MAX_TX_PACKET_SIZE};
use super::packet::Packet;
use super::session::SessionMgr;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportState {
    ReadyToConnect,
    Connected,
    Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressType {
    IPv4,
    IPv6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Port to listen on; 0 picks an ephemeral one.
    pub port: u16,
    /// Packets an exchange may queue before sends fail with
    /// `ResourceExhausted`.
    pub outbox_capacity: usize,
}

impl TransportConfig {
    pub const fn new() -> Self {
        Self {
            port: MATTER_PORT,
            outbox_capacity: 4,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A UDP endpoint that frames every message through its session.
pub struct SecureTransport {
    state: Mutex<TransportState>,
    socket: Mutex<Option<Arc<Async<UdpSocket>>>>,
    config: TransportConfig,
}

impl SecureTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            state: Mutex::new(TransportState::ReadyToConnect),
            socket: Mutex::new(None),
            config,
        }
    }

    pub fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Binds the endpoint and starts listening. Only valid once, from
    /// `ReadyToConnect`.
    pub fn connect(&self, addr_type: AddressType, iface: Option<IpAddr>) -> Result<(), Error> {
        let mut state = lock(&self.state);

        if *state != TransportState::ReadyToConnect {
            error!("Cannot connect a transport in state {:?}", *state);
            Err(ErrorCode::IncorrectState)?;
        }

        let ip = match (addr_type, iface) {
            (AddressType::IPv4, Some(ip @ IpAddr::V4(_))) => ip,
            (AddressType::IPv6, Some(ip @ IpAddr::V6(_))) => ip,
            (_, Some(ip)) => {
                error!("Interface {} does not match {:?}", ip, addr_type);
                Err(ErrorCode::TransportUnavailable)?
            }
            (AddressType::IPv4, None) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            (AddressType::IPv6, None) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };

        let socket = Async::<UdpSocket>::bind(SocketAddr::new(ip, self.config.port)).map_err(|e| {
            error!("Cannot bind UDP {}:{}: {}", ip, self.config.port, e);
            ErrorCode::TransportUnavailable
        })?;

        info!("Listening on {:?}", socket.get_ref().local_addr());

        *lock(&self.socket) = Some(Arc::new(socket));
        *state = TransportState::Connected;

        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket()?.get_ref().local_addr()?)
    }

    fn socket(&self) -> Result<Arc<Async<UdpSocket>>, Error> {
        if self.state() != TransportState::Connected {
            Err(ErrorCode::IncorrectState)?;
        }

        lock(&self.socket)
            .clone()
            .ok_or_else(|| ErrorCode::TransportUnavailable.into())
    }

    /// Frames `packet` on local session `sess_id` and sends it.
    ///
    /// Returns the message counter it went out with. A packet that cannot
    /// be framed is dropped and nothing reaches the wire.
    pub async fn send_message(
        &self,
        sessions: &mut SessionMgr,
        sess_id: u16,
        mut packet: Packet,
    ) -> Result<u32, Error> {
        let socket = self.socket()?;

        let ctr = sessions.encode(sess_id, &mut packet)?;

        let data = packet.buf.as_slice();
        if data.len() > MAX_TX_PACKET_SIZE {
            error!("Frame of {} bytes exceeds the path MTU", data.len());
            Err(ErrorCode::NoSpace)?;
        }

        NetworkSend::send_to(&mut &*socket, data, packet.peer).await?;

        debug!("Sent {} {} to {}", packet.plain, packet.proto, packet.peer);

        Ok(ctr)
    }

    /// Sends everything `exchange` has queued, recording the counters of
    /// reliable messages with its reliable messaging state.
    pub async fn flush(&self, sessions: &mut SessionMgr, exchange: &mut Exchange) -> Result<usize, Error> {
        let mut sent = 0;

        while let Some(packet) = exchange.take_outbound() {
            let proto = packet.proto.clone();

            let ctr = self.send_message(sessions, exchange.sess_id(), packet).await?;
            exchange.mrp_mut().on_message_sent(&proto, ctr);

            sent += 1;
        }

        Ok(sent)
    }

    /// Waits for the next datagram that decodes on one of `sessions`.
    /// Anything else is logged and dropped.
    pub async fn recv(&self, sessions: &mut SessionMgr) -> Result<(Packet, RxFlags), Error> {
        let socket = self.socket()?;

        loop {
            let mut packet = Packet::new_rx();

            let (len, peer) =
                NetworkReceive::recv_from(&mut &*socket, packet.buf.rx_space()).await?;
            packet.buf.set_rx_len(len)?;
            packet.peer = peer;

            match sessions.decode(&mut packet) {
                Ok(rx_flags) => break Ok((packet, rx_flags)),
                Err(e) => warn!("Dropping {} bytes from {}: {}", len, peer, e),
            }
        }
    }

    /// Stops listening. The transport cannot be connected again.
    pub fn close(&self) {
        let mut state = lock(&self.state);

        if *state != TransportState::Closed {
            lock(&self.socket).take();
            *state = TransportState::Closed;

            info!("Transport closed");
        }
    }
}

impl Drop for SecureTransport {
    fn drop(&mut self) {
        debug!("Transport released");
    }
}

/// Shared ownership of a `SecureTransport`.
///
/// Every handle holds one reference. `release` and `close` consume the
/// handle, so a reference can only be given up once, and the transport is
/// freed when the last handle goes.
pub struct TransportHandle(Arc<SecureTransport>);

impl TransportHandle {
    pub fn new(config: TransportConfig) -> Self {
        Self(Arc::new(SecureTransport::new(config)))
    }

    pub fn retain(&self) -> Self {
        Self(self.0.clone())
    }

    pub fn release(self) {
        if Arc::strong_count(&self.0) == 1 {
            debug!("Releasing the last transport reference");
        }
    }

    /// Closes the endpoint for every holder, then gives up this reference.
    pub fn close(self) {
        self.0.close();
        self.release();
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn downgrade(&self) -> Weak<SecureTransport> {
        Arc::downgrade(&self.0)
    }
}

impl Deref for TransportHandle {
    type Target = SecureTransport;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral() -> TransportConfig {
        TransportConfig {
            port: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_connect_once() {
        let transport = SecureTransport::new(ephemeral());

        transport
            .connect(AddressType::IPv4, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)))
            .unwrap();
        assert_eq!(transport.state(), TransportState::Connected);
        assert!(transport.local_addr().unwrap().port() != 0);

        assert_eq!(
            transport
                .connect(AddressType::IPv4, None)
                .unwrap_err()
                .code(),
            ErrorCode::IncorrectState
        );

        transport.close();
        assert_eq!(transport.state(), TransportState::Closed);
        assert_eq!(
            transport
                .connect(AddressType::IPv4, None)
                .unwrap_err()
                .code(),
            ErrorCode::IncorrectState
        );
        assert_eq!(
            transport.local_addr().unwrap_err().code(),
            ErrorCode::IncorrectState
        );
    }

    #[test]
    fn test_connect_mismatched_iface() {
        let transport = SecureTransport::new(ephemeral());

        assert_eq!(
            transport
                .connect(AddressType::IPv6, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)))
                .unwrap_err()
                .code(),
            ErrorCode::TransportUnavailable
        );
        assert_eq!(transport.state(), TransportState::ReadyToConnect);
    }

    #[test]
    fn test_freed_exactly_at_zero() {
        let handle = TransportHandle::new(ephemeral());
        let weak = handle.downgrade();

        let second = handle.retain();
        let third = second.retain();
        assert_eq!(handle.ref_count(), 3);

        second.release();
        assert_eq!(handle.ref_count(), 2);
        assert!(weak.upgrade().is_some());

        third.close();
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(handle.state(), TransportState::Closed);
        assert!(weak.upgrade().is_some());

        handle.release();
        assert!(weak.upgrade().is_none());
    }
}

#![deny(unreachable_pub)]
//! A minimal STUN binding responder for NAT traversal of managed CPEs.
//!
//! Some TR-069 device firmware ships a STUN variant that stamps the
//! product code `0x30313031` where the magic cookie belongs. Such packets
//! are rewritten to carry the real cookie before validation and the reply
//! is stamped back with the vendor cookie, tracked per packet rather than
//! as a server mode.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};

mod message;

use message::MAGIC_COOKIE;

/// Value some CPE firmware places in the magic-cookie field.
const VENDOR_COOKIE: u32 = 0x3031_3031;

const SOFTWARE: &str = "stund";

/// STUN keeps messages under typical MTUs; longer datagrams are truncated
/// at read and will fail the length check.
const READ_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum StunError {
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{network} does not match any address of {addr}")]
    NoUsableAddress { network: String, addr: String },
}

/// The binding responder. Bind it, then drive [`StunServer::run`] on a
/// spawned task; abort the task to shut down.
pub struct StunServer {
    socket: UdpSocket,
}

impl StunServer {
    /// Binds the listening socket. `network` selects the address family
    /// (`udp`, `udp4` or `udp6`) and `addr` is a `host:port` pair.
    pub async fn bind(network: &str, addr: &str) -> Result<Self, StunError> {
        let resolved = tokio::net::lookup_host(addr)
            .await?
            .find(|candidate| match network {
                "udp4" => candidate.is_ipv4(),
                "udp6" => candidate.is_ipv6(),
                _ => true,
            })
            .ok_or_else(|| StunError::NoUsableAddress {
                network: network.to_owned(),
                addr: addr.to_owned(),
            })?;

        let socket = UdpSocket::bind(resolved).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StunError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self) {
        debug!("stun responder running");
        let mut buf = [0u8; READ_BUFFER];

        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(error) => {
                    error!(%error, "recv_from");
                    continue;
                }
            };

            if let Some(response) = handle_packet(&mut buf[..n], peer) {
                if let Err(error) = self.socket.send_to(&response, peer).await {
                    warn!(%error, %peer, "send binding response");
                }
            }
        }
    }
}

fn handle_packet(packet: &mut [u8], peer: SocketAddr) -> Option<Vec<u8>> {
    let mut rewritten = false;
    if packet.len() >= 8 && packet[4..8] == VENDOR_COOKIE.to_be_bytes() {
        packet[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        rewritten = true;
    }

    if !message::is_message(packet) {
        return None;
    }

    debug!(%peer, rewritten, "binding request");

    let mut response = message::binding_success(message::transaction_id(packet), peer, SOFTWARE);
    if rewritten {
        response[4..8].copy_from_slice(&VENDOR_COOKIE.to_be_bytes());
    }
    Some(response)
}

#[cfg(test)]
mod test {
    use super::*;

    fn binding_request(cookie: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x0001u16.to_be_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&cookie.to_be_bytes());
        buf.extend_from_slice(&[5; 12]);
        buf
    }

    #[test]
    fn standard_cookie_round() {
        let mut packet = binding_request(MAGIC_COOKIE);
        let response = handle_packet(&mut packet, "192.0.2.1:5000".parse().unwrap()).unwrap();
        assert_eq!(&response[4..8], &MAGIC_COOKIE.to_be_bytes());
    }

    #[test]
    fn vendor_cookie_is_restored_on_the_reply() {
        let mut packet = binding_request(VENDOR_COOKIE);
        let response = handle_packet(&mut packet, "192.0.2.1:5000".parse().unwrap()).unwrap();
        assert_eq!(&response[4..8], &VENDOR_COOKIE.to_be_bytes());
    }

    #[test]
    fn non_stun_traffic_is_dropped() {
        let mut packet = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        assert!(handle_packet(&mut packet, "192.0.2.1:5000".parse().unwrap()).is_none());
    }

    #[tokio::test]
    async fn answers_over_the_wire() {
        let server = StunServer::bind("udp4", "127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&binding_request(MAGIC_COOKIE), server_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        let response = &buf[..n];

        assert_eq!(&response[..2], &[0x01, 0x01]);
        assert_eq!(&response[8..20], &[5; 12]);

        let client_port = client.local_addr().unwrap().port();
        let attrs = message::attributes(response);
        let (_, xor_mapped) = attrs
            .iter()
            .find(|(kind, _)| *kind == 0x0020)
            .expect("XOR-MAPPED-ADDRESS present");
        let port = u16::from_be_bytes([xor_mapped[2], xor_mapped[3]])
            ^ (MAGIC_COOKIE >> 16) as u16;
        assert_eq!(port, client_port);

        task.abort();
    }
}

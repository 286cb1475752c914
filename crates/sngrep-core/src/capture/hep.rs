//! HEP3 capture input: a UDP socket where each datagram is one
//! HEP-encapsulated packet (spec §4.8 "HEP socket").
//!
//! Grounded on `original_source/src/storage/packet/packet_hep.h`.

use tokio::net::UdpSocket;

use crate::error::{Error, Result};

pub struct HepSocketInput {
    socket: UdpSocket,
    bind_addr: String,
    paused: bool,
    datagrams_read: u64,
}

impl HepSocketInput {
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::HepBind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            socket,
            bind_addr: addr.to_string(),
            paused: false,
            datagrams_read: 0,
        })
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn datagrams_read(&self) -> u64 {
        self.datagrams_read
    }

    /// Read one datagram. Returns `None` while paused.
    pub async fn read_datagram(&mut self) -> Result<Option<Vec<u8>>> {
        if self.paused {
            return Ok(None);
        }
        let mut buf = vec![0u8; 65536];
        let (len, _src) = self.socket.recv_from(&mut buf).await.map_err(Error::Io)?;
        buf.truncate(len);
        self.datagrams_read += 1;
        Ok(Some(buf))
    }
}

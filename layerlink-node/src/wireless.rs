//! Wireless link: connectionless datagrams addressed by MAC, emulated over
//! UDP multicast. Every frame is `[src_mac(6)][payload]`; broadcast goes to
//! the group, unicast to the learned address of a registered peer.
//!
//! The receive loop posts into a bounded inbox and never touches protocol
//! state; the wireless task drains the inbox on its own cadence.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use layerlink_core::{Mac, BROADCAST_MAC};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Upper bound on learned MAC -> address entries; past it, frames are still
/// delivered but new sources stay unaddressable.
const MAX_LEARNED_ADDRS: usize = 64;

/// Largest frame we accept: header + the biggest protocol payload with slack.
const MAX_FRAME: usize = 6 + 128;

struct PeerMap {
    /// Peers registered through AddPeer; unicast targets must be in here.
    registered: HashSet<Mac>,
    /// Source addresses learned from inbound frames.
    addrs: HashMap<Mac, SocketAddr>,
}

pub struct WirelessDriver {
    socket: Arc<UdpSocket>,
    group: SocketAddr,
    mac: Mac,
    peers: Arc<Mutex<PeerMap>>,
}

impl WirelessDriver {
    pub async fn bind(group: &str, port: u16, mac: Mac) -> std::io::Result<Self> {
        let multicast: Ipv4Addr = group.parse().map_err(|e: std::net::AddrParseError| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        })?;
        let std_sock = std::net::UdpSocket::bind(("0.0.0.0", port))?;
        std_sock.join_multicast_v4(&multicast, &Ipv4Addr::UNSPECIFIED)?;
        std_sock.set_multicast_ttl_v4(1)?;
        std_sock.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_sock)?;
        log::info!("wireless link on {multicast}:{port} as {mac}");
        Ok(Self {
            socket: Arc::new(socket),
            group: SocketAddr::new(multicast.into(), port),
            mac,
            peers: Arc::new(Mutex::new(PeerMap {
                registered: HashSet::new(),
                addrs: HashMap::new(),
            })),
        })
    }

    pub fn mac(&self) -> Mac {
        self.mac
    }

    /// Receive loop: strips the source MAC, learns its address, and posts the
    /// payload into `inbox`. Drops on overflow; the protocol tolerates loss.
    pub async fn run_rx(&self, inbox: mpsc::Sender<(Mac, Vec<u8>)>) -> std::io::Result<()> {
        let mut buf = vec![0u8; MAX_FRAME];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            if n < 7 {
                continue;
            }
            let mut src = [0u8; 6];
            src.copy_from_slice(&buf[..6]);
            let src = Mac(src);
            if src == self.mac {
                continue; // our own multicast loopback
            }
            {
                let mut peers = self.peers.lock().await;
                if peers.addrs.len() < MAX_LEARNED_ADDRS || peers.addrs.contains_key(&src) {
                    peers.addrs.insert(src, from);
                }
            }
            if let Err(mpsc::error::TrySendError::Full(_)) =
                inbox.try_send((src, buf[6..n].to_vec()))
            {
                log::debug!("wireless inbox full, dropping frame from {src}");
            }
        }
    }

    /// Unicast to a registered peer, or broadcast to the group.
    pub async fn send_to(&self, dest: Mac, payload: &[u8]) -> std::io::Result<()> {
        let target = if dest.is_broadcast() {
            self.group
        } else {
            let peers = self.peers.lock().await;
            if !peers.registered.contains(&dest) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    format!("peer {dest} not registered"),
                ));
            }
            match peers.addrs.get(&dest) {
                Some(addr) => *addr,
                None => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::AddrNotAvailable,
                        format!("no learned address for {dest}"),
                    ));
                }
            }
        };
        let mut frame = Vec::with_capacity(6 + payload.len());
        frame.extend_from_slice(self.mac.as_bytes());
        frame.extend_from_slice(payload);
        self.socket.send_to(&frame, target).await?;
        Ok(())
    }

    pub async fn broadcast(&self, payload: &[u8]) -> std::io::Result<()> {
        self.send_to(BROADCAST_MAC, payload).await
    }

    /// Idempotent.
    pub async fn add_peer(&self, mac: Mac) {
        let mut peers = self.peers.lock().await;
        if peers.registered.insert(mac) {
            log::debug!("driver peer added: {mac}");
        }
    }

    pub async fn remove_peer(&self, mac: Mac) {
        let mut peers = self.peers.lock().await;
        peers.registered.remove(&mac);
        peers.addrs.remove(&mac);
        log::debug!("driver peer removed: {mac}");
    }
}

/// Node name used for the MIDI ports, derived from the low three octets of
/// the MAC.
pub fn node_name(mac: Mac) -> String {
    let m = mac.as_bytes();
    format!("layerlink-{:02X}{:02X}{:02X}", m[3], m[4], m[5])
}

/// Parse `AA:BB:CC:DD:EE:FF`; `None` keeps a random locally-administered MAC.
pub fn parse_or_random_mac(configured: Option<&str>) -> Result<Mac, String> {
    match configured {
        Some(text) => {
            let parts: Vec<&str> = text.split(':').collect();
            if parts.len() != 6 {
                return Err(format!("bad MAC '{text}': expected six hex octets"));
            }
            let mut mac = [0u8; 6];
            for (i, part) in parts.iter().enumerate() {
                mac[i] = u8::from_str_radix(part, 16)
                    .map_err(|_| format!("bad MAC octet '{part}'"))?;
            }
            Ok(Mac(mac))
        }
        None => {
            let mut mac: [u8; 6] = rand::random();
            // Locally administered, unicast.
            mac[0] = (mac[0] | 0x02) & 0xFE;
            Ok(Mac(mac))
        }
    }
}

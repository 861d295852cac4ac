use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use tracing::{info, warn};

pub const MAGIC_PACKET_LEN: usize = 102;

#[derive(Debug, thiserror::Error)]
pub enum WakeError {
    #[error("invalid MAC address: {0}")]
    InvalidAddress(String),
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Fire-and-forget wake sender. Success only means the packet left the host.
pub trait WakeSignaler: Send + Sync {
    fn send_wake(&self, mac: &str, target_ip: &str) -> Result<(), WakeError>;
}

/// Accepts `aa:bb:..`, `AA-BB-..` or bare hex; anything that does not clean
/// up to exactly 12 hex digits is rejected.
pub fn parse_mac(mac: &str) -> Result<[u8; 6], WakeError> {
    let hex: String = mac.chars().filter(|c| *c != ':' && *c != '-').collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WakeError::InvalidAddress(mac.to_string()));
    }
    let mut out = [0u8; 6];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| WakeError::InvalidAddress(mac.to_string()))?;
    }
    Ok(out)
}

pub fn magic_packet(mac: [u8; 6]) -> [u8; MAGIC_PACKET_LEN] {
    let mut pkt = [0u8; MAGIC_PACKET_LEN];
    // 6 x 0xFF
    pkt[..6].fill(0xFF);
    // 16 x MAC
    for i in 0..16 {
        let base = 6 + i * 6;
        pkt[base..base + 6].copy_from_slice(&mac);
    }
    pkt
}

/// `a.b.c.d` -> `a.b.c.255`, anything unparsable -> `255.255.255.255`.
pub fn subnet_broadcast(ip: &str) -> Ipv4Addr {
    match ip.trim().parse::<Ipv4Addr>() {
        Ok(addr) => {
            let [a, b, c, _] = addr.octets();
            Ipv4Addr::new(a, b, c, 255)
        }
        Err(_) => Ipv4Addr::BROADCAST,
    }
}

/// Subnet broadcast first, then the global one, without duplicates.
pub fn broadcast_targets(ip: &str) -> Vec<Ipv4Addr> {
    let subnet = subnet_broadcast(ip);
    if subnet == Ipv4Addr::BROADCAST {
        vec![subnet]
    } else {
        vec![subnet, Ipv4Addr::BROADCAST]
    }
}

pub struct UdpWakeSignaler {
    port: u16,
}

impl UdpWakeSignaler {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl WakeSignaler for UdpWakeSignaler {
    fn send_wake(&self, mac: &str, target_ip: &str) -> Result<(), WakeError> {
        let pkt = magic_packet(parse_mac(mac)?);

        let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        sock.set_broadcast(true)?;

        for bcast in broadcast_targets(target_ip) {
            let addr = SocketAddrV4::new(bcast, self.port);
            match sock.send_to(&pkt, addr) {
                Ok(_) => info!("sent WoL packet for {mac} to {addr}"),
                Err(e) => warn!("WoL send error to {addr}: {e}"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mac_accepts_common_forms() {
        let expected = [0x2c, 0xf0, 0x5d, 0x75, 0xbc, 0xb6];
        assert_eq!(parse_mac("2c:f0:5d:75:bc:b6").unwrap(), expected);
        assert_eq!(parse_mac("2C-F0-5D-75-BC-B6").unwrap(), expected);
        assert_eq!(parse_mac("2cf05d75bcb6").unwrap(), expected);
    }

    #[test]
    fn parse_mac_rejects_wrong_length_or_digits() {
        for bad in ["", "2c:f0:5d:75:bc", "2c:f0:5d:75:bc:b6:00", "zz:f0:5d:75:bc:b6", "2c.f0.5d.75.bc.b6"] {
            assert!(matches!(parse_mac(bad), Err(WakeError::InvalidAddress(_))), "{bad}");
        }
    }

    #[test]
    fn magic_packet_layout() {
        let mac = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
        let pkt = magic_packet(mac);
        assert_eq!(pkt.len(), 102);
        assert!(pkt[..6].iter().all(|b| *b == 0xFF));
        for chunk in pkt[6..].chunks(6) {
            assert_eq!(chunk, mac);
        }
    }

    #[test]
    fn broadcast_is_derived_from_last_octet() {
        assert_eq!(subnet_broadcast("172.26.1.31"), Ipv4Addr::new(172, 26, 1, 255));
        assert_eq!(subnet_broadcast("10.0.0.1"), Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(subnet_broadcast("not-an-ip"), Ipv4Addr::BROADCAST);
        assert_eq!(subnet_broadcast("300.1.1.1"), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn broadcast_targets_are_deduplicated() {
        assert_eq!(
            broadcast_targets("192.168.1.5"),
            vec![Ipv4Addr::new(192, 168, 1, 255), Ipv4Addr::BROADCAST]
        );
        assert_eq!(broadcast_targets("garbage"), vec![Ipv4Addr::BROADCAST]);
        assert_eq!(broadcast_targets("255.255.255.7"), vec![Ipv4Addr::BROADCAST]);
    }

    #[test]
    fn invalid_mac_fails_before_any_socket_work() {
        let signaler = UdpWakeSignaler::new(9);
        assert!(matches!(
            signaler.send_wake("not-a-mac", "192.168.1.5"),
            Err(WakeError::InvalidAddress(_))
        ));
    }
}

//! Discovery beacon
//!
//! Periodically broadcasts a small XML document over UDP so clients on the
//! LAN can find the gateway and the buses it exports:
//!
//! ```text
//! <CANBeacon name="bench-pc" type="SocketCAN" description="cangate">
//!   <URL>can://192.168.1.10:28600</URL>
//!   <Bus name="can0"/>
//! </CANBeacon>
//! ```
//! (sent on a single line)

use std::ffi::CStr;
use std::fmt::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;

use crate::config::BeaconConfig;
use crate::registry::BusRegistry;

pub struct BeaconService {
    payload: String,
    target: SocketAddr,
    interval: Duration,
}

impl BeaconService {
    pub fn new(config: &BeaconConfig, advertised: SocketAddr, registry: &BusRegistry) -> Self {
        let payload = beacon_payload(&hostname(), &config.description, advertised, registry);
        Self {
            payload,
            target: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, config.port)),
            interval: config.interval(),
        }
    }

    /// Send somewhere other than the limited broadcast address
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Broadcast forever; send failures are retried on the next tick
    pub async fn run(self) -> std::io::Result<()> {
        let socket = broadcast_socket()?;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(target_addr = %self.target, "Beacon started");
        loop {
            ticker.tick().await;
            match socket.send_to(self.payload.as_bytes(), self.target).await {
                Ok(_) => tracing::trace!("Beacon sent"),
                Err(e) => tracing::warn!(error = %e, "Beacon send failed"),
            }
        }
    }
}

fn broadcast_socket() -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
    UdpSocket::from_std(socket.into())
}

/// Build the beacon document
pub fn beacon_payload(
    host: &str,
    description: &str,
    advertised: SocketAddr,
    registry: &BusRegistry,
) -> String {
    let mut out = String::with_capacity(128);
    // Writing into a String cannot fail
    let _ = write!(
        out,
        "<CANBeacon name=\"{}\" type=\"SocketCAN\" description=\"{}\">",
        xml_escape(host),
        xml_escape(description)
    );
    let _ = write!(out, "<URL>can://{}</URL>", advertised);
    for bus in registry.iter() {
        let _ = write!(out, "<Bus name=\"{}\"/>", xml_escape(bus));
    }
    out.push_str("</CANBeacon>");
    out
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

fn hostname() -> String {
    let mut buf = [0 as libc::c_char; 256];
    // SAFETY: buf is valid for buf.len() bytes; the last byte stays NUL
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len() - 1) };
    if rc != 0 {
        return "localhost".to_string();
    }
    // SAFETY: buf is NUL-terminated
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    name.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_lists_every_bus() {
        let registry = BusRegistry::new(["can0", "vcan0"]);
        let payload = beacon_payload(
            "bench",
            "lab",
            "192.168.1.10:28600".parse().unwrap(),
            &registry,
        );
        assert_eq!(
            payload,
            "<CANBeacon name=\"bench\" type=\"SocketCAN\" description=\"lab\">\
             <URL>can://192.168.1.10:28600</URL>\
             <Bus name=\"can0\"/><Bus name=\"vcan0\"/></CANBeacon>"
        );
    }

    #[test]
    fn test_payload_escapes_description() {
        let payload = beacon_payload(
            "h",
            "a<b & \"c\"",
            "127.0.0.1:1".parse().unwrap(),
            &BusRegistry::default(),
        );
        assert!(payload.contains("description=\"a&lt;b &amp; &quot;c&quot;\""));
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!hostname().is_empty());
    }

    #[tokio::test]
    async fn test_beacon_reaches_listener() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = BeaconConfig {
            interval_ms: 10,
            ..Default::default()
        };
        let beacon = BeaconService::new(
            &config,
            "127.0.0.1:28600".parse().unwrap(),
            &BusRegistry::new(["vcan0"]),
        )
        .with_target(receiver.local_addr().unwrap());
        let expected = beacon.payload().to_string();
        let task = tokio::spawn(beacon.run());

        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::str::from_utf8(&buf[..n]).unwrap(), expected);
        task.abort();
    }
}

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use bstr::BStr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::constants::{NTS_ALIVE, NTS_BYEBYE, SSDP_DISCOVER, SSDP_ST_ALL, UPNP_ROOT_DEVICE};
use crate::device::Device;
use crate::packet::{SsdpHeaders, SsdpPacket};

pub const SSDP_PORT: u16 = 1900;
const SSDP_MCAST_IPV4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_MCAST_IPV6_LINK_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);
const SSDP_MCAST_IPV6_SITE_LOCAL: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xc);

pub(crate) const NOTIFY_INTERVAL: Duration = Duration::from_secs(30);

const MSEARCH_START_LINE: &str = "M-SEARCH * HTTP/1.1";
const NOTIFY_START_LINE: &str = "NOTIFY * HTTP/1.1";

fn ipv6_is_link_local(ip: Ipv6Addr) -> bool {
    const LL: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0);
    const MASK: Ipv6Addr = Ipv6Addr::new(0xffff, 0xffff, 0xffff, 0xffff, 0, 0, 0, 0);

    ip.to_bits() & MASK.to_bits() == LL.to_bits() & MASK.to_bits()
}

/// The multicast group datagrams are sent to when the caller does not pick
/// one: 239.255.255.250 for IPv4 sources, FF02::C / FF05::C for IPv6.
pub fn default_target(source: SocketAddr) -> SocketAddr {
    match source {
        SocketAddr::V4(_) => SocketAddr::V4(SocketAddrV4::new(SSDP_MCAST_IPV4, SSDP_PORT)),
        SocketAddr::V6(v6) => {
            let group = if ipv6_is_link_local(*v6.ip()) {
                SSDP_MCAST_IPV6_LINK_LOCAL
            } else {
                SSDP_MCAST_IPV6_SITE_LOCAL
            };
            SocketAddr::V6(SocketAddrV6::new(group, SSDP_PORT, 0, v6.scope_id()))
        }
    }
}

/// The multicast socket shared by the search responder and the announcer.
pub(crate) struct SsdpSocket {
    #[allow(dead_code)]
    sock2: socket2::Socket,
    tokio: tokio::net::UdpSocket,
}

impl SsdpSocket {
    /// Bind to the SSDP port for the source's family and join the group on
    /// the source interface.
    pub(crate) fn bind(source: SocketAddr, target: SocketAddr) -> anyhow::Result<Self> {
        let bind_addr: SocketAddr = match source {
            SocketAddr::V4(_) => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT).into(),
            SocketAddr::V6(v6) => {
                SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, SSDP_PORT, 0, v6.scope_id()).into()
            }
        };

        let domain = if bind_addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let sock = socket2::Socket::new(domain, socket2::Type::DGRAM, None)
            .context(bind_addr)
            .context("error creating socket")?;
        #[cfg(not(target_os = "windows"))]
        sock.set_reuse_port(true)
            .context("error setting SO_REUSEPORT")?;
        sock.set_reuse_address(true)
            .context("error setting SO_REUSEADDR")?;

        trace!(addr=?bind_addr, "binding UDP");
        sock.bind(&bind_addr.into())
            .context(bind_addr)
            .context("error binding")?;
        sock.set_nonblocking(true)?;

        let sock_clone = sock.try_clone().context("can't clone socket")?;
        let tokio_socket = tokio::net::UdpSocket::from_std(sock_clone.into())
            .context("error converting socket2 socket to tokio")?;

        match (source, target) {
            (SocketAddr::V4(source), SocketAddr::V4(target)) => {
                tokio_socket
                    .join_multicast_v4(*target.ip(), *source.ip())
                    .context("error joining multicast v4 group")?;
                sock.set_multicast_if_v4(source.ip())
                    .context("error calling set_multicast_if_v4")?;
            }
            (SocketAddr::V6(source), SocketAddr::V6(target)) => {
                tokio_socket
                    .join_multicast_v6(target.ip(), source.scope_id())
                    .context("error joining multicast v6 group")?;
                sock.set_multicast_if_v6(source.scope_id())
                    .context("error calling set_multicast_if_v6")?;
            }
            _ => bail!("source {source} and target {target} families differ"),
        }

        Ok(Self {
            sock2: sock,
            tokio: tokio_socket,
        })
    }

    pub(crate) async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.tokio.recv_from(buf).await
    }

    pub(crate) async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> std::io::Result<usize> {
        self.tokio.send_to(buf, addr).await
    }
}

fn build_search_response(st: &str, usn: &str, server: &str, location: &str) -> SsdpPacket {
    let headers: SsdpHeaders = [
        ("CACHE-CONTROL", "max-age=150"),
        ("SERVER", server),
        ("ST", st),
        ("USN", usn),
        ("EXT", ""),
        ("LOCATION", location),
    ]
    .into_iter()
    .collect();
    SsdpPacket::new("HTTP/1.1 200 OK", headers)
}

/// Answers `M-SEARCH` probes for the device tree. One datagram is processed
/// to completion before the next is read.
pub(crate) struct SsdpSearchResponder {
    device: Arc<Device>,
    socket: Arc<SsdpSocket>,
    server_string: String,
}

impl SsdpSearchResponder {
    pub(crate) fn new(device: Arc<Device>, socket: Arc<SsdpSocket>, server_string: String) -> Self {
        Self {
            device,
            socket,
            server_string,
        }
    }

    pub(crate) async fn run(&self, shutdown: CancellationToken) {
        debug!("start listening for search requests");
        let mut buf = vec![0u8; 16184];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("stop listening for search requests");
                    return;
                }
                res = self.socket.recv_from(&mut buf) => {
                    let (sz, addr) = match res {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error=?e, "error receiving");
                            return;
                        }
                    };
                    if let Err(e) = self.process_datagram(&buf[..sz], addr).await {
                        warn!(?addr, "error processing incoming SSDP message: {e:#}");
                    }
                }
            }
        }
    }

    async fn process_datagram(&self, msg: &[u8], addr: SocketAddr) -> anyhow::Result<()> {
        trace!(content = ?BStr::new(msg), ?addr, "received message");
        let packet = match SsdpPacket::parse(msg) {
            Ok(packet) => packet,
            Err(e) => {
                // Malformed datagrams are dropped, not answered.
                debug!("error parsing SSDP message: {e:#}");
                return Ok(());
            }
        };

        if packet.start_line != MSEARCH_START_LINE
            || packet.headers.get("MAN") != Some(SSDP_DISCOVER)
        {
            trace!("not a discover request, ignoring");
            return Ok(());
        }
        let st = match packet.headers.get("ST") {
            Some(st) => st,
            None => {
                trace!("M-SEARCH without ST, ignoring");
                return Ok(());
            }
        };
        debug!(?addr, st, "received M-SEARCH");

        for (st, usn) in search_responses(&self.device, st) {
            let response =
                build_search_response(&st, &usn, &self.server_string, &self.device.location());
            trace!(%st, %usn, ?addr, "sending search response");
            self.socket
                .send_to(&response.to_bytes(), addr)
                .await
                .context("error sending")?;
        }
        Ok(())
    }
}

/// The `(ST, USN)` pairs answering a search target, in emission order. The
/// returned `ST` carries the canonical casing even when the probe used a
/// different one.
pub(crate) fn search_responses(root: &Arc<Device>, search_target: &str) -> Vec<(String, String)> {
    let st = search_target.to_ascii_lowercase();

    let rootdevice_response = || {
        (
            UPNP_ROOT_DEVICE.to_owned(),
            format!("{}::{}", root.udn, UPNP_ROOT_DEVICE),
        )
    };
    let udn_response = |device: &Arc<Device>| (device.udn.clone(), root.udn.clone());
    let device_type_response = |device: &Arc<Device>| {
        (
            device.device_type.clone(),
            format!("{}::{}", root.udn, device.device_type),
        )
    };
    let service_type_response = |service_type: &str| {
        (
            service_type.to_owned(),
            format!("{}::{}", root.udn, service_type),
        )
    };

    let mut out = Vec::new();
    if st == SSDP_ST_ALL {
        out.push(rootdevice_response());
        for device in root.all_devices() {
            out.push(udn_response(&device));
        }
        for device in root.all_devices() {
            out.push(device_type_response(&device));
        }
        for service in root.all_services() {
            out.push(service_type_response(&service.service_type));
        }
    } else if st == UPNP_ROOT_DEVICE {
        out.push(rootdevice_response());
    } else {
        for device in root.all_devices() {
            if device.udn.to_ascii_lowercase() == st {
                out.push(udn_response(&device));
            }
        }
        if out.is_empty() {
            for device in root.all_devices() {
                if device.device_type.to_ascii_lowercase() == st {
                    out.push(device_type_response(&device));
                }
            }
        }
        if out.is_empty() {
            for service in root.all_services() {
                if service.service_type.to_ascii_lowercase() == st {
                    out.push(service_type_response(&service.service_type));
                }
            }
        }
    }
    out
}

/// The fixed NOTIFY list for a device tree: the root slot, two slots per
/// device, one per service. The announcer walks this round-robin.
pub(crate) fn build_advertisements(device: &Arc<Device>, server_string: &str) -> Vec<SsdpPacket> {
    let location = device.location();
    let alive = |nt: &str, usn: &str| {
        let headers: SsdpHeaders = [
            ("NTS", NTS_ALIVE),
            ("SERVER", server_string),
            ("BOOTID.UPNP.ORG", "1"),
            ("CONFIGID.UPNP.ORG", "1"),
            ("LOCATION", location.as_str()),
            ("NT", nt),
            ("USN", usn),
        ]
        .into_iter()
        .collect();
        SsdpPacket::new(NOTIFY_START_LINE, headers)
    };

    let mut advertisements = Vec::new();
    advertisements.push(alive(
        UPNP_ROOT_DEVICE,
        &format!("{}::{}", device.udn, UPNP_ROOT_DEVICE),
    ));
    for dev in device.all_devices() {
        advertisements.push(alive(&dev.udn, &dev.udn));
        advertisements.push(alive(
            &dev.device_type,
            &format!("{}::{}", dev.udn, dev.device_type),
        ));
    }
    for dev in device.all_devices() {
        for service in dev.services() {
            advertisements.push(alive(
                &service.service_type,
                &format!("{}::{}", dev.udn, service.service_type),
            ));
        }
    }
    advertisements
}

pub(crate) fn build_byebye(device: &Device, server_string: &str) -> SsdpPacket {
    let usn = format!("{}::{}", device.udn, UPNP_ROOT_DEVICE);
    let location = device.location();
    let headers: SsdpHeaders = [
        ("NTS", NTS_BYEBYE),
        ("SERVER", server_string),
        ("NT", UPNP_ROOT_DEVICE),
        ("USN", usn.as_str()),
        ("LOCATION", location.as_str()),
    ]
    .into_iter()
    .collect();
    SsdpPacket::new(NOTIFY_START_LINE, headers)
}

/// Cycles through alive NOTIFYs, one slot per tick; sends the root byebye at
/// shutdown.
pub(crate) struct SsdpAdvertisementAnnouncer {
    device: Arc<Device>,
    socket: Arc<SsdpSocket>,
    target: SocketAddr,
    server_string: String,
    advertisements: Vec<SsdpPacket>,
}

impl SsdpAdvertisementAnnouncer {
    pub(crate) fn new(
        device: Arc<Device>,
        socket: Arc<SsdpSocket>,
        target: SocketAddr,
        server_string: String,
    ) -> Self {
        let advertisements = build_advertisements(&device, &server_string);
        Self {
            device,
            socket,
            target,
            server_string,
            advertisements,
        }
    }

    pub(crate) async fn run(&self, shutdown: CancellationToken) {
        debug!("start advertisements announcer");
        let mut index = 0usize;
        let mut interval = tokio::time::interval(NOTIFY_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("stop advertisements announcer");
                    self.send_byebye().await;
                    return;
                }
                _ = interval.tick() => {
                    self.announce_next(&mut index).await;
                }
            }
        }
    }

    async fn announce_next(&self, index: &mut usize) {
        let packet = &self.advertisements[*index];
        *index = (*index + 1) % self.advertisements.len();

        debug!(
            nts = packet.headers.get("NTS"),
            nt = packet.headers.get("NT"),
            usn = packet.headers.get("USN"),
            "sending advertisement"
        );
        if let Err(e) = self.socket.send_to(&packet.to_bytes(), self.target).await {
            debug!(addr=%self.target, "error sending advertisement: {e:#}");
        }
    }

    async fn send_byebye(&self) {
        let packet = build_byebye(&self.device, &self.server_string);
        debug!(
            nt = packet.headers.get("NT"),
            usn = packet.headers.get("USN"),
            "sending byebye"
        );
        if let Err(e) = self.socket.send_to(&packet.to_bytes(), self.target).await {
            debug!(addr=%self.target, "error sending byebye: {e:#}");
        }
    }
}

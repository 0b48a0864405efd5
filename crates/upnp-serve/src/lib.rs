//! Server half of a UPnP device stack: SSDP discovery and advertisement,
//! description documents over HTTP, and SOAP action control against
//! user-supplied service logic.

use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod constants;
pub mod datatype;
pub mod description;
pub mod device;
pub mod error;
mod http_server;
pub mod packet;
pub mod service;
pub mod ssdp;
mod soap;

pub use constants::DEFAULT_SERVER_STRING;
pub use datatype::{DataType, Value, ValueKind};
pub use device::{Device, DeviceSpec, Icon};
pub use error::UpnpError;
pub use service::{
    ActionArgs, ActionOutput, ActionSpec, Service, ServiceSpec, StateVariableSpec, ValueRange,
};

use crate::ssdp::{SsdpAdvertisementAnnouncer, SsdpSearchResponder, SsdpSocket};

pub struct UpnpServerOptions {
    /// Static definition of the root device and everything under it.
    pub root_device: DeviceSpec,
    /// Source address on the LAN. Picks the address family, the multicast
    /// interface, and the host part of `base_uri`.
    pub source: SocketAddr,
    /// Multicast target override. Defaults per the source family.
    pub target: Option<SocketAddr>,
    pub http_port: u16,
    /// Product tokens for SERVER headers, e.g. [`DEFAULT_SERVER_STRING`].
    pub server_string: String,
}

/// A running UPnP server: HTTP description/control plus the SSDP responder
/// and announcer. Everything stops (byebye included) on [`UpnpServer::stop`].
pub struct UpnpServer {
    device: Arc<Device>,
    shutdown: CancellationToken,
    http_addr: SocketAddr,
    announcer_task: tokio::task::JoinHandle<()>,
    responder_task: tokio::task::JoinHandle<()>,
    http_task: tokio::task::JoinHandle<()>,
}

fn base_uri(host: IpAddr, port: u16) -> String {
    match host {
        IpAddr::V4(_) => format!("http://{host}:{port}"),
        IpAddr::V6(_) => format!("http://[{host}]:{port}"),
    }
}

impl UpnpServer {
    /// Instantiate the device tree, bind the HTTP and SSDP sockets and start
    /// serving. Configuration errors (duplicate UDNs, bad action bindings)
    /// surface here.
    pub async fn start(opts: UpnpServerOptions) -> anyhow::Result<Self> {
        let base_uri = base_uri(opts.source.ip(), opts.http_port);
        let device = Device::build(opts.root_device, &base_uri)?;
        let shutdown = CancellationToken::new();

        // HTTP first, so the LOCATION the SSDP side advertises resolves.
        let http_bind: SocketAddr = match opts.source {
            SocketAddr::V4(_) => (opts.source.ip(), opts.http_port).into(),
            SocketAddr::V6(v6) => {
                SocketAddrV6::new(*v6.ip(), opts.http_port, 0, v6.scope_id()).into()
            }
        };
        let listener = tokio::net::TcpListener::bind(http_bind)
            .await
            .with_context(|| format!("error binding to {http_bind}"))?;
        let http_addr = listener.local_addr().context("error getting local addr")?;
        debug!(%http_addr, device_url = %device.device_url, "device description listening");

        let router = http_server::make_router(device.clone());
        let http_task = tokio::spawn({
            let token = shutdown.clone();
            async move {
                let app = router.into_make_service();
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(token.cancelled_owned())
                    .await
                {
                    warn!("error running HTTP server: {e:#}");
                }
            }
        });

        let target = opts
            .target
            .unwrap_or_else(|| ssdp::default_target(opts.source));
        debug!(source = %opts.source, %target, "starting SSDP handling");
        let socket = Arc::new(SsdpSocket::bind(opts.source, target)?);

        let responder = SsdpSearchResponder::new(
            device.clone(),
            socket.clone(),
            opts.server_string.clone(),
        );
        let responder_task = tokio::spawn({
            let token = shutdown.clone();
            async move { responder.run(token).await }
        });

        let announcer =
            SsdpAdvertisementAnnouncer::new(device.clone(), socket, target, opts.server_string);
        let announcer_task = tokio::spawn({
            let token = shutdown.clone();
            async move { announcer.run(token).await }
        });

        Ok(Self {
            device,
            shutdown,
            http_addr,
            announcer_task,
            responder_task,
            http_task,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// The bound address of the HTTP side.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Tear everything down. The announcer flushes its byebye before this
    /// returns; the responder and the HTTP server follow.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.announcer_task.await;
        let _ = self.responder_task.await;
        let _ = self.http_task.await;
    }
}

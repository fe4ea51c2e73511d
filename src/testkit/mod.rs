// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test fixtures: canned topologies, an event-recording listener and a
//! minimal HTTP health endpoint.

use crate::deployment::{ResourceHandle, Service, ServiceDatacenter, ServiceDeployment};
use crate::runtime::DeploymentListener;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Build a topology from `(datacenter, [node ids])` pairs.
///
/// Every datacenter gets the static token `token-<dc>`; every node gets the
/// endpoint `http://<node>.<dc>.test:8080` (unresolvable by design) and a
/// `/health` check on the same host.
#[must_use]
pub fn fixture_topology(layout: &[(&str, &[&str])]) -> ServiceDeployment {
    let mut topology = ServiceDeployment::new();
    for (dc, nodes) in layout {
        let mut datacenter = ServiceDatacenter::with_static_token(*dc, format!("token-{dc}"));
        for node in *nodes {
            let base = format!("http://{node}.{dc}.test:8080");
            let service = Service::http(*node, &base, &format!("{base}/health"))
                .expect("fixture URLs are valid");
            datacenter.add_service(service);
        }
        topology.add_datacenter(datacenter);
    }
    topology
}

/// Event captured by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    /// datacenter, node, cause
    NodeFailover(String, String, String),
    /// from, to
    DatacenterFailover(String, String),
    /// from, to
    DatacenterSelected(String, String),
    /// last datacenter
    Exhausted(String),
    /// datacenter, node
    Reinstated(String, String),
}

/// Listener that keeps every event in order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, event: RecordedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl DeploymentListener for RecordingListener {
    fn on_node_failover(&self, resource: &ResourceHandle, cause: &str) {
        self.push(RecordedEvent::NodeFailover(
            resource.datacenter().to_string(),
            resource.id().to_string(),
            cause.to_string(),
        ));
    }

    fn on_datacenter_failover(&self, from: &str, to: &str) {
        self.push(RecordedEvent::DatacenterFailover(from.to_string(), to.to_string()));
    }

    fn on_datacenter_selected(&self, from: &str, to: &str) {
        self.push(RecordedEvent::DatacenterSelected(from.to_string(), to.to_string()));
    }

    fn on_exhausted(&self, last_datacenter: &str) {
        self.push(RecordedEvent::Exhausted(last_datacenter.to_string()));
    }

    fn on_reinstated(&self, resource: &ResourceHandle) {
        self.push(RecordedEvent::Reinstated(
            resource.datacenter().to_string(),
            resource.id().to_string(),
        ));
    }
}

/// A loopback HTTP server answering every request with a fixed status.
///
/// The server stops when dropped.
pub struct HealthServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl HealthServer {
    /// Bind to an ephemeral loopback port and start answering with `status`.
    pub async fn start(status: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let reason = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
        );

        let handle = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let response = response.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Ok(Self { addr, handle })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port><path>`
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_topology_layout() {
        let topology = fixture_topology(&[("dc1", &["n1", "n2"]), ("dc2", &["n3"])]);

        assert_eq!(topology.len(), 2);
        let dc1 = topology.datacenter("dc1").unwrap();
        assert_eq!(dc1.service_count(), 2);
        assert_eq!(dc1.token().unwrap(), "token-dc1");
        assert_eq!(
            dc1.service("n2").unwrap().endpoint().as_str(),
            "http://n2.dc1.test:8080/"
        );
    }

    #[tokio::test]
    async fn test_health_server_urls() {
        let server = HealthServer::start(200).await.unwrap();
        assert!(server.url("/health").starts_with("http://127.0.0.1:"));
        assert!(server.url("/health").ends_with("/health"));
        assert_ne!(server.addr().port(), 0);
    }
}

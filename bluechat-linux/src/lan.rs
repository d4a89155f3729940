//! LAN stand-in for the short-range radio: UDP multicast for device inquiry and service
//! search, TCP for streams. One node per host on a given discovery port.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluechat_core::{PeerAddr, ServiceId};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session::lock;
use crate::transport::{
    DiscoveredDevice, DiscoveryEvent, DiscoverySink, Inbound, SearchStatus, ServiceHost,
    ServiceRecord, TransactionId, Transport, TransportError,
};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
const MAX_DATAGRAM: usize = 8 * 1024;
const MAX_PREAMBLE_FIELD: usize = 1024;
const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(2);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Timing and ports for the LAN transport.
#[derive(Debug, Clone)]
pub struct LanConfig {
    pub discovery_port: u16,
    /// TCP port the chat service listens on; 0 picks a free one.
    pub service_port: u16,
    /// How long an inquiry collects replies.
    pub inquiry_window: Duration,
    /// How long a service search waits for the target device.
    pub search_timeout: Duration,
}

/// Discovery datagrams, bincode-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Datagram {
    Inquiry {
        from: PeerAddr,
    },
    InquiryReply {
        addr: PeerAddr,
        name: String,
    },
    ServiceQuery {
        trans_id: TransactionId,
        from: PeerAddr,
        target: PeerAddr,
        service: ServiceId,
    },
    ServiceReply {
        trans_id: TransactionId,
        to: PeerAddr,
        records: Vec<(ServiceId, u16)>,
    },
}

type SearchReply = (IpAddr, Vec<(ServiceId, u16)>);

struct LanInner {
    addr: PeerAddr,
    name: String,
    socket: UdpSocket,
    group: SocketAddr,
    config: LanConfig,
    services: Mutex<HashMap<Uuid, (ServiceId, u16)>>,
    inquiry: Mutex<Option<mpsc::UnboundedSender<DiscoveredDevice>>>,
    searches: Mutex<HashMap<TransactionId, oneshot::Sender<SearchReply>>>,
    next_trans: AtomicU32,
}

#[derive(Clone)]
pub struct LanTransport {
    inner: Arc<LanInner>,
}

impl LanTransport {
    /// Join the discovery group and start answering inquiries and service queries.
    pub async fn bind(name: &str, config: LanConfig) -> std::io::Result<Self> {
        let socket = make_multicast_socket(config.discovery_port)?;
        let inner = Arc::new(LanInner {
            addr: PeerAddr::new(Uuid::new_v4().simple().to_string()),
            name: name.to_string(),
            socket,
            group: SocketAddr::new(IpAddr::V4(MULTICAST_GROUP), config.discovery_port),
            config,
            services: Mutex::new(HashMap::new()),
            inquiry: Mutex::new(None),
            searches: Mutex::new(HashMap::new()),
            next_trans: AtomicU32::new(1),
        });
        tracing::info!(addr = %inner.addr, port = inner.config.discovery_port, "lan transport up");
        tokio::spawn(recv_loop(inner.clone()));
        Ok(Self { inner })
    }

    /// This node's address as other peers see it.
    pub fn local_addr(&self) -> &PeerAddr {
        &self.inner.addr
    }
}

fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_multicast_loop_v4(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

fn encode(dgram: &Datagram) -> Result<Vec<u8>, TransportError> {
    bincode::serialize(dgram).map_err(|e| TransportError::Rejected(e.to_string()))
}

async fn send(inner: &LanInner, dgram: &Datagram, to: SocketAddr) {
    match encode(dgram) {
        Ok(bytes) => {
            if let Err(e) = inner.socket.send_to(&bytes, to).await {
                tracing::warn!(%to, error = %e, "discovery send failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "discovery encode failed"),
    }
}

async fn recv_loop(inner: Arc<LanInner>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match inner.socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "discovery socket failed");
                return;
            }
        };
        let dgram: Datagram = match bincode::deserialize(&buf[..n]) {
            Ok(d) => d,
            Err(_) => continue,
        };
        match dgram {
            Datagram::Inquiry { from: peer } => {
                if peer == inner.addr {
                    continue;
                }
                let reply = Datagram::InquiryReply {
                    addr: inner.addr.clone(),
                    name: inner.name.clone(),
                };
                send(&inner, &reply, from).await;
            }
            Datagram::InquiryReply { addr, name } => {
                if addr == inner.addr {
                    continue;
                }
                if let Some(tx) = lock(&inner.inquiry).as_ref() {
                    let _ = tx.send(DiscoveredDevice {
                        addr,
                        name: Some(name),
                    });
                }
            }
            Datagram::ServiceQuery {
                trans_id,
                from: peer,
                target,
                service,
            } => {
                if target != inner.addr {
                    continue;
                }
                let records: Vec<(ServiceId, u16)> = lock(&inner.services)
                    .get(&service.uuid)
                    .cloned()
                    .into_iter()
                    .collect();
                let reply = Datagram::ServiceReply {
                    trans_id,
                    to: peer,
                    records,
                };
                send(&inner, &reply, from).await;
            }
            Datagram::ServiceReply {
                trans_id,
                to,
                records,
            } => {
                if to != inner.addr {
                    continue;
                }
                if let Some(tx) = lock(&inner.searches).remove(&trans_id) {
                    let _ = tx.send((from.ip(), records));
                }
            }
        }
    }
}

#[async_trait]
impl Transport for LanTransport {
    type Stream = TcpStream;
    type Host = LanHost;

    async fn advertise(&self, service: &ServiceId) -> Result<LanHost, TransportError> {
        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.inner.config.service_port)).await?;
        let port = listener.local_addr()?.port();
        lock(&self.inner.services).insert(service.uuid, (service.clone(), port));
        tracing::info!(service = %service.name, port, "service advertised");
        let stop = CancellationToken::new();
        Ok(LanHost {
            ready: spawn_acceptor(listener, stop.clone()),
            stop,
            service: service.uuid,
            inner: self.inner.clone(),
        })
    }

    fn start_inquiry(&self, sink: DiscoverySink) -> Result<(), TransportError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut slot = lock(&self.inner.inquiry);
            if slot.is_some() {
                return Err(TransportError::Rejected("inquiry already running".into()));
            }
            *slot = Some(tx);
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let query = Datagram::Inquiry {
                from: inner.addr.clone(),
            };
            send(&inner, &query, inner.group).await;
            let window = tokio::time::sleep(inner.config.inquiry_window);
            tokio::pin!(window);
            let mut seen = HashSet::new();
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    Some(device) = rx.recv() => {
                        if seen.insert(device.addr.clone()) {
                            let _ = sink.send(DiscoveryEvent::DeviceDiscovered(device));
                        }
                    }
                }
            }
            *lock(&inner.inquiry) = None;
            let _ = sink.send(DiscoveryEvent::InquiryCompleted);
        });
        Ok(())
    }

    fn search_services(
        &self,
        service: &ServiceId,
        device: &PeerAddr,
        sink: DiscoverySink,
    ) -> Result<TransactionId, TransportError> {
        let trans_id = self.inner.next_trans.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.searches).insert(trans_id, tx);
        let query = Datagram::ServiceQuery {
            trans_id,
            from: self.inner.addr.clone(),
            target: device.clone(),
            service: service.clone(),
        };
        let inner = self.inner.clone();
        let device = device.clone();
        tokio::spawn(async move {
            send(&inner, &query, inner.group).await;
            let status = match tokio::time::timeout(inner.config.search_timeout, rx).await {
                Ok(Ok((ip, found))) if !found.is_empty() => {
                    let records = found
                        .into_iter()
                        .map(|(service, port)| ServiceRecord {
                            addr: device.clone(),
                            service,
                            endpoint: SocketAddr::new(ip, port).to_string(),
                        })
                        .collect();
                    let _ = sink.send(DiscoveryEvent::ServicesDiscovered { trans_id, records });
                    SearchStatus::Completed
                }
                Ok(Ok(_)) => SearchStatus::NoRecords,
                Ok(Err(_)) => SearchStatus::Terminated,
                Err(_) => {
                    lock(&inner.searches).remove(&trans_id);
                    SearchStatus::DeviceNotReachable
                }
            };
            let _ = sink.send(DiscoveryEvent::SearchCompleted { trans_id, status });
        });
        Ok(trans_id)
    }

    async fn open(&self, record: &ServiceRecord) -> Result<TcpStream, TransportError> {
        let endpoint: SocketAddr = record
            .endpoint
            .parse()
            .map_err(|e: std::net::AddrParseError| TransportError::Rejected(e.to_string()))?;
        let mut stream = TcpStream::connect(endpoint).await?;
        write_field(&mut stream, self.inner.addr.as_str()).await?;
        write_field(&mut stream, &self.inner.name).await?;
        stream.flush().await?;
        Ok(stream)
    }
}

/// Accept side of the advertised chat service. Connections arrive here once their preamble
/// has been read.
pub struct LanHost {
    ready: mpsc::UnboundedReceiver<Inbound<TcpStream>>,
    stop: CancellationToken,
    service: Uuid,
    inner: Arc<LanInner>,
}

#[async_trait]
impl ServiceHost for LanHost {
    type Stream = TcpStream;

    async fn accept(&mut self) -> Result<Inbound<TcpStream>, TransportError> {
        self.ready.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&mut self) {
        lock(&self.inner.services).remove(&self.service);
        self.stop.cancel();
        self.ready.close();
    }
}

/// Accept TCP connections until `stop` fires. Each preamble is read in its own task so a
/// silent client cannot hold up the ones behind it.
fn spawn_acceptor(
    listener: TcpListener,
    stop: CancellationToken,
) -> mpsc::UnboundedReceiver<Inbound<TcpStream>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = stop.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, from) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(PREAMBLE_TIMEOUT, read_preamble(stream)).await {
                    Ok(Ok(inbound)) => {
                        let _ = tx.send(inbound);
                    }
                    Ok(Err(e)) => tracing::debug!(%from, error = %e, "bad preamble"),
                    Err(_) => tracing::debug!(%from, "no preamble, dropping connection"),
                }
            });
        }
        tracing::debug!("acceptor stopped");
    });
    rx
}

async fn read_preamble(mut stream: TcpStream) -> std::io::Result<Inbound<TcpStream>> {
    let addr = read_field(&mut stream).await?;
    let name = read_field(&mut stream).await?;
    Ok(Inbound {
        stream,
        addr: PeerAddr::new(addr),
        name: Some(name),
    })
}

async fn write_field(stream: &mut TcpStream, value: &str) -> std::io::Result<()> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "preamble field too long")
    })?;
    stream.write_u16(len).await?;
    stream.write_all(bytes).await
}

async fn read_field(stream: &mut TcpStream) -> std::io::Result<String> {
    let len = stream.read_u16().await? as usize;
    if len > MAX_PREAMBLE_FIELD {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "preamble field too long",
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluechat_core::SERVICE_UUID;

    #[test]
    fn datagrams_survive_bincode() {
        let dgram = Datagram::ServiceReply {
            trans_id: 9,
            to: PeerAddr::new("abc"),
            records: vec![(ServiceId::chat(), 45681)],
        };
        let bytes = encode(&dgram).unwrap();
        match bincode::deserialize::<Datagram>(&bytes).unwrap() {
            Datagram::ServiceReply {
                trans_id,
                to,
                records,
            } => {
                assert_eq!(trans_id, 9);
                assert_eq!(to, PeerAddr::new("abc"));
                assert_eq!(records[0].0.uuid, SERVICE_UUID);
                assert_eq!(records[0].1, 45681);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn preamble_carries_address_and_name() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            write_field(&mut s, "node-b").await.unwrap();
            write_field(&mut s, "B").await.unwrap();
            s
        });
        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(read_field(&mut server).await.unwrap(), "node-b");
        assert_eq!(read_field(&mut server).await.unwrap(), "B");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn silent_client_does_not_hold_up_the_next_one() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stop = CancellationToken::new();
        let mut ready = spawn_acceptor(listener, stop.clone());

        let _silent = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut talker = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        write_field(&mut talker, "node-b").await.unwrap();
        write_field(&mut talker, "B").await.unwrap();

        let inbound = tokio::time::timeout(PREAMBLE_TIMEOUT / 2, ready.recv())
            .await
            .expect("held up by the silent client")
            .unwrap();
        assert_eq!(inbound.addr, PeerAddr::new("node-b"));
        assert_eq!(inbound.name.as_deref(), Some("B"));

        stop.cancel();
        ready.close();
    }
}

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::sync::Arc;
use std::time::Duration;

use dhcproto::{Decodable, Decoder, Encodable, v4};
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, oneshot};
use tracing::trace;

use crate::transport::TransportError;

type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<v4::Message>>>>;

/// Broadcast-capable UDP socket shared by all in-flight handshakes. A
/// background loop decodes incoming datagrams and routes each to the waiter
/// registered under its transaction id; everything else is dropped.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    pending: PendingMap,
}

impl UdpTransport {
    /// Bind on `port` (0 for ephemeral), optionally pinned to an interface.
    pub fn bind(iface: Option<&str>, port: u16) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;

        if let Some(iface_name) = iface {
            socket.bind_device(Some(iface_name.as_bytes()))?;
        }

        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;

        let std_socket = unsafe { std::net::UdpSocket::from_raw_fd(socket.into_raw_fd()) };
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);

        let pending = Arc::new(Mutex::new(HashMap::new()));
        spawn_recv_loop(Arc::clone(&socket), Arc::clone(&pending));

        Ok(Self { socket, pending })
    }

    /// Send `msg` to `target` and await the response carrying the same xid.
    /// Expiry of `timeout` is a normal outcome, surfaced as
    /// [`TransportError::Timeout`]. Unrelated traffic received in the
    /// meantime does not touch the timer.
    pub async fn exchange(
        &self,
        msg: &v4::Message,
        target: SocketAddr,
        timeout: Duration,
    ) -> Result<v4::Message, TransportError> {
        let xid = msg.xid();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.insert(xid, tx).is_some() {
                return Err(TransportError::XidCollision(format!("0x{xid:08x}")));
            }
        }

        let payload = msg
            .to_vec()
            .map_err(|err| TransportError::Encode(err.to_string()))?;

        if let Err(err) = self.socket.send_to(&payload, target).await {
            self.pending.lock().await.remove(&xid);
            return Err(TransportError::Io(err));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&xid);
                Err(TransportError::ChannelClosed)
            }
            Err(_) => {
                self.pending.lock().await.remove(&xid);
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}

fn spawn_recv_loop(socket: Arc<UdpSocket>, pending: PendingMap) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(value) => value,
                Err(_) => break,
            };

            let msg = match v4::Message::decode(&mut Decoder::new(&buf[..len])) {
                Ok(msg) => msg,
                Err(err) => {
                    trace!(%peer, ?err, "dropping undecodable datagram");
                    continue;
                }
            };

            let xid = msg.xid();
            let tx = pending.lock().await.remove(&xid);
            match tx {
                Some(tx) => {
                    let _ = tx.send(msg);
                }
                None => trace!(%peer, xid, "dropping datagram with no waiter"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use dhcproto::{Decodable, Encodable, v4};
    use tokio::net::UdpSocket;

    use super::UdpTransport;

    #[tokio::test]
    async fn correlates_response_by_xid() {
        let server = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind test server");
        let server_addr = server.local_addr().expect("server addr");

        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let (len, peer) = server.recv_from(&mut buf).await.expect("recv client packet");
            let req = v4::Message::decode(&mut dhcproto::Decoder::new(&buf[..len]))
                .expect("decode request");

            let mut resp = v4::Message::new_with_id(
                req.xid(),
                Ipv4Addr::UNSPECIFIED,
                "192.168.1.10".parse().expect("ip parse"),
                Ipv4Addr::UNSPECIFIED,
                Ipv4Addr::UNSPECIFIED,
                req.chaddr(),
            );
            resp.opts_mut()
                .insert(v4::DhcpOption::MessageType(v4::MessageType::Offer));

            server
                .send_to(&resp.to_vec().expect("encode response"), peer)
                .await
                .expect("send response");
        });

        let transport = UdpTransport::bind(None, 0).expect("transport bind");

        let mut req = v4::Message::new_with_id(
            0x1234_5678,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee],
        );
        req.opts_mut()
            .insert(v4::DhcpOption::MessageType(v4::MessageType::Discover));

        let resp = transport
            .exchange(
                &req,
                SocketAddr::from(server_addr),
                std::time::Duration::from_millis(250),
            )
            .await
            .expect("exchange");

        assert_eq!(resp.xid(), req.xid());
        assert_eq!(resp.opts().msg_type(), Some(v4::MessageType::Offer));
    }

    #[tokio::test]
    async fn times_out_when_nothing_answers() {
        // bind a peer that never replies so the send has a valid target
        let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind silent peer");
        let target = SocketAddr::from(silent.local_addr().expect("peer addr"));

        let transport = UdpTransport::bind(None, 0).expect("transport bind");
        let req = v4::Message::new_with_id(
            0xdead_beef,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0x02, 0, 0, 0, 0, 1],
        );

        let err = transport
            .exchange(&req, target, std::time::Duration::from_millis(50))
            .await
            .expect_err("no response expected");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn refuses_duplicate_inflight_xid() {
        let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind silent peer");
        let target = SocketAddr::from(silent.local_addr().expect("peer addr"));

        let transport = std::sync::Arc::new(UdpTransport::bind(None, 0).expect("transport bind"));
        let req = v4::Message::new_with_id(
            0x0000_0042,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            &[0x02, 0, 0, 0, 0, 2],
        );

        let first = {
            let transport = std::sync::Arc::clone(&transport);
            let req = req.clone();
            tokio::spawn(async move {
                transport
                    .exchange(&req, target, std::time::Duration::from_millis(200))
                    .await
            })
        };
        // give the first exchange time to register its xid
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let err = transport
            .exchange(&req, target, std::time::Duration::from_millis(50))
            .await
            .expect_err("duplicate xid must be refused");
        assert!(matches!(err, super::TransportError::XidCollision(_)));

        let _ = first.await;
    }
}

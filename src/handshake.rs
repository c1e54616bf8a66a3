use std::net::Ipv4Addr;
use std::time::Instant;

use dhcproto::v4;
use tracing::{debug, warn};

use crate::config::SimConfig;
use crate::identity::ClientIdentity;
use crate::report::{ClientOutcome, FailureReason, HandshakeStatus, LeaseResult};
use crate::transport::TransportError;
use crate::transport::udp::UdpTransport;

/// How a single Discover cycle ended short of a lease. `Timeout` and
/// `Malformed` feed the retry policy; `Nak` and `Io` are terminal.
enum AttemptError {
    Timeout,
    Malformed(String),
    Nak(Option<String>),
    Io(String),
}

pub(crate) fn xid_for(client_index: usize, attempt: usize) -> u32 {
    // odd multiplier keeps distinct client indices on distinct xids; the
    // attempt bits keep a retry from matching a stale exchange
    let mut xid = (client_index as u32).wrapping_mul(0x9e37_79b9);
    xid ^= attempt as u32;
    if xid == 0 { 1 } else { xid }
}

/// Drive one client's Discover → Offer → Request → Ack exchange to a
/// terminal outcome. Only the identity and the attempt counter survive
/// between attempts; each retry starts over with a fresh transaction id.
pub async fn run(
    identity: &ClientIdentity,
    config: &SimConfig,
    transport: &UdpTransport,
) -> ClientOutcome {
    let client_index = identity.client_index;
    let mut timeouts = 0;
    let mut malformed = 0;
    let mut offer_latency_ms = None;
    let mut ack_latency_ms = None;

    for attempt in 0..=config.retries {
        let xid = xid_for(client_index, attempt);
        let result = run_attempt(
            identity,
            config,
            transport,
            xid,
            &mut offer_latency_ms,
            &mut ack_latency_ms,
        )
        .await;

        match result {
            Ok(lease) => {
                debug!(client_index, mac = %identity.mac_string(), ip = %lease.ip, attempt, "lease acquired");
                return outcome(
                    identity,
                    attempt + 1,
                    offer_latency_ms,
                    ack_latency_ms,
                    HandshakeStatus::Success(lease),
                );
            }
            Err(AttemptError::Timeout) => {
                timeouts += 1;
                debug!(client_index, attempt, "attempt timed out");
            }
            Err(AttemptError::Malformed(detail)) => {
                malformed += 1;
                warn!(client_index, attempt, %detail, "discarding invalid response");
            }
            Err(AttemptError::Nak(message)) => {
                debug!(client_index, attempt, "request refused with NAK");
                return outcome(
                    identity,
                    attempt + 1,
                    offer_latency_ms,
                    ack_latency_ms,
                    HandshakeStatus::Failed(FailureReason::Nak { message }),
                );
            }
            Err(AttemptError::Io(message)) => {
                warn!(client_index, attempt, %message, "transport failure");
                return outcome(
                    identity,
                    attempt + 1,
                    offer_latency_ms,
                    ack_latency_ms,
                    HandshakeStatus::Failed(FailureReason::Io { message }),
                );
            }
        }
    }

    outcome(
        identity,
        config.retries + 1,
        offer_latency_ms,
        ack_latency_ms,
        HandshakeStatus::Failed(FailureReason::RetriesExhausted {
            timeouts,
            malformed,
        }),
    )
}

async fn run_attempt(
    identity: &ClientIdentity,
    config: &SimConfig,
    transport: &UdpTransport,
    xid: u32,
    offer_latency_ms: &mut Option<u128>,
    ack_latency_ms: &mut Option<u128>,
) -> Result<LeaseResult, AttemptError> {
    *offer_latency_ms = None;
    *ack_latency_ms = None;

    let discover = build_discover(identity, xid);
    let offer_start = Instant::now();
    let offer = transport
        .exchange(&discover, config.server, config.timeout())
        .await
        .map_err(attempt_error)?;
    *offer_latency_ms = Some(offer_start.elapsed().as_millis());

    match offer.opts().msg_type() {
        Some(v4::MessageType::Offer) => {}
        other => {
            return Err(AttemptError::Malformed(format!(
                "expected Offer, got {other:?}"
            )));
        }
    }
    if offer.chaddr().get(..6) != Some(identity.mac.as_slice()) {
        return Err(AttemptError::Malformed(
            "offer chaddr does not match client".to_string(),
        ));
    }
    let offered_ip = offer.yiaddr();
    if offered_ip.is_unspecified() {
        return Err(AttemptError::Malformed("offer missing yiaddr".to_string()));
    }
    let Some(server_id) = extract_server_id(&offer) else {
        return Err(AttemptError::Malformed(
            "offer missing server identifier".to_string(),
        ));
    };

    let request = build_request(identity, xid, offered_ip, server_id);
    let ack_start = Instant::now();
    let resp = transport
        .exchange(&request, config.server, config.timeout())
        .await
        .map_err(attempt_error)?;
    *ack_latency_ms = Some(ack_start.elapsed().as_millis());

    match resp.opts().msg_type() {
        Some(v4::MessageType::Ack) => Ok(extract_lease(&resp, offered_ip, server_id)),
        Some(v4::MessageType::Nak) => Err(AttemptError::Nak(extract_server_message(&resp))),
        other => Err(AttemptError::Malformed(format!(
            "expected Ack or Nak, got {other:?}"
        ))),
    }
}

fn attempt_error(err: TransportError) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Timeout
    } else {
        AttemptError::Io(err.to_string())
    }
}

fn outcome(
    identity: &ClientIdentity,
    attempts: usize,
    offer_latency_ms: Option<u128>,
    ack_latency_ms: Option<u128>,
    status: HandshakeStatus,
) -> ClientOutcome {
    ClientOutcome {
        client_index: identity.client_index,
        mac: identity.mac_string(),
        attempts,
        offer_latency_ms,
        ack_latency_ms,
        status,
    }
}

fn build_discover(identity: &ClientIdentity, xid: u32) -> v4::Message {
    let mut msg = v4::Message::new_with_id(
        xid,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        &identity.mac,
    );

    msg.set_flags(v4::Flags::default().set_broadcast());
    msg.opts_mut()
        .insert(v4::DhcpOption::MessageType(v4::MessageType::Discover));
    msg.opts_mut()
        .insert(v4::DhcpOption::ClientIdentifier(identity.mac.to_vec()));
    msg.opts_mut()
        .insert(v4::DhcpOption::ParameterRequestList(vec![
            v4::OptionCode::SubnetMask,
            v4::OptionCode::Router,
            v4::OptionCode::DomainNameServer,
            v4::OptionCode::DomainName,
            v4::OptionCode::AddressLeaseTime,
            v4::OptionCode::ServerIdentifier,
        ]));
    msg
}

fn build_request(
    identity: &ClientIdentity,
    xid: u32,
    requested_ip: Ipv4Addr,
    server_id: Ipv4Addr,
) -> v4::Message {
    let mut msg = v4::Message::new_with_id(
        xid,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        &identity.mac,
    );

    msg.set_flags(v4::Flags::default().set_broadcast());
    msg.opts_mut()
        .insert(v4::DhcpOption::MessageType(v4::MessageType::Request));
    msg.opts_mut()
        .insert(v4::DhcpOption::ClientIdentifier(identity.mac.to_vec()));
    msg.opts_mut()
        .insert(v4::DhcpOption::RequestedIpAddress(requested_ip));
    msg.opts_mut()
        .insert(v4::DhcpOption::ServerIdentifier(server_id));
    msg
}

fn extract_server_id(msg: &v4::Message) -> Option<Ipv4Addr> {
    if let Some(&v4::DhcpOption::ServerIdentifier(ip)) =
        msg.opts().get(v4::OptionCode::ServerIdentifier)
    {
        Some(ip)
    } else {
        None
    }
}

fn extract_server_message(msg: &v4::Message) -> Option<String> {
    if let Some(v4::DhcpOption::Message(text)) = msg.opts().get(v4::OptionCode::Message) {
        Some(text.clone())
    } else {
        None
    }
}

fn extract_lease(ack: &v4::Message, offered_ip: Ipv4Addr, offer_server_id: Ipv4Addr) -> LeaseResult {
    let ip = if ack.yiaddr().is_unspecified() {
        offered_ip
    } else {
        ack.yiaddr()
    };
    let server_id = extract_server_id(ack).unwrap_or(offer_server_id);

    let lease_time_secs = match ack.opts().get(v4::OptionCode::AddressLeaseTime) {
        Some(&v4::DhcpOption::AddressLeaseTime(secs)) => Some(secs),
        _ => None,
    };
    let subnet_mask = match ack.opts().get(v4::OptionCode::SubnetMask) {
        Some(&v4::DhcpOption::SubnetMask(mask)) => Some(mask),
        _ => None,
    };
    let routers = match ack.opts().get(v4::OptionCode::Router) {
        Some(v4::DhcpOption::Router(ips)) => ips.clone(),
        _ => Vec::new(),
    };
    let dns_servers = match ack.opts().get(v4::OptionCode::DomainNameServer) {
        Some(v4::DhcpOption::DomainNameServer(ips)) => ips.clone(),
        _ => Vec::new(),
    };

    LeaseResult {
        ip,
        server_id,
        lease_time_secs,
        subnet_mask,
        routers,
        dns_servers,
    }
}

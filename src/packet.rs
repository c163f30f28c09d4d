//! DNS packet construction and parsing
//!
//! A thin layer over `hickory-proto`: one question per packet, QCLASS=IN,
//! recursion desired, no EDNS0. The pipelined engine builds and parses
//! through this module; [`lookup`] is the separate one-shot path used by
//! wildcard probing, NS discovery and the remote filter re-check.

use anyhow::{anyhow, Context, Result};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Builds a standard recursion-desired query for `host`.
pub fn build_query(id: u16, host: &str, rtype: RecordType) -> Result<Vec<u8>> {
    let name =
        Name::from_ascii(host).with_context(|| format!("invalid query name: {}", host))?;
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    message.add_query(Query::query(name, rtype));
    message.to_vec().context("failed to encode query")
}

/// Decodes a reply datagram.
pub fn parse_reply(buf: &[u8]) -> Result<Message> {
    Message::from_vec(buf).context("malformed dns reply")
}

/// Answer-section view of a reply: A addresses plus the CNAME chain in
/// answer order.
#[derive(Debug, Clone, Default)]
pub struct ReplyRecords {
    pub addresses: Vec<IpAddr>,
    pub cname: Vec<String>,
}

pub fn extract_records(message: &Message) -> ReplyRecords {
    let mut records = ReplyRecords::default();
    for record in message.answers() {
        match record.data() {
            Some(RData::A(a)) => records.addresses.push(IpAddr::V4(a.0)),
            Some(RData::CNAME(cname)) => records
                .cname
                .push(cname.0.to_ascii().trim_end_matches('.').to_string()),
            _ => {}
        }
    }
    records
}

/// Nameserver names from the answer section of an NS reply.
pub fn extract_ns(message: &Message) -> Vec<String> {
    message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::NS(ns)) => Some(ns.0.to_ascii().trim_end_matches('.').to_string()),
            _ => None,
        })
        .collect()
}

/// One-shot lookup over a throwaway socket.
///
/// Sends a single query and waits for the matching reply; replies from
/// other peers or with a foreign transaction id are ignored. Not part of
/// the pipelined engine path.
pub async fn lookup(
    host: &str,
    rtype: RecordType,
    resolver: SocketAddr,
    wait: Duration,
) -> Result<Message> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind probe socket")?;
    let id = rand::random::<u16>();
    let query = build_query(id, host, rtype)?;
    socket
        .send_to(&query, resolver)
        .await
        .context("probe send failed")?;

    let mut buf = [0u8; 1500];
    loop {
        let (len, from) = timeout(wait, socket.recv_from(&mut buf))
            .await
            .map_err(|_| anyhow!("probe for {} timed out", host))?
            .context("probe recv failed")?;
        if from != resolver {
            continue;
        }
        let message = parse_reply(&buf[..len])?;
        if message.id() == id {
            return Ok(message);
        }
    }
}

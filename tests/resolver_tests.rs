use anyhow::Result;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, NS};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use subrake::resolver::{discover_ns, ResolverPool, DEFAULT_RESOLVERS};
use tokio::net::UdpSocket;

fn temp_file(name: &str, content: &str) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("subrake-res-{}-{}", std::process::id(), name));
    std::fs::write(&path, content)?;
    Ok(path)
}

#[test]
fn builtin_pool_carries_the_default_set() {
    let pool = ResolverPool::builtin();
    assert_eq!(pool.len(), DEFAULT_RESOLVERS.len());
}

#[test]
fn resolver_file_accepts_bare_ips_and_ip_port_pairs() -> Result<()> {
    let path = temp_file("resolvers", "# comment\n1.1.1.1\n\n8.8.8.8:5353\n")?;
    let pool = ResolverPool::from_file(&path)?;
    assert_eq!(pool.len(), 2);
    let picked: HashSet<SocketAddr> = (0..4).map(|_| pool.next_default()).collect();
    assert!(picked.contains(&"1.1.1.1:53".parse()?));
    assert!(picked.contains(&"8.8.8.8:5353".parse()?));
    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn unreadable_or_garbage_resolver_files_are_fatal() -> Result<()> {
    assert!(ResolverPool::from_file(std::path::Path::new("/no/such/resolvers.txt")).is_err());
    let path = temp_file("resolvers-bad", "not-an-address\n")?;
    assert!(ResolverPool::from_file(&path).is_err());
    let empty = temp_file("resolvers-empty", "# nothing\n")?;
    assert!(ResolverPool::from_file(&empty).is_err());
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(&empty);
    Ok(())
}

#[test]
fn selection_round_robins_the_default_pool() -> Result<()> {
    let a: SocketAddr = "10.0.0.1:53".parse()?;
    let b: SocketAddr = "10.0.0.2:53".parse()?;
    let pool = ResolverPool::new(vec![a, b])?;
    let first = pool.select("example.com");
    let second = pool.select("example.com");
    assert_ne!(first, second, "consecutive selections must rotate");
    Ok(())
}

#[test]
fn apexes_with_special_resolvers_are_routed_there() -> Result<()> {
    let default: SocketAddr = "10.0.0.1:53".parse()?;
    let authoritative: SocketAddr = "1.1.1.1:53".parse()?;
    let mut pool = ResolverPool::new(vec![default])?;
    let mut special = HashMap::new();
    special.insert("example.com".to_string(), vec![authoritative]);
    pool.set_special(special);

    for _ in 0..4 {
        assert_eq!(pool.select("example.com"), authoritative);
    }
    // other apexes keep using the default pool
    assert_eq!(pool.select("other.org"), default);
    Ok(())
}

/// Minimal authoritative-side fake: NS for the apex, A for the
/// nameserver's own name, NXDOMAIN otherwise.
async fn ns_responder(socket: UdpSocket) {
    let mut buf = [0u8; 1500];
    loop {
        let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
            break;
        };
        let Ok(request) = Message::from_vec(&buf[..len]) else {
            continue;
        };
        let Some(query) = request.queries().first().cloned() else {
            continue;
        };
        let qname = query
            .name()
            .to_ascii()
            .trim_end_matches('.')
            .to_ascii_lowercase();
        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .set_recursion_available(true)
            .set_response_code(ResponseCode::NoError);
        match (query.query_type(), qname.as_str()) {
            (RecordType::NS, "example.com") => {
                let ns_name = Name::from_ascii("ns1.example.com.").expect("static name");
                response.add_answer(Record::from_rdata(
                    query.name().clone(),
                    300,
                    RData::NS(NS(ns_name)),
                ));
            }
            (RecordType::A, "ns1.example.com") => {
                response.add_answer(Record::from_rdata(
                    query.name().clone(),
                    300,
                    RData::A(A(Ipv4Addr::new(1, 1, 1, 1))),
                ));
            }
            _ => {
                response.set_response_code(ResponseCode::NXDomain);
            }
        }
        response.add_query(query);
        if let Ok(bytes) = response.to_vec() {
            let _ = socket.send_to(&bytes, peer).await;
        }
    }
}

#[tokio::test]
async fn ns_discovery_installs_authoritative_addresses() -> Result<()> {
    let server = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    tokio::spawn(ns_responder(server));

    let mut pool = ResolverPool::new(vec![addr])?;
    let special = discover_ns(
        &pool,
        &["example.com".to_string(), "unresolvable.org".to_string()],
        Duration::from_millis(500),
    )
    .await;

    assert_eq!(
        special.get("example.com"),
        Some(&vec!["1.1.1.1:53".parse()?])
    );
    // an apex whose NS lookup fails keeps using the default pool
    assert!(!special.contains_key("unresolvable.org"));

    pool.set_special(special);
    assert_eq!(pool.select("example.com"), "1.1.1.1:53".parse()?);
    assert_eq!(pool.select("other.org"), addr);
    Ok(())
}

use anyhow::Result;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{rdata::A, RData, Record};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use subrake::output::Answer;
use subrake::progress::Metrics;
use subrake::resolver::ResolverPool;
use subrake::wildcard::{
    detect_profiles, is_synthetic, spawn_filter, WildFilterMode, WildcardProfile,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

fn answer(name: &str, addresses: &[IpAddr]) -> Answer {
    Answer {
        name: name.to_string(),
        apex: "example.com".to_string(),
        addresses: addresses.to_vec(),
        cname: Vec::new(),
        suppressed: false,
    }
}

/// Answers every A query with the same address, like a wildcard apex.
/// With `answer_ip` set to `None` every query gets NXDOMAIN instead.
async fn responder(socket: UdpSocket, answer_ip: Option<Ipv4Addr>) {
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
        let mut response = Message::new();
        response
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .set_recursion_available(true);
        match answer_ip {
            Some(ip) => {
                response.set_response_code(ResponseCode::NoError);
                response.add_answer(Record::from_rdata(query.name().clone(), 60, RData::A(A(ip))));
            }
            None => {
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
async fn detection_marks_wildcard_apexes_and_captures_addresses() -> Result<()> {
    let server = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    tokio::spawn(responder(server, Some(Ipv4Addr::new(1, 2, 3, 4))));

    let pool = ResolverPool::new(vec![addr])?;
    let profiles = detect_profiles(
        &["example.com".to_string()],
        &pool,
        Duration::from_millis(500),
    )
    .await;
    let profile = profiles.get("example.com").expect("profile recorded");
    assert!(profile.wildcard);
    assert!(profile.addresses.contains(&ip(1, 2, 3, 4)));
    Ok(())
}

#[tokio::test]
async fn detection_leaves_honest_apexes_unmarked() -> Result<()> {
    let server = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    tokio::spawn(responder(server, None));

    let pool = ResolverPool::new(vec![addr])?;
    let profiles = detect_profiles(
        &["example.com".to_string()],
        &pool,
        Duration::from_millis(500),
    )
    .await;
    let profile = profiles.get("example.com").expect("profile recorded");
    assert!(!profile.wildcard);
    assert!(profile.addresses.is_empty());
    Ok(())
}

#[test]
fn synthetic_answers_are_nonempty_subsets_of_the_profile() {
    let profile = WildcardProfile {
        wildcard: true,
        addresses: [ip(1, 2, 3, 4), ip(5, 6, 7, 8)].into_iter().collect(),
    };
    assert!(is_synthetic(&[ip(1, 2, 3, 4)], &profile));
    assert!(is_synthetic(&[ip(1, 2, 3, 4), ip(5, 6, 7, 8)], &profile));
    assert!(!is_synthetic(&[ip(1, 2, 3, 4), ip(9, 9, 9, 9)], &profile));
    assert!(!is_synthetic(&[], &profile));
    assert!(!is_synthetic(&[ip(1, 2, 3, 4)], &WildcardProfile::default()));
}

#[tokio::test]
async fn local_mode_suppresses_synthetic_answers() -> Result<()> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "example.com".to_string(),
        WildcardProfile {
            wildcard: true,
            addresses: [ip(1, 2, 3, 4)].into_iter().collect(),
        },
    );
    let metrics = Metrics::new();
    let (raw_tx, raw_rx) = mpsc::channel(8);
    let (accepted_tx, mut accepted_rx) = mpsc::channel(8);
    let filter = spawn_filter(
        WildFilterMode::Local,
        Arc::new(profiles),
        Arc::new(ResolverPool::builtin()),
        Duration::from_millis(200),
        metrics.clone(),
        raw_rx,
        accepted_tx,
    );

    raw_tx
        .send(answer("synthetic.example.com", &[ip(1, 2, 3, 4)]))
        .await?;
    raw_tx
        .send(answer("real.example.com", &[ip(8, 8, 8, 8)]))
        .await?;
    drop(raw_tx);
    filter.await?;

    let mut passed = Vec::new();
    while let Some(a) = accepted_rx.recv().await {
        passed.push(a.name);
    }
    assert_eq!(passed, vec!["real.example.com"]);
    assert_eq!(metrics.filtered.load(Ordering::Relaxed), 1);
    Ok(())
}

#[tokio::test]
async fn none_mode_passes_everything_through() -> Result<()> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "example.com".to_string(),
        WildcardProfile {
            wildcard: true,
            addresses: [ip(1, 2, 3, 4)].into_iter().collect(),
        },
    );
    let metrics = Metrics::new();
    let (raw_tx, raw_rx) = mpsc::channel(8);
    let (accepted_tx, mut accepted_rx) = mpsc::channel(8);
    let filter = spawn_filter(
        WildFilterMode::None,
        Arc::new(profiles),
        Arc::new(ResolverPool::builtin()),
        Duration::from_millis(200),
        metrics.clone(),
        raw_rx,
        accepted_tx,
    );

    raw_tx
        .send(answer("synthetic.example.com", &[ip(1, 2, 3, 4)]))
        .await?;
    drop(raw_tx);
    filter.await?;

    let mut passed = Vec::new();
    while let Some(a) = accepted_rx.recv().await {
        passed.push(a.name);
    }
    assert_eq!(passed, vec!["synthetic.example.com"]);
    assert_eq!(metrics.filtered.load(Ordering::Relaxed), 0);
    Ok(())
}

#[tokio::test]
async fn remote_mode_drops_names_that_reconfirm_as_synthetic() -> Result<()> {
    // the re-query hits a resolver that answers everything with the
    // wildcard address, so nothing reconfirms
    let server = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    tokio::spawn(responder(server, Some(Ipv4Addr::new(1, 2, 3, 4))));

    let mut profiles = HashMap::new();
    profiles.insert(
        "example.com".to_string(),
        WildcardProfile {
            wildcard: true,
            addresses: [ip(1, 2, 3, 4)].into_iter().collect(),
        },
    );
    let metrics = Metrics::new();
    let (raw_tx, raw_rx) = mpsc::channel(8);
    let (accepted_tx, mut accepted_rx) = mpsc::channel(8);
    let filter = spawn_filter(
        WildFilterMode::Remote,
        Arc::new(profiles),
        Arc::new(ResolverPool::new(vec![addr])?),
        Duration::from_millis(500),
        metrics.clone(),
        raw_rx,
        accepted_tx,
    );

    raw_tx
        .send(answer("candidate.example.com", &[ip(9, 9, 9, 9)]))
        .await?;
    drop(raw_tx);
    filter.await?;

    assert!(accepted_rx.recv().await.is_none());
    assert_eq!(metrics.filtered.load(Ordering::Relaxed), 1);
    Ok(())
}

#[tokio::test]
async fn remote_mode_keeps_names_with_stable_distinct_answers() -> Result<()> {
    // the re-query resolver returns a distinct, non-synthetic address
    let server = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    tokio::spawn(responder(server, Some(Ipv4Addr::new(9, 9, 9, 9))));

    let mut profiles = HashMap::new();
    profiles.insert(
        "example.com".to_string(),
        WildcardProfile {
            wildcard: true,
            addresses: [ip(1, 2, 3, 4)].into_iter().collect(),
        },
    );
    let metrics = Metrics::new();
    let (raw_tx, raw_rx) = mpsc::channel(8);
    let (accepted_tx, mut accepted_rx) = mpsc::channel(8);
    let filter = spawn_filter(
        WildFilterMode::Remote,
        Arc::new(profiles),
        Arc::new(ResolverPool::new(vec![addr])?),
        Duration::from_millis(500),
        metrics.clone(),
        raw_rx,
        accepted_tx,
    );

    raw_tx
        .send(answer("candidate.example.com", &[ip(9, 9, 9, 9)]))
        .await?;
    drop(raw_tx);
    filter.await?;

    let kept = accepted_rx.recv().await.expect("answer kept");
    assert_eq!(kept.name, "candidate.example.com");
    assert_eq!(metrics.filtered.load(Ordering::Relaxed), 0);
    Ok(())
}

use anyhow::Result;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use subrake::generator::Candidate;
use subrake::table::{PendingQuery, RetryTable};
use tokio::time::timeout;

fn resolver() -> SocketAddr {
    "127.0.0.1:53".parse().unwrap()
}

fn pending(name: &str, resolver: SocketAddr, deadline: Instant) -> PendingQuery {
    PendingQuery {
        candidate: Candidate::new(name, "example.com"),
        resolver,
        deadline,
    }
}

#[tokio::test]
async fn live_identifiers_are_unique() -> Result<()> {
    let table = RetryTable::new(512);
    let mut ids = HashSet::new();
    for i in 0..512 {
        let permit = table.reserve().await?;
        let id = table.insert(
            pending(
                &format!("h{}.example.com", i),
                resolver(),
                Instant::now() + Duration::from_secs(5),
            ),
            permit,
        );
        assert!(ids.insert(id), "duplicate transaction id {}", id);
    }
    assert_eq!(table.len(), 512);
    Ok(())
}

#[tokio::test]
async fn admission_blocks_when_full_and_frees_on_complete() -> Result<()> {
    let table = RetryTable::new(2);
    let permit = table.reserve().await?;
    let first = table.insert(
        pending(
            "a.example.com",
            resolver(),
            Instant::now() + Duration::from_secs(5),
        ),
        permit,
    );
    let permit = table.reserve().await?;
    let _second = table.insert(
        pending(
            "b.example.com",
            resolver(),
            Instant::now() + Duration::from_secs(5),
        ),
        permit,
    );

    assert!(
        timeout(Duration::from_millis(100), table.reserve())
            .await
            .is_err(),
        "third reservation should block at capacity"
    );

    assert!(table.complete(first, resolver()).is_some());
    assert!(timeout(Duration::from_millis(100), table.reserve())
        .await
        .is_ok());
    Ok(())
}

#[tokio::test]
async fn reply_and_expiry_are_mutually_exclusive() -> Result<()> {
    let table = RetryTable::new(4);
    let permit = table.reserve().await?;
    let id = table.insert(
        pending(
            "a.example.com",
            resolver(),
            Instant::now() - Duration::from_millis(1),
        ),
        permit,
    );
    let expired = table.expire(Instant::now());
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].candidate.name, "a.example.com");
    // the scanner owns the entry now; a late reply finds nothing
    assert!(table.complete(id, resolver()).is_none());
    table.release();
    Ok(())
}

#[tokio::test]
async fn expire_skips_entries_still_in_flight() -> Result<()> {
    let table = RetryTable::new(4);
    let permit = table.reserve().await?;
    let _fresh = table.insert(
        pending(
            "a.example.com",
            resolver(),
            Instant::now() + Duration::from_secs(5),
        ),
        permit,
    );
    assert!(table.expire(Instant::now()).is_empty());
    assert_eq!(table.len(), 1);
    Ok(())
}

#[tokio::test]
async fn wrong_source_reply_is_ignored() -> Result<()> {
    let table = RetryTable::new(4);
    let permit = table.reserve().await?;
    let id = table.insert(
        pending(
            "a.example.com",
            resolver(),
            Instant::now() + Duration::from_secs(5),
        ),
        permit,
    );
    let stranger: SocketAddr = "10.9.8.7:53".parse()?;
    assert!(table.complete(id, stranger).is_none());
    assert_eq!(table.len(), 1);
    assert!(table.complete(id, resolver()).is_some());
    assert!(table.is_empty());
    Ok(())
}

#[tokio::test]
async fn retransmission_keeps_the_slot() -> Result<()> {
    let table = RetryTable::new(1);
    let permit = table.reserve().await?;
    table.insert(
        pending(
            "a.example.com",
            resolver(),
            Instant::now() - Duration::from_millis(1),
        ),
        permit,
    );
    let mut expired = table.expire(Instant::now());
    let mut entry = expired.pop().expect("entry expired");
    entry.deadline = Instant::now() + Duration::from_secs(5);
    table.reinsert(entry);
    assert_eq!(table.len(), 1);
    assert!(
        timeout(Duration::from_millis(100), table.reserve())
            .await
            .is_err(),
        "the single slot must stay taken across a retransmission"
    );
    Ok(())
}

#[test]
fn capacity_is_clamped_below_the_id_space() {
    let table = RetryTable::new(1_000_000);
    assert!(table.capacity() <= 60_000);
}

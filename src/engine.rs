//! The pipelined DNS send/receive engine
//!
//! A single sender owns the candidate stream and the UDP write side; a
//! single receiver owns the read side; a timeout scanner enforces
//! deadlines on a sub-second tick. The retry table is the synchronization
//! point between the three. Per query the sender awaits a rate-governor
//! token, registers the query under a fresh transaction identifier and
//! only then transmits, so a reply can never outrun its table entry.
//!
//! Negative answers (NXDOMAIN, empty answer set) terminate their pending
//! query silently; they are not results. Expired queries are retransmitted
//! under a new identifier up to the retry ceiling, then dropped.

use anyhow::{Context, Result};
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::generator::Candidate;
use crate::output::Answer;
use crate::packet;
use crate::progress::Metrics;
use crate::rate_limit::RateGovernor;
use crate::resolver::ResolverPool;
use crate::table::{PendingQuery, RetryTable};

/// Tick of the timeout scanner.
const SCAN_INTERVAL: Duration = Duration::from_millis(100);

pub struct EngineOptions {
    pub rate_pps: u64,
    /// Lifetime of one transmission before it counts as lost.
    pub timeout: Duration,
    /// Retransmissions per query before a permanent drop.
    pub max_retries: u32,
}

pub struct Engine {
    socket: Arc<UdpSocket>,
    table: Arc<RetryTable>,
    pool: Arc<ResolverPool>,
    governor: Arc<RateGovernor>,
    metrics: Arc<Metrics>,
    opts: EngineOptions,
}

impl Engine {
    /// Binds the shared UDP socket and sizes the retry table to the
    /// rate × timeout product, so in-flight memory is independent of the
    /// total candidate count.
    pub async fn bind(
        opts: EngineOptions,
        pool: Arc<ResolverPool>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("failed to bind udp socket")?;
        let ceiling =
            (opts.rate_pps as usize).saturating_mul(opts.timeout.as_secs().max(1) as usize);
        Ok(Self {
            socket: Arc::new(socket),
            table: Arc::new(RetryTable::new(ceiling)),
            pool,
            governor: Arc::new(RateGovernor::new(opts.rate_pps)),
            metrics,
            opts,
        })
    }

    pub fn table(&self) -> &RetryTable {
        &self.table
    }

    /// Drives the pipeline to completion.
    ///
    /// Consumes the candidate stream, then gives in-flight queries a
    /// bounded grace period (one timeout cycle after a cancellation, the
    /// full retry schedule otherwise) before shutting the receiver and
    /// scanner down. Accepted answers leave through `answers`; the channel
    /// closes when the engine is done.
    pub async fn run(
        self: Arc<Self>,
        mut candidates: mpsc::Receiver<Candidate>,
        answers: mpsc::Sender<Answer>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = tokio::spawn(self.clone().receive_loop(answers, shutdown_rx.clone()));
        let scanner = tokio::spawn(self.clone().scan_loop(shutdown_rx));

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = wait_flag(&mut cancel) => {
                    cancelled = true;
                    break;
                }
                next = candidates.recv() => {
                    match next {
                        Some(candidate) => self.dispatch(candidate).await?,
                        None => break,
                    }
                }
            }
        }
        drop(candidates);

        let grace = if cancelled {
            info!("cancelled, draining in-flight queries for one timeout cycle");
            self.opts.timeout
        } else {
            // The scanner finishes every entry within the retry schedule.
            self.opts.timeout * (self.opts.max_retries + 1) + Duration::from_secs(1)
        };
        let deadline = Instant::now() + grace;
        let mut tick = tokio::time::interval(Duration::from_millis(50));
        while !self.table.is_empty() && Instant::now() < deadline {
            tick.tick().await;
        }

        let _ = shutdown_tx.send(true);
        let _ = receiver.await;
        let _ = scanner.await;
        Ok(())
    }

    /// One outbound query: token, slot, identifier, resolver, packet,
    /// transmit. Table insertion happens before the wire write.
    async fn dispatch(&self, candidate: Candidate) -> Result<()> {
        self.governor.acquire().await;
        let permit = self.table.reserve().await?;
        let resolver = self.pool.select(&candidate.apex);
        let name = candidate.name.clone();
        let pending = PendingQuery {
            candidate,
            resolver,
            deadline: Instant::now() + self.opts.timeout,
        };
        let id = self.table.insert(pending, permit);
        match packet::build_query(id, &name, RecordType::A) {
            Ok(bytes) => {
                self.metrics.sent.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.socket.send_to(&bytes, resolver).await {
                    // Transient; the scanner will retransmit this entry.
                    debug!(name = %name, error = %e, "udp send failed");
                }
            }
            Err(e) => {
                // Unencodable name: remove the entry instead of letting it
                // cycle through the retry schedule.
                debug!(name = %name, error = %e, "query encode failed");
                let _ = self.table.complete(id, resolver);
            }
        }
        Ok(())
    }

    /// Read side of the socket: match replies to pending queries and
    /// forward accepted answers.
    async fn receive_loop(
        self: Arc<Self>,
        answers: mpsc::Sender<Answer>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut buf = [0u8; 1500];
        loop {
            tokio::select! {
                _ = wait_flag(&mut shutdown) => break,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(value) => value,
                        Err(e) => {
                            debug!(error = %e, "udp recv failed");
                            continue;
                        }
                    };
                    let message = match packet::parse_reply(&buf[..len]) {
                        Ok(message) => message,
                        Err(e) => {
                            debug!(error = %e, "dropping undecodable reply");
                            continue;
                        }
                    };
                    // Late, spurious or wrong-source replies have no entry.
                    let Some(pending) = self.table.complete(message.id(), from) else {
                        continue;
                    };
                    self.metrics.received.fetch_add(1, Ordering::Relaxed);
                    if message.response_code() != ResponseCode::NoError {
                        continue;
                    }
                    let records = packet::extract_records(&message);
                    if records.addresses.is_empty() {
                        continue;
                    }
                    let answer = Answer {
                        name: pending.candidate.name,
                        apex: pending.candidate.apex,
                        addresses: records.addresses,
                        cname: records.cname,
                        suppressed: false,
                    };
                    if answers.send(answer).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Deadline enforcement independent of reply arrival.
    async fn scan_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(SCAN_INTERVAL);
        loop {
            tokio::select! {
                _ = wait_flag(&mut shutdown) => break,
                _ = tick.tick() => {
                    for expired in self.table.expire(Instant::now()) {
                        self.handle_expired(expired).await;
                    }
                }
            }
        }
    }

    async fn handle_expired(&self, mut pending: PendingQuery) {
        if pending.candidate.retries >= self.opts.max_retries {
            debug!(name = %pending.candidate.name, "retry ceiling reached, dropping");
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            self.table.release();
            return;
        }
        pending.candidate.retries += 1;
        // Retransmissions are paced like first transmissions.
        self.governor.acquire().await;
        pending.resolver = self.pool.select(&pending.candidate.apex);
        pending.deadline = Instant::now() + self.opts.timeout;
        let name = pending.candidate.name.clone();
        let resolver = pending.resolver;
        let id = self.table.reinsert(pending);
        match packet::build_query(id, &name, RecordType::A) {
            Ok(bytes) => {
                self.metrics.sent.fetch_add(1, Ordering::Relaxed);
                self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.socket.send_to(&bytes, resolver).await {
                    debug!(name = %name, error = %e, "udp retransmit failed");
                }
            }
            Err(e) => {
                debug!(name = %name, error = %e, "retransmit encode failed");
                let _ = self.table.complete(id, resolver);
            }
        }
    }
}

/// Resolves when the watch flag turns true. If the sender side is gone
/// without ever raising the flag, parks forever so callers fall through to
/// their other select arms.
pub(crate) async fn wait_flag(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

//! Result sinks and the output fan-out
//!
//! Every accepted answer is delivered to a list of sinks over the
//! capability set `{write, close}`. One task per sink drains its own
//! bounded queue, answers arrive in receive order, and `close` runs
//! exactly once after the last write.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::progress::Metrics;

/// A verified record: the name and what the resolver returned for it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub name: String,
    /// Apex the name belongs to, for wildcard-profile lookups. Not part of
    /// any output format.
    pub apex: String,
    pub addresses: Vec<IpAddr>,
    pub cname: Vec<String>,
    /// Set by the wildcard filter; suppressed answers never reach a sink.
    pub suppressed: bool,
}

impl Answer {
    pub fn record_type(&self) -> &'static str {
        if self.cname.is_empty() {
            "A"
        } else {
            "CNAME"
        }
    }

    fn address_list(&self) -> String {
        self.addresses
            .iter()
            .map(|ip| ip.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output consumer capability set.
pub trait Sink: Send {
    fn write(&mut self, answer: &Answer) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputType {
    Txt,
    Json,
    Csv,
}

/// Opens the file sink matching the requested format.
pub fn file_sink(path: &Path, kind: OutputType) -> Result<Box<dyn Sink + Send>> {
    Ok(match kind {
        OutputType::Txt => Box::new(PlainSink::create(path)?),
        OutputType::Json => Box::new(JsonSink::create(path)?),
        OutputType::Csv => Box::new(CsvSink::create(path)?),
    })
}

/// Prints results to stdout; bare names in silent mode.
pub struct ScreenSink {
    silent: bool,
}

impl ScreenSink {
    pub fn new(silent: bool) -> Self {
        Self { silent }
    }
}

impl Sink for ScreenSink {
    fn write(&mut self, answer: &Answer) -> Result<()> {
        if self.silent || answer.addresses.is_empty() {
            println!("{}", answer.name);
        } else {
            println!("{} {}", answer.name, answer.address_list());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One FQDN per line, followed by its address list.
pub struct PlainSink {
    writer: BufWriter<File>,
}

impl PlainSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl Sink for PlainSink {
    fn write(&mut self, answer: &Answer) -> Result<()> {
        if answer.addresses.is_empty() {
            writeln!(self.writer, "{}", answer.name)?;
        } else {
            writeln!(self.writer, "{} {}", answer.name, answer.address_list())?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush output file")
    }
}

/// Newline-delimited JSON objects with `name`, `type`, `addresses`,
/// `cname`.
pub struct JsonSink {
    writer: BufWriter<File>,
}

impl JsonSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl Sink for JsonSink {
    fn write(&mut self, answer: &Answer) -> Result<()> {
        let record = serde_json::json!({
            "name": answer.name,
            "type": answer.record_type(),
            "addresses": answer.addresses,
            "cname": answer.cname,
        });
        writeln!(self.writer, "{}", record)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush output file")
    }
}

/// Header plus one row per answer, same columns as the JSON format.
/// Multi-valued cells are space-separated so no quoting is needed.
pub struct CsvSink {
    writer: BufWriter<File>,
}

impl CsvSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create output file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "name,type,addresses,cname")?;
        Ok(Self { writer })
    }
}

impl Sink for CsvSink {
    fn write(&mut self, answer: &Answer) -> Result<()> {
        writeln!(
            self.writer,
            "{},{},{},{}",
            answer.name,
            answer.record_type(),
            answer.address_list(),
            answer.cname.join(" ")
        )?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush output file")
    }
}

/// Fans accepted answers out to every sink.
///
/// Each sink gets its own bounded lane and task; a slow file sink cannot
/// stall the screen. Order within a lane is the receive order. When the
/// accepted channel closes, lanes drain and every sink is closed once.
pub fn spawn_fanout(
    sinks: Vec<Box<dyn Sink + Send>>,
    mut accepted: mpsc::Receiver<Answer>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lanes = Vec::new();
        let mut tasks = Vec::new();
        for mut sink in sinks {
            let (tx, mut rx) = mpsc::channel::<Arc<Answer>>(1024);
            lanes.push(tx);
            tasks.push(tokio::spawn(async move {
                while let Some(answer) = rx.recv().await {
                    if let Err(e) = sink.write(&answer) {
                        warn!(error = %e, "sink write failed");
                    }
                }
                if let Err(e) = sink.close() {
                    warn!(error = %e, "sink close failed");
                }
            }));
        }

        while let Some(answer) = accepted.recv().await {
            metrics.found.fetch_add(1, Ordering::Relaxed);
            let shared = Arc::new(answer);
            for lane in &lanes {
                let _ = lane.send(shared.clone()).await;
            }
        }

        drop(lanes);
        for task in tasks {
            let _ = task.await;
        }
    })
}

//! Command-line interface for subrake
//!
//! Two subcommands share a common flag set: `enum` discovers and verifies
//! subdomains of one or more apex domains; `verify` re-checks a
//! pre-supplied list of fully-qualified names. Parsing is pure; input
//! gathering and pipeline assembly live in `main`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputType;
use crate::wildcard::WildFilterMode;

#[derive(Parser)]
#[command(
    name = "subrake",
    about = "High-throughput subdomain enumeration and DNS verification engine",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover and verify subdomains of the given apex domains
    #[command(alias = "e")]
    Enum(EnumArgs),
    /// Verify a pre-supplied list of fully-qualified names
    #[command(alias = "v")]
    Verify(VerifyArgs),
}

/// Flags shared by both subcommands.
#[derive(Args)]
pub struct CommonArgs {
    /// Apex domain to work on (repeatable)
    #[arg(short = 'd', long = "domain")]
    pub domains: Vec<String>,

    /// Read additional input names from stdin
    #[arg(long)]
    pub stdin: bool,

    /// File with upstream resolvers, one ip or ip:port per line
    #[arg(short = 'r', long)]
    pub resolvers: Option<PathBuf>,

    /// Outbound bandwidth budget, e.g. 2M or 500k
    #[arg(short = 'b', long, default_value = "2M")]
    pub band: String,

    /// Retransmissions per query before it is dropped
    #[arg(long, default_value_t = 3)]
    pub retry: u32,

    /// Seconds before an unanswered query expires
    #[arg(long, default_value_t = 6)]
    pub timeout: u64,

    /// Output file path
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Output file format
    #[arg(long = "output-type", value_enum, default_value_t = OutputType::Txt)]
    pub output_type: OutputType,

    /// Quiet logging, bare names on screen
    #[arg(long)]
    pub silent: bool,

    /// Do not print results to the screen
    #[arg(long = "not-print", alias = "np")]
    pub not_print: bool,

    /// Wildcard suppression mode
    #[arg(long = "wild-filter-mode", value_enum, default_value_t = WildFilterMode::Local)]
    pub wild_filter_mode: WildFilterMode,

    /// Expand dictionary words with predicted variants
    #[arg(long)]
    pub predict: bool,

    /// Network interface; only honored by raw-socket capture, inert in
    /// UDP mode
    #[arg(short = 'e', long = "eth")]
    pub eth: Option<String>,
}

#[derive(Args)]
pub struct EnumArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Dictionary of subdomain prefixes (built-in list when omitted)
    #[arg(short = 'f', long = "filename")]
    pub dictionary: Option<PathBuf>,

    /// File with apex domains, one per line
    #[arg(long = "domain-list", alias = "ds")]
    pub domain_list: Option<PathBuf>,

    /// Resolve NS records and query each apex's authoritative servers
    #[arg(long)]
    pub ns: bool,

    /// Only verify names harvested from online sources
    #[arg(long = "online-only", conflicts_with = "no_online")]
    pub online_only: bool,

    /// Skip online sources entirely
    #[arg(long = "no-online")]
    pub no_online: bool,
}

#[derive(Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// File of fully-qualified names to verify
    #[arg(short = 'f', long = "filename")]
    pub file: Option<PathBuf>,
}

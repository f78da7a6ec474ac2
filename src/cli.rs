use clap::{Args, Parser, Subcommand};

use crate::snapshot::DEFAULT_PERSIST_ATTEMPTS;
use crate::transport::Channel;

/// DNS freshness and browser DNS cache measurement tool
#[derive(Parser, Debug)]
#[command(name = "dns-freshness")]
#[command(about = "Measure DNS answer freshness across resolver channels and browser DNS cache hit rates")]
pub struct Cli {
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Load ranked sites through a browser harness and snapshot their timing entries
	Collect(CollectArgs),
	/// Resolve every site's subresource domains over one channel and snapshot the TTLs
	Ttls(TtlsArgs),
	/// Summarize domain counts, TTLs, refresh rates and DNS cache hit rates
	Report(ReportArgs),
	/// Resolve domains over one channel and print the answers
	Resolve(ResolveArgs),
}

/// Options shared by the commands that send DNS queries
#[derive(Args, Debug)]
pub struct QueryArgs {
	/// Resolution channel: system, google or cloudflare
	#[arg(short = 'c', long = "channel", default_value = "system")]
	pub channel: Channel,

	/// Per-query timeout in milliseconds
	#[arg(short = 't', long = "timeout", default_value = "5000")]
	pub timeout: u64,

	/// Nameserver for the system channel instead of /etc/resolv.conf (repeatable)
	#[arg(long = "nameserver")]
	pub nameservers: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CollectArgs {
	/// Ranked domain list (rank,domain CSV or one domain per line)
	#[arg(short = 'd', long = "domains")]
	pub domains: String,

	/// Snapshot file; an existing one is resumed
	#[arg(short = 'o', long = "snapshot")]
	pub snapshot: String,

	/// Program that loads a URL in a fresh browser session and prints its
	/// performance entries as JSON
	#[arg(long = "harness")]
	pub harness: String,

	/// Extra argument passed to the harness before the URL (repeatable)
	#[arg(long = "harness-arg", allow_hyphen_values = true)]
	pub harness_args: Vec<String>,

	/// Maximum number of sites in the snapshot
	#[arg(short = 'n', long = "cap", default_value = "10000")]
	pub cap: usize,

	/// Shuffle the ranked list with this seed instead of following rank order
	#[arg(short = 's', long = "seed")]
	pub seed: Option<u64>,

	/// Navigation timeout in seconds
	#[arg(long = "navigation-timeout", default_value = "60")]
	pub navigation_timeout: u64,

	/// Snapshot write attempts after a failed write
	#[arg(long = "persist-attempts", default_value_t = DEFAULT_PERSIST_ATTEMPTS)]
	pub persist_attempts: u32,
}

#[derive(Args, Debug)]
pub struct TtlsArgs {
	/// Timing snapshot produced by `collect`
	#[arg(long = "timings")]
	pub timings: String,

	/// TTL snapshot to write; an existing one is resumed
	#[arg(short = 'o', long = "output")]
	pub output: String,

	#[command(flatten)]
	pub query: QueryArgs,

	/// Delay between queries in milliseconds
	#[arg(long = "spacing", default_value = "5")]
	pub spacing: u64,

	/// Maximum number of sites to resolve
	#[arg(short = 'n', long = "cap", default_value = "10000")]
	pub cap: usize,

	/// Snapshot write attempts after a failed write
	#[arg(long = "persist-attempts", default_value_t = DEFAULT_PERSIST_ATTEMPTS)]
	pub persist_attempts: u32,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
	/// Timing snapshot produced by `collect`
	#[arg(long = "timings")]
	pub timings: String,

	/// TTL snapshot for a channel, as channel=path (repeatable)
	#[arg(long = "ttls")]
	pub ttls: Vec<String>,

	/// Output CSV file path with one row per site
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
	#[command(flatten)]
	pub query: QueryArgs,

	/// Also print the answers in pre-resolution header form (host|ip|ttl,...)
	#[arg(long = "header")]
	pub header: bool,

	/// Domains to resolve
	#[arg(required = true)]
	pub domains: Vec<String>,
}

/// Split a `channel=path` argument.
pub fn parse_channel_path(arg: &str) -> Result<(Channel, String), String> {
	let (channel, path) = arg.split_once('=')
		.ok_or_else(|| format!("expected channel=path, got '{}'", arg))?;
	if path.is_empty() {
		return Err(format!("missing path in '{}'", arg));
	}
	Ok((channel.parse()?, path.to_string()))
}

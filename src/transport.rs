use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::snapshot::DEFAULT_PERSIST_ATTEMPTS;

/// Resolution channel a TTL was measured over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
	/// Host's configured stub resolver
	System,
	/// Google's JSON DNS-over-HTTPS endpoint
	#[serde(rename = "google")]
	GoogleDoh,
	/// Cloudflare's JSON DNS-over-HTTPS endpoint
	#[serde(rename = "cloudflare")]
	CloudflareDoh,
}

impl Channel {
	pub const ALL: [Channel; 3] = [Channel::System, Channel::GoogleDoh, Channel::CloudflareDoh];

	pub fn as_str(&self) -> &'static str {
		match self {
			Channel::System => "system",
			Channel::GoogleDoh => "google",
			Channel::CloudflareDoh => "cloudflare",
		}
	}
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Channel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"system" | "normal" => Ok(Channel::System),
			"google" => Ok(Channel::GoogleDoh),
			"cloudflare" => Ok(Channel::CloudflareDoh),
			other => Err(format!(
				"unknown channel '{}' (expected system, google or cloudflare)", other
			)),
		}
	}
}

/// Successful A-record resolution over one channel.
///
/// Failures never produce a record; the adapters return `None` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
	pub domain: String,
	pub ip: String,
	/// Seconds the answer may be cached; 0 means non-cacheable
	pub ttl: u32,
	pub channel: Channel,
}

/// Settings shared by every resolver adapter
#[derive(Debug, Clone)]
pub struct ResolverSettings {
	/// Upper bound on a single lookup or DoH request
	pub timeout: Duration,
}

impl Default for ResolverSettings {
	fn default() -> Self {
		Self { timeout: Duration::from_secs(5) }
	}
}

/// Batch run configuration, threaded explicitly into the long-running loops
#[derive(Debug, Clone)]
pub struct MeasureConfig {
	/// Stop once this many sites are in the snapshot
	pub cap: usize,
	/// Delay between consecutive queries, to stay under provider rate limits
	pub inter_query_spacing: Duration,
	/// Write attempts after a failed snapshot write before giving up
	pub persist_attempts: u32,
	pub seed: Option<u64>,
}

impl Default for MeasureConfig {
	fn default() -> Self {
		Self {
			cap: 10_000,
			inter_query_spacing: Duration::ZERO,
			persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
			seed: None,
		}
	}
}

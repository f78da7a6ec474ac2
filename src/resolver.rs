use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hickory_proto::rr::RecordType;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::dns::{parse_doh_json, ResolveError};
use crate::transport::{Channel, ResolutionResult, ResolverSettings};

const GOOGLE_DOH_ENDPOINT: &str = "https://dns.google/resolve";
const CLOUDFLARE_DOH_ENDPOINT: &str = "https://cloudflare-dns.com/dns-query";
const DNS_JSON: &str = "application/dns-json";

/// A single resolution channel.
///
/// `query` is total: whatever goes wrong in `try_query` is logged and
/// reported as `None`, so a batch over thousands of domains never aborts
/// because one upstream misbehaved.
#[async_trait]
pub trait Resolve: Send + Sync {
	fn channel(&self) -> Channel;

	/// Resolve one A record, classifying any failure.
	async fn try_query(&self, domain: &str) -> Result<ResolutionResult, ResolveError>;

	async fn query(&self, domain: &str) -> Option<ResolutionResult> {
		match self.try_query(domain).await {
			Ok(result) => Some(result),
			Err(e) => {
				debug!(channel = %self.channel(), domain, error = %e, "resolution failed");
				None
			}
		}
	}
}

/// Build the adapter for a channel.
pub fn for_channel(
	channel: Channel,
	settings: &ResolverSettings,
	nameservers: &[SocketAddr],
) -> Result<Box<dyn Resolve>, ResolveError> {
	Ok(match channel {
		Channel::System if nameservers.is_empty() => Box::new(SystemResolver::new(settings)),
		Channel::System => Box::new(SystemResolver::with_nameservers(nameservers, settings)),
		Channel::GoogleDoh => Box::new(DohResolver::new(DohProvider::Google, settings)?),
		Channel::CloudflareDoh => Box::new(DohResolver::new(DohProvider::Cloudflare, settings)?),
	})
}

/// Stub resolution through the host's resolver configuration.
pub struct SystemResolver {
	resolver: TokioResolver,
	settings: ResolverSettings,
}

impl SystemResolver {
	/// Use /etc/resolv.conf, falling back to the library's default upstreams
	/// when the host configuration cannot be read.
	pub fn new(settings: &ResolverSettings) -> Self {
		let opts = Self::options(settings);
		let resolver = match TokioResolver::builder_tokio() {
			Ok(builder) => builder.with_options(opts).build(),
			Err(e) => {
				warn!(error = %e, "cannot read system resolver config, using defaults");
				TokioResolver::builder_with_config(
					ResolverConfig::default(),
					TokioConnectionProvider::default(),
				)
				.with_options(opts)
				.build()
			}
		};
		Self { resolver, settings: settings.clone() }
	}

	/// Use explicit nameservers instead of the host configuration.
	pub fn with_nameservers(nameservers: &[SocketAddr], settings: &ResolverSettings) -> Self {
		let mut group = NameServerConfigGroup::new();
		for addr in nameservers {
			group.merge(NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true));
		}
		let config = ResolverConfig::from_parts(None, vec![], group);
		let resolver = TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
			.with_options(Self::options(settings))
			.build();
		Self { resolver, settings: settings.clone() }
	}

	fn options(settings: &ResolverSettings) -> ResolverOpts {
		let mut opts = ResolverOpts::default();
		opts.timeout = settings.timeout;
		// One attempt per query; a failure is recorded, not retried
		opts.attempts = 1;
		// Names are always absolute, never expanded with search domains
		opts.ndots = 0;
		// Every query must reach the upstream to observe its TTL
		opts.cache_size = 0;
		opts
	}
}

#[async_trait]
impl Resolve for SystemResolver {
	fn channel(&self) -> Channel {
		Channel::System
	}

	async fn try_query(&self, domain: &str) -> Result<ResolutionResult, ResolveError> {
		let lookup = tokio::time::timeout(self.settings.timeout, self.resolver.ipv4_lookup(domain))
			.await
			.map_err(|_| ResolveError::Timeout)?
			.map_err(|e| ResolveError::Lookup(e.to_string()))?;

		let ip = lookup.iter().next().ok_or(ResolveError::NoAddressRecord)?;
		let ttl = lookup.as_lookup().records().iter()
			.find(|r| r.record_type() == RecordType::A)
			.map(|r| r.ttl())
			.ok_or(ResolveError::NoAddressRecord)?;

		Ok(ResolutionResult {
			domain: domain.to_string(),
			ip: ip.0.to_string(),
			ttl,
			channel: Channel::System,
		})
	}
}

/// Public DoH JSON providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DohProvider {
	Google,
	Cloudflare,
}

impl DohProvider {
	pub fn endpoint(&self) -> &'static str {
		match self {
			DohProvider::Google => GOOGLE_DOH_ENDPOINT,
			DohProvider::Cloudflare => CLOUDFLARE_DOH_ENDPOINT,
		}
	}

	pub fn channel(&self) -> Channel {
		match self {
			DohProvider::Google => Channel::GoogleDoh,
			DohProvider::Cloudflare => Channel::CloudflareDoh,
		}
	}

	/// Cloudflare only serves JSON when asked for it explicitly.
	fn accept_header(&self) -> Option<&'static str> {
		match self {
			DohProvider::Google => None,
			DohProvider::Cloudflare => Some(DNS_JSON),
		}
	}
}

/// Resolution through a DoH JSON API (`GET ?name=<domain>&type=A`).
pub struct DohResolver {
	provider: DohProvider,
	endpoint: String,
	client: reqwest::Client,
}

impl DohResolver {
	pub fn new(provider: DohProvider, settings: &ResolverSettings) -> Result<Self, ResolveError> {
		Self::with_endpoint(provider, provider.endpoint(), settings)
	}

	/// Talk to `endpoint` using the provider's request conventions.
	pub fn with_endpoint(
		provider: DohProvider,
		endpoint: &str,
		settings: &ResolverSettings,
	) -> Result<Self, ResolveError> {
		let client = reqwest::Client::builder()
			.timeout(settings.timeout)
			.build()
			.map_err(|e| ResolveError::Http(e.to_string()))?;
		Ok(Self {
			provider,
			endpoint: endpoint.to_string(),
			client,
		})
	}
}

fn classify_http_error(e: reqwest::Error) -> ResolveError {
	if e.is_timeout() {
		ResolveError::Timeout
	} else {
		ResolveError::Http(e.to_string())
	}
}

#[async_trait]
impl Resolve for DohResolver {
	fn channel(&self) -> Channel {
		self.provider.channel()
	}

	async fn try_query(&self, domain: &str) -> Result<ResolutionResult, ResolveError> {
		let mut request = self.client
			.get(&self.endpoint)
			.query(&[("name", domain), ("type", "A")]);
		if let Some(accept) = self.provider.accept_header() {
			request = request.header(reqwest::header::ACCEPT, accept);
		}

		let response = request.send().await.map_err(classify_http_error)?;
		if response.status() != StatusCode::OK {
			return Err(ResolveError::Status(response.status().as_u16()));
		}
		let body = response.bytes().await.map_err(classify_http_error)?;
		parse_doh_json(&body, self.channel())
	}
}

/// Parse a nameserver address into a SocketAddr.
///
/// Supports formats:
///   "1.1.1.1"              -- IPv4, default port 53
///   "1.1.1.1:53"           -- IPv4 with explicit port
///   "2606:4700::1111"      -- bare IPv6, default port 53
///   "[2606:4700::1111]:53" -- bracketed IPv6 with port
pub fn parse_nameserver(input: &str) -> Result<SocketAddr> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		return Err(anyhow!("empty nameserver address"));
	}

	let addr: SocketAddr = if trimmed.starts_with('[') {
		trimmed.parse()
			.map_err(|e| anyhow!("invalid bracketed IPv6 address '{}': {}", trimmed, e))?
	} else if trimmed.contains("::") || trimmed.matches(':').count() > 1 {
		let ip = trimmed.parse()
			.map_err(|e| anyhow!("invalid IPv6 address '{}': {}", trimmed, e))?;
		SocketAddr::new(ip, 53)
	} else if let Ok(addr) = trimmed.parse::<SocketAddr>() {
		addr
	} else {
		let ip = trimmed.parse()
			.map_err(|e| anyhow!("invalid IP address '{}': {}", trimmed, e))?;
		SocketAddr::new(ip, 53)
	};
	Ok(addr)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;
	use tokio::sync::oneshot;

	/// Serve exactly one HTTP response and hand back the raw request head.
	async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let (tx, rx) = oneshot::channel();

		tokio::spawn(async move {
			let (mut stream, _) = listener.accept().await.unwrap();
			let mut head = Vec::new();
			let mut buf = [0u8; 1024];
			while !head.windows(4).any(|w| w == b"\r\n\r\n") {
				let n = stream.read(&mut buf).await.unwrap();
				if n == 0 {
					break;
				}
				head.extend_from_slice(&buf[..n]);
			}
			let response = format!(
				"HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
				status, body.len(), body,
			);
			stream.write_all(response.as_bytes()).await.unwrap();
			stream.shutdown().await.ok();
			let _ = tx.send(String::from_utf8_lossy(&head).to_string());
		});

		(format!("http://{}/resolve", addr), rx)
	}

	fn settings() -> ResolverSettings {
		ResolverSettings { timeout: Duration::from_secs(2) }
	}

	const OK_BODY: &str =
		r#"{"Status":0,"Answer":[{"name":"example.com.","type":1,"TTL":120,"data":"93.184.216.34"}]}"#;

	#[tokio::test]
	async fn test_google_doh_success() {
		let (url, head) = serve_once("200 OK", OK_BODY).await;
		let resolver = DohResolver::with_endpoint(DohProvider::Google, &url, &settings()).unwrap();

		let r = resolver.query("example.com").await.unwrap();
		assert_eq!(r.ip, "93.184.216.34");
		assert_eq!(r.ttl, 120);
		assert_eq!(r.channel, Channel::GoogleDoh);

		let head = head.await.unwrap();
		let request_line = head.lines().next().unwrap();
		assert!(request_line.starts_with("GET /resolve?"), "{}", request_line);
		assert!(request_line.contains("name=example.com"));
		assert!(request_line.contains("type=A"));
		assert!(!head.to_ascii_lowercase().contains(DNS_JSON));
	}

	#[tokio::test]
	async fn test_cloudflare_doh_sends_accept_header() {
		let (url, head) = serve_once("200 OK", OK_BODY).await;
		let resolver = DohResolver::with_endpoint(DohProvider::Cloudflare, &url, &settings()).unwrap();

		let r = resolver.query("example.com").await.unwrap();
		assert_eq!(r.channel, Channel::CloudflareDoh);

		let head = head.await.unwrap().to_ascii_lowercase();
		assert!(head.contains("accept: application/dns-json"), "{}", head);
	}

	#[tokio::test]
	async fn test_doh_non_200_is_absent() {
		let (url, _head) = serve_once("503 Service Unavailable", OK_BODY).await;
		let resolver = DohResolver::with_endpoint(DohProvider::Google, &url, &settings()).unwrap();

		let err = resolver.try_query("example.com").await.unwrap_err();
		assert!(matches!(err, ResolveError::Status(503)));
	}

	#[tokio::test]
	async fn test_doh_missing_answer_is_absent() {
		let (url, _head) = serve_once("200 OK", r#"{"Status":3}"#).await;
		let resolver = DohResolver::with_endpoint(DohProvider::Google, &url, &settings()).unwrap();

		assert!(resolver.query("nope.invalid").await.is_none());
	}

	#[tokio::test]
	async fn test_doh_garbage_body_is_absent() {
		let (url, _head) = serve_once("200 OK", "<html>oops</html>").await;
		let resolver = DohResolver::with_endpoint(DohProvider::Cloudflare, &url, &settings()).unwrap();

		let err = resolver.try_query("example.com").await.unwrap_err();
		assert!(matches!(err, ResolveError::Malformed(_)));
	}

	#[tokio::test]
	async fn test_doh_connection_refused_is_absent() {
		// Bind then drop to get a port nobody listens on
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);

		let url = format!("http://{}/resolve", addr);
		let resolver = DohResolver::with_endpoint(DohProvider::Google, &url, &settings()).unwrap();
		assert!(resolver.query("example.com").await.is_none());
	}

	#[tokio::test]
	async fn test_system_resolver_is_total() {
		let settings = ResolverSettings { timeout: Duration::from_millis(500) };
		let resolver = SystemResolver::new(&settings);
		for domain in ["", "nxdomain-freshness-check.invalid", "bad domain..name"] {
			assert!(resolver.query(domain).await.is_none(), "domain {:?}", domain);
		}
	}

	#[tokio::test]
	async fn test_system_resolver_unreachable_nameserver_is_absent() {
		// TEST-NET-1 is never routed, so the lookup can only time out
		let ns = vec![parse_nameserver("192.0.2.1").unwrap()];
		let settings = ResolverSettings { timeout: Duration::from_millis(300) };
		let resolver = SystemResolver::with_nameservers(&ns, &settings);
		assert!(resolver.query("example.com").await.is_none());
	}

	#[tokio::test]
	async fn test_for_channel_builds_each_adapter() {
		for channel in Channel::ALL {
			let resolver = for_channel(channel, &settings(), &[]).unwrap();
			assert_eq!(resolver.channel(), channel);
		}
	}

	#[test]
	fn test_ipv4_no_port() {
		let addr = parse_nameserver("1.1.1.1").unwrap();
		assert_eq!(addr.port(), 53);
		assert_eq!(addr.ip().to_string(), "1.1.1.1");
	}

	#[test]
	fn test_ipv4_with_port() {
		let addr = parse_nameserver("127.0.0.1:5353").unwrap();
		assert_eq!(addr.port(), 5353);
	}

	#[test]
	fn test_ipv6_forms() {
		assert_eq!(parse_nameserver("2606:4700::1111").unwrap().port(), 53);
		assert_eq!(parse_nameserver("[2606:4700::1111]:853").unwrap().port(), 853);
	}

	#[test]
	fn test_invalid_nameserver() {
		assert!(parse_nameserver("not-an-ip").is_err());
		assert!(parse_nameserver("  ").is_err());
	}
}

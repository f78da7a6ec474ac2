use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dns_freshness::{bench, cli, dns, domains, output};
use dns_freshness::cli::{Cli, CollectArgs, Command, QueryArgs, ReportArgs, ResolveArgs, TtlsArgs};
use dns_freshness::harness::CommandHarness;
use dns_freshness::resolver::{self, Resolve};
use dns_freshness::snapshot::Snapshot;
use dns_freshness::timing::NavigationTimingEntry;
use dns_freshness::transport::{MeasureConfig, ResolverSettings};

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Command::Collect(args) => collect(args).await,
		Command::Ttls(args) => ttls(args).await,
		Command::Report(args) => report(args),
		Command::Resolve(args) => resolve(args).await,
	}
}

/// Build the channel's resolver from the shared query flags
fn build_resolver(query: &QueryArgs) -> Result<Box<dyn Resolve>> {
	let nameservers = query.nameservers.iter()
		.map(|ns| resolver::parse_nameserver(ns))
		.collect::<Result<Vec<SocketAddr>>>()?;
	let settings = ResolverSettings { timeout: Duration::from_millis(query.timeout) };
	resolver::for_channel(query.channel, &settings, &nameservers)
		.with_context(|| format!("failed to set up {} resolver", query.channel))
}

async fn collect(args: CollectArgs) -> Result<()> {
	let config = MeasureConfig {
		cap: args.cap,
		persist_attempts: args.persist_attempts,
		seed: args.seed,
		..MeasureConfig::default()
	};

	let ranked = domains::read_ranked_domains(&args.domains)?;
	let sites = domains::sample_domains(ranked, config.seed);
	let mut snapshot = Snapshot::open(&args.snapshot)?
		.with_persist_attempts(config.persist_attempts);
	info!(
		sites = sites.len(), resumed = snapshot.len(), cap = config.cap,
		snapshot = %args.snapshot, "starting collection"
	);

	let mut harness = CommandHarness::new(
		&args.harness,
		&args.harness_args,
		Duration::from_secs(args.navigation_timeout),
	);
	let summary = bench::run_collection(&mut harness, &sites, &mut snapshot, &config).await?;
	output::print_collection_summary("Collection", &args.snapshot, snapshot.len(), &summary);
	Ok(())
}

async fn ttls(args: TtlsArgs) -> Result<()> {
	let config = MeasureConfig {
		cap: args.cap,
		inter_query_spacing: Duration::from_millis(args.spacing),
		persist_attempts: args.persist_attempts,
		..MeasureConfig::default()
	};

	let alldata: BTreeMap<String, Vec<NavigationTimingEntry>> = Snapshot::load(&args.timings)?;
	let sets = domains::unique_domains_by_site(&alldata);
	let resolver = build_resolver(&args.query)?;

	let mut snapshot = Snapshot::open(&args.output)?
		.with_persist_attempts(config.persist_attempts);
	info!(
		sites = sets.len(), resumed = snapshot.len(), channel = %args.query.channel,
		"starting TTL collection"
	);
	let summary = bench::run_ttl_collection(resolver.as_ref(), &sets, &mut snapshot, &config).await?;
	output::print_collection_summary("TTL collection", &args.output, snapshot.len(), &summary);
	Ok(())
}

fn report(args: ReportArgs) -> Result<()> {
	let alldata: BTreeMap<String, Vec<NavigationTimingEntry>> = Snapshot::load(&args.timings)?;

	let mut ttl_sets = Vec::new();
	for arg in &args.ttls {
		let (channel, path) = cli::parse_channel_path(arg).map_err(anyhow::Error::msg)?;
		let ttls: BTreeMap<String, Vec<u32>> = Snapshot::load(&path)?;
		ttl_sets.push((channel, ttls));
	}

	let report = output::build_report(&alldata, &ttl_sets);
	output::print_report(&report);
	if let Some(path) = &args.output {
		output::write_csv(path, &report)?;
	}
	Ok(())
}

async fn resolve(args: ResolveArgs) -> Result<()> {
	let resolver = build_resolver(&args.query)?;

	let mut queried = Vec::with_capacity(args.domains.len());
	for domain in &args.domains {
		let result = resolver.query(domain).await;
		queried.push((domain.clone(), result));
	}
	output::print_resolutions(args.query.channel, &queried);

	if args.header {
		let answers: Vec<_> = queried.into_iter().filter_map(|(_, r)| r).collect();
		println!("\n{}", dns::encode_resolutions(&answers));
	}
	Ok(())
}

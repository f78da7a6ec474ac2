use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::domains::DomainSet;
use crate::harness::BrowserHarness;
use crate::resolver::Resolve;
use crate::snapshot::{Snapshot, SnapshotError};
use crate::stats::TtlDataset;
use crate::timing::NavigationTimingEntry;
use crate::transport::MeasureConfig;

/// Outcome counts of a snapshot-backed batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionSummary {
	/// Sites measured and committed during this run
	pub measured: usize,
	/// Sites already present in the snapshot when the run started
	pub skipped: usize,
	/// Sites whose measurement failed or could not be persisted
	pub failed: usize,
}

/// Resolve every domain of one site, one query at a time.
///
/// Only successful resolutions contribute a TTL, in query order, so the
/// result can be shorter than `domains`.
pub async fn site_ttls(
	resolver: &dyn Resolve,
	domains: &DomainSet,
	spacing: Duration,
) -> Vec<u32> {
	let mut ttls = Vec::with_capacity(domains.len());
	for domain in domains {
		if !spacing.is_zero() {
			tokio::time::sleep(spacing).await;
		}
		if let Some(result) = resolver.query(domain).await {
			ttls.push(result.ttl);
		}
	}
	ttls
}

/// Collect TTL lists for every site over one channel.
///
/// Every site gets a key, with an empty list if all its queries failed.
pub async fn aggregate_ttls(
	resolver: &dyn Resolve,
	sets: &BTreeMap<String, DomainSet>,
	spacing: Duration,
) -> TtlDataset {
	let mut dataset = TtlDataset::new();
	for (i, (site, domains)) in sets.iter().enumerate() {
		info!(index = i, site = %site, domains = domains.len(), channel = %resolver.channel(), "resolving site domains");
		let ttls = site_ttls(resolver, domains, spacing).await;
		dataset.insert(site.clone(), ttls);
	}
	dataset
}

/// Long-running TTL aggregation that commits each site to `snapshot`.
///
/// Sites already in the snapshot are skipped, so an interrupted run can be
/// resumed with the same arguments.
pub async fn run_ttl_collection(
	resolver: &dyn Resolve,
	sets: &BTreeMap<String, DomainSet>,
	snapshot: &mut Snapshot<Vec<u32>>,
	config: &MeasureConfig,
) -> Result<CollectionSummary, SnapshotError> {
	let mut summary = CollectionSummary::default();
	for (site, domains) in sets {
		if snapshot.len() >= config.cap {
			info!(cap = config.cap, "site cap reached");
			break;
		}
		if snapshot.contains(site) {
			summary.skipped += 1;
			continue;
		}

		info!(
			index = snapshot.len(), site = %site, domains = domains.len(),
			channel = %resolver.channel(), "resolving site domains"
		);
		let ttls = site_ttls(resolver, domains, config.inter_query_spacing).await;
		if snapshot.commit(site.clone(), ttls)? {
			summary.measured += 1;
		} else {
			summary.failed += 1;
		}
	}
	Ok(summary)
}

/// Load each site through the browser harness and snapshot its timing entries.
///
/// Stops when the snapshot holds `config.cap` sites or `sites` runs out.
/// A failed navigation only skips that site. The snapshot is written after
/// every success, before the next navigation starts.
pub async fn run_collection(
	harness: &mut dyn BrowserHarness,
	sites: &[String],
	snapshot: &mut Snapshot<Vec<NavigationTimingEntry>>,
	config: &MeasureConfig,
) -> Result<CollectionSummary, SnapshotError> {
	let mut summary = CollectionSummary::default();
	for (rank, site) in sites.iter().enumerate() {
		if snapshot.len() >= config.cap {
			info!(cap = config.cap, "site cap reached");
			break;
		}
		if snapshot.contains(site) {
			summary.skipped += 1;
			continue;
		}

		let entries = match harness.navigate(site).await {
			Ok(entries) => entries,
			Err(e) => {
				warn!(rank, site = %site, error = %e, "measurement failed, skipping site");
				summary.failed += 1;
				continue;
			}
		};
		info!(rank, site = %site, entries = entries.len(), "measured site");

		if snapshot.commit(site.clone(), entries)? {
			summary.measured += 1;
		} else {
			summary.failed += 1;
		}
	}
	Ok(summary)
}

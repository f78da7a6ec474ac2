use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::timing::{EntryType, NavigationTimingEntry};

/// Distinct embedded subresource domains of one benchmarked site
pub type DomainSet = BTreeSet<String>;

/// Read a ranked domain list.
///
/// Accepts either a ranking CSV (`rank,domain` per row, domain in the second
/// column) or a plain file with one domain per line. Blank lines and lines
/// starting with '#' are skipped. Ranked order is preserved.
pub fn read_ranked_domains(path: &str) -> Result<Vec<String>> {
	let mut reader = csv::ReaderBuilder::new()
		.has_headers(false)
		.flexible(true)
		.comment(Some(b'#'))
		.trim(csv::Trim::All)
		.from_path(path)
		.map_err(|e| anyhow!("failed to read domain file '{}': {}", path, e))?;

	let mut domains = Vec::new();
	for record in reader.records() {
		let record = record
			.map_err(|e| anyhow!("malformed row in domain file '{}': {}", path, e))?;
		let domain = match record.len() {
			0 => continue,
			1 => &record[0],
			_ => &record[1],
		};
		if !domain.is_empty() {
			domains.push(domain.to_string());
		}
	}
	Ok(domains)
}

/// Order the ranked list for a batch run.
///
/// With a seed the list is shuffled reproducibly; without one the ranking
/// order is kept as-is.
pub fn sample_domains(mut domains: Vec<String>, seed: Option<u64>) -> Vec<String> {
	if let Some(seed) = seed {
		let mut rng = StdRng::seed_from_u64(seed);
		domains.shuffle(&mut rng);
	}
	domains
}

/// Host part of a URL: the third `/`-separated token with any `:port` cut off.
///
/// Returns None for strings with fewer than three tokens.
pub fn extract_host(url: &str) -> Option<String> {
	let host = url.split('/').nth(2)?;
	let host = host.split(':').next().unwrap_or_default();
	Some(host.to_string())
}

/// Lowercase a host and drop the trailing root dot.
///
/// Returns None when nothing is left.
pub fn normalize_domain(host: &str) -> Option<String> {
	let host = host.strip_suffix('.').unwrap_or(host);
	if host.is_empty() {
		return None;
	}
	Some(host.to_ascii_lowercase())
}

/// Unique subresource domains referenced by one page load.
pub fn unique_domains(entries: &[NavigationTimingEntry]) -> DomainSet {
	entries.iter()
		.filter(|e| e.entry_type == EntryType::Resource)
		.filter_map(|e| extract_host(&e.name))
		.filter_map(|host| normalize_domain(&host))
		.collect()
}

/// Unique subresource domains per site.
///
/// Sets are kept per site on purpose: a CDN domain used by two sites is
/// queried twice, once per page load.
pub fn unique_domains_by_site(
	alldata: &BTreeMap<String, Vec<NavigationTimingEntry>>,
) -> BTreeMap<String, DomainSet> {
	alldata.iter()
		.map(|(site, entries)| (site.clone(), unique_domains(entries)))
		.collect()
}

/// Number of unique subresource domains per site
pub fn domain_counts(sets: &BTreeMap<String, DomainSet>) -> BTreeMap<String, usize> {
	sets.iter().map(|(site, set)| (site.clone(), set.len())).collect()
}

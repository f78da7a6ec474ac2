use std::collections::BTreeMap;

use serde::Serialize;

use crate::timing::{EntryType, NavigationTimingEntry};

/// Per-site TTL lists for one channel, successful resolutions only
pub type TtlDataset = BTreeMap<String, Vec<u32>>;

/// DNS cache behaviour observed during one page load
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SiteCacheStat {
	pub hits: u64,
	pub misses: u64,
	/// Hit percentage in [0, 100], rounded to 2 decimals
	pub rate: f64,
}

/// Raw hit/miss totals across all sites
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheHitCounter {
	pub hits: u64,
	pub misses: u64,
}

impl CacheHitCounter {
	pub fn total(&self) -> u64 {
		self.hits + self.misses
	}
}

/// Distribution summary of one metric across sites
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
	pub count: usize,
	pub mean: f64,
	pub median: f64,
	pub p85: f64,
	pub stddev: f64,
}

/// Calculate the p-th percentile from a sorted slice using nearest-rank method.
///
/// Args:
///   sorted_values: Pre-sorted slice of f64 values.
///   p: Percentile between 0.0 and 100.0 (e.g. 50.0 for median).
///
/// Returns:
///   None if the slice is empty, otherwise the percentile value.
pub fn percentile(sorted_values: &[f64], p: f64) -> Option<f64> {
	if sorted_values.is_empty() {
		return None;
	}
	if sorted_values.len() == 1 {
		return Some(sorted_values[0]);
	}
	// Nearest-rank: rank = ceil(p/100 * N)
	let n = sorted_values.len();
	let rank = ((p / 100.0) * n as f64).ceil() as usize;
	let rank = rank.clamp(1, n);
	Some(sorted_values[rank - 1])
}

/// Calculate the arithmetic mean of a slice of values.
pub fn mean(values: &[f64]) -> Option<f64> {
	if values.is_empty() {
		return None;
	}
	let sum: f64 = values.iter().sum();
	Some(sum / values.len() as f64)
}

/// Calculate the population standard deviation of a slice of values.
pub fn stddev(values: &[f64]) -> Option<f64> {
	let avg = mean(values)?;
	let variance = values.iter()
		.map(|v| (v - avg).powi(2))
		.sum::<f64>() / values.len() as f64;
	Some(variance.sqrt())
}

/// Round to two decimals, ties to even on the exact binary value.
fn round2(value: f64) -> f64 {
	format!("{:.2}", value).parse().unwrap_or(value)
}

/// Summarize a metric the way the histograms were annotated: mean, median and p85.
pub fn summarize(values: &[f64]) -> Summary {
	let mut sorted = values.to_vec();
	sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

	Summary {
		count: sorted.len(),
		mean: round2(mean(&sorted).unwrap_or(0.0)),
		median: round2(percentile(&sorted, 50.0).unwrap_or(0.0)),
		p85: round2(percentile(&sorted, 85.0).unwrap_or(0.0)),
		stddev: round2(stddev(&sorted).unwrap_or(0.0)),
	}
}

/// Expected re-resolutions per minute for one page's domains.
///
/// Each domain is assumed to be re-resolved exactly when its TTL expires,
/// i.e. `60 / ttl` times a minute. TTL 0 answers are non-cacheable and have
/// no refresh interval, so they are left out rather than counted as infinite.
pub fn refresh_rate(ttls: &[u32]) -> f64 {
	ttls.iter()
		.filter(|&&ttl| ttl != 0)
		.map(|&ttl| 60.0 / ttl as f64)
		.sum()
}

/// Refresh rate per site
pub fn refresh_rates(ttls: &TtlDataset) -> BTreeMap<String, f64> {
	ttls.iter()
		.map(|(site, list)| (site.clone(), refresh_rate(list)))
		.collect()
}

/// A resource hit the browser DNS cache when its lookup took no time at all.
///
/// Anything else is a miss, including a missing timestamp.
fn is_cache_hit(entry: &NavigationTimingEntry) -> bool {
	entry.lookup_duration() == Some(0.0)
}

/// Hit/miss classification of one page load's resource entries.
///
/// A page with no resource entries has a rate of exactly 100: nothing
/// needed resolving, so nothing missed.
pub fn site_cache_stat(entries: &[NavigationTimingEntry]) -> SiteCacheStat {
	let (hits, misses) = entries.iter()
		.filter(|e| e.entry_type == EntryType::Resource)
		.fold((0u64, 0u64), |(hits, misses), e| {
			if is_cache_hit(e) {
				(hits + 1, misses)
			} else {
				(hits, misses + 1)
			}
		});

	let total = hits + misses;
	let rate = if total == 0 {
		100.0
	} else {
		round2(hits as f64 / total as f64 * 100.0)
	};
	SiteCacheStat { hits, misses, rate }
}

/// Cache statistics per site
pub fn cache_hit_rates(
	alldata: &BTreeMap<String, Vec<NavigationTimingEntry>>,
) -> BTreeMap<String, SiteCacheStat> {
	alldata.iter()
		.map(|(site, entries)| (site.clone(), site_cache_stat(entries)))
		.collect()
}

/// Raw hit and miss counts across every site, without a per-site breakdown.
pub fn count_cache_hits(alldata: &BTreeMap<String, Vec<NavigationTimingEntry>>) -> CacheHitCounter {
	alldata.values()
		.flatten()
		.filter(|e| e.entry_type == EntryType::Resource)
		.fold(CacheHitCounter::default(), |mut counter, e| {
			if is_cache_hit(e) {
				counter.hits += 1;
			} else {
				counter.misses += 1;
			}
			counter
		})
}

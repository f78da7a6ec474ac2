use std::collections::BTreeMap;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use crate::bench::CollectionSummary;
use crate::domains::{domain_counts, unique_domains_by_site};
use crate::stats::{
	cache_hit_rates, count_cache_hits, refresh_rates, summarize, CacheHitCounter, SiteCacheStat,
	Summary, TtlDataset,
};
use crate::timing::NavigationTimingEntry;
use crate::transport::{Channel, ResolutionResult};

/// Per-site figures of one report
#[derive(Debug, Clone)]
pub struct SiteRow {
	pub site: String,
	pub unique_domains: usize,
	pub cache: SiteCacheStat,
	/// Refresh rate per channel, in `Report::channels` order; None when the
	/// channel's dataset has no entry for the site
	pub refresh: Vec<Option<f64>>,
}

/// Everything the `report` command prints or exports
#[derive(Debug, Clone)]
pub struct Report {
	pub channels: Vec<Channel>,
	pub summaries: Vec<(String, Summary)>,
	pub global: CacheHitCounter,
	pub rows: Vec<SiteRow>,
}

/// Combine timing data and per-channel TTL datasets into one report.
pub fn build_report(
	alldata: &BTreeMap<String, Vec<NavigationTimingEntry>>,
	ttl_sets: &[(Channel, TtlDataset)],
) -> Report {
	let counts = domain_counts(&unique_domains_by_site(alldata));
	let hit_rates = cache_hit_rates(alldata);

	let mut summaries = Vec::new();
	let count_values: Vec<f64> = counts.values().map(|&c| c as f64).collect();
	summaries.push(("Unique domains per site".to_string(), summarize(&count_values)));

	let mut refresh_by_channel = Vec::new();
	for (channel, ttls) in ttl_sets {
		let pooled: Vec<f64> = ttls.values().flatten().map(|&t| t as f64).collect();
		summaries.push((format!("TTL seconds ({})", channel), summarize(&pooled)));

		let rates = refresh_rates(ttls);
		let values: Vec<f64> = rates.values().copied().collect();
		summaries.push((format!("Refreshes per minute ({})", channel), summarize(&values)));
		refresh_by_channel.push(rates);
	}

	let hit_values: Vec<f64> = hit_rates.values().map(|s| s.rate).collect();
	summaries.push(("DNS hit rate on page load (%)".to_string(), summarize(&hit_values)));

	let rows = hit_rates.iter()
		.map(|(site, cache)| SiteRow {
			site: site.clone(),
			unique_domains: counts.get(site).copied().unwrap_or(0),
			cache: *cache,
			refresh: refresh_by_channel.iter()
				.map(|rates| rates.get(site).copied())
				.collect(),
		})
		.collect();

	Report {
		channels: ttl_sets.iter().map(|(c, _)| *c).collect(),
		summaries,
		global: count_cache_hits(alldata),
		rows,
	}
}

/// Print the distribution summaries and global hit counts.
pub fn print_report(report: &Report) {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec!["Metric", "Count", "Mean", "Median", "P85", "Std dev"]);

	for (label, s) in &report.summaries {
		table.add_row(vec![
			label.clone(),
			s.count.to_string(),
			format!("{:.2}", s.mean),
			format!("{:.2}", s.median),
			format!("{:.2}", s.p85),
			format!("{:.2}", s.stddev),
		]);
	}

	println!("\nFreshness Report ({} sites)", report.rows.len());
	println!("=================\n");
	println!("{table}");

	let g = &report.global;
	let overall = if g.total() > 0 {
		format!("{:.2}%", g.hits as f64 / g.total() as f64 * 100.0)
	} else {
		"n/a".to_string()
	};
	println!(
		"\nDNS cache across all resources: {} hits, {} misses ({})",
		g.hits, g.misses, overall,
	);
}

/// Write one row per site to a CSV file.
pub fn write_csv(path: &str, report: &Report) -> Result<()> {
	let mut writer = csv::Writer::from_path(path)?;

	let mut header = vec![
		"site".to_string(),
		"unique_domains".to_string(),
		"dns_hits".to_string(),
		"dns_misses".to_string(),
		"dns_hit_rate".to_string(),
	];
	header.extend(report.channels.iter().map(|c| format!("refresh_per_min_{}", c)));
	writer.write_record(&header)?;

	for row in &report.rows {
		let mut record = vec![
			row.site.clone(),
			row.unique_domains.to_string(),
			row.cache.hits.to_string(),
			row.cache.misses.to_string(),
			format!("{:.2}", row.cache.rate),
		];
		record.extend(row.refresh.iter().map(|r| match r {
			Some(rate) => format!("{:.4}", rate),
			None => String::new(),
		}));
		writer.write_record(&record)?;
	}

	writer.flush()?;
	println!("\nResults written to: {}", path);
	Ok(())
}

/// Print ad-hoc resolutions, one row per queried domain.
pub fn print_resolutions(channel: Channel, queried: &[(String, Option<ResolutionResult>)]) {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec!["Domain", "Answer name", "Address", "TTL"]);

	for (domain, result) in queried {
		match result {
			Some(r) => table.add_row(vec![
				domain.clone(),
				r.domain.clone(),
				r.ip.clone(),
				r.ttl.to_string(),
			]),
			None => table.add_row(vec![
				domain.clone(),
				"-".to_string(),
				"no answer".to_string(),
				"-".to_string(),
			]),
		};
	}

	println!("\nResolutions via {}", channel);
	println!("{table}");
}

/// One-line summary after a batch run.
pub fn print_collection_summary(what: &str, path: &str, total: usize, summary: &CollectionSummary) {
	println!(
		"{}: {} measured, {} already present, {} failed; {} sites in {}",
		what, summary.measured, summary.skipped, summary.failed, total, path,
	);
}

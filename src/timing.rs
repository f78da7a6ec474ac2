//! Browser performance-timeline entries as emitted by the automation harness.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `entryType` of a performance entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryType {
	Navigation,
	Resource,
	Paint,
	Other(String),
}

impl From<String> for EntryType {
	fn from(s: String) -> Self {
		match s.as_str() {
			"navigation" => EntryType::Navigation,
			"resource" => EntryType::Resource,
			"paint" => EntryType::Paint,
			_ => EntryType::Other(s),
		}
	}
}

impl From<EntryType> for String {
	fn from(t: EntryType) -> Self {
		t.to_string()
	}
}

impl fmt::Display for EntryType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EntryType::Navigation => f.write_str("navigation"),
			EntryType::Resource => f.write_str("resource"),
			EntryType::Paint => f.write_str("paint"),
			EntryType::Other(s) => f.write_str(s),
		}
	}
}

/// One entry of `performance.getEntries()`.
///
/// Fields other than the ones analysed here are kept in `extra` so that a
/// snapshot stores exactly what the browser reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTimingEntry {
	pub entry_type: EntryType,
	/// Resource URL (or page URL for navigation entries)
	#[serde(default)]
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain_lookup_start: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain_lookup_end: Option<f64>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl NavigationTimingEntry {
	pub fn new(
		entry_type: EntryType,
		name: &str,
		domain_lookup_start: Option<f64>,
		domain_lookup_end: Option<f64>,
	) -> Self {
		Self {
			entry_type,
			name: name.to_string(),
			domain_lookup_start,
			domain_lookup_end,
			extra: Map::new(),
		}
	}

	/// Time spent in DNS lookup, if both timestamps were reported.
	pub fn lookup_duration(&self) -> Option<f64> {
		Some(self.domain_lookup_end? - self.domain_lookup_start?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_deserialize_browser_entry() {
		let json = r#"{
			"entryType": "resource",
			"name": "https://cdn.example.com/app.js",
			"domainLookupStart": 120.5,
			"domainLookupEnd": 134.0,
			"initiatorType": "script",
			"duration": 40.2
		}"#;
		let entry: NavigationTimingEntry = serde_json::from_str(json).unwrap();
		assert_eq!(entry.entry_type, EntryType::Resource);
		assert_eq!(entry.name, "https://cdn.example.com/app.js");
		assert_eq!(entry.lookup_duration(), Some(13.5));
		assert_eq!(entry.extra["initiatorType"], "script");
	}

	#[test]
	fn test_paint_entry_without_lookup_fields() {
		let json = r#"{"entryType": "paint", "name": "first-paint", "startTime": 300}"#;
		let entry: NavigationTimingEntry = serde_json::from_str(json).unwrap();
		assert_eq!(entry.entry_type, EntryType::Paint);
		assert_eq!(entry.lookup_duration(), None);
	}

	#[test]
	fn test_unknown_entry_type_preserved() {
		let json = r#"{"entryType": "largest-contentful-paint", "name": ""}"#;
		let entry: NavigationTimingEntry = serde_json::from_str(json).unwrap();
		assert_eq!(entry.entry_type, EntryType::Other("largest-contentful-paint".to_string()));

		let back = serde_json::to_value(&entry).unwrap();
		assert_eq!(back["entryType"], "largest-contentful-paint");
	}

	#[test]
	fn test_serialize_keeps_extra_fields() {
		let json = r#"{"entryType":"navigation","name":"https://a.com/","domainLookupStart":1.0,"domainLookupEnd":1.0,"type":"navigate"}"#;
		let entry: NavigationTimingEntry = serde_json::from_str(json).unwrap();
		let value = serde_json::to_value(&entry).unwrap();
		assert_eq!(value["type"], "navigate");
		assert_eq!(value["domainLookupEnd"], 1.0);
		assert_eq!(entry.lookup_duration(), Some(0.0));
	}
}

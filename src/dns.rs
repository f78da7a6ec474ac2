use hickory_proto::rr::RecordType;
use serde::Deserialize;
use thiserror::Error;

use crate::transport::{Channel, ResolutionResult};

/// Why a resolution attempt produced no record.
///
/// Only used for diagnostics; callers of `Resolve::query` see `None`.
#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("lookup failed: {0}")]
	Lookup(String),
	#[error("timed out")]
	Timeout,
	#[error("http request failed: {0}")]
	Http(String),
	#[error("unexpected http status {0}")]
	Status(u16),
	#[error("malformed DoH response: {0}")]
	Malformed(String),
	#[error("response has no Answer section")]
	NoAnswer,
	#[error("no A record in answer")]
	NoAddressRecord,
}

/// JSON body returned by the Google and Cloudflare DoH JSON APIs.
///
/// Only the fields we read are modelled; everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct DohResponse {
	#[serde(rename = "Answer")]
	pub answer: Option<Vec<DohAnswer>>,
}

/// One record of the `Answer` section
#[derive(Debug, Deserialize)]
pub struct DohAnswer {
	pub name: String,
	#[serde(rename = "type")]
	pub record_type: u16,
	#[serde(rename = "TTL")]
	pub ttl: u32,
	pub data: String,
}

/// Parse a DoH JSON body and pick the first A record of its answer.
///
/// The whole body is validated into `DohResponse` before any field is read,
/// so a wrongly typed field anywhere is `Malformed` rather than a partial read.
pub fn parse_doh_json(body: &[u8], channel: Channel) -> Result<ResolutionResult, ResolveError> {
	let response: DohResponse = serde_json::from_slice(body)
		.map_err(|e| ResolveError::Malformed(e.to_string()))?;

	let answers = response.answer.ok_or(ResolveError::NoAnswer)?;
	let a_code = u16::from(RecordType::A);

	answers.into_iter()
		.find(|a| a.record_type == a_code)
		.map(|a| ResolutionResult {
			domain: a.name,
			ip: a.data,
			ttl: a.ttl,
			channel,
		})
		.ok_or(ResolveError::NoAddressRecord)
}

/// Encode resolutions as the pre-resolution header payload.
///
/// Each resolution becomes `host|ip|ttl`; entries are joined with `,`.
pub fn encode_resolutions(resolutions: &[ResolutionResult]) -> String {
	const SEP: char = '|';
	resolutions.iter()
		.map(|r| format!("{}{}{}{}{}", r.domain, SEP, r.ip, SEP, r.ttl))
		.collect::<Vec<_>>()
		.join(",")
}

//! Interface to the external browser automation that loads each site.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::timing::NavigationTimingEntry;

#[derive(Debug, Error)]
pub enum HarnessError {
	#[error("failed to start harness '{program}': {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},
	#[error("navigation to {site} timed out after {timeout:?}")]
	Timeout { site: String, timeout: Duration },
	#[error("harness exited with {status} for {site}: {stderr}")]
	Failed {
		site: String,
		status: std::process::ExitStatus,
		stderr: String,
	},
	#[error("harness output for {site} is not a timing entry list: {source}")]
	Output {
		site: String,
		#[source]
		source: serde_json::Error,
	},
}

/// Loads one site in a fresh (cache-cleared) browser session and returns
/// its performance-timeline entries.
#[async_trait]
pub trait BrowserHarness: Send {
	async fn navigate(&mut self, site: &str) -> Result<Vec<NavigationTimingEntry>, HarnessError>;
}

/// Runs `<program> <args..> https://<site>` per site.
///
/// The program must print the `performance.getEntries()` array as JSON on
/// stdout and exit 0. It is killed if it outlives the navigation timeout.
pub struct CommandHarness {
	program: String,
	args: Vec<String>,
	timeout: Duration,
}

impl CommandHarness {
	pub fn new(program: &str, args: &[String], timeout: Duration) -> Self {
		Self {
			program: program.to_string(),
			args: args.to_vec(),
			timeout,
		}
	}
}

#[async_trait]
impl BrowserHarness for CommandHarness {
	async fn navigate(&mut self, site: &str) -> Result<Vec<NavigationTimingEntry>, HarnessError> {
		let child = Command::new(&self.program)
			.args(&self.args)
			.arg(format!("https://{}", site))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|source| HarnessError::Spawn {
				program: self.program.clone(),
				source,
			})?;

		let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
			Ok(result) => result.map_err(|source| HarnessError::Spawn {
				program: self.program.clone(),
				source,
			})?,
			Err(_) => {
				return Err(HarnessError::Timeout {
					site: site.to_string(),
					timeout: self.timeout,
				});
			}
		};

		if !output.status.success() {
			return Err(HarnessError::Failed {
				site: site.to_string(),
				status: output.status,
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}

		serde_json::from_slice(&output.stdout).map_err(|source| HarnessError::Output {
			site: site.to_string(),
			source,
		})
	}
}

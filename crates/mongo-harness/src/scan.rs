//! Readiness scanning over parsed log entries.
//!
//! A scan is a small state machine that observes entries one at a time and
//! either keeps waiting, finds its answer, or fails. The drivers borrow the
//! entry sequence mutably, so whatever the scan did not consume stays with
//! the caller.

use std::sync::LazyLock;

use futures::{Stream, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::log::LogEntry;
use crate::{Error, Result};

/// Structured id of the "Waiting for connections" message.
pub const LISTENING_ID: u32 = 23016;

/// Structured id of the "Error setting up listener" message.
pub const LISTENER_FAILED_ID: u32 = 22856;

/// Structured id of the startup "Build Info" message.
pub const BUILD_INFO_ID: u32 = 23403;

static LEGACY_LISTENING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^waiting for connections on port (\d+)( ssl)?$")
        .expect("listening pattern is valid")
});

static LEGACY_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:db|mongos) version v(\S+)").expect("version pattern is valid")
});

static LEGACY_MODULES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^modules: (.*)$").expect("modules pattern is valid"));

/// Outcome of observing one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStep<T> {
    /// Keep reading.
    Continue,
    /// The scan is complete.
    Found(T),
}

/// A "first informative entry wins" scan.
pub trait LogScan {
    /// Value produced by a successful scan.
    type Output;

    /// Observes the next entry.
    fn observe(&mut self, entry: &LogEntry) -> Result<ScanStep<Self::Output>>;

    /// Called when the sequence ends before `observe` found anything.
    fn finish(self) -> Result<Self::Output>;
}

/// Drives `scan` over a synchronous sequence, stopping at the first match.
pub fn run_scan<S, I>(mut scan: S, entries: &mut I) -> Result<S::Output>
where
    S: LogScan,
    I: Iterator<Item = LogEntry>,
{
    for entry in entries.by_ref() {
        if let ScanStep::Found(output) = scan.observe(&entry)? {
            return Ok(output);
        }
    }
    scan.finish()
}

/// Drives `scan` over an asynchronous sequence, stopping at the first match.
pub async fn run_scan_stream<S, St>(mut scan: S, entries: &mut St) -> Result<S::Output>
where
    S: LogScan,
    St: Stream<Item = LogEntry> + Unpin,
{
    while let Some(entry) = entries.next().await {
        if let ScanStep::Found(output) = scan.observe(&entry)? {
            return Ok(output);
        }
    }
    scan.finish()
}

/// Finds the port a server is listening on.
#[derive(Debug, Default)]
pub struct PortScan;

impl LogScan for PortScan {
    type Output = u16;

    fn observe(&mut self, entry: &LogEntry) -> Result<ScanStep<u16>> {
        if entry.component != "NETWORK"
            || !matches!(
                entry.context.as_str(),
                "initandlisten" | "listener" | "mongosMain"
            )
        {
            return Ok(ScanStep::Continue);
        }

        if entry.id == Some(LISTENING_ID) {
            let port = entry
                .attribute("port")
                .and_then(Value::as_u64)
                .and_then(|port| u16::try_from(port).ok());
            if let Some(port) = port {
                return Ok(ScanStep::Found(port));
            }
        }

        if entry.id.is_none() {
            if let Some(port) = LEGACY_LISTENING
                .captures(&entry.message)
                .and_then(|caps| caps[1].parse::<u16>().ok())
            {
                return Ok(ScanStep::Found(port));
            }
        }

        if entry.id == Some(LISTENER_FAILED_ID) || entry.message.contains("Failed to set up listener")
        {
            let detail = match entry.attribute("error") {
                Some(error) => format!("{}: {error}", entry.message),
                None => entry.message.clone(),
            };
            return Err(Error::ListenerFailed(detail));
        }

        Ok(ScanStep::Continue)
    }

    fn finish(self) -> Result<u16> {
        Err(Error::EndedWithoutPort { reason: None })
    }
}

/// Version and module information reported by a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Server version, e.g. `7.0.2`.
    #[serde(default)]
    pub version: Option<String>,
    /// Installed modules; `None` means not reported, not "no modules".
    #[serde(default)]
    pub modules: Option<Vec<String>>,
}

impl BuildInfo {
    /// Whether the version has been learned.
    pub fn is_complete(&self) -> bool {
        self.version.is_some()
    }

    /// Whether the build includes the enterprise module.
    pub fn is_enterprise(&self) -> bool {
        self.modules
            .as_ref()
            .is_some_and(|modules| modules.iter().any(|m| m == "enterprise"))
    }
}

/// Accumulates the startup build banner.
#[derive(Debug, Default)]
pub struct BuildInfoScan {
    info: BuildInfo,
}

impl LogScan for BuildInfoScan {
    type Output = BuildInfo;

    fn observe(&mut self, entry: &LogEntry) -> Result<ScanStep<BuildInfo>> {
        if entry.component != "CONTROL"
            || !matches!(entry.context.as_str(), "initandlisten" | "listener")
        {
            return Ok(ScanStep::Continue);
        }

        if entry.id == Some(BUILD_INFO_ID) {
            if let Some(build_info) = entry.attribute("buildInfo") {
                self.info = serde_json::from_value(build_info.clone())?;
            }
        } else if entry.id.is_none() {
            if let Some(caps) = LEGACY_VERSION.captures(&entry.message) {
                self.info.version = Some(caps[1].to_string());
            } else if let Some(caps) = LEGACY_MODULES.captures(&entry.message) {
                self.info.modules = Some(
                    caps[1]
                        .split_whitespace()
                        .filter(|module| *module != "none")
                        .map(str::to_string)
                        .collect(),
                );
            }
        }

        if self.info.is_complete() {
            Ok(ScanStep::Found(std::mem::take(&mut self.info)))
        } else {
            Ok(ScanStep::Continue)
        }
    }

    fn finish(self) -> Result<BuildInfo> {
        Ok(self.info)
    }
}

/// Scans a synchronous sequence for the listening port.
pub fn scan_port<I: Iterator<Item = LogEntry>>(entries: &mut I) -> Result<u16> {
    run_scan(PortScan, entries)
}

/// Scans a synchronous sequence for the build banner.
pub fn scan_build_info<I: Iterator<Item = LogEntry>>(entries: &mut I) -> Result<BuildInfo> {
    run_scan(BuildInfoScan::default(), entries)
}

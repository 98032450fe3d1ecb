//! On-disk format for a stopped process as seen by the deadlock finder.
//!
//! A dump records every thread of the target, its call stack (outermost frame
//! last) and, for frames sitting in a known lock primitive, the lock fields
//! that were readable at capture time. Dumps are produced by
//! `find-deadlock capture` and can be analyzed offline with
//! `find-deadlock find --dump`.

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// The version of the dump format written by this crate.
pub const DUMP_VERSION: u64 = 1;

fn default_valid() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDump {
    /// The version of this dump format.
    pub version: u64,

    /// Process id of the inspected target.
    pub pid: i32,

    /// Whether the target was a valid, live process when captured.
    /// An invalid dump is analyzed as an empty process.
    #[serde(default = "default_valid")]
    pub valid: bool,

    /// Thread that was selected when the capture started, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_tid: Option<i32>,

    /// Threads in enumeration order.
    #[serde(default)]
    pub threads: Vec<ThreadRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// Debugger-assigned ordinal, display only.
    pub num: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tid: i32,
    /// Call stack, newest frame first.
    #[serde(default)]
    pub frames: Vec<FrameRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Resolved function name, `None` for an unresolved address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pc: Option<u64>,

    /// Lock fields evaluated in this frame, keyed by expression
    /// (e.g. `mutex->__data.__owner`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, i64>,
}

impl FrameRecord {
    pub fn named(function: &str) -> Self {
        Self {
            function: Some(function.to_owned()),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, expression: &str, value: i64) -> Self {
        self.fields.insert(expression.to_owned(), value);
        self
    }
}

impl ProcessDump {
    pub fn new(pid: i32) -> Self {
        Self {
            version: DUMP_VERSION,
            pid,
            valid: true,
            selected_tid: None,
            threads: Vec::new(),
        }
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> anyhow::Result<Self> {
        let dump: Self =
            serde_json::from_reader(reader).context("Could not parse process dump from JSON")?;
        if dump.version != DUMP_VERSION {
            bail!(
                "Unsupported process dump version {} (expected {DUMP_VERSION})",
                dump.version
            );
        }
        Ok(dump)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path.as_ref())
            .with_context(|| format!("Failed to open dump at {}", path.as_ref().display()))?;
        Self::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to load dump at {}", path.as_ref().display()))
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        if let Ok(true) = std::fs::exists(path.as_ref()) {
            log::warn!(
                "{} already exists, file will be truncated",
                path.as_ref().display()
            );
        }

        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_dump() {
        let json = r#"{
            "version": 1,
            "pid": 42,
            "threads": [
                { "num": 1, "tid": 42, "frames": [{ "function": "main" }] }
            ]
        }"#;
        let dump = ProcessDump::from_reader(json.as_bytes()).unwrap();

        assert!(dump.valid);
        assert_eq!(dump.selected_tid, None);
        assert_eq!(dump.threads.len(), 1);
        assert_eq!(dump.threads[0].name, None);
        assert_eq!(dump.threads[0].frames[0], FrameRecord::named("main"));
    }

    #[test]
    fn test_reject_unknown_version() {
        let json = r#"{ "version": 7, "pid": 1 }"#;
        let err = ProcessDump::from_reader(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Unsupported process dump version 7"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");

        let mut dump = ProcessDump::new(100);
        dump.selected_tid = Some(100);
        dump.threads.push(ThreadRecord {
            num: 1,
            name: Some("worker".into()),
            tid: 101,
            frames: vec![
                FrameRecord::named("__lll_lock_wait"),
                FrameRecord::named("___pthread_mutex_lock")
                    .with_field("mutex->__data.__owner", 102),
            ],
        });
        dump.save_to(&path).unwrap();

        let reloaded = ProcessDump::from_file(&path).unwrap();
        assert_eq!(reloaded, dump);
    }
}

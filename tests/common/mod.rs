//! Shared fixtures: JSON tree dumps written into a temp directory

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;

pub const TREE: &str = "EventNtuple/ntuple";

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Tree dump with `event`, two crv columns and a fixed-size array column
    pub fn tree(&self, name: &str, events: &[i64]) -> String {
        let path = self.dir.path().join(name);
        fs::write(&path, dump(events).to_string()).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Tree dump with arbitrary columns
    pub fn tree_with(&self, name: &str, columns: Value) -> String {
        let path = self.dir.path().join(name);
        fs::write(&path, json!({"trees": {"EventNtuple/ntuple": columns}}).to_string()).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Path in the fixture directory that does not exist
    pub fn missing(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    /// Remote file under `<remote_root>/<tier>/<name>`; returns the bare name
    pub fn remote(&self, tier: &str, name: &str, events: &[i64]) -> String {
        let dir = self.remote_root().join(tier);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), dump(events).to_string()).unwrap();
        name.to_string()
    }

    pub fn remote_root(&self) -> PathBuf {
        self.dir.path().join("remote")
    }

    pub fn list(&self, name: &str, entries: &[String]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("# fixture list\n{}\n", entries.join("\n"))).unwrap();
        path
    }

    pub fn config(&self, body: &str) -> PathBuf {
        let path = self.dir.path().join("config.toml");
        fs::write(&path, body).unwrap();
        path
    }
}

fn dump(events: &[i64]) -> Value {
    let n = events.len();
    json!({
        "trees": {
            "EventNtuple/ntuple": {
                "event": events,
                "crvcoincs.PEs": (0..n).map(|i| json!([i as f64 * 0.5])).collect::<Vec<_>>(),
                "crvcoincs.nHits": (0..n).map(|i| json!(i)).collect::<Vec<_>>(),
                "crvcoincs.PEsPerLayer[4]": (0..n).map(|_| json!([0.0, 1.0, 2.0, 3.0])).collect::<Vec<_>>(),
                "crvcoincs.sidePEsPerLayer[8]": (0..n).map(|_| json!([0, 0, 0, 0, 1, 1, 1, 1])).collect::<Vec<_>>()
            }
        }
    })
}

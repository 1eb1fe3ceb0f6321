use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::RigResult;

/// Signed difference between a baked angle triple and the reference texture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleDiff {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z")]
    pub z: f64,
}

/// Atlas row -> vertex -> diff.
pub type AngleDiffMap = BTreeMap<u32, BTreeMap<usize, AngleDiff>>;

/// Append-only diff record shared by the per-polygon workers of one bake run.
#[derive(Debug, Default)]
pub struct AngleDiffRecord {
    entries: Mutex<AngleDiffMap>,
}

impl AngleDiffRecord {
    pub fn insert(&self, row: u32, vertex: usize, diff: AngleDiff) {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.entry(row).or_default().insert(vertex, diff);
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> AngleDiffMap {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Writes `{"row": {"vertex": {"X", "Y", "Z"}}}` as compact JSON.
    pub fn save_json(&self, path: &Path) -> RigResult<()> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &*entries)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_recorded_diffs_when_saving_json_then_rows_and_vertices_are_string_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("angle_diffs.json");
        let record = AngleDiffRecord::default();
        record.insert(1, 7, AngleDiff { x: 1.5, y: -2.0, z: 0.0 });
        record.insert(1, 3, AngleDiff { x: 0.0, y: 0.0, z: 4.0 });
        record.insert(2, 7, AngleDiff { x: 9.0, y: 9.0, z: 9.0 });
        assert_eq!(record.len(), 3);

        record.save_json(&path).expect("save");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(value["1"]["7"]["X"], 1.5);
        assert_eq!(value["1"]["3"]["Z"], 4.0);
        assert_eq!(value["2"]["7"]["Y"], 9.0);
    }

    #[test]
    fn given_same_vertex_twice_when_inserting_then_latest_diff_wins() {
        let record = AngleDiffRecord::default();
        record.insert(0, 1, AngleDiff { x: 1.0, y: 1.0, z: 1.0 });
        record.insert(0, 1, AngleDiff { x: 2.0, y: 2.0, z: 2.0 });
        assert_eq!(record.len(), 1);
        assert_eq!(record.snapshot()[&0][&1].x, 2.0);
    }
}

//! ---
//! flx_section: "11-simulation"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Simulation runtime helpers and scenario engines."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use flexo_msg::SampleUpdate;
use serde_json::Value;
use tracing::debug;

/// Replays recorded readings in a loop.
///
/// Accepts a JSON array or newline-delimited JSON. Each entry is either a
/// sample object or a bus message envelope whose `payload.data` holds one, so
/// a `debug/raw` capture can be fed back unchanged.
#[derive(Debug, Default, Clone)]
pub struct ReplayEngine {
    updates: Vec<SampleUpdate>,
    cursor: usize,
}

impl ReplayEngine {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read replay file {}", path.display()))?;
        let values: Vec<Value> = if contents.trim_start().starts_with('[') {
            serde_json::from_str(&contents)
                .with_context(|| format!("invalid replay JSON {}", path.display()))?
        } else {
            contents
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(idx, line)| {
                    serde_json::from_str(line).with_context(|| {
                        format!("invalid replay line {} in {}", idx + 1, path.display())
                    })
                })
                .collect::<Result<_>>()?
        };
        let engine = Self::from_values(&values);
        debug!(path = %path.display(), samples = engine.len(), "loaded replay file");
        Ok(engine)
    }

    pub fn from_values(values: &[Value]) -> Self {
        let updates = values
            .iter()
            .map(|value| {
                let inner = value
                    .get("payload")
                    .and_then(|payload| payload.get("data"))
                    .unwrap_or(value);
                SampleUpdate::from_json(inner)
            })
            .filter(|update| !update.is_empty())
            .collect();
        Self { updates, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn next_update(&mut self) -> Option<SampleUpdate> {
        if self.updates.is_empty() {
            return None;
        }
        let update = self.updates[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.updates.len();
        Some(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_json_array() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"[{{"cumulativeCount":10,"lineSpeed":60}},{{"cumulativeCount":11,"lineSpeed":0}}]"#
        )?;
        file.flush()?;
        let mut replay = ReplayEngine::from_path(file.path())?;
        assert_eq!(replay.len(), 2);
        let first = replay.next_update().expect("update");
        assert_eq!(first.cumulative_count, Some(10.0));
        Ok(())
    }

    #[test]
    fn loads_ndjson_bus_capture() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"{{"topic":"debug_raw","payload":{{"kind":"raw","data":{{"cumulativeCount":5,"lineSpeed":30}}}}}}"#
        )?;
        writeln!(file)?;
        writeln!(file, r#"{{"noise":true}}"#)?;
        file.flush()?;
        let mut replay = ReplayEngine::from_path(file.path())?;
        assert_eq!(replay.len(), 1);
        assert_eq!(replay.next_update().and_then(|u| u.line_speed), Some(30.0));
        Ok(())
    }

    #[test]
    fn next_update_cycles() {
        let mut replay = ReplayEngine::from_values(&[
            serde_json::json!({ "lineSpeed": 1.0 }),
            serde_json::json!({ "lineSpeed": 2.0 }),
        ]);
        let first = replay.next_update().unwrap();
        let _ = replay.next_update().unwrap();
        let third = replay.next_update().unwrap();
        assert_eq!(first, third);
    }
}

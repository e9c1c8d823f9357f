use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;
use crate::model::tick::Tick;

/// A validated tick plus the metrics derived from it at ingest time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTick {
    #[serde(flatten)]
    pub tick: Tick,
    pub change: Decimal,
    pub change_percent: Option<Decimal>,
    pub anomaly: String,
    pub moving_average: Option<Decimal>,
}

impl ArchivedTick {
    pub fn from_tick(tick: &Tick, anomaly_threshold_pct: Decimal) -> Self {
        let anomaly = if tick.is_anomaly(anomaly_threshold_pct) {
            "Yes"
        } else {
            "No"
        };
        Self {
            tick: tick.clone(),
            change: tick.change(),
            change_percent: tick.change_percent(),
            anomaly: anomaly.to_string(),
            moving_average: tick.moving_average(),
        }
    }
}

/// Append-only raw event archive. Writes are best-effort from the caller's view.
pub trait RawArchive: Send + Sync {
    fn append(&self, record: &ArchivedTick) -> Result<(), ArchiveError>;
}

/// Writes one JSON file per tick under `{root}/raw-data/{SYMBOL}/`.
#[derive(Debug, Clone)]
pub struct FileArchive {
    root: PathBuf,
}

impl FileArchive {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path_for(&self, tick: &Tick) -> PathBuf {
        let stamp = tick.timestamp.to_rfc3339().replace(':', "-");
        self.root
            .join("raw-data")
            .join(&tick.symbol)
            .join(format!("{}.json", stamp))
    }
}

impl RawArchive for FileArchive {
    fn append(&self, record: &ArchivedTick) -> Result<(), ArchiveError> {
        let path = self.path_for(&record.tick);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(record)?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullArchive;

impl RawArchive for NullArchive {
    fn append(&self, _record: &ArchivedTick) -> Result<(), ArchiveError> {
        Ok(())
    }
}

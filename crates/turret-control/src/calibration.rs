//! Zero calibration persistence
//!
//! Stores the actuator angles of the reference pose in a small JSON file so
//! the zero survives restarts. Loading never fails: a missing or unreadable
//! file means no calibration, i.e. {0, 0}.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use targeting::ZeroCalibration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("failed to write zero calibration: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalibrationRecord {
    #[serde(alias = "theta0", default)]
    phi0: f64,
    #[serde(default)]
    z0: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    captured_at: Option<DateTime<Utc>>,
}

pub struct ZeroCalibrationStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ZeroCalibrationStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored calibration, or {0, 0} when there is none
    pub fn load(&self) -> ZeroCalibration {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No zero calibration at {:?}, using defaults", self.path);
                return ZeroCalibration::default();
            }
            Err(e) => {
                warn!("Failed to read zero calibration {:?}: {}", self.path, e);
                return ZeroCalibration::default();
            }
        };

        match serde_json::from_str::<CalibrationRecord>(&text) {
            Ok(record) if record.phi0.is_finite() && record.z0.is_finite() => {
                ZeroCalibration::new(record.phi0, record.z0)
            }
            Ok(_) => {
                warn!("Zero calibration {:?} holds non-finite values, using defaults", self.path);
                ZeroCalibration::default()
            }
            Err(e) => {
                warn!("Corrupt zero calibration {:?}: {}, using defaults", self.path, e);
                ZeroCalibration::default()
            }
        }
    }

    /// Persist a new calibration. The file is replaced atomically.
    pub fn save(&self, phi0: f64, z0: f64) -> Result<ZeroCalibration, CalibrationError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let record = CalibrationRecord {
            phi0,
            z0,
            captured_at: Some(Utc::now()),
        };

        let mut file = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, &record).map_err(std::io::Error::from)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        info!("Saved zero calibration phi0={:.3} z0={:.3} to {:?}", phi0, z0, self.path);
        Ok(ZeroCalibration::new(phi0, z0))
    }
}

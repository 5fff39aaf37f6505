//! On-disk state: baseline snapshot and last known prices.
//!
//! Both files are small JSON documents written atomically (write to a
//! temporary sibling, then rename) so a crash mid-write never leaves a
//! torn file behind.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::baseline::Baseline;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::portfolio::{serde_map, PriceMap};

pub struct Store {
    baseline_path: PathBuf,
    prices_path: PathBuf,
}

/// Envelope for the persisted price fallback.
#[derive(Debug, Serialize, Deserialize)]
struct PriceFile {
    #[serde(with = "serde_map")]
    prices: PriceMap,
    updated_at: DateTime<Utc>,
}

impl Store {
    pub fn new(cfg: &StoreConfig) -> Self {
        let dir = Path::new(&cfg.dir);
        Self {
            baseline_path: dir.join(&cfg.baseline_file),
            prices_path: dir.join(&cfg.prices_file),
        }
    }

    /// `Ok(None)` when no baseline has been captured yet.
    pub fn load_baseline(&self) -> Result<Option<Baseline>> {
        match read_if_exists(&self.baseline_path)? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn save_baseline(&self, baseline: &Baseline) -> Result<()> {
        let json = serde_json::to_string_pretty(baseline)?;
        write_atomic(&self.baseline_path, &json)
    }

    pub fn baseline_path(&self) -> &Path {
        &self.baseline_path
    }

    pub fn load_last_prices(&self) -> Result<Option<PriceMap>> {
        match read_if_exists(&self.prices_path)? {
            Some(text) => {
                let file: PriceFile = serde_json::from_str(&text)?;
                Ok(Some(file.prices))
            }
            None => Ok(None),
        }
    }

    pub fn save_last_prices(&self, prices: &PriceMap) -> Result<()> {
        let file = PriceFile {
            prices: prices.clone(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.prices_path, &json)
    }
}

fn read_if_exists(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|e| Error::StoreRead {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Write via a `.tmp` sibling and rename into place.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let store_err = |e: std::io::Error| Error::StoreWrite {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(store_err)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).map_err(store_err)?;
    fs::rename(&tmp, path).map_err(store_err)
}

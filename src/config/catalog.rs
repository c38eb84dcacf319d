//! Static fleet catalog (`vm_data.json`).
//!
//! A JSON array of `{id, name, country, url, readonly, profiles}` objects keyed by the
//! provider-assigned instance id.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::instance::InstanceProfile;

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(flatten)]
    pub profile: InstanceProfile,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, profile: InstanceProfile) -> Self {
        Self {
            id: id.into(),
            profile,
        }
    }
}

/// Validated catalog with id lookup.
#[derive(Debug, Clone, Default)]
pub struct FleetCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl FleetCatalog {
    /// Reads and validates the catalog at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::PathNotFound {
                path: path.to_path_buf(),
            });
        }
        if !path.is_file() {
            return Err(ConfigError::NotAFile {
                path: path.to_path_buf(),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::CatalogRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::CatalogParse {
                path: path.to_path_buf(),
                source: e,
            })?;

        let catalog = Self::from_entries(entries)?;
        tracing::info!(path = %path.display(), instances = catalog.len(), "fleet catalog loaded");
        Ok(catalog)
    }

    /// Validates `entries` and builds the id index.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::EmptyId { index: i });
            }
            if index.insert(entry.id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateInstance {
                    id: entry.id.clone(),
                });
            }
            for profile in &entry.profile.profiles {
                if let Some(field) = profile.blank_field() {
                    return Err(ConfigError::InvalidProfile {
                        id: entry.id.clone(),
                        profile: profile.name().to_string(),
                        field,
                    });
                }
            }
        }

        Ok(Self { entries, index })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    /// Static config for `id`; unknown ids get the defaults (`"N/A"`, unrestricted).
    pub fn profile_for(&self, id: &str) -> InstanceProfile {
        self.get(id)
            .map(|e| e.profile.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

use crate::automation::autoloot::LootRule;
use crate::automation::organizer::OrganizerConfig;
use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const LOOT_RULES_FILE: &str = "autoloot.json";
pub const ORGANIZERS_FILE: &str = "organizers.json";

/// JSON documents for persisted rules under `<root>/rules/`.
///
/// Each save copies the previous file to `<name>.bak` first; a malformed
/// primary falls back to that backup.
#[derive(Debug, Clone)]
pub struct RuleStore {
    root: PathBuf,
}

/// Rules as loaded, plus anything that went wrong while loading them.
#[derive(Debug, Default)]
pub struct LoadedRules {
    pub loot_rules: Vec<LootRule>,
    pub organizers: Vec<OrganizerConfig>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LootRulesDocument {
    #[serde(default)]
    rules: Vec<LootRule>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OrganizersDocument {
    #[serde(default)]
    organizers: Vec<OrganizerConfig>,
}

impl RuleStore {
    pub fn from_root(root: &Path) -> Self {
        Self {
            root: root.join("rules"),
        }
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    /// Loads both documents. Never fails: broken files become empty rule
    /// sets and are reported in `errors`.
    pub fn load_all(&self) -> LoadedRules {
        let mut loaded = LoadedRules::default();
        match self.load_loot_rules() {
            Ok(rules) => loaded.loot_rules = rules,
            Err(err) => loaded.errors.push(err.to_string()),
        }
        match self.load_organizers() {
            Ok(organizers) => loaded.organizers = organizers,
            Err(err) => loaded.errors.push(err.to_string()),
        }
        for err in &loaded.errors {
            tracing::warn!(
                target: "lootkit::store",
                error = %err,
                "rule file ignored, using empty set"
            );
        }
        loaded
    }

    pub fn load_loot_rules(&self) -> Result<Vec<LootRule>, StoreError> {
        let document: LootRulesDocument = self.load_document(LOOT_RULES_FILE)?;
        Ok(document.rules)
    }

    pub fn load_organizers(&self) -> Result<Vec<OrganizerConfig>, StoreError> {
        let document: OrganizersDocument = self.load_document(ORGANIZERS_FILE)?;
        Ok(document.organizers)
    }

    pub fn save_loot_rules(&self, rules: &[LootRule]) -> Result<(), StoreError> {
        self.save_document(
            LOOT_RULES_FILE,
            &LootRulesDocument {
                rules: rules.to_vec(),
            },
        )
    }

    pub fn save_organizers(&self, organizers: &[OrganizerConfig]) -> Result<(), StoreError> {
        self.save_document(
            ORGANIZERS_FILE,
            &OrganizersDocument {
                organizers: organizers.to_vec(),
            },
        )
    }

    fn load_document<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.root.join(name);
        let backup_path = backup_path(&path);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return self.load_backup(&backup_path).map(Option::unwrap_or_default);
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        match serde_json::from_str(&data) {
            Ok(parsed) => Ok(parsed),
            Err(source) => {
                if let Ok(Some(fallback)) = self.load_backup(&backup_path) {
                    tracing::warn!(
                        target: "lootkit::store",
                        path = %path.display(),
                        error = %source,
                        "rule file parse failed, using backup"
                    );
                    return Ok(fallback);
                }
                Err(StoreError::Parse { path, source })
            }
        }
    }

    fn load_backup<T: DeserializeOwned>(
        &self,
        backup_path: &Path,
    ) -> Result<Option<T>, StoreError> {
        let data = match fs::read_to_string(backup_path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: backup_path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: backup_path.to_path_buf(),
                source,
            })
    }

    fn save_document<T: Serialize>(&self, name: &str, document: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;
        let path = self.root.join(name);
        let data = serde_json::to_string_pretty(document).map_err(|source| StoreError::Parse {
            path: path.clone(),
            source,
        })?;
        if path.exists() {
            let backup_path = backup_path(&path);
            fs::copy(&path, &backup_path).map_err(|source| StoreError::Io {
                path: backup_path.clone(),
                source,
            })?;
        }
        fs::write(&path, data).map_err(|source| StoreError::Io { path, source })
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

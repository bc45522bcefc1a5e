//! BlockDB configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BlockDbError, BlockDbResult};

/// Where backing files live and whether recording starts enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockDbConfig {
    /// Directory holding one backing file per world.
    pub root: PathBuf,
    /// Initial value of the engine's enabled flag.
    pub enabled: bool,
    /// Backing file extension, without the dot.
    pub extension: String,
}

impl Default for BlockDbConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("blockdb"),
            enabled: true,
            extension: "cbdb".to_owned(),
        }
    }
}

impl BlockDbConfig {
    /// Config rooted at `root` with every other field defaulted.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> BlockDbResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Backing file path for `world`.
    pub fn path_for(&self, world: &str) -> BlockDbResult<PathBuf> {
        let invalid = world.is_empty()
            || world == "."
            || world.contains("..")
            || world.contains(['/', '\\', '\0']);
        if invalid {
            return Err(BlockDbError::InvalidWorldName(world.to_owned()));
        }
        Ok(self.root.join(format!("{world}.{}", self.extension)))
    }
}

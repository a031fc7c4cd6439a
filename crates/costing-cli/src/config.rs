//! `.costing/config.toml` loading.

use costing_ledger::ReconcileOptions;
use costing_tree::{
    BuildMode, BuildOptions, ColumnField, ColumnMap, DEFAULT_KEY_PREFIX, DEFAULT_MAX_LEVEL,
    DEFAULT_PROGRESS_INTERVAL, RowOrder, TreeCodec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = ".costing/config.toml";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CostingConfig {
    pub max_level: u32,
    pub progress_interval: usize,
    pub key_prefix: String,
    pub nodes_path: PathBuf,
    pub ledger_path: PathBuf,
    pub documents_path: PathBuf,
    pub log_filter: String,
    /// Extra exact header aliases per field, e.g. `structural_code = ["Ref"]`.
    pub columns: BTreeMap<ColumnField, Vec<String>>,
}

impl Default for CostingConfig {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            nodes_path: PathBuf::from(".costing/nodes.jsonl"),
            ledger_path: PathBuf::from(".costing/ledger.jsonl"),
            documents_path: PathBuf::from(".costing/documents.jsonl"),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            columns: BTreeMap::new(),
        }
    }
}

impl CostingConfig {
    /// Load from `path`; a missing file yields defaults.
    ///
    /// Relative data paths are resolved against the directory holding
    /// `.costing/` (the config file's grandparent when it sits there).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(root) = workspace_root(path) {
            config.rebase(&root);
        }
        Ok(config)
    }

    pub fn codec(&self) -> TreeCodec {
        TreeCodec::new(self.max_level)
    }

    pub fn column_map(&self, require_level: bool) -> ColumnMap {
        let mut map = ColumnMap::default().require_level(require_level);
        for (field, aliases) in &self.columns {
            for alias in aliases {
                map = map.with_alias(*field, alias);
            }
        }
        map
    }

    pub fn build_options(&self, tree: &str, by_level: bool, sort_by_level: bool) -> BuildOptions {
        let mut options = BuildOptions::new(tree);
        options.key_prefix = self.key_prefix.clone();
        options.progress_interval = self.progress_interval;
        options.mode = if by_level {
            BuildMode::LevelOnly
        } else {
            BuildMode::Structural
        };
        options.row_order = if sort_by_level {
            RowOrder::LevelAscending
        } else {
            RowOrder::Input
        };
        options
    }

    pub fn reconcile_options(&self, include_drafts: bool) -> ReconcileOptions {
        ReconcileOptions {
            include_drafts,
            progress_interval: self.progress_interval,
        }
    }

    fn rebase(&mut self, root: &Path) {
        for path in [
            &mut self.nodes_path,
            &mut self.ledger_path,
            &mut self.documents_path,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

/// `<root>/.costing/config.toml` → `<root>`. Other layouts are not rebased.
fn workspace_root(config_path: &Path) -> Option<PathBuf> {
    let dir = config_path.parent()?;
    if dir.file_name()? != ".costing" {
        return None;
    }
    let root = dir.parent()?;
    if root.as_os_str().is_empty() {
        return None;
    }
    Some(root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = CostingConfig::load("/nonexistent/costing.toml").expect("defaults");
        assert_eq!(config, CostingConfig::default());
        assert_eq!(config.max_level, 4);
        assert_eq!(config.progress_interval, 20);
    }

    #[test]
    fn parses_partial_file_with_column_aliases() {
        let config: CostingConfig = toml::from_str(
            r#"
max_level = 3
key_prefix = "N-"

[columns]
structural_code = ["Ref", "Position"]
"#,
        )
        .expect("config should parse");

        assert_eq!(config.max_level, 3);
        assert_eq!(config.key_prefix, "N-");
        assert_eq!(config.progress_interval, 20);
        let binding = config
            .column_map(false)
            .resolve(&["Position", "Qty"])
            .expect("alias resolves the code column");
        assert_eq!(binding.position(ColumnField::StructuralCode), Some(0));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<CostingConfig>("max_depth = 3").is_err());
    }

    #[test]
    fn data_paths_rebase_onto_workspace_root() {
        assert_eq!(
            workspace_root(Path::new("/srv/project/.costing/config.toml")),
            Some(PathBuf::from("/srv/project"))
        );
        assert_eq!(workspace_root(Path::new(".costing/config.toml")), None);
        assert_eq!(workspace_root(Path::new("/etc/costing.toml")), None);
    }
}

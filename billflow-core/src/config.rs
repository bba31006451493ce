//! `billflow.yaml` — where state lives and which external programs act as
//! the item source and stage collaborators.
//!
//! ```yaml
//! data_dir: data
//! items:
//!   kind: file
//!   path: bills-{year}.txt
//! stages:
//!   download: { program: ./stages/download.sh, args: ["{item}"] }
//!   convert:  { program: ./stages/convert.sh }
//! ```
//!
//! A missing config file is not an error: the defaults track state under
//! `data/` with no collaborators configured.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::store;
use crate::types::{SessionScope, Stage};

pub const DEFAULT_CONFIG_FILE: &str = "billflow.yaml";

/// Root of the YAML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ItemSourceConfig>,
    #[serde(default)]
    pub stages: StageCommands,
}

/// Where the authoritative item list comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemSourceConfig {
    /// One identifier per line; `{year}` in the path is substituted.
    File { path: String },
    /// A program whose stdout lists identifiers.
    Command(CommandSpec),
}

/// Optional external program per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amend: Option<CommandSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa: Option<CommandSpec>,
}

impl StageCommands {
    pub fn get(&self, stage: Stage) -> Option<&CommandSpec> {
        match stage {
            Stage::Download => self.download.as_ref(),
            Stage::Convert => self.convert.as_ref(),
            Stage::Amend => self.amend.as_ref(),
            Stage::Qa => self.qa.as_ref(),
        }
    }
}

/// An external program invocation. `{year}` and `{item}` in `args` are
/// substituted before launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            items: None,
            stages: StageCommands::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate the config at `path`.
    ///
    /// Returns `ConfigError::Io` if absent, `ConfigError::Parse` if malformed.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`PipelineConfig::load_at`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(_) => Self::load_at(path),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// `<data_dir>/<year>rs`
    pub fn scope_dir(&self, scope: SessionScope) -> PathBuf {
        scope.dir_at(&self.data_dir)
    }

    /// `<data_dir>/<year>rs/pipeline_state.json`
    pub fn state_path(&self, scope: SessionScope) -> PathBuf {
        store::state_path_at(&self.data_dir, scope)
    }

    /// The configured item source, or an error naming the missing key.
    pub fn require_items(&self) -> Result<&ItemSourceConfig, ConfigError> {
        self.items.as_ref().ok_or_else(|| {
            ConfigError::Invalid(
                "no item source configured; set `items` in billflow.yaml".to_string(),
            )
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ItemSourceConfig::Command(spec)) = &self.items {
            validate_command("items", spec)?;
        }
        if let Some(ItemSourceConfig::File { path }) = &self.items {
            if path.trim().is_empty() {
                return Err(ConfigError::Invalid("items.path must not be empty".to_string()));
            }
        }
        for stage in Stage::ALL {
            if let Some(spec) = self.stages.get(stage) {
                validate_command(&format!("stages.{stage}"), spec)?;
            }
        }
        Ok(())
    }
}

fn validate_command(key: &str, spec: &CommandSpec) -> Result<(), ConfigError> {
    if spec.program.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{key}.program must not be empty"
        )));
    }
    Ok(())
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, yaml: &str) -> PathBuf {
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::load_or_default(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(config.require_items().is_err());
    }

    #[test]
    fn parses_file_source_and_stage_commands() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
data_dir: /srv/bills
items:
  kind: file
  path: lists/bills-{year}.txt
stages:
  download:
    program: ./stages/download.sh
    args: ["{item}", "--year", "{year}"]
  qa:
    program: python
    args: [qa.py]
    env:
      QA_STRICT: "1"
"#,
        );
        let config = PipelineConfig::load_at(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/bills"));
        assert_eq!(
            config.items,
            Some(ItemSourceConfig::File {
                path: "lists/bills-{year}.txt".to_string()
            })
        );
        assert_eq!(
            config.stages.get(Stage::Download).unwrap().args,
            vec!["{item}", "--year", "{year}"]
        );
        assert!(config.stages.get(Stage::Convert).is_none());
        assert_eq!(config.stages.get(Stage::Qa).unwrap().env["QA_STRICT"], "1");
        assert!(config
            .state_path(SessionScope::new(2025))
            .ends_with("2025rs/pipeline_state.json"));
    }

    #[test]
    fn parses_command_source() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "items:\n  kind: command\n  program: ./list-bills\n  args: [\"{year}\"]\n",
        );
        let config = PipelineConfig::load_at(&path).unwrap();
        match config.require_items().unwrap() {
            ItemSourceConfig::Command(spec) => assert_eq!(spec.program, "./list-bills"),
            other => panic!("expected command source, got {other:?}"),
        }
    }

    #[test]
    fn empty_program_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "stages:\n  amend:\n    program: \"  \"\n");
        let err = PipelineConfig::load_at(&path).unwrap_err();
        assert!(err.to_string().contains("stages.amend.program"), "got: {err}");
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "stages: [unclosed");
        let err = PipelineConfig::load_at(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(DEFAULT_CONFIG_FILE));
    }
}

//! Configuration system for annealant.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> CLI overrides. Configuration is read
//! from the platform config dir (`annealant/config.toml`) and/or
//! `.annealant/config.toml` in the workspace directory.
//!
//! The options are fixed for the duration of a run; there is no mid-run
//! reconfiguration.

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map, Value},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnealantConfig {
    pub training: TrainingConfig,
    pub output: OutputConfig,
    pub engine: EngineConfig,
}

/// Schedule parameters consumed by the adaptive controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Learning rate for the first epoch.
    pub initial_learning_rate: f64,
    /// Multiplier applied to the learning rate once per epoch after the
    /// decay threshold. Must be in (0, 1].
    pub decay_factor: f64,
    /// First epoch (1-based) at which accept/reject decisions are made and
    /// decay becomes eligible.
    #[serde(alias = "least_train_epoch")]
    pub min_epochs_before_decay: usize,
    /// Hard bound on the number of epochs.
    #[serde(alias = "num_epoches")]
    pub max_epochs: usize,
    /// Improvement, in metric units, required to keep training after an
    /// accepted epoch.
    #[serde(alias = "end_adjust_acc")]
    pub acceptance_margin: f64,
    pub batch_size: usize,
    /// Emit a progress message every N batches.
    pub print_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            initial_learning_rate: 0.001,
            decay_factor: 0.5,
            min_epochs_before_decay: 15,
            max_epochs: 40,
            acceptance_margin: 0.05,
            batch_size: 4,
            print_every: 20,
        }
    }
}

impl TrainingConfig {
    /// Reject configurations the controller cannot run safely.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.initial_learning_rate.is_finite() || self.initial_learning_rate <= 0.0 {
            return Err(ConfigError::invalid(
                "initial_learning_rate",
                format!("must be a positive number, got {}", self.initial_learning_rate),
            ));
        }
        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            return Err(ConfigError::invalid(
                "decay_factor",
                format!("must be in (0, 1], got {}", self.decay_factor),
            ));
        }
        if !self.acceptance_margin.is_finite() || self.acceptance_margin <= 0.0 {
            return Err(ConfigError::invalid(
                "acceptance_margin",
                format!("must be a positive number, got {}", self.acceptance_margin),
            ));
        }
        if self.max_epochs == 0 {
            return Err(ConfigError::invalid("max_epochs", "must be at least 1"));
        }
        if self.min_epochs_before_decay > self.max_epochs {
            return Err(ConfigError::invalid(
                "min_epochs_before_decay",
                format!(
                    "{} exceeds max_epochs ({})",
                    self.min_epochs_before_decay, self.max_epochs
                ),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.print_every == 0 {
            return Err(ConfigError::invalid("print_every", "must be at least 1"));
        }
        Ok(())
    }
}

/// Where checkpoints, run history, and the experiment record are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub checkpoint_dir: PathBuf,
    /// Append-only experiment record shared by every run.
    pub record_file: PathBuf,
    /// Directory for rolling log files. Defaults to `checkpoint_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./log"),
            record_file: PathBuf::from("training_record"),
            log_dir: None,
        }
    }
}

impl OutputConfig {
    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_deref().unwrap_or(&self.checkpoint_dir)
    }
}

/// Parameters for the built-in synthetic engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub seed: u64,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub features: usize,
    /// Probability that a generated label is flipped.
    pub noise: f64,
    /// Gradients whose L2 norm exceeds this are rescaled to it.
    pub clip_grad_norm: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            train_samples: 2048,
            validation_samples: 512,
            features: 16,
            noise: 0.05,
            clip_grad_norm: 400.0,
        }
    }
}

impl AnnealantConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.training.validate()?;
        if self.engine.features == 0 {
            return Err(ConfigError::invalid("engine.features", "must be at least 1"));
        }
        if self.engine.train_samples == 0 || self.engine.validation_samples == 0 {
            return Err(ConfigError::invalid(
                "engine.train_samples",
                "training and validation sets must be non-empty",
            ));
        }
        if !(0.0..0.5).contains(&self.engine.noise) {
            return Err(ConfigError::invalid(
                "engine.noise",
                format!("must be in [0, 0.5), got {}", self.engine.noise),
            ));
        }
        if !self.engine.clip_grad_norm.is_finite() || self.engine.clip_grad_norm <= 0.0 {
            return Err(ConfigError::invalid(
                "engine.clip_grad_norm",
                "must be a positive number",
            ));
        }
        Ok(())
    }

    /// Render as TOML, e.g. for `annealant config show`.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Load {
            message: e.to_string(),
        })
    }
}

/// Legacy spellings of `[training]` keys, mapped to their current names.
const LEGACY_TRAINING_KEYS: &[(&str, &str)] = &[
    ("least_train_epoch", "min_epochs_before_decay"),
    ("num_epoches", "max_epochs"),
    ("end_adjust_acc", "acceptance_margin"),
];

/// Rewrites legacy `[training]` keys of the wrapped provider to their
/// current names before merging.
///
/// The defaults layer always carries the current names, so without this an
/// aliased key would reach serde next to its current name and fail as a
/// duplicate field.
struct LegacyKeys<P>(P);

impl<P: Provider> Provider for LegacyKeys<P> {
    fn metadata(&self) -> Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        let mut data = self.0.data()?;
        for dict in data.values_mut() {
            if let Some(Value::Dict(_, training)) = dict.get_mut("training") {
                for (legacy, current) in LEGACY_TRAINING_KEYS {
                    if let Some(value) = training.remove(*legacy) {
                        training.entry((*current).to_string()).or_insert(value);
                    }
                }
            }
        }
        Ok(data)
    }
}

fn layered(workspace: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(AnnealantConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "annealant", "annealant") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(LegacyKeys(Toml::file(&user_config)));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".annealant").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(LegacyKeys(Toml::file(&ws_config)));
        }
    }

    figment.merge(LegacyKeys(Env::prefixed("ANNEALANT_").split("__")))
}

fn extract(figment: Figment) -> Result<AnnealantConfig, ConfigError> {
    figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })
}

/// Load configuration from layered sources and validate it.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (`ANNEALANT_TRAINING__MAX_EPOCHS`, ...)
/// 3. Workspace-local config (`.annealant/config.toml`)
/// 4. User config (`~/.config/annealant/config.toml`)
/// 5. Built-in defaults
///
/// Older `[training]` key names (`least_train_epoch`, `num_epoches`,
/// `end_adjust_acc`) are accepted in files and the environment.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AnnealantConfig>,
) -> Result<AnnealantConfig, ConfigError> {
    let mut figment = layered(workspace);
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }
    let config = extract(figment)?;
    config.validate()?;
    Ok(config)
}

/// Merge the file and environment layers without validating.
///
/// For callers that apply field-level overrides of their own (command-line
/// flags) and must validate only the final result.
pub fn read_config(workspace: Option<&Path>) -> Result<AnnealantConfig, ConfigError> {
    extract(layered(workspace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = AnnealantConfig::default();
        assert_eq!(config.training.initial_learning_rate, 0.001);
        assert_eq!(config.training.decay_factor, 0.5);
        assert_eq!(config.training.min_epochs_before_decay, 15);
        assert_eq!(config.training.max_epochs, 40);
        assert_eq!(config.training.batch_size, 4);
        assert_eq!(config.output.log_dir(), Path::new("./log"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_decay_outside_unit_interval() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let config = TrainingConfig {
                decay_factor: bad,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid { field, .. } if field == "decay_factor"),
                "decay {bad} gave {err:?}"
            );
        }
        let unity = TrainingConfig {
            decay_factor: 1.0,
            ..Default::default()
        };
        assert!(unity.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_margin() {
        let config = TrainingConfig {
            acceptance_margin: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "acceptance_margin"
        ));
    }

    #[test]
    fn test_rejects_min_epochs_above_max() {
        let config = TrainingConfig {
            min_epochs_before_decay: 10,
            max_epochs: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "min_epochs_before_decay"
        ));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AnnealantConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let parsed: AnnealantConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = AnnealantConfig::default();
        overrides.training.max_epochs = 12;
        overrides.training.min_epochs_before_decay = 3;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.training.max_epochs, 12);
        assert_eq!(config.training.min_epochs_before_decay, 3);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".annealant");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            r#"
[training]
initial_learning_rate = 0.01
decay_factor = 0.25
min_epochs_before_decay = 2
max_epochs = 6
acceptance_margin = 0.5
batch_size = 8
print_every = 5

[output]
checkpoint_dir = "runs"
record_file = "record.txt"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.training.decay_factor, 0.25);
        assert_eq!(config.training.max_epochs, 6);
        assert_eq!(config.output.checkpoint_dir, PathBuf::from("runs"));
        assert_eq!(config.engine, EngineConfig::default());
    }

    fn write_workspace_config(body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".annealant");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(cfg_dir.join("config.toml"), body).unwrap();
        dir
    }

    #[test]
    fn test_load_config_accepts_legacy_training_keys() {
        let dir = write_workspace_config(
            "[training]\nleast_train_epoch = 2\nnum_epoches = 6\nend_adjust_acc = 0.5\n",
        );

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.training.min_epochs_before_decay, 2);
        assert_eq!(config.training.max_epochs, 6);
        assert_eq!(config.training.acceptance_margin, 0.5);
    }

    #[test]
    fn test_current_key_wins_over_legacy_spelling() {
        let dir = write_workspace_config("[training]\nnum_epoches = 6\nmax_epochs = 9\n");
        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.training.max_epochs, 9);
    }

    #[test]
    fn test_training_config_deserializes_legacy_names_directly() {
        let parsed: TrainingConfig = toml::from_str(
            r#"
initial_learning_rate = 0.001
decay_factor = 0.5
least_train_epoch = 15
num_epoches = 40
end_adjust_acc = 0.05
batch_size = 4
print_every = 20
"#,
        )
        .unwrap();
        assert_eq!(parsed, TrainingConfig::default());
    }

    #[test]
    fn test_read_config_defers_validation() {
        let dir = write_workspace_config("[training]\nmax_epochs = 3\n");
        assert!(load_config(Some(dir.path()), None).is_err());

        let mut config = read_config(Some(dir.path())).unwrap();
        assert_eq!(config.training.max_epochs, 3);
        config.training.min_epochs_before_decay = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".annealant");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "[training]\nmin_epochs_before_decay = 50\nmax_epochs = 10\n",
        )
        .unwrap();

        let err = load_config(Some(dir.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}

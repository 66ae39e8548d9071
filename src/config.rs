//! Configuration file support for hpoa
//!
//! Reads from .hpoa/config.toml, found by walking up from the current
//! directory. Relative paths in the file are resolved against the directory
//! that contains `.hpoa/`.

use crate::reconcile::{ApplyOptions, ApplyPolicy, Strictness};
use crate::suggest::{CommandSuggester, FileSuggester, RetryingSuggester, SuggestionSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".hpoa";
pub const CONFIG_FILE: &str = "config.toml";
const PENDING_FILE: &str = "pending.json";
const APPLIED_FILE: &str = "applied";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub ontology: OntologyConfig,

    #[serde(default)]
    pub annotations: AnnotationsConfig,

    #[serde(default)]
    pub reconcile: ApplyOptions,

    #[serde(default)]
    pub suggester: SuggesterConfig,

    #[serde(default)]
    pub curator: CuratorConfig,

    /// Directory holding `.hpoa/`; relative paths resolve against it
    #[serde(skip)]
    pub root: PathBuf,
}

/// Ontology sources
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OntologyConfig {
    /// HPO in OBO Graphs JSON
    /// Default: "data/hp.json"
    #[serde(default = "default_hp")]
    pub hp: PathBuf,

    /// Disease ontology used to check `database_id` values, e.g. MONDO
    #[serde(default)]
    pub diseases: Option<PathBuf>,

    /// Prefix of the disease ontology
    /// Default: "MONDO"
    #[serde(default = "default_disease_prefix")]
    pub disease_prefix: String,

    /// Default tree root
    /// Default: "HP:0000118" (Phenotypic abnormality)
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_hp() -> PathBuf {
    PathBuf::from("data/hp.json")
}

fn default_disease_prefix() -> String {
    "MONDO".to_string()
}

fn default_root() -> String {
    crate::ontology::PHENOTYPIC_ABNORMALITY.to_string()
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            hp: default_hp(),
            diseases: None,
            disease_prefix: default_disease_prefix(),
            root: default_root(),
        }
    }
}

/// Annotation table location
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnnotationsConfig {
    /// Default: "data/phenotype.hpoa"
    #[serde(default = "default_annotations")]
    pub path: PathBuf,

    /// Where approved tables are written; the source file when unset
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_annotations() -> PathBuf {
    PathBuf::from("data/phenotype.hpoa")
}

impl Default for AnnotationsConfig {
    fn default() -> Self {
        Self {
            path: default_annotations(),
            output: None,
        }
    }
}

/// External suggester settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SuggesterConfig {
    /// Program to run; the curator's message goes to its stdin
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Canned reply file, used instead of `command` when set
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Default: 120
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Total attempts per request, including the first
    /// Default: 2
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Default: 500
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

fn default_timeout() -> u64 {
    120
}

fn default_attempts() -> u32 {
    2
}

fn default_backoff() -> u64 {
    500
}

impl Default for SuggesterConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            file: None,
            timeout_secs: default_timeout(),
            attempts: default_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

/// Who signs biocuration entries
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct CuratorConfig {
    #[serde(default)]
    pub name: Option<String>,
}

impl Config {
    /// Load config from .hpoa/config.toml above the current directory.
    /// Returns default config rooted at the current directory if there is
    /// none; an unreadable file is reported and ignored.
    pub fn load() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match Self::find_config_path(&cwd) {
            Some(path) => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring config file");
                    Self::default().with_root(cwd)
                }
            },
            None => Self::default().with_root(cwd),
        }
    }

    /// Parse a specific config file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config.with_root(root))
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Find config.toml by walking up directory tree
    pub fn find_config_path(start: &Path) -> Option<PathBuf> {
        let mut dir = start;

        loop {
            let config_path = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Resolve a configured path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn hp_path(&self) -> PathBuf {
        self.resolve(&self.ontology.hp)
    }

    pub fn disease_path(&self) -> Option<PathBuf> {
        self.ontology.diseases.as_deref().map(|p| self.resolve(p))
    }

    pub fn annotations_path(&self) -> PathBuf {
        self.resolve(&self.annotations.path)
    }

    pub fn output_path(&self) -> PathBuf {
        match &self.annotations.output {
            Some(output) => self.resolve(output),
            None => self.annotations_path(),
        }
    }

    /// Where `hpoa suggest` leaves the change set for review
    pub fn pending_path(&self) -> PathBuf {
        self.root.join(CONFIG_DIR).join(PENDING_FILE)
    }

    /// Fingerprints of applied change sets, one per line
    pub fn applied_path(&self) -> PathBuf {
        self.root.join(CONFIG_DIR).join(APPLIED_FILE)
    }

    pub fn policy(&self) -> ApplyPolicy {
        self.reconcile.policy
    }

    pub fn strictness(&self) -> Strictness {
        self.reconcile.strictness
    }

    /// The configured suggester, if any, wrapped for retries
    pub fn suggester(&self) -> Option<Box<dyn SuggestionSource>> {
        let s = &self.suggester;
        let inner: Box<dyn SuggestionSource> = if let Some(file) = &s.file {
            Box::new(FileSuggester::new(self.resolve(file)))
        } else if let Some(command) = &s.command {
            Box::new(CommandSuggester::new(
                command.clone(),
                s.args.clone(),
                Duration::from_secs(s.timeout_secs),
            ))
        } else {
            return None;
        };
        Some(Box::new(RetryingSuggester::new(
            inner,
            s.attempts,
            Duration::from_millis(s.backoff_ms),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ontology.root, "HP:0000118");
        assert_eq!(config.policy(), ApplyPolicy::Append);
        assert_eq!(config.strictness(), Strictness::Warn);
        assert_eq!(config.suggester.attempts, 2);
        assert!(config.suggester().is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[ontology]
hp = "/abs/hp.json"
diseases = "mondo.json"

[reconcile]
policy = "replace-by-key"
strictness = "strict"

[suggester]
command = "curate-bot"
args = ["--model", "small"]
timeout_secs = 30

[curator]
name = "jdoe"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let config = config.with_root("/project");
        assert_eq!(config.policy(), ApplyPolicy::ReplaceByKey);
        assert_eq!(config.strictness(), Strictness::Strict);
        assert_eq!(config.hp_path(), PathBuf::from("/abs/hp.json"));
        assert_eq!(config.disease_path(), Some(PathBuf::from("/project/mondo.json")));
        assert_eq!(config.annotations_path(), PathBuf::from("/project/data/phenotype.hpoa"));
        assert_eq!(config.output_path(), config.annotations_path());
        assert_eq!(config.pending_path(), PathBuf::from("/project/.hpoa/pending.json"));
        assert_eq!(config.applied_path(), PathBuf::from("/project/.hpoa/applied"));
        assert_eq!(config.curator.name.as_deref(), Some("jdoe"));
        assert_eq!(config.suggester.timeout_secs, 30);
        assert_eq!(
            config.suggester().unwrap().describe(),
            "command curate-bot --model small (up to 2 attempts)"
        );
    }

    #[test]
    fn test_partial_sections_keep_other_settings() {
        let dir = tempfile::tempdir().unwrap();
        let hpoa = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&hpoa).unwrap();
        let toml = r#"
[ontology]
disease_prefix = "ORPHA"

[annotations]
path = "curated.hpoa"

[reconcile]
policy = "replace-by-key"

[suggester]
file = "reply.json"
"#;
        std::fs::write(hpoa.join(CONFIG_FILE), toml).unwrap();

        let config = Config::load_from(&hpoa.join(CONFIG_FILE)).unwrap();
        assert_eq!(config.policy(), ApplyPolicy::ReplaceByKey);
        assert_eq!(config.strictness(), Strictness::Warn);
        assert_eq!(config.annotations_path(), dir.path().join("curated.hpoa"));
        assert_eq!(config.ontology.disease_prefix, "ORPHA");
        assert_eq!(config.ontology.root, "HP:0000118");
        assert_eq!(config.suggester.attempts, 2);

        let config: Config = toml::from_str("[reconcile]\nstrictness = \"strict\"\n").unwrap();
        assert_eq!(config.policy(), ApplyPolicy::Append);
        assert_eq!(config.strictness(), Strictness::Strict);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[reconcile]\npolicy = \"merge\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_find_and_load_from_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let hpoa = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&hpoa).unwrap();
        std::fs::write(hpoa.join(CONFIG_FILE), "[annotations]\npath = \"x.hpoa\"\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = Config::find_config_path(&nested).unwrap();
        let config = Config::load_from(&found).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.annotations_path(), dir.path().join("x.hpoa"));
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[suggester]\ntimeout_secs = \"soon\"\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse { .. })));
    }
}

//! Repository configuration (`.bramble/config.toml`).
//!
//! Typed settings for the transform engine (orphan handling, conflict
//! resolution budget, case sensitivity) and for annotation.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::annotate::tiebreak::{LexicographicTieBreak, TieBreak};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level bramble configuration.
///
/// Missing fields use defaults. A missing file means all defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrambleConfig {
    /// Tree transform settings.
    #[serde(default)]
    pub transform: TransformConfig,

    /// Annotation settings.
    #[serde(default)]
    pub annotate: AnnotateConfig,
}

// ---------------------------------------------------------------------------
// TransformConfig
// ---------------------------------------------------------------------------

/// Settings consulted by tree transforms.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    /// What conflict resolution does with unversioned files left in a
    /// directory that is being deleted.
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,

    /// Maximum number of find-and-fix passes in conflict resolution.
    #[serde(default = "default_resolution_passes")]
    pub resolution_passes: u32,

    /// Force case sensitivity on or off. Unset means probe the filesystem.
    #[serde(default)]
    pub case_sensitive: Option<bool>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            orphan_policy: OrphanPolicy::default(),
            resolution_passes: default_resolution_passes(),
            case_sensitive: None,
        }
    }
}

const fn default_resolution_passes() -> u32 {
    10
}

/// Handling of unversioned children of a directory scheduled for deletion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanPolicy {
    /// Keep the directory and report a conflict.
    #[default]
    Conflict,
    /// Move the orphans into `bramble-orphans/` at the tree root.
    Move,
}

impl fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "conflict"),
            Self::Move => write!(f, "move"),
        }
    }
}

// ---------------------------------------------------------------------------
// AnnotateConfig
// ---------------------------------------------------------------------------

/// Settings consulted by annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotateConfig {
    /// Built-in tie-break strategy.
    #[serde(default)]
    pub tie_break: TieBreakKind,
}

/// Built-in tie-break strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreakKind {
    /// Smallest origin wins.
    #[default]
    Lexicographic,
}

impl TieBreakKind {
    /// The strategy object for this kind.
    #[must_use]
    pub fn strategy<K: Ord + Clone + 'static>(self) -> &'static dyn TieBreak<K> {
        match self {
            Self::Lexicographic => &LexicographicTieBreak,
        }
    }
}

impl fmt::Display for TieBreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lexicographic => write!(f, "lexicographic"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl BrambleConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields, or a zero
    /// resolution pass budget.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        if config.transform.resolution_passes == 0 {
            return Err(ConfigError {
                path: None,
                message: "transform.resolution_passes must be at least 1".to_owned(),
            });
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = BrambleConfig::default();
        assert_eq!(cfg.transform.orphan_policy, OrphanPolicy::Conflict);
        assert_eq!(cfg.transform.resolution_passes, 10);
        assert_eq!(cfg.transform.case_sensitive, None);
        assert_eq!(cfg.annotate.tie_break, TieBreakKind::Lexicographic);
    }

    #[test]
    fn parse_empty_string() {
        assert_eq!(BrambleConfig::parse("").unwrap(), BrambleConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let cfg = BrambleConfig::parse(
            r#"
[transform]
orphan_policy = "move"
resolution_passes = 3
case_sensitive = false

[annotate]
tie_break = "lexicographic"
"#,
        )
        .unwrap();
        assert_eq!(cfg.transform.orphan_policy, OrphanPolicy::Move);
        assert_eq!(cfg.transform.resolution_passes, 3);
        assert_eq!(cfg.transform.case_sensitive, Some(false));
    }

    #[test]
    fn parse_rejects_unknown_field() {
        let err = BrambleConfig::parse("[transform]\nlimbo = \"x\"\n").unwrap_err();
        assert!(err.message.contains("limbo"), "{}", err.message);
    }

    #[test]
    fn parse_rejects_unknown_orphan_policy() {
        assert!(BrambleConfig::parse("[transform]\norphan_policy = \"delete\"\n").is_err());
    }

    #[test]
    fn parse_rejects_zero_passes() {
        let err = BrambleConfig::parse("[transform]\nresolution_passes = 0\n").unwrap_err();
        assert!(err.message.contains("resolution_passes"));
    }

    #[test]
    fn parse_includes_line_number_on_error() {
        let err = BrambleConfig::parse("\n[transform]\nresolution_passes = \"ten\"\n").unwrap_err();
        assert!(err.message.contains("line 3"), "{}", err.message);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = BrambleConfig::load(Path::new("/nonexistent/bramble/config.toml")).unwrap();
        assert_eq!(cfg, BrambleConfig::default());
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let err = BrambleConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn display_round_trips_kebab_names() {
        assert_eq!(OrphanPolicy::Move.to_string(), "move");
        assert_eq!(TieBreakKind::Lexicographic.to_string(), "lexicographic");
    }
}

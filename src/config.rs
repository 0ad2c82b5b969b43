//! Bundle configuration (`bundle.toml`).
//!
//! Names the bundle and points at its inputs. Relative paths are resolved
//! against the directory holding the config file; paths given on the
//! command line are taken as-is.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use ttb_select::EngineConfig;
use ttb_select::patch::DEFAULT_DIFF_GLOB;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bundle.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed `bundle.toml`. Missing fields use defaults; a missing file is all
/// defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleFile {
    /// Bundle identity.
    #[serde(default)]
    pub bundle: BundleSection,

    /// Source trees and rule files.
    #[serde(default)]
    pub inputs: InputsSection,

    /// Output location.
    #[serde(default)]
    pub output: OutputSection,

    /// Patch tool.
    #[serde(default)]
    pub patch: PatchSection,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `[bundle]`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleSection {
    /// Bundle name; also the default output subdirectory.
    pub name: Option<String>,
}

/// `[inputs]`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputsSection {
    /// Base distribution tree. Required unless given with `--base`.
    pub base: Option<PathBuf>,

    /// Overlay tree.
    #[serde(default = "default_overlay")]
    pub overlay: PathBuf,

    /// Ignore-rule file.
    #[serde(default = "default_ignore")]
    pub ignore: PathBuf,

    /// Search-order file.
    #[serde(default = "default_search_order")]
    pub search_order: PathBuf,

    /// Glob selecting diff files inside the overlay tree.
    #[serde(default = "default_diff_glob")]
    pub diff_glob: String,
}

impl Default for InputsSection {
    fn default() -> Self {
        Self {
            base: None,
            overlay: default_overlay(),
            ignore: default_ignore(),
            search_order: default_search_order(),
            diff_glob: default_diff_glob(),
        }
    }
}

fn default_overlay() -> PathBuf {
    PathBuf::from("include")
}

fn default_ignore() -> PathBuf {
    PathBuf::from("ignore")
}

fn default_search_order() -> PathBuf {
    PathBuf::from("search-order")
}

fn default_diff_glob() -> String {
    DEFAULT_DIFF_GLOB.to_owned()
}

/// `[output]`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    /// Output directory; defaults to `build/output/<name>`.
    pub dir: Option<PathBuf>,

    /// Write `unsearched-dirs`.
    #[serde(default = "default_debug_reports")]
    pub debug_reports: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: None,
            debug_reports: default_debug_reports(),
        }
    }
}

const fn default_debug_reports() -> bool {
    true
}

/// `[patch]`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchSection {
    /// Program invoked as `<program> --quiet --no-backup-if-mismatch --reject-file=- <target> <diff>`.
    #[serde(default = "default_patch_program")]
    pub program: String,
}

impl Default for PatchSection {
    fn default() -> Self {
        Self {
            program: default_patch_program(),
        }
    }
}

fn default_patch_program() -> String {
    "patch".to_owned()
}

/// Command-line values that take precedence over the file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// `--base`
    pub base: Option<PathBuf>,
    /// `--overlay`
    pub overlay: Option<PathBuf>,
    /// `--output`
    pub output: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading or applying a bundle configuration.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
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

impl BundleFile {
    /// Load a `bundle.toml`.
    ///
    /// - A missing file yields all defaults.
    /// - Invalid TOML or unknown fields yield a [`ConfigError`] with the
    ///   path and a line number.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no bundle config, using defaults");
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

    /// Parse a `bundle.toml` body.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }

    /// Bundle name, `bundle` if unset.
    #[must_use]
    pub fn name(&self) -> &str {
        self.bundle.name.as_deref().unwrap_or("bundle")
    }

    /// Resolve into an [`EngineConfig`]. File paths are joined onto
    /// `base_dir`; override paths are used unchanged.
    ///
    /// # Errors
    /// Returns `ConfigError` when no base tree is configured.
    pub fn engine_config(
        &self,
        base_dir: &Path,
        overrides: &ConfigOverrides,
    ) -> Result<EngineConfig, ConfigError> {
        let resolve = |p: &Path| base_dir.join(p);

        let base_root = overrides
            .base
            .clone()
            .or_else(|| self.inputs.base.as_deref().map(resolve))
            .ok_or_else(|| ConfigError {
                path: None,
                message: "no base tree configured; set [inputs] base or pass --base".to_owned(),
            })?;
        let overlay_root = overrides
            .overlay
            .clone()
            .unwrap_or_else(|| resolve(&self.inputs.overlay));
        let output_dir = overrides.output.clone().unwrap_or_else(|| {
            self.output.dir.as_deref().map_or_else(
                || resolve(&Path::new("build/output").join(self.name())),
                resolve,
            )
        });

        Ok(EngineConfig {
            base_root,
            overlay_root,
            ignore_file: resolve(&self.inputs.ignore),
            search_order_file: resolve(&self.inputs.search_order),
            diff_glob: self.inputs.diff_glob.clone(),
            output_dir,
            debug_reports: self.output.debug_reports,
            patch_program: self.patch.program.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

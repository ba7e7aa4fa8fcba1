//! Configuration file parsing for heron.toml.

use heron_vm_compiler::CompileOptions;
use heron_vm_core::ContextConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Execution limits
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Compiler settings
    #[serde(default)]
    pub compiler: CompilerConfig,
}

/// `[runtime]` table. Unset fields keep the VM defaults.
#[derive(Debug, Default, Deserialize)]
pub struct RuntimeConfig {
    /// Bytecode bytes between instruction observer calls
    pub instruction_threshold: Option<u64>,

    /// Total bytecode bytes a script may execute before it is aborted
    pub max_instructions: Option<u64>,

    /// Maximum nesting of script calls
    pub max_call_depth: Option<usize>,

    /// Wall-clock limit in milliseconds (0 = none)
    pub timeout_ms: Option<u64>,
}

impl RuntimeConfig {
    /// Context limits with the configured overrides applied
    pub fn context_config(&self) -> ContextConfig {
        let defaults = ContextConfig::default();
        ContextConfig {
            instruction_threshold: self.instruction_threshold.or(defaults.instruction_threshold),
            max_call_depth: self.max_call_depth.unwrap_or(defaults.max_call_depth),
        }
    }
}

/// `[compiler]` table.
#[derive(Debug, Default, Deserialize)]
pub struct CompilerConfig {
    /// Keep the script's source text in compiled units
    #[serde(default)]
    pub keep_source: bool,
}

impl CompilerConfig {
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            keep_source: self.keep_source,
        }
    }
}

/// Load configuration from a file or search for the default config file.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = match path {
        Some(path) if !path.exists() => {
            anyhow::bail!("Config file {} does not exist", path.display())
        }
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Search for heron.toml in the current directory and its parents.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;

    let mut dir = Some(cwd.as_path());
    while let Some(current) = dir {
        let path = current.join("heron.toml");
        if path.exists() {
            return Some(path);
        }
        dir = current.parent();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runtime.context_config(), ContextConfig::default());
        assert!(!config.compiler.keep_source);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
instruction_threshold = 10000
max_call_depth = 64

[compiler]
keep_source = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let limits = config.runtime.context_config();
        assert_eq!(limits.instruction_threshold, Some(10000));
        assert_eq!(limits.max_call_depth, 64);
        assert!(config.runtime.timeout_ms.is_none());
        assert!(config.compiler.compile_options().keep_source);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/heron.toml"))).is_err());
    }
}

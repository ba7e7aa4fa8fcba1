//! CLI command implementations.

pub mod compile;
pub mod disasm;
pub mod run;

use anyhow::{Context as _, Result};
use clap::Args;
use heron_vm_bytecode::verify::{check_operands, max_stack_depth};
use heron_vm_compiler::ast::Script;
use heron_vm_compiler::{CompileOptions, Compiler, FunctionUnit, resolve_script};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;

/// Input options shared by every command
#[derive(Args)]
pub struct TreeInput {
    /// JSON-encoded syntax tree
    pub tree: PathBuf,

    /// Assign variable slots before compiling (for trees without resolution)
    #[arg(long)]
    pub resolve: bool,
}

impl TreeInput {
    /// Read, optionally resolve, and compile the tree
    pub fn compile(&self, config: &Config) -> Result<Arc<FunctionUnit>> {
        self.compile_with(config.compiler.compile_options())
    }

    pub fn compile_with(&self, options: CompileOptions) -> Result<Arc<FunctionUnit>> {
        let mut script = read_tree(&self.tree)?;
        if self.resolve {
            resolve_script(&mut script);
        }
        Compiler::with_options(options)
            .compile(&script)
            .with_context(|| format!("Failed to compile {}", self.tree.display()))
    }
}

fn read_tree(path: &Path) -> Result<Script> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid syntax tree in {}", path.display()))
}

/// Read a compiled unit written by `heron compile`
pub fn read_unit(path: &Path) -> Result<Arc<FunctionUnit>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let unit: FunctionUnit = serde_json::from_str(&content)
        .with_context(|| format!("Invalid compiled unit in {}", path.display()))?;
    verify_unit(&unit).with_context(|| format!("Malformed bytecode in {}", path.display()))?;
    Ok(Arc::new(unit))
}

/// Check that a unit and its nested units stay inside their tables, frame
/// slots and declared stack sizes
fn verify_unit(unit: &FunctionUnit) -> Result<()> {
    check_operands(unit).with_context(|| format!("in {}", unit.display_name()))?;
    let depth = max_stack_depth(&unit.code)?;
    if depth > u32::from(unit.layout.max_stack) {
        anyhow::bail!(
            "{} needs {} stack slots but declares {}",
            unit.display_name(),
            depth,
            unit.layout.max_stack
        );
    }
    unit.functions.iter().try_for_each(|nested| verify_unit(nested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_vm_core::{Context, Value};

    const TREE: &str = r#"{
        "source_name": "sum.js",
        "body": {
            "body": [
                {"line": 1, "kind": {"Var": [{"name": {"name": "x"}, "init": {"Number": 40.0}}]}},
                {"line": 2, "kind": {"Expr": {"Binary": {
                    "op": "Add",
                    "left": {"Name": {"name": "x"}},
                    "right": {"Number": 2.0}
                }}}}
            ]
        }
    }"#;

    #[test]
    fn test_tree_to_unit_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let tree_path = dir.path().join("sum.json");
        std::fs::write(&tree_path, TREE).unwrap();

        let input = TreeInput {
            tree: tree_path,
            resolve: true,
        };
        let unit = input.compile(&Config::default()).unwrap();

        let unit_path = dir.path().join("sum.unit.json");
        std::fs::write(&unit_path, serde_json::to_string(&*unit).unwrap()).unwrap();
        let loaded = read_unit(&unit_path).unwrap();
        assert_eq!(loaded.code, unit.code);

        let result = Context::new().execute_script(loaded).unwrap();
        assert_eq!(result, Value::from(42));
    }

    #[test]
    fn test_understated_stack_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tree_path = dir.path().join("sum.json");
        std::fs::write(&tree_path, TREE).unwrap();
        let input = TreeInput {
            tree: tree_path,
            resolve: true,
        };
        let mut unit = (*input.compile(&Config::default()).unwrap()).clone();
        unit.layout.max_stack = 0;

        let unit_path = dir.path().join("bad.unit.json");
        std::fs::write(&unit_path, serde_json::to_string(&unit).unwrap()).unwrap();
        assert!(read_unit(&unit_path).is_err());
    }

    #[test]
    fn test_missing_table_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tree_path = dir.path().join("sum.json");
        std::fs::write(&tree_path, TREE).unwrap();
        let input = TreeInput {
            tree: tree_path,
            resolve: true,
        };
        let mut unit = (*input.compile(&Config::default()).unwrap()).clone();
        unit.strings.clear();

        let unit_path = dir.path().join("bad.unit.json");
        std::fs::write(&unit_path, serde_json::to_string(&unit).unwrap()).unwrap();
        let err = read_unit(&unit_path).unwrap_err();
        assert!(format!("{:#}", err).contains("string index 0"));
    }
}

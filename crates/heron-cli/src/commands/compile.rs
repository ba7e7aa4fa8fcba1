//! Compile command - write a script tree's compiled unit as JSON.

use anyhow::{Context as _, Result};
use clap::Args;
use std::io::Write;
use std::path::PathBuf;

use super::TreeInput;
use crate::config::Config;

#[derive(Args)]
pub struct CompileCommand {
    #[command(flatten)]
    pub input: TreeInput,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep the tree's source text in the unit
    #[arg(long)]
    pub keep_source: bool,
}

impl CompileCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let mut options = config.compiler.compile_options();
        options.keep_source |= self.keep_source;
        let unit = self.input.compile_with(options)?;
        if self.keep_source && unit.source.is_none() {
            tracing::warn!(tree = %self.input.tree.display(), "Tree carries no source text");
        }

        let json = serde_json::to_string_pretty(&*unit)?;
        match &self.output {
            Some(path) => std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?,
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(json.as_bytes())?;
                stdout.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

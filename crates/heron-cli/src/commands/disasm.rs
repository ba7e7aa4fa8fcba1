//! Disasm command - print the bytecode of a script tree.

use anyhow::Result;
use clap::Args;
use heron_vm_bytecode::disasm::disassemble;

use super::{TreeInput, read_unit};
use crate::config::Config;

#[derive(Args)]
pub struct DisasmCommand {
    #[command(flatten)]
    pub input: TreeInput,

    /// The input is a compiled unit written by `heron compile`
    #[arg(long, conflicts_with = "resolve")]
    pub unit: bool,
}

impl DisasmCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let unit = if self.unit {
            read_unit(&self.input.tree)?
        } else {
            self.input.compile(config)?
        };
        print!("{}", disassemble(&unit));
        Ok(())
    }
}

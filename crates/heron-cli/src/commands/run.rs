//! Run command - execute a script tree or a compiled unit.

use anyhow::Result;
use clap::Args;
use heron_vm_core::{Context, ContextConfig, Value, VmError, convert};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{TreeInput, read_unit};
use crate::config::Config;

/// Threshold used when only a total instruction limit is configured
const DEFAULT_CHECK_INTERVAL: u64 = 10_000;

#[derive(Args)]
pub struct RunCommand {
    #[command(flatten)]
    pub input: TreeInput,

    /// The input is a compiled unit written by `heron compile`
    #[arg(long, conflicts_with = "resolve")]
    pub unit: bool,

    /// Bytecode bytes between budget checks
    #[arg(long)]
    pub instruction_threshold: Option<u64>,

    /// Abort after this many bytecode bytes
    #[arg(long)]
    pub max_instructions: Option<u64>,

    /// Maximum nesting of script calls
    #[arg(long)]
    pub max_call_depth: Option<usize>,

    /// Timeout in milliseconds (0 = no timeout)
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let unit = if self.unit {
            read_unit(&self.input.tree)?
        } else {
            self.input.compile(config)?
        };

        let max_instructions = self.max_instructions.or(config.runtime.max_instructions);
        let mut ctx = Context::with_config(self.context_config(config, max_instructions));
        install_print(&ctx);
        if let Some(limit) = max_instructions {
            install_instruction_limit(&mut ctx, limit);
        }

        let timeout_ms = self.timeout.or(config.runtime.timeout_ms).unwrap_or(0);
        if timeout_ms > 0 {
            let flag = ctx.interrupt_flag();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(timeout_ms));
                flag.store(true, Ordering::Relaxed);
            });
        }

        let result = match ctx.execute_script(unit) {
            Err(VmError::Interrupted) if timeout_ms > 0 => {
                anyhow::bail!("Script timed out after {}ms", timeout_ms)
            }
            other => other?,
        };
        if !result.is_undefined() {
            println!("{}", convert::describe(&mut ctx, &result));
        }
        Ok(())
    }

    /// Flags override the config file, which overrides the defaults
    fn context_config(&self, config: &Config, max_instructions: Option<u64>) -> ContextConfig {
        let mut limits = config.runtime.context_config();
        if let Some(threshold) = self.instruction_threshold {
            limits.instruction_threshold = Some(threshold);
        }
        if let Some(depth) = self.max_call_depth {
            limits.max_call_depth = depth;
        }
        if max_instructions.is_some() && limits.instruction_threshold.is_none() {
            limits.instruction_threshold = Some(DEFAULT_CHECK_INTERVAL);
        }
        limits
    }
}

/// `print(...args)`: write the arguments to stdout, separated by spaces
fn install_print(ctx: &Context) {
    ctx.define_native("print", |ctx, _this, args| {
        let mut parts = Vec::with_capacity(args.len());
        for arg in &args {
            parts.push(convert::to_string(ctx, arg)?);
        }
        println!("{}", parts.join(" "));
        Ok(Value::Undefined)
    });
}

fn install_instruction_limit(ctx: &mut Context, limit: u64) {
    let executed = Arc::new(AtomicU64::new(0));
    ctx.set_instruction_observer(move |count| {
        let total = executed.fetch_add(count, Ordering::Relaxed) + count;
        if total > limit {
            return Err(VmError::host(format!(
                "instruction limit of {} exceeded",
                limit
            )));
        }
        tracing::debug!(total, "Instruction budget checkpoint");
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunCommand,
    }

    #[test]
    fn test_flags_override_config() {
        let config: Config = toml::from_str(
            r#"
[runtime]
instruction_threshold = 500
max_call_depth = 50
"#,
        )
        .unwrap();

        let cmd = Harness::parse_from(["heron", "tree.json", "--max-call-depth", "10"]).run;
        let limits = cmd.context_config(&config, None);
        assert_eq!(limits.instruction_threshold, Some(500));
        assert_eq!(limits.max_call_depth, 10);
    }

    #[test]
    fn test_instruction_limit_implies_threshold() {
        let cmd = Harness::parse_from(["heron", "tree.json"]).run;
        let limits = cmd.context_config(&Config::default(), Some(1_000_000));
        assert_eq!(limits.instruction_threshold, Some(DEFAULT_CHECK_INTERVAL));
    }

    #[test]
    fn test_instruction_limit_aborts() {
        let mut ctx = Context::with_config(ContextConfig {
            instruction_threshold: Some(1),
            ..ContextConfig::default()
        });
        install_instruction_limit(&mut ctx, 100);

        let mut script = heron_vm_compiler::ast::Script::new(
            "loop.js",
            vec![heron_vm_compiler::ast::Stmt::while_loop(
                heron_vm_compiler::ast::Expr::Boolean(true),
                heron_vm_compiler::ast::Stmt::block(vec![]),
            )],
        );
        heron_vm_compiler::resolve_script(&mut script);
        let unit = heron_vm_compiler::Compiler::new().compile(&script).unwrap();
        let err = ctx.execute_script(unit).unwrap_err();
        assert!(err.to_string().contains("instruction limit of 100 exceeded"));
    }
}

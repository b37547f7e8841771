use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use listgen::config::{Config, CFG_DIR};
use listgen::engine::{run_render, run_report, RunOptions, TOOL_VERSION};
use listgen::manifest::RunMode;
use listgen::stats::PROTOCOL;

#[derive(Debug, Parser)]
#[command(name = "listgen")]
#[command(version)]
#[command(about = "Compile a repository into a deterministic, token-budgeted listing for LLM context")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    All,
    Changes,
}

impl From<ModeArg> for RunMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::All => RunMode::All,
            ModeArg::Changes => RunMode::Changes,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// JSON report: token statistics plus the rendered text
    Report {
        /// ctx:<name> | sec:<name> | <name> (context tried first)
        target: String,
        #[arg(long, value_enum, default_value = "all")]
        mode: ModeArg,
        /// Model used for token counting and context-window shares
        #[arg(long, default_value = "o3")]
        model: String,
        /// Override section config: never wrap code in fences
        #[arg(long)]
        no_fence: bool,
        /// Ignore cached artifacts (they are still refreshed)
        #[arg(long)]
        fresh: bool,
    },
    /// Only the final rendered text
    Render {
        target: String,
        #[arg(long, value_enum, default_value = "all")]
        mode: ModeArg,
        #[arg(long, default_value = "o3")]
        model: String,
        #[arg(long)]
        no_fence: bool,
        #[arg(long)]
        fresh: bool,
    },
    /// Configured entities as JSON arrays
    List {
        #[arg(value_parser = ["contexts", "sections"])]
        what: String,
    },
    /// Environment and config diagnostics as JSON
    Diag,
}

fn options(mode: ModeArg, model: String, no_fence: bool, fresh: bool) -> RunOptions {
    RunOptions {
        mode: mode.into(),
        model,
        code_fence: if no_fence { Some(false) } else { None },
        fresh,
    }
}

fn main() {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let root = std::env::current_dir().context("failed to get current dir")?;

    match cli.cmd {
        Command::Report {
            target,
            mode,
            model,
            no_fence,
            fresh,
        } => {
            let result = run_report(&root, &target, &options(mode, model, no_fence, fresh))?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Render {
            target,
            mode,
            model,
            no_fence,
            fresh,
        } => {
            let mut text = run_render(&root, &target, &options(mode, model, no_fence, fresh))?;
            if !text.ends_with('\n') {
                text.push('\n');
            }
            print!("{text}");
        }
        Command::List { what } => {
            let config = Config::load(&root.join(CFG_DIR))?;
            let payload = if what == "contexts" {
                json!({ "contexts": config.list_contexts() })
            } else {
                json!({ "sections": config.section_ids() })
            };
            println!("{payload}");
        }
        Command::Diag => {
            let payload = match Config::load(&root.join(CFG_DIR)) {
                Ok(config) => json!({
                    "protocol": PROTOCOL,
                    "tool_version": TOOL_VERSION,
                    "root": root.to_string_lossy(),
                    "config": {
                        "schema_version": config.global.schema_version,
                        "sections": config.section_ids(),
                    },
                    "contexts": config.list_contexts(),
                }),
                Err(e) => json!({
                    "protocol": PROTOCOL,
                    "tool_version": TOOL_VERSION,
                    "root": root.to_string_lossy(),
                    "config_error": e.to_string(),
                }),
            };
            println!("{payload}");
        }
    }

    Ok(())
}

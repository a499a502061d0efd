use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use tickjs_host::{load_source, EvalMode, Host, IdleStrategy, RuntimeConfig};

mod interrupt;
mod logging;

use interrupt::{setup_interrupt_handler, INTERRUPTED_EXIT_CODE};

#[derive(Parser)]
#[command(name = "tickjs", version, about, long_about = None)]
pub struct Cli {
    /// Script to run
    #[arg(required_unless_present = "init_config")]
    file: Option<PathBuf>,

    /// Arguments passed to the script in `scriptArgs`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Enables debug logging (-dd for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the platform default
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Evaluate as a classic script instead of an ES module
    #[arg(long)]
    script: bool,

    /// Never block between cycles
    #[arg(long)]
    busy_poll: bool,

    /// Stop after this many driver cycles
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Print the source before running it
    #[arg(long)]
    show_source: bool,

    /// Also write logs to a file in the data directory
    #[arg(long)]
    log_file: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("tickjs: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if cli.init_config {
        let path = match cli.config {
            Some(path) => path,
            None => RuntimeConfig::default_path()
                .context("could not determine the config directory")?,
        };
        RuntimeConfig::default().write_new(&path)?;
        eprintln!("Config file created at: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load_from(path)?,
        None => RuntimeConfig::load_or_default()?,
    };
    apply_overrides(&mut config, &cli);

    let _guard = logging::init_logging(cli.debug, cli.log_file || config.logging.file)
        .context("failed to initialize logging")?;

    let file = cli.file.context("no script given")?;
    let source = load_source(&file)?;
    if cli.show_source {
        print_source(&source)?;
    }

    let mut script_args = vec![file.display().to_string()];
    script_args.extend(cli.args);

    let interrupt = setup_interrupt_handler().context("failed to install Ctrl-C handler")?;
    let mut host = Host::builder(config).with_script_args(script_args).build()?;
    host.set_interrupt(interrupt);

    info!("Running {}", file.display());
    host.evaluate(&source, &file.display().to_string())?;
    let summary = host.run()?;
    host.shutdown();
    debug!("{:?}", summary);

    if summary.interrupted {
        Ok(ExitCode::from(INTERRUPTED_EXIT_CODE))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn apply_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if cli.script {
        config.engine.eval_mode = EvalMode::Script;
    }
    if cli.busy_poll {
        config.driver.idle = IdleStrategy::BusyPoll;
    }
    if let Some(max_cycles) = cli.max_cycles {
        config.driver.max_cycles = max_cycles;
    }
}

fn print_source(source: &[u8]) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "========== Code ==========")?;
    stdout.write_all(source)?;
    writeln!(stdout, "\n======== Execution =======")?;
    stdout.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_after_file_go_to_script() {
        let cli = Cli::parse_from(["tickjs", "-d", "main.js", "value", "--flag"]);
        assert_eq!(cli.file, Some(PathBuf::from("main.js")));
        assert_eq!(cli.args, vec!["value", "--flag"]);
        assert_eq!(cli.debug, 1);
    }

    #[test]
    fn test_file_required_unless_init_config() {
        assert!(Cli::try_parse_from(["tickjs"]).is_err());
        assert!(Cli::try_parse_from(["tickjs", "--init-config"]).is_ok());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "tickjs",
            "--script",
            "--busy-poll",
            "--max-cycles",
            "9",
            "main.js",
        ]);
        let mut config = RuntimeConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.engine.eval_mode, EvalMode::Script);
        assert_eq!(config.driver.idle, IdleStrategy::BusyPoll);
        assert_eq!(config.driver.max_cycles, 9);
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let cli = Cli::parse_from(["tickjs", "main.js"]);
        let mut config = RuntimeConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config, RuntimeConfig::default());
    }
}

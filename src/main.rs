use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing::Level;

use lockstep::config::RunConfig;
use lockstep::lock::LockKind;
use lockstep::{Error, logging, runner};

#[derive(Parser, Debug)]
#[command(
    name = "lockstep",
    version,
    about = "Producer/consumer runs over pluggable locking strategies"
)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the built-in demo (default when no command is given).
    Demo,
    /// Run one round from a config file and/or flags.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// TOML config file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// exclusive, reader-writer or none.
    #[arg(long)]
    lock: Option<LockKind>,
    #[arg(long)]
    producers: Option<usize>,
    #[arg(long)]
    consumers: Option<usize>,
    #[arg(long)]
    readers: Option<usize>,
    #[arg(long)]
    tasks: Option<usize>,
    /// Rows the sink must hold at the end; defaults to --tasks.
    #[arg(long)]
    expected: Option<usize>,
    /// CSV file to record into instead of memory.
    #[arg(long)]
    sink: Option<PathBuf>,
}

impl RunArgs {
    fn resolve(self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        if let Some(lock) = self.lock {
            config.lock = lock;
        }
        if let Some(producers) = self.producers {
            config.producers = producers;
        }
        if let Some(consumers) = self.consumers {
            config.consumers = consumers;
        }
        if let Some(readers) = self.readers {
            config.readers = readers;
        }
        if let Some(tasks) = self.tasks {
            config.tasks = tasks;
        }
        if let Some(expected) = self.expected {
            config.expected_writes = Some(expected);
        }
        if self.sink.is_some() {
            config.sink = self.sink;
        }
        config.validate()?;
        Ok(config)
    }
}

fn run_demo(verbose: u8) -> anyhow::Result<()> {
    logging::init(logging::level_for(verbose, Level::WARN));
    let config = runner::demo_config();
    let report = runner::execute(&config).context("demo run failed")?;
    println!("DEMO SUMMARY");
    println!(
        "producers={} consumers={} readers={} tasks_total={}",
        config.producers, config.consumers, config.readers, config.tasks
    );
    print!("{report}");
    Ok(())
}

fn run_configured(args: RunArgs, verbose: u8) -> anyhow::Result<()> {
    let config = args.resolve()?;
    logging::init(logging::level_for(verbose, config.log_level.as_tracing()));
    let report = runner::execute(&config).context("run failed")?;
    print!("{report}");
    Ok(())
}

/// Input problems exit with 2, like clap's own usage errors.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(
            Error::ConfigRead { .. }
            | Error::ConfigParse(_)
            | Error::InvalidConfig(_)
            | Error::InvalidPlan(_)
            | Error::UnknownLockKind(_),
        ) => 2,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        None | Some(Command::Demo) => run_demo(cli.verbose),
        Some(Command::Run(args)) => run_configured(args, cli.verbose),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

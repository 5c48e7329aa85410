use clap::{Parser, Subcommand};
use fetchpool::config::Config;
use fetchpool::dispatch::Isolation;
use fetchpool::sink::OutputFormat;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchpool")]
#[command(about = "Fetch URL batches with worker pools fanned out across isolated contexts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch every configured batch, one execution context per batch
    Run(RunArgs),
    /// Fetch a single batch inside a child process
    #[command(hide = true)]
    Context(ContextArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Maximum concurrent contexts (0 = hardware concurrency)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// How each context is isolated
    #[arg(long, value_enum)]
    pub isolation: Option<Isolation>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ContextArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Name of the batch to fetch
    #[arg(long)]
    pub batch: String,

    /// Position of this context in the parent's dispatch
    #[arg(long, default_value_t = 0)]
    pub context_id: usize,
}

/// Settings shared by the parent and its child contexts
#[derive(clap::Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Configuration file (defaults to $FETCHPOOL_CONFIG or config/fetchpool.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Workers per context
    #[arg(long)]
    pub workers: Option<usize>,

    /// Record format on stdout
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
    }

    /// Arguments that make a child context see the same settings
    pub fn to_args(&self, config: &Config) -> Vec<String> {
        let mut args = vec![
            "--workers".to_string(),
            config.pool.workers.to_string(),
            "--format".to_string(),
            match config.output.format {
                OutputFormat::Text => "text".to_string(),
                OutputFormat::Json => "json".to_string(),
            },
        ];
        if let Some(path) = &self.config {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args
    }
}

impl RunArgs {
    pub fn apply(&self, config: &mut Config) {
        self.overrides.apply(config);
        if let Some(parallelism) = self.parallelism {
            config.dispatcher.parallelism = parallelism;
        }
        if let Some(isolation) = self.isolation {
            config.dispatcher.isolation = isolation;
        }
    }
}

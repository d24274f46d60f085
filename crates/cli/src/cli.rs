use crate::commands::{Command, JobKind, Target};
use crate::tracing::{LogLevel, TracingFormat};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "eegflow")]
#[command(about = "Cached EEG filtering, cleaning, epoching and averaging over BIDS recordings")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(long, global = true, help = "Log output format", default_value = "compact", value_enum)]
    pub log_format: TracingFormat,

    #[arg(long, global = true, help = "Artifact cache directory (defaults to EEGFLOW_CACHE_DIR or the user cache dir)")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "DATA_ROOT", help = "Root of the BIDS dataset", default_value = ".")]
    pub data_root: PathBuf,

    #[arg(long, global = true, help = "Pipeline version stamp written into artifact names")]
    pub pipeline_version: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RecordingArgs {
    #[arg(long, short = 's', help = "Subject directory name, e.g. sub-NDARAB793GL3")]
    pub subject: String,
    #[arg(long, short = 't', help = "Task name")]
    pub task: String,
    #[arg(long, short = 'r', help = "Run number")]
    pub run: Option<String>,
    #[command(flatten)]
    pub params: ParamArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ParamArgs {
    #[arg(long, short = 'p', help = "Parameter file (.json or .toml)")]
    pub params: Option<PathBuf>,
    #[arg(long, help = "Condition to select; overrides the parameter file")]
    pub stimulus: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CohortArgs {
    #[arg(long, short = 't', help = "Task shared by every member")]
    pub task: String,
    #[arg(long = "subject", short = 's', required = true, num_args = 1.., help = "Member subjects")]
    pub subjects: Vec<String>,
    #[arg(long, short = 'r', help = "Run number applied to every member")]
    pub run: Option<String>,
    #[command(flatten)]
    pub params: ParamArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Prefilter and clean one recording")]
    Filtered(RecordingArgs),
    #[command(about = "Cut one recording into epochs")]
    Epochs(RecordingArgs),
    #[command(about = "Average the epochs of one recording")]
    Evoked(RecordingArgs),
    #[command(about = "Aggregate one task over several subjects")]
    Cohort {
        #[command(subcommand)]
        subcommand: CohortCommands,
    },
    #[command(about = "Inspect or clean the artifact cache")]
    Cache {
        #[command(subcommand)]
        subcommand: CacheCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CohortCommands {
    #[command(about = "Stack every member's epochs")]
    Epochs(CohortArgs),
    #[command(about = "Grand average across subjects")]
    Evoked(CohortArgs),
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    #[command(about = "Count artifacts, sidecars and quarantined files")]
    Stats,
    #[command(about = "List quarantined files")]
    Quarantined,
    #[command(about = "Delete quarantined files")]
    Purge,
}

impl RecordingArgs {
    fn into_command(self, kind: JobKind) -> Command {
        Command::Run {
            target: Target::Recording {
                subject: self.subject,
                task: self.task,
                run: self.run,
            },
            kind,
            params: self.params.params,
            stimulus: self.params.stimulus,
        }
    }
}

impl CohortArgs {
    fn into_command(self, kind: JobKind) -> Command {
        Command::Run {
            target: Target::Cohort {
                task: self.task,
                subjects: self.subjects,
                run: self.run,
            },
            kind,
            params: self.params.params,
            stimulus: self.params.stimulus,
        }
    }
}

impl From<Commands> for Command {
    fn from(cmd: Commands) -> Self {
        match cmd {
            Commands::Filtered(args) => args.into_command(JobKind::Filtered),
            Commands::Epochs(args) => args.into_command(JobKind::Epochs),
            Commands::Evoked(args) => args.into_command(JobKind::Evoked),
            Commands::Cohort { subcommand } => match subcommand {
                CohortCommands::Epochs(args) => args.into_command(JobKind::Epochs),
                CohortCommands::Evoked(args) => args.into_command(JobKind::Evoked),
            },
            Commands::Cache { subcommand } => match subcommand {
                CacheCommands::Stats => Self::CacheStats,
                CacheCommands::Quarantined => Self::CacheQuarantined,
                CacheCommands::Purge => Self::CachePurge,
            },
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

use std::path::PathBuf;
use clap::{Args, Parser, Subcommand};
use crate::config::DEFAULT_CONFIG_FILE;
use crate::core::PolicyPatch;

#[derive(Parser, Debug)]
#[command(author, version, about = "Concurrent file uploads with live progress")]
pub struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload files and follow their progress
    Upload(UploadArgs),
    /// Show or change the stored upload policy
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Multipart endpoint; without it uploads are simulated
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Override the concurrency limit for this run
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Print the final task list as JSON instead of live progress
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    Set(SettingsArgs),
}

#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Largest accepted file, in bytes
    #[arg(long)]
    pub max_file_size: Option<u64>,

    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Replace the allowed MIME types (repeatable)
    #[arg(long = "allow", value_name = "MIME")]
    pub allowed_types: Vec<String>,

    #[arg(long, value_name = "BOOL")]
    pub auto_compress: Option<bool>,
}

impl SettingsArgs {
    pub fn patch(&self) -> PolicyPatch {
        PolicyPatch {
            max_file_size: self.max_file_size,
            allowed_types: (!self.allowed_types.is_empty())
                .then(|| self.allowed_types.iter().cloned().collect()),
            max_concurrent_uploads: self.concurrency,
            auto_compress: self.auto_compress,
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "watchsync")]
#[command(version, about = "Mirror local file changes to a remote host over one shared ssh connection")]
#[command(group(ArgGroup::new("action").args(["init", "upload", "download"])))]
pub struct Cli {
    /// Write a starter .watchme.json and exit
    #[arg(short, long)]
    pub init: bool,

    /// Upload the whole local tree once and exit
    #[arg(short, long)]
    pub upload: bool,

    /// Download the whole remote tree once and exit
    #[arg(short, long)]
    pub download: bool,

    /// Profiles to use, comma separated (default: main)
    #[arg(short, long, value_delimiter = ',', value_name = "NAMES")]
    pub profiles: Vec<String>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Run as if started in this directory
    #[arg(short = 'C', long = "dir", value_name = "PATH")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Init,
    Upload,
    Download,
    Watch,
}

impl Cli {
    pub fn action(&self) -> Action {
        if self.init {
            Action::Init
        } else if self.upload {
            Action::Upload
        } else if self.download {
            Action::Download
        } else {
            Action::Watch
        }
    }
}

/// Logs go to stderr. `RUST_LOG` wins over `debug`.
pub fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

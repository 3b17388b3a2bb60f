use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Offline sync and local serving for field records")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the local store and cache
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store backend credentials for this device
    Pair {
        /// Backend base URL, e.g. https://records.example.org
        #[arg(long, value_name = "URL")]
        backend_url: String,
        #[arg(long, value_name = "TOKEN")]
        access_token: String,
        #[arg(long, value_name = "TOKEN")]
        refresh_token: String,
    },
    /// Forget the stored backend credentials
    Unpair,
    /// Pull from the backend until caught up
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show pairing, sync and queue state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send one request through the local router
    Request {
        /// HTTP method
        method: String,
        /// Path and query, e.g. /nodes/person?offset=0&range=20
        path: String,
        /// Request body
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        /// Read the request body from a file
        #[arg(long, value_name = "PATH")]
        body_file: Option<PathBuf>,
        #[arg(long, value_name = "MIME")]
        content_type: Option<String>,
    },
    /// Manage photos waiting for upload
    Upload {
        #[command(subcommand)]
        command: UploadCommands,
    },
    /// Manage queued error reports
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
    /// Run the background worker behind a local HTTP server
    Serve {
        /// Listen address (overrides FIELDSYNC_BIND_ADDR)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output file path (stdout when omitted)
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum UploadCommands {
    /// Capture a photo into the pending upload cache
    Capture {
        file: PathBuf,
        /// Content type (guessed from the file name when omitted)
        #[arg(long, value_name = "MIME")]
        content_type: Option<String>,
    },
    /// List pending upload URLs
    List,
    /// Upload a pending photo to the paired backend
    Deliver { url: String },
    /// Drop a pending photo
    Remove { url: String },
}

#[derive(Subcommand)]
pub enum TelemetryCommands {
    /// Send an error report now, queueing it if the backend is unreachable
    Send {
        /// Report endpoint (relative paths use the paired backend)
        url: String,
        /// JSON report body
        body: String,
        #[arg(long, default_value = "POST")]
        method: String,
    },
    /// List queued error reports
    List,
    /// Resend queued error reports now
    Drain,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

//! relaycache CLI — client subcommands against the object API plus a
//! `serve` subcommand that boots the HTTP server from a TOML config
//! (§6.3: "subcommands `get`, `stat`, `put`, `delete`, `snapshot`,
//! `restore`... operating against a configured server URL").

mod colors;
mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser)]
#[command(name = "relaycache")]
#[command(author, version, about = "Client and server launcher for relaycache", long_about = None)]
struct Cli {
    /// Base URL of the object API to talk to, e.g. http://127.0.0.1:8080/api/v1
    #[arg(
        long,
        env = "RELAYCACHE_SERVER",
        default_value = "http://127.0.0.1:8080/api/v1",
        global = true
    )]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch an object's body
    Get {
        key: String,
        /// Write the body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch an object's headers without transferring its body
    Stat { key: String },
    /// Store a file's bytes under a key
    Put {
        key: String,
        file: PathBuf,
        /// Time-To-Live, e.g. `1h30m` (0 means the backend's default)
        #[arg(long, default_value = "0s")]
        ttl: String,
    },
    /// Delete an object
    Delete { key: String },
    /// Archive a directory and store it as a tar+zstd snapshot
    Snapshot {
        key: String,
        directory: PathBuf,
        #[arg(long, default_value = "0s")]
        ttl: String,
        /// Glob pattern to exclude; may be repeated
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },
    /// Restore a tar+zstd snapshot into a directory
    Restore { key: String, directory: PathBuf },
    /// Run the HTTP server from a TOML config file
    Serve { config: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Get { key, output } => commands::client::get(&cli.server, &key, output.as_deref()).await,
        Commands::Stat { key } => commands::client::stat(&cli.server, &key).await,
        Commands::Put { key, file, ttl } => commands::client::put(&cli.server, &key, &file, &ttl).await,
        Commands::Delete { key } => commands::client::delete(&cli.server, &key).await,
        Commands::Snapshot { key, directory, ttl, exclude } => {
            commands::client::snapshot(&cli.server, &key, &directory, &ttl, &exclude).await
        }
        Commands::Restore { key, directory } => commands::client::restore(&cli.server, &key, &directory).await,
        Commands::Serve { config } => commands::serve::execute(&config).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".custom_color(colors::red()).bold(), e);
        std::process::exit(e.exit_code());
    }
}

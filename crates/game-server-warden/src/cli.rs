use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;

/// Supervise a game server and expose its moderation console.
#[derive(Parser, Debug)]
#[command(name = "gsw", version, about)]
pub struct Cli {
    /// Shell command that starts the game server (run through `/bin/sh -c`,
    /// so `cd serverdir && ./start.sh` works).
    pub server_command: String,

    /// Port for the web console.
    #[arg(default_value_t = 8080)]
    pub port: u16,

    /// Warden configuration file.
    #[arg(long, default_value = "warden.toml")]
    pub config: PathBuf,

    /// Override the configured data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Parse the command line; usage errors exit with code 1, help and version
/// requests with 0.
pub fn parse() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}

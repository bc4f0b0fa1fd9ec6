use clap::{Parser, Subcommand};

/// Approvals: time-boxed, policy-gated access requests
#[derive(Parser)]
#[command(name = "approvals", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the request API and notification consumer
    Serve {
        /// Port to bind (defaults to APPROVALS_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Parse a seed file and print what it contains
    CheckSeed {
        /// Path to the YAML seed file
        file: String,
    },
}

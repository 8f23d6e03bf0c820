use clap::{Parser, Subcommand};

/// forexfinder: location-claimed exchange shops and nearby rate search
#[derive(Parser)]
#[command(name = "forexfinder", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to FOREX_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep all state in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },

    /// Manage location claim tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Apply pending database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for a coordinate and print it once
    Issue {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        #[arg(long)]
        admin_id: i64,
        /// Days until expiry (1-365)
        #[arg(long)]
        ttl_days: Option<i64>,
    },
    /// List issued tokens, newest first
    List {
        #[arg(long)]
        admin_id: Option<i64>,
    },
}

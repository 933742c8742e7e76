//! distdb CLI
//!
//! Command-line tools for inspecting and exercising distdb.
//!
//! # Commands
//!
//! - `identifier` - Print the cross-device identifier of a store
//! - `encode` - Encode a row of JSON values into wire bytes
//! - `decode` - Decode wire bytes back into JSON values
//! - `simulate` - Run a two-device sync through an in-process cloud

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// distdb command-line tools.
#[derive(Parser)]
#[command(name = "distdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cross-device identifier of a store
    Identifier {
        /// Owning user
        #[arg(short, long)]
        user: String,

        /// Application (bundle) name
        #[arg(short, long)]
        app: String,

        /// Store name
        #[arg(short, long)]
        store: String,
    },

    /// Encode a row of JSON values into hex wire bytes
    Encode {
        /// Schema as `name:type,...` (types: null, integer, real, text, blob, bool)
        #[arg(short, long)]
        schema: String,

        /// Row values as a JSON array
        #[arg(long)]
        values: String,
    },

    /// Decode hex wire bytes into JSON values
    Decode {
        /// Hex-encoded row bytes
        hex: String,

        /// Remote schema the bytes were written under
        #[arg(short, long)]
        schema: Option<String>,

        /// Local schema to re-project into (defaults to the remote one)
        #[arg(short, long)]
        local: Option<String>,
    },

    /// Run a push from one device and a pull on another
    Simulate {
        /// Rows to seed on the sending device
        #[arg(short, long, default_value = "3")]
        rows: usize,

        /// Service configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Identifier { user, app, store } => {
            commands::identifier::run(&user, &app, &store)?;
        }
        Commands::Encode { schema, values } => {
            commands::encode::run(&schema, &values)?;
        }
        Commands::Decode { hex, schema, local } => {
            commands::decode::run(&hex, schema.as_deref(), local.as_deref())?;
        }
        Commands::Simulate {
            rows,
            config,
            format,
        } => {
            commands::simulate::run(rows, config.as_deref(), &format)?;
        }
        Commands::Version => {
            println!("distdb CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

use clap::{Parser, Subcommand};

/// logsnarf: multi-tenant syslog ingestion
#[derive(Parser)]
#[command(name = "logsnarf", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the ingress server
    Serve {
        /// Port to bind (overrides LOGSNARF_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Resolve a token against the configured credential store
    Resolve {
        token: String,
    },

    /// Extract metrics from a log file and print them as line protocol
    Parse {
        /// File to parse
        file: String,
    },

    /// Manage stored credentials (postgres backend)
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },
}

#[derive(Subcommand)]
pub enum CredentialCommands {
    /// Store or replace credentials for a token
    Add {
        #[arg(long)]
        token: String,
        #[arg(long)]
        name: String,
        /// Destination driver, e.g. influxdb_v1
        #[arg(long = "type", default_value = "influxdb_v1")]
        destination_type: String,
        /// Destination URL (may embed user:password and ?db=)
        #[arg(long)]
        url: String,
    },
    /// Delete credentials for a token
    Remove {
        #[arg(long)]
        token: String,
    },
}

//! Parley operator tool
//!
//! Manages a device's encrypted session store and runs a local two-party
//! conversation for smoke testing.
//!
//! # Usage
//!
//! ```text
//! parley provision --store alice.redb --user alice   # create and print keys
//! parley show --store alice.redb                      # inspect a store
//! parley demo --messages 4                            # in-memory conversation
//! ```
//!
//! The storage key is read from `PARLEY_STORAGE_KEY` (64 hex characters) or
//! `--storage-key`. Logging is controlled with `RUST_LOG`.

mod commands;

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use parley_crypto::{KEY_SIZE, StorageKey};
use tracing_subscriber::EnvFilter;

/// Parley secure-session operator tool.
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Location and key of an encrypted device store.
#[derive(clap::Args)]
struct StoreArgs {
    /// Path to the device store (created if missing)
    #[arg(long)]
    store: PathBuf,

    /// Hex-encoded 32-byte storage key
    #[arg(
        long,
        env = "PARLEY_STORAGE_KEY",
        hide_env_values = true,
        value_parser = parse_storage_key
    )]
    storage_key: StorageKey,
}

#[derive(Subcommand)]
enum Command {
    /// Create the device identity and prekeys, then print the published bundle
    Provision {
        #[command(flatten)]
        store: StoreArgs,

        /// User id the device belongs to
        #[arg(long)]
        user: String,

        /// One-time prekeys to generate
        #[arg(long, default_value_t = 100)]
        one_time_prekeys: u32,
    },
    /// Print the identity and prekeys held in a store
    Show {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Run a conversation between two in-memory devices
    Demo {
        /// Messages to exchange
        #[arg(long, default_value_t = 4)]
        messages: u32,
    },
}

fn parse_storage_key(value: &str) -> Result<StorageKey, String> {
    let mut bytes = [0u8; KEY_SIZE];
    hex::decode_to_slice(value.trim(), &mut bytes)
        .map_err(|e| format!("expected {} hex characters: {e}", 2 * KEY_SIZE))?;
    Ok(StorageKey::from_bytes(bytes))
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Provision { store, user, one_time_prekeys } => {
            commands::provision(&store.store, store.storage_key, &user, one_time_prekeys).await
        },
        Command::Show { store } => commands::show(&store.store, store.storage_key),
        Command::Demo { messages } => commands::demo(messages).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "command failed");
            ExitCode::FAILURE
        },
    }
}

//! Streamcrypt operator binary.
//!
//! # Usage
//!
//! ```bash
//! # Publish an encrypted message (key from the environment)
//! STREAMCRYPT_ENCRYPTION_KEY=secret streamcrypt --db msgs.redb publish foo "hello"
//!
//! # Read it back
//! streamcrypt --db msgs.redb --key secret lookup foo 1
//!
//! # Inspect the raw record as stored on disk
//! streamcrypt --db msgs.redb --plaintext last foo
//! ```

use std::{
    error::Error,
    io::{self, Write},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use streamcrypt_store::{
    Channel, CryptoStore, Message, NonceConfig, RedbStore, StorageError, Store,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Streamcrypt encrypted message store
#[derive(Parser, Debug)]
#[command(name = "streamcrypt")]
#[command(about = "Message store with payload encryption at rest")]
#[command(version)]
struct Args {
    /// Path to the Redb database file
    #[arg(long, default_value = "streamcrypt.redb")]
    db: PathBuf,

    /// Encryption secret (falls back to STREAMCRYPT_ENCRYPTION_KEY)
    #[arg(short, long)]
    key: Option<String>,

    /// Bypass encryption and operate on raw records
    #[arg(long)]
    plaintext: bool,

    /// Seals per nonce before rotation
    #[arg(long)]
    max_calls_per_nonce: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a message to a channel, creating the channel if needed
    Publish {
        /// Channel name
        channel: String,
        /// Message payload
        message: String,
    },
    /// Print the message with the given sequence
    Lookup {
        /// Channel name
        channel: String,
        /// Message sequence
        sequence: u64,
    },
    /// Print the oldest message of a channel
    First {
        /// Channel name
        channel: String,
    },
    /// Print the newest message of a channel
    Last {
        /// Channel name
        channel: String,
    },
    /// List channels with their sequence range
    Channels,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(db = %args.db.display(), "opening store");
    let engine = RedbStore::open(&args.db)?;

    let result = if args.plaintext {
        tracing::info!("encryption disabled, reading raw records");
        run(&engine, args.command)
    } else {
        let mut config = NonceConfig::default();
        if let Some(max) = args.max_calls_per_nonce {
            config.max_calls_per_nonce = max;
        }

        let store = CryptoStore::with_config(engine, args.key.as_deref().unwrap_or(""), config)?;
        let result = run(&store, args.command);
        store.close()?;
        result
    };

    tracing::info!("done");
    result
}

fn run<S: Store>(store: &S, command: Command) -> Result<(), Box<dyn Error>> {
    let mut out = io::stdout().lock();

    match command {
        Command::Publish { channel, message } => {
            let channel = match store.lookup_channel(&channel)? {
                Some(existing) => existing,
                None => store.create_channel(&channel)?,
            };
            let sequence = channel.msgs.store(message.as_bytes())?;
            writeln!(out, "{sequence}")?;
        },
        Command::Lookup { channel, sequence } => {
            let msg = open_channel(store, &channel)?.msgs.lookup(sequence)?;
            print_message(&mut out, msg.as_ref())?;
        },
        Command::First { channel } => {
            let msg = open_channel(store, &channel)?.msgs.first_msg()?;
            print_message(&mut out, msg.as_ref())?;
        },
        Command::Last { channel } => {
            let msg = open_channel(store, &channel)?.msgs.last_msg()?;
            print_message(&mut out, msg.as_ref())?;
        },
        Command::Channels => {
            let mut names = store.channel_names()?;
            names.sort();
            for name in names {
                let channel = open_channel(store, &name)?;
                writeln!(
                    out,
                    "{name}\t{}..{}\t{} msgs",
                    channel.msgs.first_sequence()?,
                    channel.msgs.last_sequence()?,
                    channel.msgs.msg_count()?
                )?;
            }
        },
    }

    Ok(())
}

fn open_channel<S: Store>(store: &S, name: &str) -> Result<Channel, StorageError> {
    store.lookup_channel(name)?.ok_or_else(|| StorageError::ChannelNotFound(name.to_string()))
}

fn print_message(out: &mut impl Write, msg: Option<&Message>) -> io::Result<()> {
    match msg {
        Some(msg) => writeln!(out, "{}\t{}\t{}", msg.sequence, msg.timestamp, msg.data.escape_ascii()),
        None => writeln!(out, "(none)"),
    }
}

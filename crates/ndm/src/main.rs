use clap::{Parser, Subcommand};

mod commands;
mod config;
mod nostr_client;
mod output;

use output::Printer;

#[derive(Parser)]
#[command(name = "ndm")]
#[command(version)]
#[command(about = "CLI for encrypted Nostr direct messages (NIP-04 + NIP-17)")]
struct Cli {
    /// Output in JSON format (for agents/scripts)
    #[arg(short, long, global = true)]
    json: bool,

    /// Data directory (default: platform data dir/ndm)
    #[arg(long, global = true, env = "NDM_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with a private key
    Login {
        /// Private key (nsec or hex)
        key: String,
    },

    /// Logout and clear local data
    Logout,

    /// Show current identity
    Whoami,

    /// Send a message
    Send {
        /// Recipient (npub or hex pubkey)
        recipient: String,
        /// Message content
        message: String,
        /// Use the legacy kind-4 scheme instead of gift wraps
        #[arg(long)]
        nip04: bool,
    },

    /// List conversations
    Conversations,

    /// Read messages from one conversation
    Read {
        /// Peer (npub or hex pubkey)
        peer: String,
        /// Maximum number of messages to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Listen for new messages
    Listen {
        /// Clear the cache before loading
        #[arg(long)]
        fresh: bool,
    },

    /// Clear the cached conversation history
    Clear,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let printer = Printer::new(cli.json);

    if let Err(e) = run(cli, &printer).await {
        printer.failure(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, printer: &Printer) -> anyhow::Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .expect("Could not find data directory")
            .join("ndm")
    });
    std::fs::create_dir_all(&data_dir)?;

    let settings = config::Settings::load(&data_dir)?;

    match cli.command {
        Commands::Login { key } => commands::identity::login(&key, &settings, &data_dir, printer),
        Commands::Logout => commands::identity::logout(&settings, &data_dir, printer),
        Commands::Whoami => commands::identity::whoami(&settings, printer),
        Commands::Send {
            recipient,
            message,
            nip04,
        } => {
            commands::message::send(&recipient, &message, nip04, &settings, &data_dir, printer)
                .await
        }
        Commands::Conversations => {
            commands::message::conversations(&settings, &data_dir, printer).await
        }
        Commands::Read { peer, limit } => {
            commands::message::read(&peer, limit, &settings, &data_dir, printer).await
        }
        Commands::Listen { fresh } => {
            commands::message::listen(fresh, &settings, &data_dir, printer).await
        }
        Commands::Clear => commands::message::clear(&settings, &data_dir, printer).await,
    }
}

//! Run the relay against a console transport.
//!
//! Lines read from stdin are treated as chat lines; replies are printed to
//! stdout and logs go to stderr. Reads the API key from the `OPENAI_API_KEY`
//! environment variable (optional when `--api-url` points at a local server).
//!
//! # Examples
//!
//! ```sh
//! # Direct conversation with the default profile
//! chatrelay --nick gato
//!
//! # Channel conversation against a llama.cpp server
//! chatrelay --channel '#test' --api-url http://localhost:8080/v1/chat/completions \
//!   --tokenizer-url http://localhost:8080/tokenize
//!
//! # Lines may name their sender
//! echo '<alice> gato: what is a monad?' | chatrelay --channel '#fp' --nick gato
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use chatrelay::prelude::*;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Relay chat lines from stdin to a language model and print the replies.
///
/// Reads the API key from the OPENAI_API_KEY environment variable.
#[derive(Parser)]
#[command(name = "chatrelay")]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    // ── Conversation ───────────────────────────────────────────
    /// Network name used to key history
    #[arg(long, default_value = "console")]
    network: String,

    /// Channel to talk in. Without this, lines are direct messages
    #[arg(long)]
    channel: Option<String>,

    /// Bot nickname
    #[arg(long)]
    nick: Option<String>,

    /// Sender nickname for lines without a `<nick>` prefix
    #[arg(long = "as", default_value = "user")]
    sender: String,

    // ── Endpoints ──────────────────────────────────────────────
    /// Chat completions endpoint
    #[arg(long)]
    api_url: Option<String>,

    /// llama.cpp-style /tokenize endpoint. Without this, token counts are
    /// estimated from character counts
    #[arg(long)]
    tokenizer_url: Option<String>,

    // ── Storage and profile ────────────────────────────────────
    /// History directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Model profile to activate
    #[arg(long)]
    profile: Option<String>,

    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

/// Prints outgoing lines to stdout.
struct ConsoleTransport {
    nickname: String,
}

impl ChatTransport for ConsoleTransport {
    fn send_message(&self, target: &str, text: &str) -> std::result::Result<(), String> {
        println!("[{target}] <{}> {text}", self.nickname);
        Ok(())
    }

    fn send_notice(&self, target: &str, text: &str) -> std::result::Result<(), String> {
        println!("[{target}] -{}- {text}", self.nickname);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match build_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let api_key = match (std::env::var("OPENAI_API_KEY"), &cli.api_url) {
        (Ok(key), _) => key,
        (Err(_), Some(_)) => String::new(),
        (Err(_), None) => {
            eprintln!("Error: OPENAI_API_KEY environment variable is not set");
            process::exit(1);
        }
    };
    let url = cli.api_url.as_deref().unwrap_or(chatrelay::OPENAI_URL);
    let client = match ApiClient::with_url(api_key, url) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: failed to create API client: {e}");
            process::exit(1);
        }
    };

    let tokenizer: Arc<dyn Tokenizer> = match &cli.tokenizer_url {
        Some(url) => match HttpTokenizer::new(url) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                eprintln!("Error: failed to create tokenizer client: {e}");
                process::exit(1);
            }
        },
        None => Arc::new(EstimatingTokenizer::new()),
    };

    let transport = Arc::new(ConsoleTransport {
        nickname: config.bot_nickname.clone(),
    });
    let backend = Arc::new(StreamingBackend::new(Arc::new(client)));
    let mut relay = match Relay::new(config, tokenizer, backend, transport) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(read_console(
        cli.network.clone(),
        cli.channel.clone(),
        cli.sender.clone(),
        inbound_tx,
    ));

    if let Err(e) = relay.run(inbound_rx).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file (or defaults) with command-line overrides applied.
fn build_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    if let Some(nick) = &cli.nick {
        config = config.with_bot_nickname(nick);
    }
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(profile) = &cli.profile {
        config.set_active_profile(profile)?;
    }
    config.validate()?;
    Ok(config)
}

/// Forward stdin lines until EOF. `<nick> text` sets the sender.
async fn read_console(
    network: String,
    channel: Option<String>,
    default_sender: String,
    inbound: mpsc::UnboundedSender<InboundLine>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (sender, text) = split_sender(&line).unwrap_or((default_sender.as_str(), line.as_str()));
        let inbound_line = match &channel {
            Some(channel) => InboundLine::channel(&network, channel, sender, text),
            None => InboundLine::direct(&network, sender, text),
        };
        if inbound.send(inbound_line).is_err() {
            break;
        }
    }
    info!("Console input closed");
}

fn split_sender(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('<')?;
    let (sender, text) = rest.split_once('>')?;
    let sender = sender.trim();
    if sender.is_empty() {
        return None;
    }
    Some((sender, text.trim_start()))
}

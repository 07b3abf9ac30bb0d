//! Palwire CLI binary.
//!
//! Talks to the order desk backend over the secure session transport.
//!
//! # Commands
//!
//! - `handshake` - Negotiate a session and print its id
//! - `get` / `post` - Signed, encrypted calls
//! - `login` - Log in and print the credential
//! - `upload` - Upload a file and print its id
//! - `watch` - Follow the event stream
//! - `client-id` - Show the persisted client id

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use palwire::{
    api,
    session::{ClientIdentity, Session},
    Config, SecureTransport, StreamSubscriber, VERSION, WILDCARD,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "palwire")]
#[command(version = VERSION)]
#[command(about = "Secure session client for the Pal order desk backend", long_about = None)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bearer credential from an earlier login
    #[arg(short, long, global = true)]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Negotiate a session key and print the session id
    Handshake,

    /// Signed GET, prints the decrypted response
    Get {
        /// API path, e.g. /user/info
        path: String,
    },

    /// Signed POST with an encrypted JSON body
    Post {
        /// API path
        path: String,

        /// JSON body
        body: String,
    },

    /// Log in and print the credential
    Login {
        /// User name
        username: String,

        /// Password
        password: String,
    },

    /// Upload a file (requires --token)
    Upload {
        /// File to upload
        file: PathBuf,
    },

    /// Print stream events until interrupted
    Watch {
        /// Domain filter, repeatable (default: all domains)
        #[arg(short, long = "domain")]
        domains: Vec<String>,
    },

    /// Show the client id and where it is stored
    ClientId,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config)?;
    let identity = match config.identity.resolve_path() {
        Some(path) => ClientIdentity::load_or_create(&path),
        None => {
            tracing::warn!("No config or home directory, using an ephemeral client id");
            ClientIdentity::ephemeral()
        },
    };

    if let Commands::ClientId = cli.command {
        return cmd_client_id(&config, &identity);
    }

    let session = Arc::new(Session::new(identity));
    if let Some(token) = cli.token {
        session.set_credential(Some(token));
    }
    let transport = Arc::new(SecureTransport::new(config.clone(), Arc::clone(&session))?);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        match cli.command {
            Commands::Handshake => {
                let keys = transport.handshake().await?;
                println!("{}", keys.session_id);
            },
            Commands::Get { path } => print_body(&transport.get(&path).await?),
            Commands::Post { path, body } => {
                // Validate locally so typos fail before a round trip
                let body: Value = serde_json::from_str(&body)?;
                print_body(&transport.post(&path, &body.to_string()).await?);
            },
            Commands::Login { username, password } => {
                let claims = api::login(&transport, &username, &password).await?;
                if let Some(claims) = claims {
                    tracing::info!("user_id={} role={}", claims.user_id, claims.role);
                }
                if let Some(token) = session.credential() {
                    println!("{token}");
                }
            },
            Commands::Upload { file } => {
                let id = api::upload_file(&transport, &file).await?;
                println!("{id}");
            },
            Commands::Watch { domains } => cmd_watch(&config, session, transport, domains).await?,
            Commands::ClientId => {},
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_client_id(config: &Config, identity: &ClientIdentity) -> anyhow::Result<()> {
    println!("{}", identity.id());
    match config.identity.resolve_path() {
        Some(path) if identity.is_persisted() => eprintln!("stored at {}", path.display()),
        _ => eprintln!("not persisted"),
    }
    Ok(())
}

async fn cmd_watch(
    config: &Config,
    session: Arc<Session>,
    transport: Arc<SecureTransport>,
    domains: Vec<String>,
) -> anyhow::Result<()> {
    let subscriber = StreamSubscriber::new(config, session, transport)?;
    subscriber.on(WILDCARD, |event| {
        println!("{}\t{}\t{}", event.domain, event.action, event.resource_id);
    });

    let filter = (!domains.is_empty()).then_some(domains);
    subscriber.connect(filter).await;

    tokio::signal::ctrl_c().await?;
    subscriber.disconnect().await;
    Ok(())
}

fn print_body(body: &str) {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => match serde_json::to_string_pretty(&json) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{body}"),
        },
        Err(_) => println!("{body}"),
    }
}

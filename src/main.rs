//! Relay CLI - Lightweight client for the Relay chat assistant
//!
//! Authenticates with an emailed access code and talks to the Relay
//! backend over its JSON API.

mod api;
mod auth;
mod config;
mod error;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::client::{ApiClient, ReqwestTransport};
use auth::{AuthClient, Session, SystemClock, ValidationOutcome, DEFAULT_EXPIRY_WARNING};
use config::{Config, FileSessionStore};
use error::ActionRequired;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Lightweight CLI client for the Relay chat assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Request an access code for an email address
    Login {
        /// Email address the access code is sent to
        email: String,
    },

    /// Validate an emailed access code and start a session
    Verify {
        /// The code from the email
        code: String,
    },

    /// Log out and clear the stored session
    Logout,

    /// Show current session status
    Status,

    /// Send a message to a conversation
    Send {
        /// Conversation ID
        #[arg(short, long)]
        to: String,

        /// Message content
        message: String,
    },

    /// Read recent messages from a conversation
    History {
        /// Conversation ID
        conversation_id: String,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Composition root: the session gets its store and clock injected here
    // and is the only owner of token state for the process.
    let config = Config::load()?;
    let base_url = config.api_base_url();

    let store = FileSessionStore::open_default()?;
    let mut session = Session::initialize(Box::new(store), Box::new(SystemClock));

    let transport = Arc::new(ReqwestTransport::new());
    let auth_client = AuthClient::new(transport.clone(), &base_url);
    let client = ApiClient::new(transport, &base_url);

    match cli.command {
        Commands::Login { email } => {
            let message = auth_client.request_token(&email).await?;
            println!("{}", message);
            println!("Run 'relay-cli verify <code>' once the email arrives.");
        }
        Commands::Verify { code } => {
            match auth_client.validate_token(&mut session, &code).await {
                ValidationOutcome::Accepted { .. } => {
                    println!("Signed in. {}.", session.expiry_message());
                }
                ValidationOutcome::Rejected {
                    user_message,
                    action_required,
                    ..
                } => {
                    println!("{}", user_message);
                    match action_required {
                        ActionRequired::RequestNewToken => {
                            println!("Run 'relay-cli login <email>' to request a new code.");
                        }
                        ActionRequired::RetryOrRequestNewToken => {
                            println!(
                                "Check the code and try again, or request a new one with 'relay-cli login <email>'."
                            );
                        }
                    }
                }
            }
        }
        Commands::Logout => {
            auth_client.logout(&mut session).await;
            println!("Logged out.");
        }
        Commands::Status => {
            if session.is_authenticated() {
                println!("Session:    valid");
                println!("  {}", session.expiry_message());
                if session.is_expiring_soon(DEFAULT_EXPIRY_WARNING) {
                    println!("  Expiring soon -- request a new code with 'relay-cli login <email>'.");
                }
            } else {
                println!("Session:    none");
                println!("\nRun 'relay-cli login <email>' to authenticate.");
            }
        }
        Commands::Send { to, message } => {
            api::send_message(&client, &mut session, &to, &message).await?;
        }
        Commands::History {
            conversation_id,
            limit,
        } => {
            api::read_history(&client, &mut session, &conversation_id, limit).await?;
        }
    }

    Ok(())
}

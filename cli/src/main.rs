use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use kasookoo_core::backend::{ApiClient, TokenService};
use kasookoo_core::signal::{normalize_push_json, relevance};
use kasookoo_core::{CallConfig, LocalIdentity, UserRole, generate_room_id, load_call_config};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "kasookoo-cli")]
#[command(about = "Developer tools for the Kasookoo calling core")]
struct Cli {
    /// Directory holding kasookoo_config.json (defaults apply when absent)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Backend root URL; overrides the config file
    #[arg(long, env = "KASOOKOO_API_BASE_URL")]
    api_base_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the default config file contents
    DefaultConfig,

    /// Normalize a push payload and check whether it targets the given user
    InspectPush {
        #[arg(long)]
        user_id: String,

        /// driver | customer
        #[arg(long)]
        role: String,

        /// Raw push payload as JSON text
        #[arg(long)]
        payload: String,
    },

    /// Request a join credential from the backend and print it
    Token {
        #[arg(value_enum)]
        kind: TokenKind,

        #[arg(long)]
        user_id: String,

        /// driver | customer
        #[arg(long)]
        role: String,

        #[arg(long, default_value = "")]
        display_name: String,

        /// Room to join (generated when omitted)
        #[arg(long)]
        room: Option<String>,

        /// Phone-bridge target for `support` (config value when omitted)
        #[arg(long)]
        phone: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TokenKind {
    Caller,
    Callee,
    Support,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.data_dir {
        Some(dir) => load_call_config(&dir.to_string_lossy()),
        None => CallConfig::default(),
    };

    match &cli.cmd {
        Command::DefaultConfig => {
            println!("{}", kasookoo_core::default_config_json());
            Ok(())
        }
        Command::InspectPush {
            user_id,
            role,
            payload,
        } => {
            let identity = parse_identity(user_id, role, "")?;
            print(&inspect_push(&identity, payload))
        }
        Command::Token {
            kind,
            user_id,
            role,
            display_name,
            room,
            phone,
        } => {
            let identity = parse_identity(user_id, role, display_name)?;
            let base_url = cli
                .api_base_url
                .clone()
                .unwrap_or_else(|| config.api_base_url());
            let api = ApiClient::new(
                base_url,
                config.default_transport_url(),
                config.device_type(),
                config.http_timeout(),
            )?;
            let room = room.clone().unwrap_or_else(generate_room_id);
            let phone = phone
                .clone()
                .unwrap_or_else(|| config.support_phone_number());
            print(&request_token(&api, *kind, &identity, &room, &phone).await?)
        }
    }
}

fn print(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_identity(user_id: &str, role: &str, display_name: &str) -> anyhow::Result<LocalIdentity> {
    let role = UserRole::parse(role).ok_or_else(|| anyhow!("unknown role {role:?}"))?;
    if user_id.trim().is_empty() {
        return Err(anyhow!("--user-id cannot be empty"));
    }
    Ok(LocalIdentity {
        user_id: user_id.trim().to_string(),
        role,
        display_name: display_name.to_string(),
    })
}

fn inspect_push(identity: &LocalIdentity, payload: &str) -> serde_json::Value {
    let signal = normalize_push_json(payload);
    let verdict = relevance(&signal, identity);
    json!({
        "signal": signal,
        "relevant": verdict.is_relevant(),
        "verdict": format!("{verdict:?}"),
    })
}

async fn request_token(
    api: &ApiClient,
    kind: TokenKind,
    identity: &LocalIdentity,
    room: &str,
    phone: &str,
) -> anyhow::Result<serde_json::Value> {
    let started = std::time::Instant::now();
    let credential = match kind {
        TokenKind::Caller => api.request_caller_credential(room, identity).await,
        TokenKind::Callee => api.request_callee_credential(room, identity).await,
        TokenKind::Support => api.request_support_credential(phone, room, identity).await,
    }
    .map_err(|e| anyhow!(e.user_message()))
    .with_context(|| format!("request {kind:?} credential for room {room}"))?;
    Ok(json!({
        "requested_room": room,
        "credential": credential,
        "elapsed_ms": elapsed_ms(started.elapsed()),
    }))
}

fn elapsed_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

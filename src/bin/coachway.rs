//! coachway: command-line client for the booking API
//!
//! Runs requests through the same cache, retry and session layers the
//! library exposes, and prints the payloads as JSON.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use coachway::{
    ApiRequest, CacheCategory, ClientError, CoachwayBuilder, CoachwayClient, Config, FileTokenStore,
};
use serde_json::Value;

/// Reference lists warmed by `coachway warm`.
const REFERENCE_ENDPOINTS: &[(&str, CacheCategory)] = &[
    ("/cities", CacheCategory::Cities),
    ("/companies", CacheCategory::Companies),
    ("/routes", CacheCategory::Routes),
];

/// Coachway CLI
#[derive(Parser)]
#[command(name = "coachway")]
#[command(version = coachway::PKG_VERSION)]
#[command(about = "Coach-booking API client")]
struct Args {
    /// Config file (default: ~/.config/coachway/config.toml)
    #[arg(short, long, env = "COACHWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override `api.base_url` from the config file
    #[arg(long, env = "COACHWAY_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// GET a resource and print its payload
    Fetch {
        /// Resource path, e.g. /routes
        path: String,
        /// Cache category deciding the TTL
        #[arg(long, default_value = "default")]
        category: CacheCategory,
        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query", value_parser = parse_query_pair)]
        query: Vec<(String, String)>,
    },

    /// Fetch the reference lists (cities, companies, routes)
    Warm,

    /// Store an access token obtained from the login endpoint
    Login {
        token: String,
    },

    /// Forget the stored access token
    Logout,

    /// Print build version and git metadata
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e.message);
            if e.requires_login {
                eprintln!("hint: run `coachway login <TOKEN>`");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ClientError> {
    let Args {
        config,
        base_url,
        command,
    } = args;
    let client = || connect(config.as_deref(), base_url.as_deref());

    match command {
        Command::Version => {
            println!("coachway {}", coachway::version_string());
        }

        Command::Fetch {
            path,
            category,
            query,
        } => {
            let request = query
                .into_iter()
                .fold(ApiRequest::get(path), |request, (name, value)| {
                    request.query(name, value)
                });
            let payload = client()?.fetch(&request, category).await?;
            print_json(&payload)?;
        }

        Command::Warm => {
            let entries = REFERENCE_ENDPOINTS
                .iter()
                .map(|(path, category)| (ApiRequest::get(*path), *category));
            let outcomes = client()?.warm_cache(entries).await;

            let mut failed = None;
            for ((path, _), outcome) in REFERENCE_ENDPOINTS.iter().zip(outcomes) {
                match outcome {
                    Ok(_) => println!("{path}: ok"),
                    Err(e) => {
                        println!("{path}: {}", ClientError::from(&e));
                        failed.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = failed {
                return Err(e.into());
            }
        }

        Command::Login { token } => {
            client()?.sign_in(token)?;
            println!("signed in");
        }

        Command::Logout => {
            client()?.sign_out()?;
            println!("signed out");
        }
    }

    Ok(())
}

/// Build a client from the config file, persisting the session on disk.
fn connect(path: Option<&Path>, base_url: Option<&str>) -> Result<CoachwayClient, ClientError> {
    let mut config = Config::load(path)?;
    if let Some(base_url) = base_url {
        config.api.base_url = base_url.to_string();
    }
    config.validate()?;

    let token_path = config
        .session
        .token_path
        .clone()
        .unwrap_or_else(FileTokenStore::default_path);
    let client = CoachwayBuilder::from_config(&config)
        .token_store(Arc::new(FileTokenStore::new(token_path)))
        .build()?;
    Ok(client)
}

fn print_json(value: &Value) -> Result<(), ClientError> {
    let rendered = serde_json::to_string_pretty(value).map_err(coachway::CoachwayError::from)?;
    println!("{rendered}");
    Ok(())
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

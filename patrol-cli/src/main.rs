//! patrol-cli: operator frontend for the patrol tracker control API
//!
//! # Subcommands
//! - `status`                             : show server health
//! - `sessions [--json]`                  : list tracked patrols
//! - `register <user> <external-id> [callsign]`
//! - `start <user>`
//! - `end <user> [--aircraft ..] [--notes ..] ...`

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8770";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "patrol-cli", version, about = "Patrol tracker control CLI")]
struct Cli {
    /// Control API URL (overrides PATROL_HTTP_URL env var)
    #[arg(long, env = "PATROL_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server and monitor status
    Status,

    /// List patrols currently being tracked
    Sessions {
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },

    /// Register or update a pilot's presence-feed id and callsign
    Register {
        user_key: String,
        external_id: String,
        #[arg(default_value = "")]
        callsign: String,
    },

    /// Start a patrol for a registered pilot
    Start { user_key: String },

    /// End a patrol and file the debrief
    End {
        user_key: String,

        #[command(flatten)]
        debrief: DebriefArgs,
    },
}

#[derive(Debug, Args, Serialize, Default)]
struct DebriefArgs {
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    aircraft: Option<String>,
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    armament: Option<String>,
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    base_takeoff: Option<String>,
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    base_landed: Option<String>,
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionView {
    pub user_key: String,
    pub external_id: String,
    pub record_id: i64,
    pub started_at: String,
    pub active_seconds: i64,
    pub last_seen_at: Option<String>,
    pub callsign: Option<String>,
    #[serde(default)]
    pub stale: bool,
}

#[derive(Debug, Deserialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionView>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryView {
    pub record_id: i64,
    pub user_key: String,
    pub active_seconds: i64,
}

// ============================================================================
// Formatting
// ============================================================================

/// Render seconds as `Hh MMm`, e.g. `1h 05m`.
pub fn format_active(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}h {:02}m", seconds / 3600, (seconds % 3600) / 60)
}

pub fn session_line(s: &SessionView) -> String {
    let callsign = s.callsign.as_deref().unwrap_or("-");
    let seen = s.last_seen_at.as_deref().unwrap_or("never");
    let flag = if s.stale { " [stale]" } else { "" };
    format!(
        "{:<20} {:<12} #{:<6} {:>8}  last seen {}{}",
        s.user_key,
        callsign,
        s.record_id,
        format_active(s.active_seconds),
        seen,
        flag
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request and return the JSON body, exiting on transport or HTTP errors.
fn send_json(request: reqwest::blocking::RequestBuilder, url: &str) -> serde_json::Value {
    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("patrol-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("unknown error");
        eprintln!("patrol-cli: server returned {}: {}", status, message);
        std::process::exit(1);
    }
    body
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) => {
            let healthy = r.status().is_success();
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Patrol server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
            println!("PostgreSQL:    {}", body["postgresql"].as_str().unwrap_or("?"));
            println!("Monitor:       {}", body["monitor"].as_str().unwrap_or("?"));
            println!("Tracked:       {}", body["tracked_sessions"]);
            if !healthy {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("patrol-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn do_sessions(server: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/sessions", server);
    let body = send_json(client(10)?.get(&url), &url);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let resp: SessionsResponse = serde_json::from_value(body)?;
    if resp.sessions.is_empty() {
        eprintln!("No patrols in progress");
        return Ok(());
    }
    for s in &resp.sessions {
        println!("{}", session_line(s));
    }
    println!("\n{} patrol(s) tracked", resp.count);
    Ok(())
}

fn do_register(
    server: &str,
    user_key: &str,
    external_id: &str,
    callsign: &str,
) -> anyhow::Result<()> {
    let url = format!("{}/pilots", server);
    let payload = serde_json::json!({
        "user_key": user_key,
        "external_id": external_id,
        "callsign": callsign,
    });
    send_json(client(10)?.post(&url).json(&payload), &url);
    println!("Registered {} as {}", user_key, external_id);
    Ok(())
}

fn do_start(server: &str, user_key: &str) -> anyhow::Result<()> {
    let url = format!("{}/patrols/start", server);
    let payload = serde_json::json!({ "user_key": user_key });
    let body = send_json(client(10)?.post(&url).json(&payload), &url);
    let record_id = body["session"]["record_id"].as_i64().unwrap_or_default();
    println!("Patrol #{} started for {}", record_id, user_key);
    Ok(())
}

fn do_end(server: &str, user_key: &str, debrief: &DebriefArgs) -> anyhow::Result<()> {
    let url = format!("{}/patrols/end", server);
    let mut payload = serde_json::to_value(debrief)?;
    payload["user_key"] = serde_json::Value::String(user_key.to_string());

    let body = send_json(client(10)?.post(&url).json(&payload), &url);
    let summary: SummaryView = serde_json::from_value(body["summary"].clone())?;
    println!(
        "Patrol #{} ended for {}: {} active",
        summary.record_id,
        summary.user_key,
        format_active(summary.active_seconds)
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Sessions { json } => do_sessions(&server, json),
        Commands::Register {
            user_key,
            external_id,
            callsign,
        } => do_register(&server, &user_key, &external_id, &callsign),
        Commands::Start { user_key } => do_start(&server, &user_key),
        Commands::End { user_key, debrief } => do_end(&server, &user_key, &debrief),
    };

    if let Err(e) = result {
        eprintln!("patrol-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

//! timelapse-cli: inspect a running Timelapse server over its HTTP API
//!
//! # Subcommands
//! - `status`                                     : server health
//! - `endpoints [--search s] [--env e]`           : endpoint rollups
//! - `timeline [key] [--status 200,404] [--max-latency ms] [--contains text]`
//! - `details [id]`                               : entry plus diff against its predecessor
//! - `compare <reference> <candidate>`            : comparison report
//! - `clear`                                      : drop every captured exchange
//! - `export [--limit n] [--format json|csv]`     : export bundle of the selected endpoint

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8767";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "timelapse-cli", version, about = "Request time-lapse inspector")]
struct Cli {
    /// Timelapse HTTP server URL (overrides TIMELAPSE_HTTP_URL env var)
    #[arg(long, env = "TIMELAPSE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server status
    Status,

    /// List endpoints, busiest first
    Endpoints {
        /// Case-insensitive match on key or path
        #[arg(long)]
        search: Option<String>,

        /// Substring of an environment tag
        #[arg(long = "env")]
        environment: Option<String>,
    },

    /// Show the timeline of an endpoint, newest first
    Timeline {
        /// Endpoint key, e.g. "GET /users"; defaults to the current selection
        key: Option<String>,

        /// Comma-separated status allow-list
        #[arg(long)]
        status: Option<String>,

        /// Inclusive latency ceiling in milliseconds
        #[arg(long)]
        max_latency: Option<i64>,

        /// Response body substring (case-insensitive)
        #[arg(long)]
        contains: Option<String>,
    },

    /// Show an entry and its diff against the previous call
    Details {
        /// Exchange id; defaults to the selected entry
        id: Option<String>,
    },

    /// Compare two exchanges
    Compare { reference: String, candidate: String },

    /// Remove all captured exchanges
    Clear,

    /// Export the selected endpoint's history
    Export {
        /// Number of most recent entries (0 = all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EndpointRow {
    pub key: String,
    pub count: u64,
    pub last_status: u16,
    pub avg_latency: i64,
    #[serde(default)]
    pub environments: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineRow {
    pub id: String,
    pub started_at: i64,
    pub status: u16,
    pub latency_ms: i64,
    pub environment: String,
    pub branch: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub started_at: i64,
    pub status: u16,
    pub latency_ms: i64,
    pub environment: String,
    pub branch: String,
    pub method: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportBundle {
    pub sample: Vec<ExportRow>,
}

// ============================================================================
// HTTP Client
// ============================================================================

struct Api {
    server: String,
    client: reqwest::blocking::Client,
}

impl Api {
    fn new(server: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            server: server.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.server, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .with_context(|| format!("connection failed to {url}"))?;
        read_body(resp)
    }

    fn post(&self, path: &str, body: Value) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.server, path);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("connection failed to {url}"))?;
        read_body(resp)
    }
}

fn read_body(resp: reqwest::blocking::Response) -> anyhow::Result<Value> {
    let status = resp.status();
    let body: Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("no details");
        bail!("server returned {status}: {message}");
    }
    Ok(body)
}

// ============================================================================
// Formatting
// ============================================================================

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// `"200, 404"` -> `[200, 404]`; unparseable items are skipped.
pub fn parse_statuses(text: &str) -> Vec<u16> {
    text.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

pub fn render_csv(rows: &[ExportRow]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "Timestamp",
        "Status",
        "Latency (ms)",
        "Environment",
        "Branch",
        "Method",
        "URL",
    ])?;
    for row in rows {
        writer.write_record([
            format_timestamp(row.started_at),
            row.status.to_string(),
            row.latency_ms.to_string(),
            row.environment.clone(),
            row.branch.clone(),
            row.method.clone(),
            row.url.clone(),
        ])?;
    }
    Ok(String::from_utf8(writer.into_inner()?)?)
}

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

// ============================================================================
// Commands
// ============================================================================

fn do_status(api: &Api) -> anyhow::Result<()> {
    let body = api.get("/health", &[])?;
    println!("Timelapse server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
    println!("Store:            {}", body["store"].as_str().unwrap_or("?"));
    println!("Exchanges:        {}", body["exchanges"]);
    println!("Endpoints:        {}", body["endpoints"]);
    println!("Socket:           {}", body["socket"].as_str().unwrap_or("?"));

    let storage = api.get("/storage", &[])?;
    let flag = if storage["warning"].as_bool().unwrap_or(false) { " (near quota)" } else { "" };
    println!("Storage:          {}%{}", storage["percent"], flag);
    Ok(())
}

fn do_endpoints(api: &Api, search: Option<String>, environment: Option<String>) -> anyhow::Result<()> {
    let mut query = Vec::new();
    if let Some(s) = search {
        query.push(("search", s));
    }
    if let Some(e) = environment {
        query.push(("environment", e));
    }
    let body = api.get("/endpoints", &query)?;
    let rows: Vec<EndpointRow> = serde_json::from_value(body["endpoints"].clone())?;

    if rows.is_empty() {
        eprintln!("No endpoints captured yet.");
        return Ok(());
    }
    for row in rows {
        println!(
            "{:<48} {:>5} calls  last {:>3}  avg {:>6}ms  [{}]",
            row.key,
            row.count,
            row.last_status,
            row.avg_latency,
            row.environments.join(", ")
        );
    }
    Ok(())
}

fn do_timeline(
    api: &Api,
    key: Option<String>,
    status: Option<String>,
    max_latency: Option<i64>,
    contains: Option<String>,
) -> anyhow::Result<()> {
    if let Some(key) = key {
        api.post("/select", json!({ "key": key }))?;
    }
    let statuses = status.as_deref().map(parse_statuses).unwrap_or_default();
    api.post(
        "/filters",
        json!({
            "statuses": statuses,
            "max_latency_ms": max_latency,
            "response_contains": contains,
        }),
    )?;

    let body = api.get("/timeline", &[])?;
    let rows: Vec<TimelineRow> = serde_json::from_value(body["entries"].clone())?;
    println!("{}", body["endpoint"].as_str().unwrap_or("(no endpoint selected)"));
    for row in rows {
        let warnings = if row.warnings.is_empty() {
            String::new()
        } else {
            format!("  ⚠ {}", row.warnings.join(", "))
        };
        println!(
            "{}  {}  {:>3}  {:>6}ms  {}/{}{}",
            short_id(&row.id),
            format_timestamp(row.started_at),
            row.status,
            row.latency_ms,
            row.environment,
            row.branch,
            warnings
        );
    }
    Ok(())
}

fn do_details(api: &Api, id: Option<String>) -> anyhow::Result<()> {
    let query: Vec<(&str, String)> = id.into_iter().map(|id| ("id", id)).collect();
    let body = api.get("/details", &query)?;
    let exchange = &body["exchange"];
    println!(
        "{} {} -> {} ({}ms)",
        exchange["method"].as_str().unwrap_or("?"),
        exchange["url"].as_str().unwrap_or("?"),
        exchange["status"],
        exchange["latency_ms"]
    );
    println!("\n{}", body["diff_text"].as_str().unwrap_or(""));
    Ok(())
}

fn do_compare(api: &Api, reference: String, candidate: String) -> anyhow::Result<()> {
    let body = api.post(
        "/compare",
        json!({ "reference": reference, "candidate": candidate }),
    )?;
    println!("{}", body["diff_text"].as_str().unwrap_or(""));
    Ok(())
}

fn do_clear(api: &Api) -> anyhow::Result<()> {
    api.post("/clear", json!({}))?;
    println!("Cleared all captured exchanges.");
    Ok(())
}

fn do_export(api: &Api, limit: Option<usize>, format: ExportFormat) -> anyhow::Result<()> {
    let query: Vec<(&str, String)> = limit.into_iter().map(|n| ("limit", n.to_string())).collect();
    let body = api.get("/export", &query)?;
    match format {
        ExportFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
        ExportFormat::Csv => {
            let bundle: ExportBundle = serde_json::from_value(body)?;
            print!("{}", render_csv(&bundle.sample)?);
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = Api::new(&cli.server).and_then(|api| match cli.command {
        Commands::Status => do_status(&api),
        Commands::Endpoints { search, environment } => do_endpoints(&api, search, environment),
        Commands::Timeline {
            key,
            status,
            max_latency,
            contains,
        } => do_timeline(&api, key, status, max_latency, contains),
        Commands::Details { id } => do_details(&api, id),
        Commands::Compare { reference, candidate } => do_compare(&api, reference, candidate),
        Commands::Clear => do_clear(&api),
        Commands::Export { limit, format } => do_export(&api, limit, format),
    });

    if let Err(e) = result {
        eprintln!("timelapse-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

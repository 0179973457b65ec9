//! Dispatch CLI - Command-line client for the dispatch daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9531";

#[derive(Parser)]
#[command(name = "dispatch")]
#[command(about = "Invoice dispatch CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "DISPATCH_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an invoice (queued for retry on transient failure)
    Submit {
        /// Invoice ID
        invoice_id: String,

        /// Queue priority if the invoice ends up queued (higher = sooner)
        #[arg(short, long, default_value = "0")]
        priority: i32,
    },

    /// Run one queue pass now
    Process,

    /// Show queue statistics
    Stats {
        /// Restrict to one tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct SubmitResult {
    invoice_id: String,
    outcome: String,
    status: String,
    attempts: u32,
}

#[derive(Deserialize, Tabled)]
struct PassResult {
    claimed: u32,
    succeeded: u32,
    rearmed: u32,
    failed: u32,
    orphaned: u32,
    settled: u32,
    skipped: u32,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

/// Epoch millis with a relative hint, e.g. `1718000000000 (in 42s)`
fn describe_due(value: &serde_json::Value) -> String {
    let Some(ms) = value.as_i64() else {
        return "-".to_string();
    };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(ms);
    let delta = (ms - now) / 1000;
    if delta >= 0 {
        format!("{} (in {}s)", ms, delta)
    } else {
        format!("{} (overdue {}s)", ms, -delta)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            invoice_id,
            priority,
        } => {
            let params = json!({
                "invoice_id": invoice_id,
                "priority": priority,
            });

            let result = call_rpc(&cli.rpc_url, "invoice.submit.v1", params).await?;
            let queue_item_id = result["queue_item_id"].as_str().map(str::to_string);
            let transaction_id = result["transaction_id"].as_str().map(str::to_string);
            let error_code = result["error_code"].as_str().map(str::to_string);
            let submit_result: SubmitResult = serde_json::from_value(result)?;

            let headline = match submit_result.outcome.as_str() {
                "SUBMITTED" | "ALREADY_SUBMITTED" => "✓ Invoice submitted".green().bold(),
                "QUEUED" | "ALREADY_QUEUED" => "↻ Invoice queued for retry".yellow().bold(),
                "IN_FLIGHT" => "○ Invoice is already being submitted".yellow().bold(),
                _ => "✗ Invoice not submitted".red().bold(),
            };
            println!("{}", headline);
            println!();
            println!("{}", Table::new(vec![submit_result]));

            if let Some(tx) = transaction_id {
                println!("  {} {}", "Transaction:".bold(), tx);
            }
            if let Some(id) = queue_item_id {
                println!("  {} {}", "Queue item:".bold(), id);
            }
            if let Some(code) = error_code {
                println!("  {} {}", "Error code:".bold(), code.red());
            }
        }

        Commands::Process => {
            let result = call_rpc(&cli.rpc_url, "queue.process.v1", json!({})).await?;

            if !result["ran"].as_bool().unwrap_or(false) {
                println!("{}", "○ A queue pass is already running; skipped".yellow());
                return Ok(());
            }

            let pass: PassResult = serde_json::from_value(result)?;
            println!("{}", "✓ Queue pass completed".green().bold());
            println!();
            println!("{}", Table::new(vec![pass]));
        }

        Commands::Stats { tenant } => {
            println!("{}", "Queue Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "queue.stats.v1", json!({ "tenant_id": tenant })).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    if let Some(tenant) = stats["tenant_id"].as_str() {
                        println!("  {} {}", "Tenant:".bold(), tenant);
                    }
                    println!();
                    println!("  {} {}", "Queued Total:".bold(), stats["total"]);
                    println!("  {} {}", "Pending:".bold(), stats["pending"]);
                    println!("  {} {}", "Processing:".bold(), stats["processing"]);
                    println!("  {} {}", "Succeeded:".bold(), stats["succeeded"]);
                    println!("  {} {}", "Failed:".bold(), stats["failed"]);
                    println!(
                        "  {} {}",
                        "Next Due:".bold(),
                        describe_due(&stats["next_scheduled_at"])
                    );
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }
    }

    Ok(())
}

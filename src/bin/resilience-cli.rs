use std::process::ExitCode;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use service_resilience::health::{HealthStatus, ServiceHealth};
use service_resilience::observability::correlation::{generate_id, CORRELATION_ID_HEADER};

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Operator CLI for a service-resilience instance", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Correlation ID sent with the request (generated when omitted)
    #[arg(short, long)]
    correlation_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregated dependency health; exits non-zero when unhealthy
    Health,
    /// Raw Prometheus metrics
    Metrics,
    /// Circuit breaker states
    Breakers,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    let correlation_id = cli.correlation_id.unwrap_or_else(generate_id);
    headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_str(&correlation_id)?);

    match cli.command {
        Commands::Health => {
            // 503 still carries the snapshot, so the body is read regardless of status.
            let res = client.get(format!("{}/health", base)).headers(headers).send().await?;
            let snapshot: ServiceHealth = res.json().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if snapshot.status == HealthStatus::Unhealthy {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Metrics => {
            let res = client.get(format!("{}/metrics", base)).headers(headers).send().await?;
            if !res.status().is_success() {
                eprintln!("Error: metrics endpoint returned status {}", res.status());
                return Ok(ExitCode::FAILURE);
            }
            print!("{}", res.text().await?);
        }
        Commands::Breakers => {
            let res = client.get(format!("{}/breakers", base)).headers(headers).send().await?;
            return print_response(res).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn print_response(res: reqwest::Response) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(ExitCode::FAILURE);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(ExitCode::SUCCESS)
}

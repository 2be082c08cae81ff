// src/main.rs

use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct SyncOutcome {
    ok: bool,
    read_rows: Option<usize>,
    imported_rows: Option<usize>,
    imported_type_rows: Option<usize>,
    fiscal_year_label: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MonthEntriesResponse {
    fiscal_year_label: String,
    month_entries: Vec<serde_json::Value>,
    billed_types: Vec<serde_json::Value>,
}

fn print_outcome(label: &str, status: StatusCode, outcome: &SyncOutcome) {
    println!("{} -> HTTP {}", label, status);
    if outcome.ok {
        println!(
            "  fiscal year {}: read {}, imported {} month rows, {} charge-type rows",
            outcome.fiscal_year_label.as_deref().unwrap_or("?"),
            outcome.read_rows.unwrap_or(0),
            outcome.imported_rows.unwrap_or(0),
            outcome.imported_type_rows.unwrap_or(0)
        );
    } else {
        println!("  failed: {}", outcome.error.as_deref().unwrap_or("unknown error"));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url =
        std::env::var("HOURSYNC_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let cron_secret = std::env::var("CRON_SECRET").ok().filter(|s| !s.is_empty());
    let fiscal_year = std::env::args().nth(1);
    let client = Client::new();

    // Test 1: Status
    println!("\n🔍 Testing status endpoint...");
    let status = client
        .get(format!("{}/status", base_url))
        .send()
        .await?
        .json::<StatusResponse>()
        .await?;
    println!("Status: {} (version {})", status.status, status.version);

    // Test 2: Cron trigger without a secret
    println!("\n🔍 Testing scheduled trigger without a secret...");
    let response = client
        .post(format!("{}/api/cron/sync", base_url))
        .send()
        .await?;
    let http_status = response.status();
    if cron_secret.is_some() && http_status != StatusCode::UNAUTHORIZED {
        println!("⚠️ Expected 401 with a secret configured, got {}", http_status);
    } else {
        println!("Unauthenticated trigger -> HTTP {}", http_status);
    }

    // Test 3: Cron trigger with the secret
    if let Some(secret) = cron_secret.as_deref() {
        println!("\n🔍 Testing scheduled trigger with the secret...");
        let response = client
            .post(format!("{}/api/cron/sync", base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", secret))
            .send()
            .await?;
        let http_status = response.status();
        let outcome = response.json::<SyncOutcome>().await?;
        print_outcome("Scheduled sync", http_status, &outcome);
    }

    // Test 4: Manual dry run and month entries for an explicit fiscal year
    match fiscal_year {
        Some(fiscal_year) => {
            println!("\n🔍 Testing manual dry run for fiscal year {}...", fiscal_year);
            let response = client
                .post(format!("{}/api/sync/{}", base_url, fiscal_year))
                .json(&json!({ "dry_run": true }))
                .send()
                .await?;
            let http_status = response.status();
            let outcome = response.json::<SyncOutcome>().await?;
            print_outcome("Manual dry run", http_status, &outcome);

            println!("\n🔍 Fetching stored month entries...");
            let response = client
                .get(format!("{}/api/month-entries/{}", base_url, fiscal_year))
                .send()
                .await?;
            if response.status().is_success() {
                let entries = response.json::<MonthEntriesResponse>().await?;
                println!(
                    "{}: {} month rows, {} charge-type rows",
                    entries.fiscal_year_label,
                    entries.month_entries.len(),
                    entries.billed_types.len()
                );
            } else {
                println!("Failed to list month entries: HTTP {}", response.status());
            }
        }
        None => println!("\nℹ️ Pass a fiscal year id as the first argument to test the manual trigger."),
    }

    // Test 5: Unknown fiscal year
    println!("\n🔍 Testing manual trigger with an unknown fiscal year...");
    let response = client
        .post(format!("{}/api/sync/does-not-exist", base_url))
        .send()
        .await?;
    println!("Unknown fiscal year -> HTTP {} (expected 404)", response.status());

    println!("\n✅ Testing complete!");

    Ok(())
}

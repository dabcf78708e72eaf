//! bath-cli: command-line client for the BananaBath design search API
//!
//! # Subcommands
//! - `search <query> [-k <count>] [--json]`: top-K design images for a query
//! - `status`                             : show server health

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "bath-cli",
    version,
    about = "BananaBath design search: query the bathroom design catalogue"
)]
struct Cli {
    /// BananaBath HTTP server URL (overrides BATH_HTTP_URL env var)
    #[arg(long, env = "BATH_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Find the designs closest to a description
    Search {
        /// What the bathroom should look like
        query: String,

        /// Number of designs to return (server default when omitted)
        #[arg(short, long)]
        k: Option<u32>,

        /// Print the results array as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show BananaBath server status
    Status,
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
}

/// A single design image from POST /api/search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignResult {
    pub rank: usize,
    pub id: String,
    pub path: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub style: Option<String>,
    pub score: f64,
}

/// The full search response from POST /api/search
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<DesignResult>,
    pub query: String,
    pub count: usize,
    pub took_ms: Option<u64>,
}

/// Human-readable block for one result.
pub fn format_result(r: &DesignResult) -> String {
    let file = r
        .path
        .rsplit(['/', '\\'])
        .next()
        .filter(|f| !f.is_empty())
        .unwrap_or(r.id.as_str());
    format!(
        "Rank {} (Score: {:.4})\n  Title: {}\n  Style: {}\n  File:  {}",
        r.rank,
        r.score,
        r.title.as_deref().unwrap_or("N/A"),
        r.style.as_deref().unwrap_or("N/A"),
        file
    )
}

/// Pull the user-facing message out of an error body, if there is one.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

/// Run a design search against the BananaBath HTTP API.
fn do_search(server: &str, query: &str, k: Option<u32>, json_output: bool) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    let url = format!("{}/api/search", server);
    let resp = client.post(&url).json(&SearchRequest { query, k }).send();

    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            eprintln!("bath-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("bath-cli: server returned {}: {}", status, error_message(&body));
        std::process::exit(1);
    }

    let search_resp: SearchResponse = match resp.json() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("bath-cli: failed to parse search response: {}", e);
            std::process::exit(1);
        }
    };

    if json_output {
        match serde_json::to_string_pretty(&search_resp.results) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("bath-cli: failed to serialize results: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        if search_resp.results.is_empty() {
            eprintln!("No designs found for: {}", query);
            return Ok(());
        }
        println!("--- Top {} result(s) for '{}' ---", search_resp.count, search_resp.query);
        for r in &search_resp.results {
            println!("{}\n", format_result(r));
        }
        if let Some(ms) = search_resp.took_ms {
            println!("({} ms)", ms);
        }
    }

    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("BananaBath server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:           {}", body["version"].as_str().unwrap_or("?"));
            println!("Model:             {}", body["model"].as_str().unwrap_or("?"));
            println!("Dimensions:        {}", body["dimensions"]);
            println!("Images:            {}", body["images"]);
            println!("Embedder loaded:   {}", body["embedder_loaded"]);
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("bath-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("bath-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Search { query, k, json } => do_search(&server, &query, k, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("bath-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_result(rank: usize, path: &str, score: f64) -> DesignResult {
        DesignResult {
            rank,
            id: "boho/bathroom_boho_3.jpg".to_string(),
            path: path.to_string(),
            url: Some("/static/boho/images/bathroom_boho_3.jpg".to_string()),
            title: Some("Earthy Escape".to_string()),
            style: Some("Boho".to_string()),
            score,
        }
    }

    // ========================================================================
    // TEST 1: human output header has rank and 4-decimal score
    // ========================================================================
    #[test]
    fn test_format_result_header() {
        let r = mock_result(1, "static/boho/images/bathroom_boho_3.jpg", 0.812345);
        let text = format_result(&r);
        assert!(text.starts_with("Rank 1 (Score: 0.8123)"), "got: {text}");
        assert!(text.contains("Title: Earthy Escape"));
        assert!(text.contains("Style: Boho"));
    }

    // ========================================================================
    // TEST 2: file line shows the base name for both separators
    // ========================================================================
    #[test]
    fn test_format_result_file_name() {
        let unix = mock_result(2, "static/boho/images/bathroom_boho_3.jpg", 0.5);
        assert!(format_result(&unix).ends_with("File:  bathroom_boho_3.jpg"));

        let windows = mock_result(2, r"C:\design\static\boho\images\bathroom_boho_3.jpg", 0.5);
        assert!(format_result(&windows).ends_with("File:  bathroom_boho_3.jpg"));
    }

    // ========================================================================
    // TEST 3: missing title and style print N/A
    // ========================================================================
    #[test]
    fn test_format_result_missing_metadata() {
        let mut r = mock_result(3, "x.jpg", -0.25);
        r.title = None;
        r.style = None;
        let text = format_result(&r);
        assert!(text.contains("Score: -0.2500"));
        assert!(text.contains("Title: N/A"));
        assert!(text.contains("Style: N/A"));
    }

    // ========================================================================
    // TEST 4: search request omits k when not given
    // ========================================================================
    #[test]
    fn test_search_request_serialization() {
        let without = serde_json::to_value(SearchRequest { query: "spa", k: None }).unwrap();
        assert_eq!(without, serde_json::json!({ "query": "spa" }));

        let with = serde_json::to_value(SearchRequest { query: "spa", k: Some(4) }).unwrap();
        assert_eq!(with["k"], 4);
    }

    // ========================================================================
    // TEST 5: server response parses, took_ms optional
    // ========================================================================
    #[test]
    fn test_search_response_parses() {
        let body = serde_json::json!({
            "results": [{
                "rank": 1,
                "id": "modern/a.jpg",
                "path": "static/modern/images/a.jpg",
                "url": "/static/modern/images/a.jpg",
                "title": null,
                "style": "Modern",
                "score": 0.93
            }],
            "query": "glass shower",
            "count": 1
        });
        let resp: SearchResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.count, 1);
        assert_eq!(resp.results[0].id, "modern/a.jpg");
        assert!(resp.results[0].title.is_none());
        assert!(resp.took_ms.is_none());
    }

    // ========================================================================
    // TEST 6: error_message extracts the API error field
    // ========================================================================
    #[test]
    fn test_error_message() {
        let body = r#"{"error":"query field is required","status":"error"}"#;
        assert_eq!(error_message(body), "query field is required");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    // ========================================================================
    // TEST 7: --json output is the results array
    // ========================================================================
    #[test]
    fn test_results_json_array() {
        let results = vec![
            mock_result(1, "static/boho/images/bathroom_boho_3.jpg", 0.9),
            mock_result(2, "static/boho/images/bathroom_boho_4.jpg", 0.7),
        ];
        let json = serde_json::to_string(&results).expect("Should serialize");
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).expect("Should parse back");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["rank"], 1);
        assert!(parsed[1]["path"].is_string());
        assert!(parsed[1]["score"].is_number());
    }

    // ========================================================================
    // TEST 8: CLI parses search with -k and --json
    // ========================================================================
    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "bath-cli",
            "--server",
            "http://localhost:9000",
            "search",
            "warm wood",
            "-k",
            "3",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.server, "http://localhost:9000");
        match cli.command {
            Commands::Search { query, k, json } => {
                assert_eq!(query, "warm wood");
                assert_eq!(k, Some(3));
                assert!(json);
            }
            other => panic!("Expected Search, got {other:?}"),
        }
    }
}

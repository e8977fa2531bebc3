use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use graphql_loadtest::checks::GraphqlIteration;
use graphql_loadtest::client::build_client;
use graphql_loadtest::config::Config;
use graphql_loadtest::engine::LoadEngine;
use graphql_loadtest::summary::ConsoleSummary;

/// Exit status for configuration and fixture errors.
const EXIT_FATAL: i32 = 2;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!("  GRAPHQL_URL             - GraphQL endpoint (must start with http:// or https://)");
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  NUM_CONCURRENT_TASKS    - Number of simulated clients (default: 10, must be > 0)");
    eprintln!("  TEST_DURATION           - Total test duration: 30s, 10m, 2h (default: 30s)");
    eprintln!("  PACING                  - Pause between iterations per client: 500ms, 1s (default: 1s)");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout (default: 30s)");
    eprintln!();
    eprintln!("Request configuration:");
    eprintln!("  QUERY                   - GraphQL document (default: query {{ __typename }})");
    eprintln!("  QUERY_FILE              - File containing the GraphQL document");
    eprintln!("  VARIABLES               - JSON object template, ${{field}} reads the fixture record");
    eprintln!("  DATA_FILE               - Fixture records: JSON array of objects or CSV with headers");
    eprintln!();
    eprintln!("Thresholds and reporting:");
    eprintln!("  THRESHOLDS              - metric:expr pairs separated by ';'");
    eprintln!("                            (default: checks:fail_rate<0.01;http_req_duration:p(95)<800)");
    eprintln!("  HTML_REPORT             - Write summary-<time>.html: true or false (default: true)");
    eprintln!("  REPORT_DIR              - Directory for the HTML report (default: .)");
    eprintln!("  ERROR_SAMPLE_LIMIT      - Distinct GraphQL error messages kept (default: 10)");
    eprintln!();
    eprintln!("Advanced configuration:");
    eprintln!("  CONFIG_FILE             - YAML test plan; environment variables override it");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
    eprintln!("  RUST_LOG                - Log filter (default: graphql_loadtest=info)");
    eprintln!("  LOG_FORMAT              - 'json' for JSON log lines on stderr");
}

/// Logs go to stderr; stdout carries the report only.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("graphql_loadtest=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(EXIT_FATAL);
        }
    };

    let dataset = match config.load_dataset() {
        Ok(dataset) => dataset,
        Err(e) => {
            error!(error = %e, "Failed to load fixture data");
            std::process::exit(EXIT_FATAL);
        }
    };
    info!(records = dataset.len(), "Fixture data loaded");

    let client_result = match build_client(&config.to_client_config()) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            std::process::exit(EXIT_FATAL);
        }
    };
    config.log_summary(&client_result.parsed_headers);

    let body = Arc::new(GraphqlIteration::new(
        client_result.client,
        config.endpoint.clone(),
        config.request_template(),
    ));

    let engine = LoadEngine::new(config.engine_config(), dataset, config.error_sample_limit);

    {
        let stop = engine.stop_signal();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, letting in-flight iterations finish");
                stop.raise();
            }
        });
    }

    let html_dir = config.html_report.then(|| config.report_dir.clone());
    let summary = ConsoleSummary::new(config.thresholds.clone(), html_dir);

    let outcome = engine.run(body, &summary).await?;

    if !outcome.success() {
        std::process::exit(outcome.exit_code());
    }
    Ok(())
}

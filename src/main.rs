//! Seine CLI - rate-limited batch requests across OAuth2 credentials.
//!
//! Run `seine --help` for usage information.

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use seine::{Args, Config, Dispatcher, ResultSet, StatsSnapshot, batch};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse_args();

    // Setup logging
    setup_logging(&args);

    // Print banner
    if !args.json_logs {
        print_banner();
    }

    // Load configuration
    let config = match Config::from_args(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    // Validate input file exists
    if !args.input.exists() {
        error!("Input file not found: {:?}", args.input);
        eprintln!(
            "{} Input file not found: {}",
            style("Error:").red().bold(),
            args.input.display()
        );
        std::process::exit(1);
    }

    // Dry run mode
    if args.dry_run {
        println!("\n{}", style("DRY RUN MODE").yellow().bold());
        println!("Configuration validated successfully.\n");
        print_config_summary(&args, &config);
        return Ok(());
    }

    // Print configuration summary
    if args.verbose && !args.json_logs {
        print_config_summary(&args, &config);
    }

    let credentials = config.credentials.clone();
    let dispatcher = Arc::new(Dispatcher::new(config)?);

    // A credential that cannot get a token is skipped, not fatal
    for credential in credentials {
        let client_id = credential.client_id.clone();
        if let Err(e) = dispatcher.add_credential(credential).await {
            warn!(client_id = %client_id, error = %e, "Skipping credential");
            if !args.json_logs {
                eprintln!("{} {}", style("Warning:").yellow().bold(), e);
            }
        }
    }

    if dispatcher.pool().is_empty() {
        error!("No credential could obtain an access token");
        eprintln!(
            "{} No credential could obtain an access token",
            style("Error:").red().bold()
        );
        std::process::exit(1);
    }

    let requests = batch::load_requests(&args.input).await?;
    let enqueued = batch::enqueue_all(&dispatcher, requests);

    info!(
        input = %args.input.display(),
        output = ?args.output,
        requests = enqueued,
        "Starting dispatch"
    );

    let progress = (!args.no_progress && !args.json_logs)
        .then(|| spawn_progress(Arc::clone(&dispatcher), enqueued));

    let result = dispatcher.get_result().await;

    if let Some((pb, ticker)) = progress {
        ticker.abort();
        pb.finish_with_message("Complete!");
    }

    batch::write_result_set(&result, args.output.as_deref(), &args.errors).await?;

    let stats = dispatcher.stats();

    // Print results
    if !args.json_logs {
        print_summary(&result, &stats);

        if let Some(output) = &args.output {
            println!(
                "\n{} Results saved to: {}",
                style("✓").green().bold(),
                output.display()
            );
        }

        if !result.failed_requests.is_empty() {
            println!(
                "{} Errors saved to: {}",
                style("⚠").yellow().bold(),
                args.errors.display()
            );
        }
    } else {
        // JSON output for programmatic consumption
        let json_result = serde_json::json!({
            "status": result.status,
            "total_requests": stats.total_requests,
            "success_count": result.responses.len(),
            "failure_count": result.failed_requests.len(),
            "aborted_count": result.aborted().count(),
            "attempts": stats.attempts,
            "retries": stats.retries,
            "success_rate": stats.success_rate(),
            "elapsed_seconds": stats.elapsed.as_secs_f64(),
            "avg_latency_ms": stats.avg_latency_ms,
            "throughput_rps": stats.overall_rps,
        });
        println!("{}", serde_json::to_string(&json_result)?);
    }

    // Exit with error code if every request failed
    if !result.failed_requests.is_empty() && result.responses.is_empty() {
        std::process::exit(1);
    }

    Ok(())
}

fn setup_logging(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("seine={level}")));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .init();
    }
}

fn spawn_progress(dispatcher: Arc<Dispatcher>, total: usize) -> (ProgressBar, JoinHandle<()>) {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let ticker_pb = pb.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(200));
        loop {
            interval.tick().await;
            let snapshot = dispatcher.stats();
            ticker_pb.set_position(snapshot.success_count);
            ticker_pb.set_message(format!(
                "RPS: {:.1} | Attempts: {} | Retries: {} | Latency: {:.0}ms",
                snapshot.current_rps, snapshot.attempts, snapshot.retries, snapshot.avg_latency_ms
            ));
        }
    });

    (pb, ticker)
}

fn print_banner() {
    let banner = r"
   _____      _
  / ___/___  (_)___  ___
  \__ \/ _ \/ / __ \/ _ \
 ___/ /  __/ / / / /  __/
/____/\___/_/_/ /_/\___/
    ";

    println!("{}", style(banner).cyan().bold());
    println!(
        "    {}",
        style("Rate-Limited OAuth2 Batch Dispatcher").white().dim()
    );
    println!("    {}", style(format!("v{}", seine::VERSION)).white().dim());
    println!();
}

fn print_config_summary(args: &Args, config: &Config) {
    println!("{}", style("Configuration:").bold());
    println!("  Input:       {}", args.input.display());
    if let Some(output) = &args.output {
        println!("  Output:      {}", output.display());
    }
    println!("  Errors:      {}", args.errors.display());
    println!("  API Base:    {}", config.api_base);
    if let Ok(token_url) = config.token_endpoint() {
        println!("  Token URL:   {token_url}");
    }
    println!("  Timeout:     {:?}", config.request.timeout);
    println!("  Chunk Size:  {}", config.dispatch.chunk_size);
    println!("  Max Tries:   {}", config.dispatch.max_try_count);
    println!("  Fail Limit:  {}", config.dispatch.max_fail_limit);
    if let Some(rps) = config.dispatch.max_requests_per_second {
        println!("  Global Cap:  {rps} req/sec");
    }
    println!("  Credentials: {}", config.credentials.len());
    for (i, credential) in config.credentials.iter().enumerate() {
        println!(
            "    {}. {} ({}/sec, {}/hour)",
            i + 1,
            credential.client_id,
            credential.limit_per_second,
            credential.limit_per_hour
        );
    }
    println!();
}

fn print_summary(result: &ResultSet, stats: &StatsSnapshot) {
    println!("\n{}", "═".repeat(60));
    println!("                    DISPATCH COMPLETE");
    println!("{}", "═".repeat(60));
    println!("  Requests:         {}", stats.total_requests);
    println!(
        "  Successful:       {} ({:.1}%)",
        result.responses.len(),
        stats.success_rate()
    );
    println!("  Failed:           {}", result.failed_requests.len());
    println!("  Aborted:          {}", result.aborted().count());
    println!("  Attempts:         {}", stats.attempts);
    println!("  Retries:          {}", stats.retries);
    println!("  Elapsed Time:     {:.2}s", stats.elapsed.as_secs_f64());
    println!("  Avg Latency:      {:.1}ms", stats.avg_latency_ms);
    println!("  Throughput:       {:.1} req/sec", stats.overall_rps);
    println!("{}", "═".repeat(60));
}

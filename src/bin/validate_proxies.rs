use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use review_harvester::config::HarvestConfig;
use review_harvester::logging::init_tracing;
use review_harvester::proxy_manager::{HttpProbe, ProxyPool};

/// Probe a proxy candidate list and write the working endpoints to the proxy
/// list the harvester loads, fastest first.
#[derive(Parser, Debug)]
#[command(name = "validate_proxies")]
struct Args {
    /// Candidate list
    #[arg(long, env = "PROXY_CANDIDATES_PATH", default_value = "config/proxies.txt")]
    input: PathBuf,

    /// Where to write the alive set (defaults to PROXY_LIST_PATH)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = HarvestConfig::from_env()?;
    let input = args.input;
    let output = args.output.unwrap_or_else(|| config.proxy.list_path.clone());

    println!("Proxy Validation");
    println!("================");
    println!("Input:     {}", input.display());
    println!("Check URL: {}\n", config.proxy.check_url);

    let pool = ProxyPool::new(Arc::new(HttpProbe::new(config.proxy.clone())));
    let candidates = pool.load(&input)?;
    if candidates == 0 {
        println!("✗ No proxy candidates found");
        return Ok(());
    }

    let (alive, dead) = pool.validate_all().await;
    if alive == 0 {
        println!("✗ None of {} candidates answered, leaving {} untouched", candidates, output.display());
        bail!("no working proxies found in {}", input.display());
    }
    let saved = pool
        .save_alive(&output)
        .with_context(|| format!("failed to save {}", output.display()))?;

    println!("\n{}", "=".repeat(70));
    println!("Candidates: {}", candidates);
    println!("Alive:      {}", alive);
    println!("Dead:       {}", dead);
    println!("✓ Saved {} working proxies to {}", saved, output.display());
    println!("{}", "=".repeat(70));
    Ok(())
}

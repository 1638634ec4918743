// Development entry point: score (and explain) one client from the shell.
// Usage: cargo run --bin score -- <client_id>

use credit_scorer_rust::{ScoringConfig, ScoringError, ScoringService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Initialize tracing (structured logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credit_scorer_rust=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client_id: i64 = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: score <client_id>"))?
        .parse()
        .map_err(|_| anyhow::anyhow!("client id must be an integer"))?;

    let service = ScoringService::new(ScoringConfig::from_env());
    service.warmup();

    let status = service.status();
    tracing::info!(
        compiled = status.compiled_loaded,
        native = status.native_loaded,
        "serving from {}",
        status.database_path.display()
    );

    match service.score(client_id) {
        Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        Err(ScoringError::NotFound(id)) => {
            eprintln!("client {id} not found");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }

    if status.native_loaded {
        let explanation = service.explain(client_id)?;
        println!("{}", serde_json::to_string_pretty(&explanation)?);
    }

    Ok(())
}

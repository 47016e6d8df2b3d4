use clap::Parser;
use tracing::{error, info};

use isolation_harness::lifecycle::{setup_tracing, HarnessConfig};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = HarnessConfig::parse();
    let report = match config.run().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, store = ?config.store, "Simulation aborted");
            return Err(e.to_string());
        }
    };

    if config.json {
        println!("{}", report.to_json().map_err(|e| e.to_string())?);
    } else {
        println!("{report}");
    }

    info!("Simulation completed");
    Ok(())
}

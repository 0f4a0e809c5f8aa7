use couch_harness::{plan_report, run_lifecycle, BuildConfiguration, Settings, SystemBackend};
use stacked_errors::{Result, StackableErr};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn run() -> Result<i32> {
    let settings = Settings::from_env().stack()?;
    let config = BuildConfiguration::resolve(std::env::args().skip(1))
        .stack_err("could not resolve the command line")?;
    if settings.print_plan {
        info!("resolved plan:\n{}", plan_report(&config, &settings).stack()?);
    }
    let mut backend = SystemBackend::new(&settings).await.stack()?;
    Ok(run_lifecycle(&mut backend, &config, &settings).await)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let status = match run().await {
        Ok(status) => status,
        Err(e) => {
            error!("{e:?}");
            1
        }
    };
    std::process::exit(status)
}

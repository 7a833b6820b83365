use std::process;

use readthrough::{
    application::{error::AppError, probe},
    cache::CacheConfig,
    config,
    engine::QueryEngine,
    infra::telemetry,
};
use tracing::{Dispatch, Level, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let causes = error.chain();
    if dispatcher::has_been_set() {
        error!(error = %error, ?causes, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, ?causes, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args.command_or_default();

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Probe(args) => run_probe(&settings, &args).await,
    }
}

async fn run_probe(settings: &config::Settings, args: &config::ProbeArgs) -> Result<(), AppError> {
    let engine = QueryEngine::new(CacheConfig::from(&settings.cache));
    let summary = probe::run(&engine, probe::ProbePlan::from(args)).await?;

    probe::write_summary(&mut std::io::stdout().lock(), &summary)
}

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, trace, warn};

use s3mpu_rs::config::Config;
use s3mpu_rs::{
    CLIArgs, MultipartPipeline, create_pipeline_cancellation_token, exit_code_from_error,
};

mod ctrl_c_handler;
mod output;
mod summary;
mod tracing_init;

/// s3mpu - list and clean up incomplete Amazon S3 multipart uploads.
///
/// This binary is a thin wrapper over the s3mpu-rs library.
#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "s3mpu",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    if let Err(e) = run(config).await {
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code_from_error(&e));
    }

    Ok(())
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

async fn run(config: Config) -> Result<()> {
    let cancellation_token = create_pipeline_cancellation_token();

    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = tokio::time::Instant::now();
    debug!(operation = ?config.operation, "pipeline start.");

    let mut pipeline = MultipartPipeline::new(config.clone(), cancellation_token.clone()).await?;
    let output_receiver = pipeline
        .take_output_receiver()
        .ok_or_else(|| anyhow!("output channel has already been taken."))?;
    let printer_join_handle = output::spawn_printer(output_receiver);
    let stats_join_handle = summary::spawn_stats_reader(pipeline.get_stats_receiver());

    pipeline.run().await;

    let printed = printer_join_handle.await??;
    let stats_events = stats_join_handle.await?;
    trace!(stats_events, "stats reader has finished.");

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
    summary::log_summary(&pipeline.get_pipeline_stats(), config.dry_run, &duration_sec);

    if let Some(e) = pipeline.get_error_and_consume() {
        error!(duration_sec = duration_sec, "s3mpu failed.");
        return Err(e);
    }

    if cancellation_token.is_cancelled() {
        warn!(duration_sec = duration_sec, printed, "s3mpu has been cancelled.");
        return Ok(());
    }

    debug!(duration_sec = duration_sec, printed, "s3mpu has been completed.");
    Ok(())
}

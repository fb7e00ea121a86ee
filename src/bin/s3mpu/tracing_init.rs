// Initializes the tracing subscriber for the CLI binary.
//
// Logs go to stderr; stdout carries the listed items.

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::fmt::format::FmtSpan;

use s3mpu_rs::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";

pub fn init_tracing(config: &TracingConfig) {
    let fmt_span = if config.span_events_tracing {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .with_ansi(!config.disable_color_tracing && std::io::stderr().is_terminal())
        .with_span_events(fmt_span);

    let (event_filter, show_target) = event_filter(config, env::var(EVENT_FILTER_ENV_VAR).ok());

    let subscriber_builder = subscriber_builder
        .with_env_filter(event_filter)
        .with_target(show_target);
    if config.json_tracing {
        subscriber_builder.json().init();
    } else {
        subscriber_builder.init();
    }
}

/// Directive string and whether targets are shown. `RUST_LOG` wins unless
/// the AWS crates are traced.
fn event_filter(config: &TracingConfig, env_filter: Option<String>) -> (String, bool) {
    let tracing_level = config.tracing_level;
    if config.aws_sdk_tracing {
        return (
            format!(
                "s3mpu_rs={tracing_level},s3mpu={tracing_level},aws_config={tracing_level},aws_sigv4={tracing_level},reqwest={tracing_level}"
            ),
            true,
        );
    }
    if let Some(env_filter) = env_filter {
        return (env_filter, true);
    }
    (format!("s3mpu_rs={tracing_level},s3mpu={tracing_level}"), false)
}

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

#[derive(Clone, Debug, Copy, ValueEnum, PartialEq)]
pub enum LogOutput {
    Console,
    Json,
}

/// Installs the global subscriber. `RUST_LOG` overrides `level`.
pub fn init_logging(output: LogOutput, level: Level) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?;

    let subscriber = tracing_subscriber::registry();
    let subscriber = match output {
        LogOutput::Console => subscriber.with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(filter)
                .boxed(),
        ),
        LogOutput::Json => subscriber.with(
            fmt::layer()
                .json()
                .with_writer(std::io::stdout)
                .flatten_event(true)
                .with_current_span(true)
                .with_filter(filter)
                .boxed(),
        ),
    };

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

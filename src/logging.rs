use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

pub fn init_stdout(max_level: Level, format: LogFormat) {
    let filter = LevelFilter::from_level(max_level);
    let layer = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).init();
}

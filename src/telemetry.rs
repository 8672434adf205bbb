use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Installs the bunyan JSON subscriber on stdout for events at `max_level` and above.
pub fn init(name: &str, max_level: Level) -> Result<(), SetGlobalDefaultError> {
    let formatting_layer = BunyanFormattingLayer::new(name.into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(filter_fn(move |metadata| *metadata.level() <= max_level))
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)
}

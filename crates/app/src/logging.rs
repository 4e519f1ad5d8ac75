use std::io;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Installs the global subscriber. `pointgrid*` targets log at `level`, every
/// other target is held at `WARN`.
pub(crate) fn setup_tracing(level: LevelFilter) {
    let filter_layer = tracing_subscriber::filter::filter_fn(move |metadata| {
        let effective = if is_pointgrid_target(metadata.target()) {
            level
        } else {
            level.min(LevelFilter::WARN)
        };
        effective >= *metadata.level()
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(io::stderr);

    // a second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter_layer))
        .try_init();
}

fn is_pointgrid_target(target: &str) -> bool {
    target.starts_with("pointgrid")
}

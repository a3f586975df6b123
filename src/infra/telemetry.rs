//! Logging and metric setup for every reelhouse command.
//!
//! Log lines carry a `target` field under `reelhouse::` naming the component
//! (`reelhouse::serve`, `reelhouse::worker`, `reelhouse::http::robots`, ...).
//! `RUST_LOG` overrides the configured level.
//!
//! Metrics go to whatever `metrics` recorder the embedding process installs;
//! without one they are dropped. Counters and histograms:
//!
//! | name | kind | emitted by |
//! |---|---|---|
//! | `reelhouse_cache_hit_total` | counter | process cache reads |
//! | `reelhouse_cache_miss_total` | counter | process cache reads, expired included |
//! | `reelhouse_cache_evict_total` | counter | capacity evictions |
//! | `reelhouse_html_optimized_total` | counter | optimizer middleware |
//! | `reelhouse_html_optimize_ms` | histogram | optimizer middleware |
//! | `reelhouse_sitemap_render_ms` | histogram | sitemap renders, by `document` |

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

enum MetricKind {
    Counter,
    Histogram,
}

const METRICS: [(&str, MetricKind, &str); 6] = [
    (
        "reelhouse_cache_hit_total",
        MetricKind::Counter,
        "Process cache reads served from a live entry.",
    ),
    (
        "reelhouse_cache_miss_total",
        MetricKind::Counter,
        "Process cache reads that found nothing or an expired entry.",
    ),
    (
        "reelhouse_cache_evict_total",
        MetricKind::Counter,
        "Entries pushed out of the process cache by capacity.",
    ),
    (
        "reelhouse_html_optimized_total",
        MetricKind::Counter,
        "HTML pages rewritten by the optimizer.",
    ),
    (
        "reelhouse_html_optimize_ms",
        MetricKind::Histogram,
        "Time spent rewriting one HTML page.",
    ),
    (
        "reelhouse_sitemap_render_ms",
        MetricKind::Histogram,
        "Time spent rendering a sitemap index or page on a cache miss.",
    ),
];

/// Installs the global subscriber for `logging` and describes the metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("failed to install tracing subscriber: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (name, kind, description) in METRICS {
            match kind {
                MetricKind::Counter => describe_counter!(name, Unit::Count, description),
                MetricKind::Histogram => {
                    describe_histogram!(name, Unit::Milliseconds, description)
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_follow_their_kind() {
        for (name, kind, _) in METRICS {
            assert!(name.starts_with("reelhouse_"), "{name}");
            match kind {
                MetricKind::Counter => assert!(name.ends_with("_total"), "{name}"),
                MetricKind::Histogram => assert!(name.ends_with("_ms"), "{name}"),
            }
        }
    }
}

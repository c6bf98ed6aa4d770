//! Logging and tracing bootstrap, invoked once by each binary before anything else runs.

use fastrace::collector::{Config as FastraceConfig, ConsoleReporter};
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracing_config: TracingConfig,

    #[serde(default)]
    pub metrics_config: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { enabled: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_addr")]
    pub addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> SocketAddr {
    "0.0.0.0:9000".parse().expect("valid default metrics addr")
}

/// Initialize structured logging. Must be called exactly once, as early as possible.
pub fn init_logging() {
    logforth::builder()
        .dispatch(|d| {
            d.filter(log::LevelFilter::Info)
                .append(logforth::append::Stdout::default())
        })
        .apply();
}

/// Initialize span tracing. A no-op unless `tracing_config.enabled`, in which case spans
/// produced by `#[fastrace::trace]`-annotated functions are printed to the console. A fuller
/// deployment would wire an OTLP exporter here instead; that exposition surface is out of
/// scope for this pipeline (see spec.md's Non-goals).
pub fn init_tracing(config: TracingConfig) {
    if config.enabled {
        fastrace::set_reporter(ConsoleReporter, FastraceConfig::default());
    }
}

/// Install a process-wide Prometheus metrics recorder so `metrics::counter!`/`gauge!` calls
/// made throughout the pipeline land somewhere. Installing the off-the-shelf recorder is the
/// minimal ambient plumbing; building a bespoke scrape endpoint is the exposition surface
/// spec.md's Non-goals exclude.
pub fn init_metrics(config: MetricsConfig) {
    if config.enabled {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(config.addr)
            .install()
            .expect("failed to install Prometheus metrics recorder");
    }
}

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Initializes metrics with an automatic HTTP server on `port`.
///
/// Installs a global metrics recorder and starts an HTTP server listening on
/// `[::]:{port}/metrics` for Prometheus scraping. Every metric carries an `app` label set
/// to `app_name`.
///
/// Fails if a global recorder was already installed or the listener cannot be started.
pub fn init_metrics(app_name: &str, port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port))
        .add_global_label("app", app_name)
        .install()?;

    Ok(())
}

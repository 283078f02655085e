use std::pin::pin;

use coalesce::upstream::http::HttpJsonUpstream;
use coalesce::{CoalesceError, ErrorKind, RequestCoalescer, Upstream, coalesce_error};
use coalesce_config::shared::{FetcherConfig, UpstreamConfig};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{FetcherError, FetcherResult};

/// Outcome of one round of concurrent requests.
#[derive(Debug, Default)]
struct RoundSummary {
    succeeded: usize,
    failed: usize,
    /// Upstream executions started during the round.
    generations: u64,
    /// One failure per failed generation, as seen by its leader.
    failures: Vec<CoalesceError>,
}

/// Starts the fetcher service with the provided configuration.
///
/// Builds the HTTP upstream, wraps it in a [`RequestCoalescer`] and drives the configured
/// rounds of concurrent requests through it. Stops early on ctrl-c. Returns the failures
/// of every failed generation once all rounds ran.
pub async fn start_fetcher_with_config(config: FetcherConfig) -> FetcherResult<()> {
    info!("starting fetcher service");

    log_config(&config);

    let upstream = build_upstream(&config.upstream)?;
    let coalescer = RequestCoalescer::new(upstream.url().to_string(), upstream);

    let mut shutdown = pin!(tokio::signal::ctrl_c());
    let mut failures = Vec::new();

    let rounds = config.traffic.rounds;
    for round in 1..=rounds {
        let summary = tokio::select! {
            summary = run_round(&coalescer, round, config.traffic.concurrent_requests) => summary,
            _ = &mut shutdown => {
                info!(round, "shutdown requested, abandoning in-flight round");
                break;
            }
        };
        failures.extend(summary.failures);

        if round == rounds {
            break;
        }

        tokio::select! {
            _ = sleep(config.traffic.round_interval()) => {}
            _ = &mut shutdown => {
                info!(round, "shutdown requested, skipping remaining rounds");
                break;
            }
        }
    }

    info!(
        upstream_executions = coalescer.generation(),
        failed_generations = failures.len(),
        "fetcher service finished"
    );

    if failures.is_empty() {
        return Ok(());
    }

    Err(CoalesceError::from(failures).into())
}

/// Fires `concurrent_requests` calls at `coalescer` and waits for all of them.
async fn run_round<U>(
    coalescer: &RequestCoalescer<U>,
    round: u32,
    concurrent_requests: usize,
) -> RoundSummary
where
    U: Upstream<Output = Value> + Send + Sync + 'static,
{
    let generation_before = coalescer.generation();

    let mut requests = JoinSet::new();
    for caller in 0..concurrent_requests {
        let coalescer = coalescer.clone();
        requests.spawn(async move { (caller, coalescer.request().await) });
    }

    let mut summary = RoundSummary::default();
    while let Some(joined) = requests.join_next().await {
        match joined {
            Ok((caller, Ok(payload))) => {
                summary.succeeded += 1;
                debug!(round, caller, %payload, "request succeeded");
            }
            Ok((caller, Err(err))) => {
                summary.failed += 1;
                warn!(round, caller, kind = ?err.kind(), "request failed");

                // Followers receive copies of their leader's failure.
                if err.origins().is_empty() {
                    summary.failures.push(err);
                }
            }
            Err(err) => {
                summary.failed += 1;
                error!(round, "request task failed: {err}");

                // A leader task that died takes its generation down with it, its followers
                // only see copies of the abandonment.
                summary.failures.push(coalesce_error!(
                    ErrorKind::LeaderAbandoned,
                    "Request task failed before completing",
                    err
                ));
            }
        }
    }

    summary.generations = coalescer.generation() - generation_before;

    info!(
        round,
        succeeded = summary.succeeded,
        failed = summary.failed,
        upstream_executions = summary.generations,
        "round finished"
    );

    summary
}

/// Builds the HTTP upstream described by `config`.
fn build_upstream(config: &UpstreamConfig) -> FetcherResult<HttpJsonUpstream> {
    let url = Url::parse(&config.url).map_err(FetcherError::config)?;

    let mut headers = HeaderMap::new();
    for (name, value) in config.parsed_headers().map_err(FetcherError::config)? {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(FetcherError::config)?;
        let value = HeaderValue::from_str(value).map_err(FetcherError::config)?;
        headers.append(name, value);
    }

    if let Some(token) = &config.bearer_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(FetcherError::config)?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    let client = Client::builder()
        .timeout(config.timeout())
        .default_headers(headers)
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .map_err(FetcherError::config)?;

    Ok(HttpJsonUpstream::new(client, url))
}

fn log_config(config: &FetcherConfig) {
    debug!(
        url = %config.upstream.url,
        timeout_ms = config.upstream.timeout_ms,
        headers = config.upstream.headers.len(),
        bearer_token = config.upstream.bearer_token.is_some(),
        "upstream config"
    );
    debug!(
        concurrent_requests = config.traffic.concurrent_requests,
        rounds = config.traffic.rounds,
        round_interval_ms = config.traffic.round_interval_ms,
        metrics_port = ?config.metrics_port,
        "traffic config"
    );
}

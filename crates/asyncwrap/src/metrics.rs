//! Provides access to the metrics system.
//!
//! Metrics are reported to statsd once [`configure_statsd`] has been called. Until then, every
//! [`metric!`](crate::metric) invocation is a no-op.
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use cadence::{Metric, MetricBuilder, StatsdClient, UdpMetricSink};

static METRICS_CLIENT: OnceLock<MetricsClient> = OnceLock::new();

/// The metrics prelude that is necessary to use the client.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// A statsd client that attaches a set of default tags to every metric.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,

    /// A collection of tags and values that will be sent with every metric.
    tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Attaches the default tags to `metric` and sends it.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (tag, value) in self.tags.iter() {
            metric = metric.with_tag(tag, value);
        }
        metric.send()
    }
}

/// Tell the metrics system to report to statsd.
///
/// Calling this more than once is an error; the first configuration stays in effect.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> Result<()> {
    let addrs: Vec<_> = host
        .to_socket_addrs()
        .context("failed to resolve statsd host")?
        .collect();
    if let Some(addr) = addrs.first() {
        tracing::info!("Reporting metrics to statsd at {}", addr);
    }
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind statsd socket")?;
    socket.set_nonblocking(true)?;
    let sink = UdpMetricSink::from(&addrs[..], socket).context("failed to create statsd sink")?;
    let statsd_client = StatsdClient::from_sink(prefix, sink);

    METRICS_CLIENT
        .set(MetricsClient {
            statsd_client,
            tags,
        })
        .map_err(|_| anyhow::anyhow!("statsd metrics were already configured"))
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked. For the most part
/// the [`metric!`](crate::metric) macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    match METRICS_CLIENT.get() {
        Some(client) => f(client),
        None => Default::default(),
    }
}

/// Emits a metric.
///
/// Supports counters (`counter(name) += n`), gauges (`gauge(name) = n`) and timers
/// (`timer(name) = duration`), each followed by optional `"tag" => value` pairs.
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send count_with_tags, $id, $value $(, $k => $v)*)
    };
    (gauge($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send gauge_with_tags, $id, $value $(, $k => $v)*)
    };
    (timer($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metric!(@send time_with_tags, $id, $value $(, $k => $v)*)
    };

    (@send $method:ident, $id:expr, $value:expr $(, $k:expr => $v:expr)*) => {{
        use $crate::metrics::prelude::*;
        $crate::metrics::with_client(|client| {
            client.send_metric(
                client.statsd_client.$method($id, $value)
                    $(.with_tag($k, $v))*
            );
        })
    }};
}

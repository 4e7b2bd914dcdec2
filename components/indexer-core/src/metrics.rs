//! Minimal Prometheus exposition (ambient stack addition, modeled on the
//! teacher's `PrometheusMonitoring` + `start_serving_prometheus_metrics`
//! pair): a handful of counters/gauges plus a tiny hyper server exposing
//! them on `/metrics`. The read API consuming this data is out of scope
//! (spec 1); this only needs to exist so operators can see the driver is
//! making progress.

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::block_processor::BlockCounts;
use crate::logging::Context;
use crate::try_info;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub deploys_total: IntCounter,
    pub mints_total: IntCounter,
    pub transfers_total: IntCounter,
    pub bitmaps_total: IntCounter,
    pub skipped_total: IntCounter,
    pub blocks_processed_total: IntCounter,
    pub current_height: IntGauge,
    pub cached_tip: IntGauge,
}

impl Metrics {
    pub fn new() -> Metrics {
        let registry = Registry::new();
        let deploys_total = IntCounter::new("ord420_deploys_total", "Accepted BRC-420 deploys").unwrap();
        let mints_total = IntCounter::new("ord420_mints_total", "Accepted BRC-420 mints").unwrap();
        let transfers_total = IntCounter::new("ord420_transfers_total", "Ownership transfers applied").unwrap();
        let bitmaps_total = IntCounter::new("ord420_bitmaps_total", "Accepted bitmap claims").unwrap();
        let skipped_total = IntCounter::new("ord420_skipped_total", "Inscriptions skipped by a validator").unwrap();
        let blocks_processed_total =
            IntCounter::new("ord420_blocks_processed_total", "Blocks fully processed").unwrap();
        let current_height = IntGauge::new("ord420_current_height", "Driver's current cursor height").unwrap();
        let cached_tip = IntGauge::new("ord420_cached_tip", "Last observed chain tip height").unwrap();

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(deploys_total.clone()),
            Box::new(mints_total.clone()),
            Box::new(transfers_total.clone()),
            Box::new(bitmaps_total.clone()),
            Box::new(skipped_total.clone()),
            Box::new(blocks_processed_total.clone()),
            Box::new(current_height.clone()),
            Box::new(cached_tip.clone()),
        ];
        for metric in collectors {
            registry.register(metric).expect("metric names must be unique");
        }

        Metrics {
            registry,
            deploys_total,
            mints_total,
            transfers_total,
            bitmaps_total,
            skipped_total,
            blocks_processed_total,
            current_height,
            cached_tip,
        }
    }

    pub fn record_block(&self, counts: &BlockCounts, height: u64) {
        self.deploys_total.inc_by(counts.deploys as u64);
        self.mints_total.inc_by(counts.mints as u64);
        self.transfers_total.inc_by(counts.transfers as u64);
        self.bitmaps_total.inc_by(counts.bitmaps as u64);
        self.skipped_total.inc_by(counts.skipped as u64);
        self.blocks_processed_total.inc();
        self.current_height.set(height as i64);
    }

    fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}

/// Serves `/metrics` on `port` until the process exits. Mirrors the
/// teacher's `start_serving_prometheus_metrics` free function shape.
pub async fn start_serving_metrics(metrics: Metrics, port: u16, ctx: &Context) -> Result<(), hyper::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let body = if req.uri().path() == "/metrics" {
                        metrics.render()
                    } else {
                        String::new()
                    };
                    Ok::<_, Infallible>(Response::new(Body::from(body)))
                }
            }))
        }
    });

    try_info!(ctx, "prometheus metrics listening on {addr}");
    Server::bind(&addr).serve(make_svc).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_block_updates_counters_and_gauge() {
        let metrics = Metrics::new();
        let counts = BlockCounts {
            deploys: 1,
            mints: 2,
            transfers: 0,
            bitmaps: 1,
            skipped: 3,
            irrelevant: 10,
        };
        metrics.record_block(&counts, 840_123);

        let rendered = metrics.render();
        assert!(rendered.contains("ord420_current_height 840123"));
        assert!(rendered.contains("ord420_deploys_total 1"));
        assert!(rendered.contains("ord420_mints_total 2"));
    }
}

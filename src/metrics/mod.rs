use std::sync::OnceLock;

use http::{HeaderMap, StatusCode};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::new)
}

fn requests_total() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        let counter = IntCounter::new("cachify_requests_total", "Total requests").unwrap();
        registry().register(Box::new(counter.clone())).unwrap();
        counter
    })
}

fn requests_status_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        let counter = IntCounterVec::new(
            Opts::new("cachify_requests_status_total", "Requests by status"),
            &["code"],
        )
        .unwrap();
        registry().register(Box::new(counter.clone())).unwrap();
        counter
    })
}

fn outcomes_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        let counter = IntCounterVec::new(
            Opts::new("cachify_outcomes_total", "Middleware outcomes"),
            &["outcome"],
        )
        .unwrap();
        registry().register(Box::new(counter.clone())).unwrap();
        counter
    })
}

fn compressions_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        let counter = IntCounterVec::new(
            Opts::new("cachify_compressions_total", "Compression collaborator calls"),
            &["result"],
        )
        .unwrap();
        registry().register(Box::new(counter.clone())).unwrap();
        counter
    })
}

fn builds_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        let counter = IntCounterVec::new(
            Opts::new("cachify_cache_builds_total", "Asset cache builds"),
            &["result"],
        )
        .unwrap();
        registry().register(Box::new(counter.clone())).unwrap();
        counter
    })
}

fn init_metrics() {
    let _ = requests_total();
    for outcome in ["hit", "redirect", "pass", "error"] {
        outcomes_total().with_label_values(&[outcome]).inc_by(0);
    }
    for result in ["ok", "error"] {
        compressions_total().with_label_values(&[result]).inc_by(0);
        builds_total().with_label_values(&[result]).inc_by(0);
    }
}

fn result_label(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

pub fn record(status: StatusCode) {
    init_metrics();
    requests_total().inc();
    let code = status.as_u16().to_string();
    requests_status_total().with_label_values(&[code.as_str()]).inc();
}

pub fn record_outcome(outcome: &str) {
    init_metrics();
    outcomes_total().with_label_values(&[outcome]).inc();
}

pub fn record_compression(ok: bool) {
    init_metrics();
    compressions_total().with_label_values(&[result_label(ok)]).inc();
}

pub fn record_build(ok: bool) {
    init_metrics();
    builds_total().with_label_values(&[result_label(ok)]).inc();
}

pub fn render() -> String {
    init_metrics();
    let families = registry().gather();
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&families, &mut buf).unwrap_or(());
    String::from_utf8(buf).unwrap_or_default()
}

pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(constants::PROTOCOL_REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(generate_request_id)
}

pub fn generate_request_id() -> String {
    let mut buf = [0u8; 16];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

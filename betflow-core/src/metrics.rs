use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static MESSAGES_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("betflow_messages_received_total", "Messages pulled from the source").unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static DROPPED_RECORDS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("betflow_dropped_records_total", "Messages or records dropped before reaching a sink"),
        &["reason"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static WINDOWS_EMITTED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("betflow_windows_emitted_total", "Closed windows handed to the router").unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static OPEN_WINDOWS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("betflow_open_windows", "Windows currently buffering records").unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

pub static BATCH_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("betflow_batch_writes_total", "Batch writes by destination and outcome"),
        &["destination", "outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static ROWS_WRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("betflow_rows_written_total", "Rows committed to a destination table"),
        &["destination"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static SINK_WRITE_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        HistogramOpts::new("betflow_sink_write_latency_ms", "Latency of one batch load (ms)").buckets(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0,
        ]),
        &["destination"],
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

pub static LAG_WATERMARK_MS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new(
        "betflow_watermark_lag_ms",
        "Lag between now and current watermark in ms",
    )
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

pub fn render_prometheus() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer).ok();
    String::from_utf8(buffer).unwrap_or_default()
}

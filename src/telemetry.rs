use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
};
use prometheus::Registry;

pub struct Metrics {
    frames_processed: Counter<u64>,
    frames_dropped: Counter<u64>,
    sessions_opened: Counter<u64>,
    frame_duration: Histogram<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        // TODO: deprecated crate to be replaced with an OLTP exporter
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("sign_stream");
        global::set_meter_provider(provider);

        let frames_processed = meter
            .u64_counter("frames_processed_total")
            .with_description("Total number of frames fully processed")
            .build();

        let frames_dropped = meter
            .u64_counter("frames_dropped_total")
            .with_description("Frames dropped on decode/detection/encode failure")
            .build();

        let sessions_opened = meter
            .u64_counter("sessions_opened_total")
            .with_description("Total number of WebSocket sessions accepted")
            .build();

        let frame_duration = meter
            .u64_histogram("frame_pipeline_duration_ms")
            .with_boundaries(vec![5., 10., 25., 50., 100., 250., 500., 1000., 2500.])
            .with_description("Per-frame pipeline duration in milliseconds")
            .build();

        Metrics {
            frames_processed,
            frames_dropped,
            sessions_opened,
            frame_duration,
            registry,
        }
    }

    pub fn record_frame(&self, duration_ms: u64) {
        self.frames_processed.add(1, &[]);
        self.frame_duration.record(duration_ms, &[]);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.add(1, &[]);
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.add(1, &[]);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

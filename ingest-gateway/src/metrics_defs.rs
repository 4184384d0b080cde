use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status.",
};

pub const REQUESTS_TIMED_OUT: MetricDef = MetricDef {
    name: "requests.timed_out",
    metric_type: MetricType::Counter,
    description: "Number of requests aborted by the request timeout",
};

pub const ROWS_ACCEPTED: MetricDef = MetricDef {
    name: "rows.accepted",
    metric_type: MetricType::Counter,
    description: "Number of rows handed to a writer",
};

pub const ROWS_FAILED: MetricDef = MetricDef {
    name: "rows.failed",
    metric_type: MetricType::Counter,
    description: "Number of rows that failed. Tagged with reason (decode, submit).",
};

pub const WRITER_CONNECTS: MetricDef = MetricDef {
    name: "writer.connects",
    metric_type: MetricType::Counter,
    description: "Number of writer connections established",
};

pub const WRITER_CONNECT_FAILURES: MetricDef = MetricDef {
    name: "writer.connect_failures",
    metric_type: MetricType::Counter,
    description: "Number of failed writer connection attempts",
};

pub const WRITERS_LIVE: MetricDef = MetricDef {
    name: "writers.live",
    metric_type: MetricType::Gauge,
    description: "Number of cached writer handles",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_TIMED_OUT,
    ROWS_ACCEPTED,
    ROWS_FAILED,
    WRITER_CONNECTS,
    WRITER_CONNECT_FAILURES,
    WRITERS_LIVE,
];

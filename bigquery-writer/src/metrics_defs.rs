use shared::metrics_defs::{MetricDef, MetricType};

pub const INSERT_ALL_DURATION: MetricDef = MetricDef {
    name: "bigquery.insert_all.duration",
    metric_type: MetricType::Histogram,
    description: "insertAll call duration in seconds. Tagged with outcome.",
};

pub const ROWS_INSERTED: MetricDef = MetricDef {
    name: "bigquery.rows.inserted",
    metric_type: MetricType::Counter,
    description: "Rows accepted by insertAll",
};

pub const ROWS_DROPPED: MetricDef = MetricDef {
    name: "bigquery.rows.dropped",
    metric_type: MetricType::Counter,
    description: "Rows rejected by BigQuery or lost to a failed insertAll call",
};

pub const TOKEN_REFRESHES: MetricDef = MetricDef {
    name: "bigquery.token.refreshes",
    metric_type: MetricType::Counter,
    description: "Number of access tokens fetched",
};

pub const ALL_METRICS: &[MetricDef] = &[
    INSERT_ALL_DURATION,
    ROWS_INSERTED,
    ROWS_DROPPED,
    TOKEN_REFRESHES,
];

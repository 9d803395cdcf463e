//! Prometheus metrics shared across the role binaries. One `Lazy` static per
//! series, a `register_all` that feeds a `Registry`, and a `gather_metrics`
//! text-encoder helper. Counters are pre-initialized to zero for every label
//! combination a process knows about, so absence of a series means "not yet
//! configured" rather than "nothing happened yet".

use once_cell::sync::Lazy;
use prometheus::{opts, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry, TextEncoder};

macro_rules! counter_vec {
    ($name:expr, $help:expr, $labels:expr) => {
        Lazy::new(|| IntCounterVec::new(opts!($name, $help), $labels).unwrap())
    };
}
macro_rules! gauge_vec {
    ($name:expr, $help:expr, $labels:expr) => {
        Lazy::new(|| IntGaugeVec::new(opts!($name, $help), $labels).unwrap())
    };
}
macro_rules! histogram_vec {
    ($name:expr, $help:expr, $labels:expr) => {
        Lazy::new(|| HistogramVec::new(HistogramOpts::new($name, $help), $labels).unwrap())
    };
}

/// Every operation state transition, including creation (from the sentinel
/// state `none`) and the terminal transitions written by the resize executor.
pub static OPERATION_STATE_TRANSITIONS: Lazy<IntCounterVec> = counter_vec!(
    "castellum_operation_state_transitions",
    "Pending operation state transitions",
    &["project_id", "asset", "from_state", "to_state"]
);

pub static RESOURCE_SCRAPES: Lazy<IntCounterVec> = counter_vec!(
    "castellum_resource_scrapes",
    "Resource scrape attempts",
    &["asset", "task_outcome"]
);

pub static ASSET_SCRAPES: Lazy<IntCounterVec> = counter_vec!(
    "castellum_asset_scrapes",
    "Asset scrape attempts",
    &["asset", "task_outcome"]
);

pub static ASSET_RESIZES: Lazy<IntCounterVec> = counter_vec!(
    "castellum_asset_resizes",
    "Resize executions by terminal outcome",
    &["asset", "task_outcome"]
);

/// 1 while the project has a resource configured for the asset type, 0 after
/// the resource is deleted. Written on every resource create/delete and
/// refreshed by the metrics cron so restarts repopulate the series.
pub static HAS_PROJECT_RESOURCE: Lazy<IntGaugeVec> = gauge_vec!(
    "castellum_has_project_resource",
    "1 if the project has a resource configured for the asset type",
    &["project_id", "asset"]
);

pub static ASSET_COUNT: Lazy<IntGaugeVec> = gauge_vec!(
    "castellum_asset_count",
    "Number of assets tracked per resource",
    &["project_id", "asset"]
);

pub static PENDING_OPERATIONS: Lazy<IntGaugeVec> = gauge_vec!(
    "castellum_pending_operations",
    "Pending operations by reason",
    &["asset", "reason"]
);

// Finished operations may outlive their asset (and with it the link back to
// an asset type), so garbage collection counts without labels.
pub static GARBAGE_COLLECTED_OPERATIONS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("castellum_garbage_collected_operations", "Finished operations deleted by garbage collection").unwrap());

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> =
    counter_vec!("castellum_http_requests_total", "Total HTTP requests", &["method", "path", "status"]);
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> =
    histogram_vec!("castellum_http_request_duration_seconds", "HTTP request latency", &["method", "path"]);

pub static ASSET_RESIZE_DURATION: Lazy<HistogramVec> =
    histogram_vec!("castellum_asset_resize_duration_seconds", "Resize execution latency", &["asset"]);

pub static SCHEDULER_LOOP_ERRORS: Lazy<IntCounterVec> =
    counter_vec!("castellum_scheduler_loop_errors", "Scheduler loop iteration errors", &["loop_name"]);

/// The transitions an operation can actually take. `none` is the sentinel
/// "from" state used when an operation is created. Used to pre-initialize
/// counter series to zero.
pub const KNOWN_TRANSITIONS: &[(&str, &str)] = &[
    ("none", "created"),
    ("created", "confirmed"),
    ("created", "cancelled"),
    ("confirmed", "greenlit"),
    ("confirmed", "cancelled"),
    ("greenlit", "succeeded"),
    ("greenlit", "failed"),
    ("greenlit", "errored"),
    ("greenlit", "cancelled"),
];

pub fn register_all(r: &Registry) -> prometheus::Result<()> {
    r.register(Box::new(OPERATION_STATE_TRANSITIONS.clone()))?;
    r.register(Box::new(RESOURCE_SCRAPES.clone()))?;
    r.register(Box::new(ASSET_SCRAPES.clone()))?;
    r.register(Box::new(ASSET_RESIZES.clone()))?;
    r.register(Box::new(HAS_PROJECT_RESOURCE.clone()))?;
    r.register(Box::new(ASSET_COUNT.clone()))?;
    r.register(Box::new(PENDING_OPERATIONS.clone()))?;
    r.register(Box::new(GARBAGE_COLLECTED_OPERATIONS.clone()))?;
    r.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    r.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    r.register(Box::new(ASSET_RESIZE_DURATION.clone()))?;
    r.register(Box::new(SCHEDULER_LOOP_ERRORS.clone()))?;
    Ok(())
}

pub fn gather_metrics(r: &Registry) -> String {
    let encoder = TextEncoder::new();
    let families = r.gather();
    let mut buf = Vec::new();
    encoder.encode(&families, &mut buf).unwrap_or_default();
    String::from_utf8(buf).unwrap_or_default()
}

/// Creates every series a configured resource can ever emit, at zero. Called
/// when a resource is created and again by the metrics cron for every stored
/// resource, so a fresh process exposes the full label space immediately.
pub fn initialize_resource_series(project_id: &str, asset_type: &str) {
    for (from, to) in KNOWN_TRANSITIONS {
        OPERATION_STATE_TRANSITIONS
            .with_label_values(&[project_id, asset_type, from, to])
            .inc_by(0);
    }
    for outcome in ["success", "failure"] {
        RESOURCE_SCRAPES.with_label_values(&[asset_type, outcome]).inc_by(0);
        ASSET_SCRAPES.with_label_values(&[asset_type, outcome]).inc_by(0);
    }
    for outcome in ["succeeded", "failed", "errored", "cancelled"] {
        ASSET_RESIZES.with_label_values(&[asset_type, outcome]).inc_by(0);
    }
    for reason in ["low", "high", "critical"] {
        PENDING_OPERATIONS.with_label_values(&[asset_type, reason]).set(0);
    }
    HAS_PROJECT_RESOURCE.with_label_values(&[project_id, asset_type]).set(1);
}

/// Drops the "configured" marker for a deleted resource. The counter series
/// stay (Prometheus counters must not disappear mid-scrape); only the gauge
/// flips to 0.
pub fn clear_resource_series(project_id: &str, asset_type: &str) {
    HAS_PROJECT_RESOURCE.with_label_values(&[project_id, asset_type]).set(0);
    ASSET_COUNT.with_label_values(&[project_id, asset_type]).set(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_duplicate_collectors() {
        let r = Registry::new_custom(Some("test".into()), None).unwrap();
        register_all(&r).unwrap();
        let out = gather_metrics(&r);
        assert!(out.is_empty() || out.contains("castellum"));
    }

    #[test]
    fn initialize_creates_zeroed_series() {
        initialize_resource_series("project-a", "nfs");
        assert_eq!(PENDING_OPERATIONS.with_label_values(&["nfs", "low"]).get(), 0);
        assert_eq!(
            OPERATION_STATE_TRANSITIONS
                .with_label_values(&["project-a", "nfs", "none", "created"])
                .get(),
            0
        );
        assert_eq!(HAS_PROJECT_RESOURCE.with_label_values(&["project-a", "nfs"]).get(), 1);
    }

    #[test]
    fn clear_flips_gauge_to_zero() {
        initialize_resource_series("project-b", "nfs");
        clear_resource_series("project-b", "nfs");
        assert_eq!(HAS_PROJECT_RESOURCE.with_label_values(&["project-b", "nfs"]).get(), 0);
    }
}

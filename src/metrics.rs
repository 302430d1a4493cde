use tracing::trace;

// Trace-based metrics: the deployment scrapes these events, so no
// exporter dependency is needed in this service.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "snaplist.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "snaplist.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

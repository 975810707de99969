use std::{collections::HashMap, fmt::Write as _};

use super::core::{MetricsState, METRICS_STATE};

pub(crate) const SEARCH_INDEX_FAILURE_BATCH: &str = "batch_apply";
pub(crate) const SEARCH_INDEX_FAILURE_ENQUEUE: &str = "enqueue";

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

fn write_counter(
    output: &mut String,
    name: &str,
    help: &str,
    label: &str,
    entries: HashMap<&'static str, u64>,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let mut entries: Vec<_> = entries.into_iter().collect();
    entries.sort_by_key(|(key, _)| *key);
    for (key, value) in entries {
        let _ = writeln!(output, "{name}{{{label}=\"{key}\"}} {value}");
    }
}

pub(crate) fn render_metrics() -> String {
    let auth_failures = metrics_state()
        .auth_failures
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let rate_limit_hits = metrics_state()
        .rate_limit_hits
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let visibility_denials = metrics_state()
        .visibility_denials
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());
    let search_index_failures = metrics_state()
        .search_index_failures
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone());

    let mut output = String::new();
    write_counter(
        &mut output,
        "murmur_auth_failures_total",
        "Count of auth-related failures by reason",
        "reason",
        auth_failures,
    );

    output.push_str(
        "# HELP murmur_rate_limit_hits_total Count of rate-limit rejections by surface\n",
    );
    output.push_str("# TYPE murmur_rate_limit_hits_total counter\n");
    let mut rate_entries: Vec<_> = rate_limit_hits.into_iter().collect();
    rate_entries.sort_by_key(|((surface, reason), _)| (*surface, *reason));
    for ((surface, reason), value) in rate_entries {
        let _ = writeln!(
            output,
            "murmur_rate_limit_hits_total{{surface=\"{surface}\",reason=\"{reason}\"}} {value}"
        );
    }

    write_counter(
        &mut output,
        "murmur_visibility_denials_total",
        "Count of requests refused by profile or pair visibility by surface",
        "surface",
        visibility_denials,
    );
    write_counter(
        &mut output,
        "murmur_search_index_failures_total",
        "Count of search index write failures by stage",
        "stage",
        search_index_failures,
    );

    output
}

pub(crate) fn record_auth_failure(reason: &'static str) {
    if let Ok(mut counters) = metrics_state().auth_failures.lock() {
        *counters.entry(reason).or_insert(0) += 1;
    }
}

pub(crate) fn record_rate_limit_hit(surface: &'static str, reason: &'static str) {
    if let Ok(mut counters) = metrics_state().rate_limit_hits.lock() {
        *counters.entry((surface, reason)).or_insert(0) += 1;
    }
}

pub(crate) fn record_visibility_denial(surface: &'static str) {
    if let Ok(mut counters) = metrics_state().visibility_denials.lock() {
        *counters.entry(surface).or_insert(0) += 1;
    }
}

pub(crate) fn record_search_index_failure(stage: &'static str) {
    if let Ok(mut counters) = metrics_state().search_index_failures.lock() {
        *counters.entry(stage).or_insert(0) += 1;
    }
}

use crate::{BalancesProvider, ForkChoice};
use prometheus::{Histogram, HistogramOpts, HistogramTimer, IntGauge, Opts};
use std::sync::LazyLock;

type Result<T> = std::result::Result<T, prometheus::Error>;

fn try_create_int_gauge(name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))?;
    prometheus::register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn try_create_histogram(name: &str, help: &str) -> Result<Histogram> {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help))?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

pub static FORK_CHOICE_NODES: LazyLock<Result<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge("fork_choice_nodes", "Current count of block tree nodes")
});
pub static FORK_CHOICE_VOTES: LazyLock<Result<IntGauge>> = LazyLock::new(|| {
    try_create_int_gauge(
        "fork_choice_votes",
        "Current count of tracked validator votes",
    )
});
pub static FORK_CHOICE_HEAD_TIMES: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_fork_choice_head_seconds",
        "The duration in seconds of head computations",
    )
});
pub static FORK_CHOICE_ON_BLOCK_TIMES: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_fork_choice_process_block_seconds",
        "The duration in seconds of on_block runs",
    )
});
pub static FORK_CHOICE_ON_ATTESTATION_TIMES: LazyLock<Result<Histogram>> = LazyLock::new(|| {
    try_create_histogram(
        "beacon_fork_choice_process_attestation_seconds",
        "The duration in seconds of on_attestation runs",
    )
});

pub fn set_gauge(gauge: &LazyLock<Result<IntGauge>>, value: i64) {
    if let Ok(gauge) = gauge.as_ref() {
        gauge.set(value);
    }
}

pub fn start_timer(histogram: &LazyLock<Result<Histogram>>) -> Option<HistogramTimer> {
    histogram.as_ref().ok().map(Histogram::start_timer)
}

/// Update the default registry with info from the fork choice.
pub fn scrape_for_metrics<B: BalancesProvider>(fork_choice: &ForkChoice<B>) {
    set_gauge(&FORK_CHOICE_NODES, fork_choice.num_nodes() as i64);
    set_gauge(&FORK_CHOICE_VOTES, fork_choice.num_votes() as i64);
}

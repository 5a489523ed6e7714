use std::sync::LazyLock;

use prometheus::*;

static METRIC_INGEST_RECORD_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("vs_ingest_record_count", "count of the ingested image records", &[
        "outcome"
    ])
    .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "vs_query_duration",
        "duration of the text query pipeline in seconds",
        &["inline_images"]
    )
    .unwrap()
});

static METRIC_QUERY_RESULT_COUNT: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "vs_query_result_count",
        "count of results returned by a text query",
        (0..=50).step_by(5).map(|x| x as f64).collect()
    )
    .unwrap()
});

static METRIC_UPSTREAM_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "vs_upstream_duration",
        "duration of the per-call upstream request in seconds",
        &["service"]
    )
    .unwrap()
});

/// 记录一条图片最终到达的阶段：indexed / embedded / failed
pub fn inc_ingest_record(outcome: &str) {
    METRIC_INGEST_RECORD_COUNT.with_label_values(&[outcome]).inc();
}

pub fn observe_query(inline_images: bool, duration: f64, results: usize) {
    METRIC_QUERY_DURATION.with_label_values(&[&inline_images.to_string()]).observe(duration);
    METRIC_QUERY_RESULT_COUNT.observe(results as f64);
}

/// 记录一次外部服务调用耗时，`service` 取值为 vision / llm / search / storage
pub fn observe_upstream(service: &str, duration: f64) {
    METRIC_UPSTREAM_DURATION.with_label_values(&[service]).observe(duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_outcome_labels() {
        let before = METRIC_INGEST_RECORD_COUNT.with_label_values(&["embedded"]).get();
        inc_ingest_record("embedded");
        assert_eq!(METRIC_INGEST_RECORD_COUNT.with_label_values(&["embedded"]).get(), before + 1);
    }
}

//! Lightweight counters around the detection pipeline. With no recorder
//! installed these are no-ops, so the library stays usable without any
//! metrics backend wired up.

use metrics::counter;

pub fn cache_hit(cache: &'static str) {
    counter!("detection_cache_hits_total", "cache" => cache).increment(1);
}

pub fn cache_miss(cache: &'static str) {
    counter!("detection_cache_misses_total", "cache" => cache).increment(1);
}

pub fn llm_retry() {
    counter!("detection_llm_retries_total").increment(1);
}

pub fn detection_completed(category: &str) {
    counter!("detections_total", "category" => category.to_string()).increment(1);
}

pub fn detection_failed(category: &str) {
    counter!("detection_failures_total", "category" => category.to_string()).increment(1);
}

// Counters and timings are emitted as trace events under the `metrics` target,
// so any subscriber (or exporter layer) can pick them up.

#[macro_export]
macro_rules! counter_inc {
    ($name:expr $(, $key:expr => $val:expr )* $(,)?) => {{
        let labels: ::std::vec::Vec<::std::string::String> =
            vec![$(format!("{}={}", $key, $val)),*];
        ::tracing::trace!(target: "metrics", counter = $name, labels = ?labels, "counter incremented");
    }};
}

#[macro_export]
macro_rules! histogram_observe_ms {
    ($name:expr, $ms:expr $(, $key:expr => $val:expr )* $(,)?) => {{
        let value_ms: u64 = $ms;
        let labels: ::std::vec::Vec<::std::string::String> =
            vec![$(format!("{}={}", $key, $val)),*];
        ::tracing::trace!(
            target: "metrics",
            histogram = $name,
            value_ms,
            labels = ?labels,
            "histogram observed"
        );
    }};
}

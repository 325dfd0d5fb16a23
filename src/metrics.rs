// SPDX-License-Identifier: AGPL-3.0-or-later

//! Internal metrics
//!
//! A small registry of labeled counters and duration aggregates,
//! rendered in the Prometheus text exposition format by the metrics
//! server. Durations export `_sum` / `_count` pairs in milliseconds.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const NAMESPACE: &str = "registry_api";

#[derive(Debug, Default, Clone, Copy)]
struct DurationAgg {
    count: u64,
    sum_ms: f64,
}

impl DurationAgg {
    fn observe(&mut self, duration: Duration) {
        self.count += 1;
        self.sum_ms += duration.as_secs_f64() * 1000.0;
    }
}

/// Holds all the available internal metrics
#[derive(Debug, Default)]
pub struct Metrics {
    /// HTTP requests made to the API, by path and method
    api_requests: Mutex<BTreeMap<(String, String), u64>>,

    /// API request durations, by path and method
    api_request_durations: Mutex<BTreeMap<(String, String), DurationAgg>>,

    /// HTTP request handlers which panicked while processing a request
    handler_panics: AtomicU64,

    /// HTTP responses without a 2xx status code, by path, method and
    /// status code
    error_responses: Mutex<BTreeMap<(String, String, u16), u64>>,

    /// Jobs submitted to the runner, by job type
    jobs_submitted: Mutex<BTreeMap<&'static str, u64>>,

    /// Job run durations, by job type and success
    job_durations: Mutex<BTreeMap<(&'static str, bool), DurationAgg>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed API request
    pub fn record_api_request(&self, path: &str, method: &str, status: u16, duration: Duration) {
        let key = (path.to_string(), method.to_string());

        *self
            .api_requests
            .lock()
            .expect("api request metric lock poisoned")
            .entry(key.clone())
            .or_default() += 1;

        self.api_request_durations
            .lock()
            .expect("api duration metric lock poisoned")
            .entry(key)
            .or_default()
            .observe(duration);

        if !(200..300).contains(&status) {
            *self
                .error_responses
                .lock()
                .expect("error response metric lock poisoned")
                .entry((path.to_string(), method.to_string(), status))
                .or_default() += 1;
        }
    }

    /// Record a request handler panic
    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job submission
    pub fn record_job_submitted(&self, job_type: &'static str) {
        *self
            .jobs_submitted
            .lock()
            .expect("job submission metric lock poisoned")
            .entry(job_type)
            .or_default() += 1;
    }

    /// Record a finished job run
    pub fn record_job_run(&self, job_type: &'static str, successful: bool, duration: Duration) {
        self.job_durations
            .lock()
            .expect("job duration metric lock poisoned")
            .entry((job_type, successful))
            .or_default()
            .observe(duration);
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "# HELP {NAMESPACE}_api_requests_total Total number of HTTP requests made to the API"
        );
        let _ = writeln!(out, "# TYPE {NAMESPACE}_api_requests_total counter");
        for ((path, method), count) in self
            .api_requests
            .lock()
            .expect("api request metric lock poisoned")
            .iter()
        {
            let _ = writeln!(
                out,
                "{NAMESPACE}_api_requests_total{{path=\"{}\",method=\"{}\"}} {count}",
                escape(path),
                escape(method)
            );
        }

        let _ = writeln!(
            out,
            "# HELP {NAMESPACE}_api_request_duration_milliseconds Duration of API requests"
        );
        let _ = writeln!(
            out,
            "# TYPE {NAMESPACE}_api_request_duration_milliseconds summary"
        );
        for ((path, method), agg) in self
            .api_request_durations
            .lock()
            .expect("api duration metric lock poisoned")
            .iter()
        {
            let labels = format!("path=\"{}\",method=\"{}\"", escape(path), escape(method));
            let _ = writeln!(
                out,
                "{NAMESPACE}_api_request_duration_milliseconds_sum{{{labels}}} {}",
                agg.sum_ms
            );
            let _ = writeln!(
                out,
                "{NAMESPACE}_api_request_duration_milliseconds_count{{{labels}}} {}",
                agg.count
            );
        }

        let _ = writeln!(
            out,
            "# HELP {NAMESPACE}_api_handlers_panics_total Total number of HTTP handlers which \
             panicked while processing a request"
        );
        let _ = writeln!(out, "# TYPE {NAMESPACE}_api_handlers_panics_total counter");
        let _ = writeln!(
            out,
            "{NAMESPACE}_api_handlers_panics_total {}",
            self.handler_panics.load(Ordering::Relaxed)
        );

        let _ = writeln!(
            out,
            "# HELP {NAMESPACE}_api_error_responses_total Total number of HTTP responses with a \
             non 2xx status code"
        );
        let _ = writeln!(out, "# TYPE {NAMESPACE}_api_error_responses_total counter");
        for ((path, method, status), count) in self
            .error_responses
            .lock()
            .expect("error response metric lock poisoned")
            .iter()
        {
            let _ = writeln!(
                out,
                "{NAMESPACE}_api_error_responses_total{{path=\"{}\",method=\"{}\",\
                 status_code=\"{status}\"}} {count}",
                escape(path),
                escape(method)
            );
        }

        let _ = writeln!(
            out,
            "# HELP {NAMESPACE}_jobs_submitted_total Total number of jobs submitted"
        );
        let _ = writeln!(out, "# TYPE {NAMESPACE}_jobs_submitted_total counter");
        for (job_type, count) in self
            .jobs_submitted
            .lock()
            .expect("job submission metric lock poisoned")
            .iter()
        {
            let _ = writeln!(
                out,
                "{NAMESPACE}_jobs_submitted_total{{job_type=\"{job_type}\"}} {count}"
            );
        }

        let _ = writeln!(
            out,
            "# HELP {NAMESPACE}_jobs_run_duration_milliseconds Duration of job runs"
        );
        let _ = writeln!(
            out,
            "# TYPE {NAMESPACE}_jobs_run_duration_milliseconds summary"
        );
        for ((job_type, successful), agg) in self
            .job_durations
            .lock()
            .expect("job duration metric lock poisoned")
            .iter()
        {
            let labels = format!(
                "job_type=\"{job_type}\",successful=\"{}\"",
                if *successful { 1 } else { 0 }
            );
            let _ = writeln!(
                out,
                "{NAMESPACE}_jobs_run_duration_milliseconds_sum{{{labels}}} {}",
                agg.sum_ms
            );
            let _ = writeln!(
                out,
                "{NAMESPACE}_jobs_run_duration_milliseconds_count{{{labels}}} {}",
                agg.count
            );
        }

        out
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_samples() {
        let metrics = Metrics::new();
        metrics.record_api_request("/apps", "GET", 200, Duration::from_millis(5));
        metrics.record_api_request("/apps", "GET", 500, Duration::from_millis(7));
        metrics.record_handler_panic();
        metrics.record_job_submitted("update_apps");
        metrics.record_job_run("update_apps", true, Duration::from_millis(120));

        let rendered = metrics.render();
        assert!(rendered
            .contains("registry_api_api_requests_total{path=\"/apps\",method=\"GET\"} 2"));
        assert!(rendered.contains(
            "registry_api_api_error_responses_total{path=\"/apps\",method=\"GET\",\
             status_code=\"500\"} 1"
        ));
        assert!(rendered.contains("registry_api_api_handlers_panics_total 1"));
        assert!(rendered.contains("registry_api_jobs_submitted_total{job_type=\"update_apps\"} 1"));
        assert!(rendered.contains(
            "registry_api_jobs_run_duration_milliseconds_count\
             {job_type=\"update_apps\",successful=\"1\"} 1"
        ));
    }

    #[test]
    fn successful_responses_do_not_count_as_errors() {
        let metrics = Metrics::new();
        metrics.record_api_request("/health", "GET", 200, Duration::from_millis(1));

        let rendered = metrics.render();
        assert!(!rendered.contains("error_responses_total{path=\"/health\""));
    }
}

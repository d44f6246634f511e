//! HTTP server metrics.

use metriken::{Counter, metric};

#[metric(name = "http_requests", description = "Requests parsed and routed")]
pub static HTTP_REQUESTS: Counter = Counter::new();

#[metric(name = "http_responses_ok", description = "2xx responses emitted")]
pub static RESPONSES_OK: Counter = Counter::new();

#[metric(
    name = "http_responses_client_error",
    description = "4xx responses emitted"
)]
pub static RESPONSES_CLIENT_ERROR: Counter = Counter::new();

#[metric(
    name = "http_responses_server_error",
    description = "5xx responses emitted"
)]
pub static RESPONSES_SERVER_ERROR: Counter = Counter::new();

#[metric(
    name = "framing_errors",
    description = "Requests rejected as malformed, chunked, or unclassifiable"
)]
pub static FRAMING_ERRORS: Counter = Counter::new();

#[metric(name = "static_files_served", description = "Static files served")]
pub static STATIC_FILES_SERVED: Counter = Counter::new();

#[metric(
    name = "static_files_missing",
    description = "Static file requests that produced a 404"
)]
pub static STATIC_FILES_MISSING: Counter = Counter::new();

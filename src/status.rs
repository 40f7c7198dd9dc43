//! HTTP status table: reason phrases, recognized codes, body-less codes.
//!
//! ```rust
//! use ferrule::status;
//!
//! assert_eq!(status::reason(404), Some("Not Found"));
//! assert!(status::is_known(418));
//! assert!(!status::is_known(999));
//! assert!(status::is_empty(204));
//! ```

/// IANA-registered codes and their canonical reason phrases, sorted by code.
const STATUSES: &[(u16, &str)] = &[
    // ── 1xx Informational ─────────────────────────────────────────────────────
    (100, "Continue"),
    (101, "Switching Protocols"),
    (102, "Processing"),
    (103, "Early Hints"),
    // ── 2xx Success ───────────────────────────────────────────────────────────
    (200, "OK"),
    (201, "Created"),
    (202, "Accepted"),
    (203, "Non-Authoritative Information"),
    (204, "No Content"),
    (205, "Reset Content"),
    (206, "Partial Content"),
    (207, "Multi-Status"),
    (208, "Already Reported"),
    (226, "IM Used"),
    // ── 3xx Redirection ───────────────────────────────────────────────────────
    (300, "Multiple Choices"),
    (301, "Moved Permanently"),
    (302, "Found"),
    (303, "See Other"),
    (304, "Not Modified"),
    (307, "Temporary Redirect"),
    (308, "Permanent Redirect"),
    // ── 4xx Client errors ─────────────────────────────────────────────────────
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (402, "Payment Required"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (406, "Not Acceptable"),
    (407, "Proxy Authentication Required"),
    (408, "Request Timeout"),
    (409, "Conflict"),
    (410, "Gone"),
    (411, "Length Required"),
    (412, "Precondition Failed"),
    (413, "Content Too Large"),
    (414, "URI Too Long"),
    (415, "Unsupported Media Type"),
    (416, "Range Not Satisfiable"),
    (417, "Expectation Failed"),
    (418, "I'm a Teapot"),
    (421, "Misdirected Request"),
    (422, "Unprocessable Content"),
    (423, "Locked"),
    (424, "Failed Dependency"),
    (425, "Too Early"),
    (426, "Upgrade Required"),
    (428, "Precondition Required"),
    (429, "Too Many Requests"),
    (431, "Request Header Fields Too Large"),
    (451, "Unavailable For Legal Reasons"),
    // ── 5xx Server errors ─────────────────────────────────────────────────────
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
    (504, "Gateway Timeout"),
    (505, "HTTP Version Not Supported"),
    (506, "Variant Also Negotiates"),
    (507, "Insufficient Storage"),
    (508, "Loop Detected"),
    (510, "Not Extended"),
    (511, "Network Authentication Required"),
];

/// Canonical reason phrase for `code`, or `None` for an unrecognized code.
pub fn reason(code: u16) -> Option<&'static str> {
    STATUSES
        .binary_search_by_key(&code, |&(c, _)| c)
        .ok()
        .map(|i| STATUSES[i].1)
}

/// Whether `code` is a recognized HTTP status.
pub fn is_known(code: u16) -> bool {
    reason(code).is_some()
}

/// Statuses that must never carry a body.
pub fn is_empty(code: u16) -> bool {
    matches!(code, 204 | 205 | 304)
}

use std::time::{SystemTime, UNIX_EPOCH};

use actix_cors::Cors;
use actix_web::http::header;

pub fn create_cors() -> Cors {
    Cors::default()
        .allowed_origin_fn(|origin, _req_head| {
            let origin = origin.as_bytes();
            origin.ends_with(b"billionup.ai") // Production origin
                || origin.ends_with(b"billionup.crypto")
                || origin == b"http://localhost:3000" // Local development origin
        })
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT])
        .allowed_header(header::CONTENT_TYPE)
        .supports_credentials()
        .max_age(3600)
}

/// Current unix time in seconds.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

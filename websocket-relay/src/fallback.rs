/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Fallback responder: every request that is not a WebSocket upgrade on a
//! relay route is redirected to the informational page.

use actix_web::http::header::LOCATION;
use actix_web::{web, HttpResponse};

/// Where non-relay requests are sent.
#[derive(Debug, Clone)]
pub struct RedirectTarget {
    url: String,
}

impl RedirectTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub async fn redirect(target: web::Data<RedirectTarget>) -> HttpResponse {
    let url = target.url();
    HttpResponse::Found()
        .append_header((LOCATION, url))
        .content_type("text/html; charset=utf-8")
        .body(format!(
            "Redirecting you to <a href=\"{url}\">{url}</a>..."
        ))
}

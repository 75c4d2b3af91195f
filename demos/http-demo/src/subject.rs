//! Resolves a [`interceptor_kit::subject::Subject`] from an axum request's
//! headers and connection info, the way the teacher's own example apps pull
//! caller identity out of `actix_web`/`axum` request parts before handing
//! off to library code.

use axum::http::HeaderMap;
use interceptor_kit::subject::{DefaultSubjectResolver, Subject, SubjectHints, SubjectResolver};

pub struct AxumSubjectResolver {
    inner: DefaultSubjectResolver,
}

impl AxumSubjectResolver {
    pub fn new(pepper: Option<String>) -> Self {
        Self { inner: DefaultSubjectResolver::new(pepper) }
    }

    pub fn resolve(&self, headers: &HeaderMap, peer_addr: Option<String>) -> Subject {
        let hints = SubjectHints {
            raw_api_key: header_str(headers, "x-api-key"),
            authenticated_user_id: header_str(headers, "x-user-id"),
            forwarded_for: header_str(headers, "x-forwarded-for"),
            real_ip: header_str(headers, "x-real-ip"),
            peer_addr,
        };
        self.inner.resolve(&hints)
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
}

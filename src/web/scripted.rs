use super::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError, TransportErrorKind};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// In-memory transport that replays queued responses per URL and records every request.
///
/// The last queued response for a URL is replayed indefinitely once the queue drains to it.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<Result<HttpResponse, TransportError>>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, url: &str, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    pub fn push_error(&self, url: &str, kind: TransportErrorKind) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .push_back(Err(TransportError::new(kind, "scripted failure")));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());

        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = responses.get_mut(&request.url) else {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                format!("no scripted response for '{}'", request.url),
            ));
        };

        if queue.len() > 1 {
            queue
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new(TransportErrorKind::Other, "empty script")))
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError::new(TransportErrorKind::Other, "empty script")))
        }
    }
}

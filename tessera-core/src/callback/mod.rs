//! Post-commit callback delivery
//!
//! After any state-changing activation operation the server notifies an
//! external listener with `(application_id, activation_id)`. Delivery is
//! fire-and-forget: enqueueing never blocks the request path, a full queue
//! drops the oldest entry (counted in metrics), and delivery failures are
//! logged and never propagated to the caller.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::CallbackConfig;
use crate::error::{ServiceError, ServiceResult};

/// Notification payload
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CallbackEvent {
    #[serde(rename = "applicationId")]
    pub application_id: i64,
    #[serde(rename = "activationId")]
    pub activation_id: String,
}

struct Inner {
    queue: Mutex<VecDeque<CallbackEvent>>,
    notify: Notify,
    capacity: usize,
}

impl Inner {
    /// Push an event, dropping the oldest entry when full
    fn push(&self, event: CallbackEvent) {
        {
            let mut queue = self.queue.lock().expect("callback queue poisoned");
            if queue.len() >= self.capacity {
                queue.pop_front();
                metrics::counter!("tessera_callback_dropped_total").increment(1);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<CallbackEvent> {
        self.queue.lock().expect("callback queue poisoned").pop_front()
    }
}

/// Handle used by the services to emit notifications
#[derive(Clone)]
pub struct CallbackDispatcher {
    inner: Option<Arc<Inner>>,
}

impl CallbackDispatcher {
    /// No-op dispatcher for deployments without a callback URL
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Build the dispatcher and spawn its delivery worker. Must be called
    /// from within a tokio runtime. Returns the disabled dispatcher when no
    /// URL is configured.
    pub fn start(config: &CallbackConfig) -> ServiceResult<Self> {
        let Some(url) = config.url.clone() else {
            return Ok(Self::disabled());
        };

        let mut builder = reqwest::Client::builder().connect_timeout(config.connection_timeout);
        if let Some(proxy) = &config.http_proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| ServiceError::InvalidRequest(format!("invalid proxy: {}", e)))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| ServiceError::Storage(format!("failed to build HTTP client: {}", e)))?;

        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: config.queue_capacity.max(1),
        });

        tokio::spawn(deliver_loop(Arc::clone(&inner), client, url));

        Ok(Self { inner: Some(inner) })
    }

    /// Enqueue a notification; never blocks
    pub fn notify(&self, application_id: i64, activation_id: &str) {
        if let Some(inner) = &self.inner {
            inner.push(CallbackEvent {
                application_id,
                activation_id: activation_id.to_string(),
            });
        }
    }
}

async fn deliver_loop(inner: Arc<Inner>, client: reqwest::Client, url: String) {
    loop {
        let Some(event) = inner.pop() else {
            inner.notify.notified().await;
            continue;
        };

        match client.post(&url).json(&event).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(activation_id = %event.activation_id, "callback delivered");
            }
            Ok(response) => {
                metrics::counter!("tessera_callback_failed_total").increment(1);
                warn!(
                    activation_id = %event.activation_id,
                    status = %response.status(),
                    "callback rejected by listener"
                );
            }
            Err(e) => {
                metrics::counter!("tessera_callback_failed_total").increment(1);
                warn!(activation_id = %event.activation_id, "callback delivery failed: {}", e);
            }
        }

        // pacing: a broken listener must not spin the worker
        if inner.queue.lock().expect("callback queue poisoned").is_empty() {
            continue;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

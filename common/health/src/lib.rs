use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tokio::runtime;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Liveness of the router's background loops.
///
/// Each component (the librdkafka producer, or the print sink) registers
/// with a deadline and must keep reporting healthy before it expires. The
/// process is live only when every registered component is. A registry with
/// no component is not live.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    /// Per-component status, rendered in the response body
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        if self.healthy {
            (StatusCode::OK, body).into_response()
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, never reported
    Starting,
    /// Must report again before this instant
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Deadline of a `HealthyUntil` passed without a new report
    Stalled,
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    pub async fn report_healthy(&self) {
        self.report_status(self.healthy_until()).await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.send(message).await {
            warn!("failed to report {} health: {}", self.component, err)
        }
    }

    /// For callers outside the runtime, such as librdkafka callback threads.
    pub fn report_healthy_blocking(&self) {
        self.report_status_blocking(self.healthy_until())
    }

    pub fn report_status_blocking(&self, status: ComponentStatus) {
        // blocking_send panics inside a runtime, hand the report over to it instead
        if let Ok(handle) = runtime::Handle::try_current() {
            let reporter = self.clone();
            handle.spawn(async move { reporter.report_status(status).await });
            return;
        }

        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(err) = self.sender.blocking_send(message) {
            warn!("failed to report {} health: {}", self.component, err)
        }
    }

    fn healthy_until(&self) -> ComponentStatus {
        ComponentStatus::HealthyUntil(OffsetDateTime::now_utc().add(self.deadline))
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    /// Must be called from within a tokio runtime, reports are applied by a
    /// spawned task.
    pub fn new(name: &str) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(16);
        let registry = Self {
            name: name.to_owned(),
            components: Default::default(),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match components.write() {
                    Ok(mut map) => {
                        map.insert(message.component, message.status);
                    }
                    // liveness checks fail from now on and the process gets restarted
                    Err(_) => warn!("poisoned health registry lock"),
                }
            }
        });

        registry
    }

    /// Registers `component` as `Starting`. It must then report healthy at
    /// least every `deadline`.
    pub async fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// Usable as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("{} health check failed: poisoned lock", self.name);
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };
        for (name, component) in components.iter() {
            let current = match component {
                ComponentStatus::HealthyUntil(until) if *until > now => component.clone(),
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(current, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), current);
        }

        if status.healthy {
            info!("{} health check ok", self.name);
        } else {
            warn!("{} health check failed: {:?}", self.name, status.components);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Sub;

    use super::*;

    async fn assert_or_retry<F>(check: F)
    where
        F: Fn() -> bool,
    {
        let deadline = OffsetDateTime::now_utc().add(Duration::from_secs(5));
        while !check() && OffsetDateTime::now_utc() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(check())
    }

    #[tokio::test]
    async fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn producer_goes_healthy_once_it_reports() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("rdkafka", Duration::from_secs(30)).await;

        assert_or_retry(|| registry.get_status().components.len() == 1).await;
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("rdkafka"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy().await;
        assert_or_retry(|| registry.get_status().healthy).await;

        handle.report_status(ComponentStatus::Unhealthy).await;
        assert_or_retry(|| !registry.get_status().healthy).await;
    }

    #[tokio::test]
    async fn missed_deadline_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("rdkafka", Duration::from_secs(30)).await;

        handle
            .report_status(ComponentStatus::HealthyUntil(
                OffsetDateTime::now_utc().sub(Duration::from_secs(1)),
            ))
            .await;
        assert_or_retry(|| !registry.get_status().components.is_empty()).await;
        assert_or_retry(|| {
            registry.get_status().components.get("rdkafka") == Some(&ComponentStatus::Stalled)
        })
        .await;
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn every_component_must_be_healthy() {
        let registry = HealthRegistry::new("liveness");
        let kafka = registry.register("rdkafka", Duration::from_secs(30)).await;
        let print = registry.register("print_sink", Duration::from_secs(30)).await;

        kafka.report_healthy().await;
        print.report_status(ComponentStatus::Unhealthy).await;
        assert_or_retry(|| {
            registry.get_status().components.get("print_sink") == Some(&ComponentStatus::Unhealthy)
        })
        .await;
        assert!(!registry.get_status().healthy);

        print.report_healthy().await;
        assert_or_retry(|| registry.get_status().healthy).await;
    }

    #[tokio::test]
    async fn blocking_report_from_inside_the_runtime() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("rdkafka", Duration::from_secs(30)).await;

        handle.report_healthy_blocking();
        assert_or_retry(|| registry.get_status().healthy).await;
    }

    #[tokio::test]
    async fn into_response() {
        let nok = HealthStatus::default().into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: Default::default(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}

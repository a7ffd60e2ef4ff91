//! Service Framework
//!
//! Long-running background tasks implement [`Service`]. A
//! [`ServiceManager`] starts every registered service with a shared
//! shutdown broadcast and waits for them to stop.
//!
//! ```text
//!   ServiceManager ──register──▶ [Service, ...]
//!        │ start_all: tokio::spawn(service.start(shutdown_rx))
//!        │ shutdown:  shutdown_tx.send(()) then join with timeout
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ============================================================================
// Service Trait
// ============================================================================

/// Trait for implementing background services
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run the service until `shutdown` fires
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError>;

    /// Service name for logging and identification
    fn name(&self) -> &'static str;

    /// Current status of the service
    fn status(&self) -> ServiceStatus;
}

// ============================================================================
// Service Status
// ============================================================================

/// Status of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Service is initializing
    Starting,

    /// Service is running normally
    Running,

    /// Service is shutting down
    Stopping,

    /// Service has stopped
    Stopped,

    /// Service failed with an error
    Failed(String),
}

impl ServiceStatus {
    /// Check if the service is in a healthy state
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }

    /// Check if the service has stopped (normally or due to failure)
    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed(_))
    }
}

// ============================================================================
// Service Error
// ============================================================================

/// Errors that can occur in services
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Service failed during initialization phase
    #[error("Service initialization failed: {0}")]
    InitializationFailed(String),

    /// Service encountered an error during execution
    #[error("Service runtime error: {0}")]
    RuntimeError(String),

    /// Attempted to start a service that is already running
    #[error("Service already running")]
    AlreadyRunning,
}

// ============================================================================
// Service Manager
// ============================================================================

/// Spawned task of a registered service
struct ServiceHandle {
    service: Arc<dyn Service>,
    task: Option<JoinHandle<Result<(), ServiceError>>>,
}

/// Starts registered services and stops them on shutdown
pub struct ServiceManager {
    /// Time allowed for each service to stop after the shutdown signal
    shutdown_timeout: Duration,

    /// Registered services in registration order
    services: RwLock<Vec<ServiceHandle>>,

    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl ServiceManager {
    /// Create a manager that waits up to `shutdown_timeout` per service
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_timeout,
            services: RwLock::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Register a service; names must be unique
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let mut services = self.services.write();
        if services.iter().any(|h| h.service.name() == service.name()) {
            return Err(ServiceError::AlreadyRunning);
        }
        tracing::debug!(service = service.name(), "Service registered");
        services.push(ServiceHandle {
            service,
            task: None,
        });
        Ok(())
    }

    /// Spawn every registered service that is not already running
    pub fn start_all(&self) {
        let mut services = self.services.write();
        for handle in services.iter_mut().filter(|h| h.task.is_none()) {
            let service = Arc::clone(&handle.service);
            let shutdown_rx = self.shutdown_tx.subscribe();
            handle.task = Some(tokio::spawn(async move { service.start(shutdown_rx).await }));
            tracing::debug!(service = handle.service.name(), "Service started");
        }
    }

    /// Broadcast shutdown and wait for every service to stop
    ///
    /// Services that do not stop within the shutdown timeout are aborted.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<(&'static str, JoinHandle<Result<(), ServiceError>>)> = {
            let mut services = self.services.write();
            services
                .iter_mut()
                .filter_map(|h| h.task.take().map(|task| (h.service.name(), task)))
                .collect()
        };

        let deadline = Instant::now() + self.shutdown_timeout;
        for (name, mut task) in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut task).await {
                Ok(Ok(Ok(()))) => tracing::debug!(service = name, "Service stopped gracefully"),
                Ok(Ok(Err(e))) => {
                    tracing::warn!(service = name, error = %e, "Service stopped with error")
                }
                Ok(Err(e)) => tracing::error!(service = name, error = %e, "Service task panicked"),
                Err(_) => {
                    tracing::warn!(service = name, "Service shutdown timed out, aborting");
                    task.abort();
                }
            }
        }

        tracing::info!("Shutdown complete");
    }

    /// Status of every registered service
    pub fn status(&self) -> HashMap<&'static str, ServiceStatus> {
        self.services
            .read()
            .iter()
            .map(|h| (h.service.name(), h.service.status()))
            .collect()
    }

    /// Check if all services are healthy
    pub fn is_healthy(&self) -> bool {
        self.services.read().iter().all(|h| h.service.status().is_healthy())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestService {
        name: &'static str,
        status: RwLock<ServiceStatus>,
        stopped: AtomicBool,
    }

    impl TestService {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                status: RwLock::new(ServiceStatus::Stopped),
                stopped: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Service for TestService {
        async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
            *self.status.write() = ServiceStatus::Running;
            let _ = shutdown.recv().await;
            *self.status.write() = ServiceStatus::Stopped;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn status(&self) -> ServiceStatus {
            self.status.read().clone()
        }
    }

    #[tokio::test]
    async fn test_service_manager_lifecycle() {
        let manager = ServiceManager::new(Duration::from_secs(5));
        let service = Arc::new(TestService::new("test"));
        manager.register(service.clone()).unwrap();

        manager.start_all();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.is_healthy());

        manager.shutdown().await;
        assert!(service.stopped.load(Ordering::SeqCst));
        assert_eq!(manager.status()["test"], ServiceStatus::Stopped);
    }

    #[test]
    fn test_service_status() {
        assert!(ServiceStatus::Running.is_healthy());
        assert!(!ServiceStatus::Starting.is_healthy());
        assert!(ServiceStatus::Failed("error".to_string()).is_stopped());
        assert!(!ServiceStatus::Running.is_stopped());
    }

    #[test]
    fn test_duplicate_registration() {
        let manager = ServiceManager::new(Duration::from_secs(1));
        manager.register(Arc::new(TestService::new("a"))).unwrap();
        let result = manager.register(Arc::new(TestService::new("a")));
        assert!(matches!(result, Err(ServiceError::AlreadyRunning)));
    }
}

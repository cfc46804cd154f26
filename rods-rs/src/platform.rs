//! Provides a tiny DI like container which keeps the central components of the system.
//!
//! The platform is more or less a map which keeps all central components as **Arc<T>** around.
//! It also keeps the central **is_running** flag which is toggled to *false* once
//! [Platform::terminate](Platform::terminate) or [Platform::abort](Platform::abort) is invoked.
//! Servers and the input monitor check this flag to stop their loops, the main program waits
//! for [Platform::terminated](Platform::terminated) to close the registry and exit.
//!
//! Note that once the system shutdown is initiated, the internal map is cleared (so that all
//! Dropped handlers run). Code which might run after [Platform::terminate](Platform::terminate)
//! should therefore use [Platform::find](Platform::find) and handle the **None** case.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use rods::platform::Platform;
//! struct Service {
//!     value : i32
//! }
//!
//! struct UnknownService;
//!
//! let platform = Platform::new();
//!
//! // Registers a new service...
//! platform.register::<Service>(Arc::new(Service { value: 42 }));
//!
//! // Obtains a reference to a previously registered service...
//! assert_eq!(platform.require::<Service>().value, 42);
//! assert!(platform.find::<UnknownService>().is_none());
//!
//! // By default the platform is running...
//! assert!(platform.is_running());
//!
//! // Once aborted, all services are released and the reason is kept...
//! platform.abort("users.csv has been modified");
//! assert!(platform.find::<Service>().is_none());
//! assert!(!platform.is_running());
//! assert_eq!(platform.abort_reason().as_deref(), Some("users.csv has been modified"));
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Provides a container to keep all central services in a single place.
pub struct Platform {
    services: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    is_running: AtomicBool,
    abort_reason: Mutex<Option<String>>,
    shutdown: Notify,
}

impl Platform {
    /// Creates a new platform instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
            abort_reason: Mutex::new(None),
            shutdown: Notify::new(),
        })
    }

    /// Registers a new component.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .services
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered service.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let services = self.services.lock().unwrap();
        services
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.clone().downcast::<T>().ok())
    }

    /// Resolves a previously registered service.
    ///
    /// # Panics
    /// Panics if the requested service isn't available, which is also the case once the
    /// platform has been terminated.
    ///
    /// ```should_panic
    /// # use rods::platform::Platform;
    /// struct UnknownService;
    ///
    /// let platform = Platform::new();
    /// platform.require::<UnknownService>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        match self.find::<T>() {
            Some(service) => service,
            None if self.is_running() => panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            ),
            None => panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This releases all services and toggles the [is_running()](Platform::is_running) flag to
    /// **false**. All tasks waiting in [terminated](Platform::terminated) are woken up.
    pub fn terminate(&self) {
        self.services.lock().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    /// Terminates the platform because of a fatal condition.
    ///
    /// The reason is kept so that the program can report it and exit with an error.
    pub fn abort(&self, reason: impl Into<String>) {
        let _ = self
            .abort_reason
            .lock()
            .unwrap()
            .get_or_insert_with(|| reason.into());
        self.terminate();
    }

    /// Returns the reason passed to [abort](Platform::abort), if any.
    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().unwrap().clone()
    }

    /// Waits until the platform has been terminated.
    pub async fn terminated(&self) {
        while self.is_running() {
            let notified = self.shutdown.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::platform::Platform;
    use crate::testing::test_async;
    use std::time::Duration;

    #[test]
    fn waiting_tasks_are_woken_up_on_termination() {
        test_async(async {
            let platform = Platform::new();
            let waiter = {
                let platform = platform.clone();
                tokio::spawn(async move { platform.terminated().await })
            };

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(!waiter.is_finished());

            platform.terminate();
            waiter.await.unwrap();
            assert!(platform.abort_reason().is_none());

            // Waiting after the fact returns immediately...
            platform.terminated().await;
        });
    }

    #[test]
    fn the_first_abort_reason_wins() {
        let platform = Platform::new();
        platform.abort("first");
        platform.abort("second");

        assert_eq!(platform.abort_reason().as_deref(), Some("first"));
    }
}

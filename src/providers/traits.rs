use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Base trait for providers that build components asynchronously.
///
/// # Example
///
/// ```no_run
/// use coolctld::providers::traits::AsyncProvider;
///
/// struct GreetingProvider;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<String> for GreetingProvider {
///     async fn provide(&self) -> anyhow::Result<String> {
///         Ok("hello".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// Trait for services that can be started through TaskManager.
///
/// # Example
///
/// ```no_run
/// use coolctld::providers::traits::ServiceProvider;
/// use coolctld::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct ExampleService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for ExampleService {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task(self.name(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         })
///     }
///
///     fn name(&self) -> &'static str { "ExampleService" }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service in TaskManager.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Returns service name for logging and management.
    fn name(&self) -> &'static str;

    /// Returns startup priority (higher numbers start first).
    fn priority(&self) -> i32 {
        0
    }

    /// Indicates if service is critical for system operation.
    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    struct Fixed(u8);

    #[async_trait]
    impl AsyncProvider<u8> for Fixed {
        async fn provide(&self) -> Result<u8> {
            Ok(self.0)
        }
    }

    struct Failing;

    #[async_trait]
    impl AsyncProvider<u8> for Failing {
        async fn provide(&self) -> Result<u8> {
            Err(anyhow!("hardware missing"))
        }
    }

    struct Minimal;

    #[async_trait]
    impl ServiceProvider for Minimal {
        async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
            task_manager.spawn_task(self.name(), |token| async move {
                token.cancelled().await;
                Ok(())
            })
        }

        fn name(&self) -> &'static str {
            "Minimal"
        }
    }

    #[tokio::test]
    async fn providers_return_values_or_errors() {
        assert_eq!(Fixed(7).provide().await.unwrap(), 7);
        assert_eq!(
            Failing.provide().await.unwrap_err().to_string(),
            "hardware missing"
        );
    }

    #[tokio::test]
    async fn service_defaults_and_start() {
        let service = Minimal;
        assert_eq!(service.priority(), 0);
        assert!(!service.is_critical());

        let mut manager = TaskManager::new();
        service.start(&mut manager).await.unwrap();
        assert!(manager.is_running("Minimal"));
        manager.shutdown_all().await.unwrap();
    }
}

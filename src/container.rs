//! # Container Provisioning
//!
//! The harness talks to the container runtime through two small traits so the
//! lifecycle can be exercised without Docker. [`TestcontainersProvisioner`]
//! is the real implementation on top of `testcontainers`.

use async_trait::async_trait;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ContainerRequest, GenericImage, ImageExt};
use tracing::{debug, info};

use crate::config::{HarnessConfig, PortSpec, Protocol};
use crate::error::{HarnessError, HarnessResult};
use crate::readiness::{LogStream, ReadinessPredicate};

/// A provisioned container. Created stopped; `start` blocks until the
/// container-side wait strategies hold.
#[async_trait]
pub trait RunningInstance: Send + Sync {
    async fn start(&mut self) -> HarnessResult<()>;

    async fn host(&self) -> HarnessResult<String>;

    async fn mapped_port(&self, port: PortSpec) -> HarnessResult<u16>;

    /// Stop and remove the container. Calling it on an instance that never
    /// started is a no-op.
    async fn terminate(&mut self) -> HarnessResult<()>;

    fn id(&self) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait ContainerProvisioner: Send + Sync {
    async fn provision(&self, config: &HarnessConfig) -> HarnessResult<Box<dyn RunningInstance>>;
}

fn container_port(spec: PortSpec) -> ContainerPort {
    match spec.protocol {
        Protocol::Tcp => ContainerPort::Tcp(spec.port),
        Protocol::Udp => ContainerPort::Udp(spec.port),
    }
}

fn wait_strategy(predicate: &ReadinessPredicate) -> Option<WaitFor> {
    match predicate {
        ReadinessPredicate::LogMessage {
            stream: LogStream::Stderr,
            message,
        } => Some(WaitFor::message_on_stderr(message.as_str())),
        ReadinessPredicate::LogMessage {
            stream: LogStream::Stdout,
            message,
        } => Some(WaitFor::message_on_stdout(message.as_str())),
        // Polled from the host once the port is mapped.
        ReadinessPredicate::ListeningPort { .. } => None,
    }
}

/// Provisions containers through the local Docker daemon.
#[derive(Debug, Clone, Default)]
pub struct TestcontainersProvisioner;

impl TestcontainersProvisioner {
    pub fn new() -> Self {
        Self
    }

    fn request(config: &HarnessConfig) -> ContainerRequest<GenericImage> {
        let image = config.readiness.iter().filter_map(wait_strategy).fold(
            GenericImage::new(config.image.name.as_str(), config.image.tag.as_str())
                .with_exposed_port(container_port(config.exposed_port)),
            |image, wait_for| image.with_wait_for(wait_for),
        );

        let base_request: ContainerRequest<GenericImage> =
            image.with_startup_timeout(config.startup_timeout());

        config.env.iter().fold(
            base_request,
            |req: ContainerRequest<GenericImage>, (key, value)| req.with_env_var(key, value),
        )
    }
}

#[async_trait]
impl ContainerProvisioner for TestcontainersProvisioner {
    async fn provision(&self, config: &HarnessConfig) -> HarnessResult<Box<dyn RunningInstance>> {
        if config.image.name.is_empty() {
            return Err(HarnessError::Create {
                image: config.image.to_string(),
                message: "image name is empty".to_string(),
            });
        }

        debug!(
            image = %config.image,
            exposed_port = %config.exposed_port,
            env_vars = config.env.len(),
            "container request prepared"
        );

        Ok(Box::new(TestcontainersInstance {
            image: config.image.to_string(),
            request: Some(Self::request(config)),
            container: None,
        }))
    }
}

pub struct TestcontainersInstance {
    image: String,
    request: Option<ContainerRequest<GenericImage>>,
    container: Option<ContainerAsync<GenericImage>>,
}

impl TestcontainersInstance {
    fn container(&self) -> HarnessResult<&ContainerAsync<GenericImage>> {
        self.container.as_ref().ok_or_else(|| HarnessError::Start {
            message: format!("container for {} is not running", self.image),
        })
    }
}

#[async_trait]
impl RunningInstance for TestcontainersInstance {
    async fn start(&mut self) -> HarnessResult<()> {
        let request = self.request.take().ok_or_else(|| HarnessError::Start {
            message: format!("container for {} was already started", self.image),
        })?;

        let container = request.start().await.map_err(|e| HarnessError::Start {
            message: e.to_string(),
        })?;

        info!(image = %self.image, container_id = %container.id(), "container started");
        self.container = Some(container);
        Ok(())
    }

    async fn host(&self) -> HarnessResult<String> {
        let host = self
            .container()?
            .get_host()
            .await
            .map_err(|e| HarnessError::Host {
                message: e.to_string(),
            })?;
        Ok(host.to_string())
    }

    async fn mapped_port(&self, port: PortSpec) -> HarnessResult<u16> {
        self.container()?
            .get_host_port_ipv4(container_port(port))
            .await
            .map_err(|e| HarnessError::PortMapping {
                port: port.to_string(),
                message: e.to_string(),
            })
    }

    async fn terminate(&mut self) -> HarnessResult<()> {
        let Some(container) = self.container.take() else {
            return Ok(());
        };
        let id = container.id().to_string();
        container.rm().await.map_err(|e| HarnessError::Terminate {
            message: format!("{id}: {e}"),
        })?;
        info!(image = %self.image, container_id = %id, "container removed");
        Ok(())
    }

    fn id(&self) -> Option<String> {
        self.container.as_ref().map(|c| c.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_log_predicates_become_wait_strategies() {
        let config = HarnessConfig::default();
        let strategies: Vec<_> = config.readiness.iter().filter_map(wait_strategy).collect();
        assert_eq!(strategies.len(), 1);
    }

    #[test]
    fn test_container_port_protocol() {
        assert_eq!(
            container_port(PortSpec::tcp(5432)),
            ContainerPort::Tcp(5432)
        );
        assert_eq!(
            container_port(PortSpec {
                port: 53,
                protocol: Protocol::Udp
            }),
            ContainerPort::Udp(53)
        );
    }

    #[tokio::test]
    async fn test_unstarted_instance_reports_errors_and_terminates_cleanly() {
        let mut instance = TestcontainersProvisioner::new()
            .provision(&HarnessConfig::default())
            .await
            .unwrap();

        assert!(instance.id().is_none());
        assert!(matches!(
            instance.host().await,
            Err(HarnessError::Start { .. })
        ));
        assert!(instance.terminate().await.is_ok());
    }

    #[test]
    #[ignore] // Only run when Docker is available
    fn test_postgres_container_starts() -> Result<(), Box<dyn std::error::Error>> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let config = HarnessConfig::default();
            let mut instance = TestcontainersProvisioner::new().provision(&config).await?;
            instance.start().await?;

            let port = instance.mapped_port(config.exposed_port).await?;
            assert!(port > 0);
            assert!(!instance.host().await?.is_empty());

            instance.terminate().await?;
            Ok::<(), Box<dyn std::error::Error>>(())
        })
    }
}

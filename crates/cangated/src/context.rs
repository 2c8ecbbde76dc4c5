//! Process-wide state shared read-only by every connection task

use std::sync::Arc;

use cangate_can::{
    ConfigBridge, EndpointFactory, InterfaceResolver, LoggingConfigBridge, MockScheduler,
    StaticResolver,
};

use crate::config::{DaemonConfig, EndpointKind, WildcardConfig};
use crate::error::GatewayError;
use crate::registry::BusRegistry;
use crate::statistics::StatisticsHandle;

pub struct GatewayContext {
    pub registry: BusRegistry,
    pub endpoints: Arc<dyn EndpointFactory>,
    pub resolver: Arc<dyn InterfaceResolver>,
    pub config_bridge: Arc<dyn ConfigBridge>,
    pub statistics: StatisticsHandle,
    pub max_frame_len: usize,
    pub wildcard: WildcardConfig,
}

impl GatewayContext {
    pub fn new(
        registry: BusRegistry,
        endpoints: Arc<dyn EndpointFactory>,
        resolver: Arc<dyn InterfaceResolver>,
        config_bridge: Arc<dyn ConfigBridge>,
        statistics: StatisticsHandle,
    ) -> Self {
        Self {
            registry,
            endpoints,
            resolver,
            config_bridge,
            statistics,
            max_frame_len: cangate_proto::DEFAULT_MAX_FRAME_LEN,
            wildcard: WildcardConfig::default(),
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_wildcard(mut self, wildcard: WildcardConfig) -> Self {
        self.wildcard = wildcard;
        self
    }

    /// Wire up the collaborators selected by `config.endpoint`
    pub fn from_config(
        config: &DaemonConfig,
        registry: BusRegistry,
        statistics: StatisticsHandle,
    ) -> Result<Self, GatewayError> {
        let ctx = match config.endpoint.kind {
            EndpointKind::Mock => Self::mock(registry, MockScheduler::new(), statistics),
            EndpointKind::Bcm => Self::kernel(registry, statistics)?,
        };
        Ok(ctx
            .with_max_frame_len(config.server.max_frame_len)
            .with_wildcard(config.wildcard))
    }

    /// In-process scheduler; registry buses are numbered 1, 2, 3...
    pub fn mock(
        registry: BusRegistry,
        scheduler: MockScheduler,
        statistics: StatisticsHandle,
    ) -> Self {
        let resolver = StaticResolver::sequential(registry.iter());
        Self::new(
            registry,
            Arc::new(scheduler),
            Arc::new(resolver),
            Arc::new(LoggingConfigBridge::new()),
            statistics,
        )
    }

    #[cfg(target_os = "linux")]
    fn kernel(registry: BusRegistry, statistics: StatisticsHandle) -> Result<Self, GatewayError> {
        #[cfg(feature = "socketcan")]
        let config_bridge: Arc<dyn ConfigBridge> = Arc::new(cangate_can::NetlinkConfigBridge);
        #[cfg(not(feature = "socketcan"))]
        let config_bridge: Arc<dyn ConfigBridge> = Arc::new(LoggingConfigBridge::new());

        Ok(Self::new(
            registry,
            Arc::new(cangate_can::BcmEndpointFactory),
            Arc::new(cangate_can::SystemResolver),
            config_bridge,
            statistics,
        ))
    }

    #[cfg(not(target_os = "linux"))]
    fn kernel(_: BusRegistry, _: StatisticsHandle) -> Result<Self, GatewayError> {
        Err(GatewayError::Unsupported(
            "the BCM endpoint requires Linux; use the mock endpoint".into(),
        ))
    }
}

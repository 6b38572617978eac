use crate::{
    broker::MessageBroker,
    config::Config,
    websocket::{bridge::BrokerBridge, gateway::InboundGateway, session::SessionRegistry},
};
use std::sync::Arc;
use tokio::runtime::Handle;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionRegistry,
    /// Shared broker subscriptions; one per topic for the whole process.
    pub bridge: Arc<BrokerBridge>,
    pub gateway: InboundGateway,
}

impl AppState {
    /// Build the shared state once, before the HTTP workers start.
    /// Broker pump tasks are spawned on `runtime`.
    pub fn new(config: Arc<Config>, broker: Arc<dyn MessageBroker>, runtime: Handle) -> Self {
        let bridge = BrokerBridge::new(
            Arc::clone(&broker),
            runtime,
            &config.channels,
            config.fanout_buffer,
        );
        let gateway = InboundGateway::new(
            broker,
            config.channels.client_to_broker.clone(),
            config.publish_timeout,
        );

        Self {
            config,
            sessions: SessionRegistry::new(),
            bridge: Arc::new(bridge),
            gateway,
        }
    }
}

//! Shared application state and component wiring.

use orra_core::BackoffPolicy;
use orra_engine::{
    ChannelConfig, ChannelManager, ExecutionEngine, GraphCompiler, OrchestrationStore,
    ProjectRegistry, ResultRouter, SchedulerConfig, ServiceRegistry, WebhookDeliverer,
};
use orra_ports::dispatcher::TaskDispatcher;
use orra_ports::planner::Planner;
use orra_ports::webhook::WebhookTransport;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub projects: Arc<ProjectRegistry>,
    pub services: Arc<ServiceRegistry>,
    pub store: Arc<OrchestrationStore>,
    pub channel: Arc<ChannelManager>,
    pub engine: Arc<ExecutionEngine>,
}

/// Wire the engine against concrete planner and webhook implementations.
/// Tests inject fakes through the same seam the binary uses.
pub fn build_state(
    planner: Arc<dyn Planner>,
    webhook_transport: Arc<dyn WebhookTransport>,
    channel_config: ChannelConfig,
    scheduler_config: SchedulerConfig,
) -> AppState {
    let projects = Arc::new(ProjectRegistry::new());
    let services = Arc::new(ServiceRegistry::new());
    let store = Arc::new(OrchestrationStore::new());
    let router = Arc::new(ResultRouter::new());
    let channel = Arc::new(ChannelManager::new(Arc::clone(&router), channel_config));
    let compiler = Arc::new(GraphCompiler::new(planner, Arc::clone(&services)));
    let webhooks = Arc::new(WebhookDeliverer::new(
        webhook_transport,
        BackoffPolicy::default(),
    ));
    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&store),
        Arc::clone(&projects),
        Arc::clone(&services),
        compiler,
        Arc::clone(&channel) as Arc<dyn TaskDispatcher>,
        router,
        webhooks,
        scheduler_config,
    ));

    AppState {
        projects,
        services,
        store,
        channel,
        engine,
    }
}

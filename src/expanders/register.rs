//! Wiring of the standard expander set

use super::action::ActionExpander;
use super::activity_log::ActivityLogExpander;
use super::api_set::ApiSetRegistry;
use super::arm_api_set::ArmApiSet;
use super::container_registry::ContainerRegistryExpander;
use super::container_service::ContainerServiceExpander;
use super::default::GenericExpander;
use super::deployments::DeploymentsExpander;
use super::dispatch::Dispatcher;
use super::json::JsonExpander;
use super::metrics::MetricsExpander;
use super::resource_group::ResourceGroupExpander;
use super::subscription::SubscriptionExpander;
use super::swagger::SwaggerResourceExpander;
use super::tenant::TenantExpander;
use crate::armclient::ArmClient;
use crate::notification::StatusBus;
use anyhow::Result;
use std::sync::Arc;

/// Dispatcher with every built-in expander, the ARM API set registered and
/// the generic expander as fallback
pub fn register_expanders(client: ArmClient, status: StatusBus) -> Result<Dispatcher> {
    let api_sets = Arc::new(ApiSetRegistry::new());
    api_sets.register(Arc::new(ArmApiSet::new(client.clone())));

    let mut dispatcher = Dispatcher::new(status.clone());
    dispatcher.register(Arc::new(TenantExpander::new(client.clone())));
    dispatcher.register(Arc::new(SubscriptionExpander::new(client.clone())));
    dispatcher.register(Arc::new(ResourceGroupExpander::new(client.clone(), status.clone())));
    dispatcher.register(Arc::new(ActivityLogExpander::new(client.clone())));
    dispatcher.register(Arc::new(MetricsExpander::new(client.clone())));
    dispatcher.register(Arc::new(DeploymentsExpander::new(client.clone())));
    dispatcher.register(Arc::new(JsonExpander));
    dispatcher.register(Arc::new(ActionExpander::new(client.clone(), status)));
    dispatcher.register(Arc::new(SwaggerResourceExpander::new(Arc::clone(&api_sets))));
    dispatcher.register(Arc::new(ContainerServiceExpander::new(client.clone(), api_sets)));
    dispatcher.register(Arc::new(ContainerRegistryExpander::new(client.clone())?));
    dispatcher.set_default_expander(Arc::new(GenericExpander::new(client)));

    tracing::info!("Registered {} expanders", dispatcher.expanders().len());
    Ok(dispatcher)
}

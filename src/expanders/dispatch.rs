//! Expansion dispatcher
//!
//! Fans a node out to every interested expander, collects the results under
//! one deadline and merges them. At most one expander may claim the node's
//! display content; a second claim is a programming error and fails the call.

use super::expander::Expander;
use super::types::{ExpanderResponse, ExpanderResult, ListActionsResult, TreeNode};
use crate::config::DEFAULT_EXPAND_TIMEOUT_SECS;
use crate::notification::{StatusBus, StatusEvent, TIMEOUT_FAILURE_TIMEOUT};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("Expander '{expander}' failed probing '{node}'")]
    Probe {
        expander: &'static str,
        node: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Two expanders returned a primary response for '{node}' (second: {expander})")]
    DuplicatePrimaryResponse { node: String, expander: String },
    #[error("Timed out opening '{node}' after {after:?}")]
    Timeout { node: String, after: Duration },
    #[error("Expanders {expanders:?} exited without a result for '{node}'")]
    ExpanderAborted {
        node: String,
        expanders: Vec<&'static str>,
    },
    #[error("No resource type resolved for '{node}'")]
    UnresolvedResourceType { node: String },
    #[error("No API set resolved for '{node}'")]
    UnresolvedApiSet { node: String },
    #[error("Item '{node}' cannot be deleted")]
    NotDeletable { node: String },
    #[error("Item '{node}' cannot be updated")]
    NotUpdatable { node: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ExpandError {
    /// Setup and invariant faults, as opposed to backend or timeout failures
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Probe { .. }
                | Self::DuplicatePrimaryResponse { .. }
                | Self::ExpanderAborted { .. }
                | Self::UnresolvedResourceType { .. }
                | Self::UnresolvedApiSet { .. }
        )
    }
}

/// A non-fatal failure of one expander
#[derive(Debug)]
pub struct ExpanderFailure {
    pub expander: &'static str,
    pub error: anyhow::Error,
}

/// Merged outcome of expanding one node
#[derive(Debug, Default)]
pub struct Expansion {
    /// Display content; `None` when nothing claimed the node
    pub content: Option<ExpanderResponse>,
    pub nodes: Vec<TreeNode>,
    pub failures: Vec<ExpanderFailure>,
}

pub struct Dispatcher {
    expanders: Vec<Arc<dyn Expander>>,
    default_expander: Option<Arc<dyn Expander>>,
    status: StatusBus,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(status: StatusBus) -> Self {
        Self {
            expanders: Vec::new(),
            default_expander: None,
            status,
            timeout: Duration::from_secs(DEFAULT_EXPAND_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(&mut self, expander: Arc<dyn Expander>) {
        tracing::debug!("Registered expander {}", expander.name());
        self.expanders.push(expander);
    }

    /// Fallback used when no expander claims the node's content
    pub fn set_default_expander(&mut self, expander: Arc<dyn Expander>) {
        self.default_expander = Some(expander);
    }

    pub fn expanders(&self) -> &[Arc<dyn Expander>] {
        &self.expanders
    }

    pub fn status(&self) -> &StatusBus {
        &self.status
    }

    pub fn default_expander(&self) -> Option<&Arc<dyn Expander>> {
        self.default_expander.as_ref()
    }

    /// Let every expander cache its lookups onto `node` without expanding it
    pub fn resolve(&self, node: &mut TreeNode) {
        for expander in &self.expanders {
            expander.resolve(node);
        }
    }

    pub async fn expand_item(&self, node: &mut TreeNode) -> Result<Expansion, ExpandError> {
        self.expand_item_allow_default(node, true).await
    }

    /// Expand `node`, optionally without the generic fallback.
    ///
    /// The node itself is updated with cached resolutions and any fresher
    /// status indicator.
    pub async fn expand_item_allow_default(
        &self,
        node: &mut TreeNode,
        allow_default: bool,
    ) -> Result<Expansion, ExpandError> {
        let status = self.status.start(format!("Opening: {}", node.id));
        let result = self.run_expansion(node, allow_default).await;
        self.status.finish(status);
        result
    }

    async fn run_expansion(&self, node: &mut TreeNode, allow_default: bool) -> Result<Expansion, ExpandError> {
        self.resolve(node);

        let mut interested = Vec::new();
        for expander in &self.expanders {
            let applies = expander.does_expand(node).map_err(|source| ExpandError::Probe {
                expander: expander.name(),
                node: node.id.clone(),
                source,
            })?;
            if applies {
                interested.push(Arc::clone(expander));
            }
        }
        tracing::debug!(
            "Expanding {} with [{}]",
            node.id,
            interested.iter().map(|e| e.name()).collect::<Vec<_>>().join(", ")
        );

        let dispatched = interested.len();
        let results = self
            .run_concurrently(node, interested, |expander, node| async move { expander.expand(&node).await })
            .await?;

        let mut expansion = Expansion::default();
        let mut primary_claimed = false;
        for (expander, result) in results {
            let ExpanderResult {
                response,
                nodes: mut produced,
                error,
                source_description,
                is_primary_response,
                status_indicator,
            } = result;

            let error_text = match error {
                Some(error) => {
                    let error = escalate_fatal(error)?;
                    let text = format!("{:#}", error);
                    self.report_failure(node, &source_description, expander.name(), &text);
                    expansion.failures.push(ExpanderFailure {
                        expander: expander.name(),
                        error,
                    });
                    Some(text)
                }
                None => None,
            };

            if is_primary_response {
                if primary_claimed {
                    return Err(ExpandError::DuplicatePrimaryResponse {
                        node: node.id.clone(),
                        expander: expander.name().to_string(),
                    });
                }
                primary_claimed = true;
                expansion.content = Some(match error_text {
                    Some(text) if response.response.is_empty() => ExpanderResponse::text(text),
                    _ => response,
                });
            }

            if let Some(status) = status_indicator {
                node.status_indicator = Some(status);
            }

            for child in &mut produced {
                if child.expander.is_none() {
                    child.expander = Some(Arc::clone(&expander));
                }
            }
            if is_primary_response {
                produced.append(&mut expansion.nodes);
                expansion.nodes = produced;
            } else {
                expansion.nodes.append(&mut produced);
            }
        }

        if dispatched > 0 && expansion.failures.len() == dispatched && expansion.nodes.is_empty() {
            if let Some(failure) = std::mem::take(&mut expansion.failures).into_iter().next() {
                return Err(ExpandError::Backend(failure.error));
            }
        }

        if allow_default && !primary_claimed {
            self.run_default_expander(node, &mut expansion).await?;
        }

        Ok(expansion)
    }

    async fn run_default_expander(&self, node: &mut TreeNode, expansion: &mut Expansion) -> Result<(), ExpandError> {
        let Some(default) = &self.default_expander else {
            return Ok(());
        };
        let applies = default.does_expand(node).map_err(|source| ExpandError::Probe {
            expander: default.name(),
            node: node.id.clone(),
            source,
        })?;
        if !applies {
            return Ok(());
        }

        let result = default.expand(node).await;
        if let Some(error) = result.error {
            self.status
                .failure(format!("Failed to expand resource: {:#}", error));
            expansion.failures.push(ExpanderFailure {
                expander: default.name(),
                error,
            });
        }
        if let Some(status) = result.status_indicator {
            node.status_indicator = Some(status);
        }
        expansion.content = Some(result.response);
        Ok(())
    }

    /// Actions available on `node`, gathered from every expander that offers them
    pub async fn get_actions(&self, node: &TreeNode) -> Result<Expansion, ExpandError> {
        let status = self.status.start("Getting available actions");

        let mut interested = Vec::new();
        for expander in self.expanders.iter().chain(self.default_expander.iter()) {
            let has_actions = match expander.has_actions(node) {
                Ok(has_actions) => has_actions,
                Err(source) => {
                    self.status.finish(status);
                    return Err(ExpandError::Probe {
                        expander: expander.name(),
                        node: node.id.clone(),
                        source,
                    });
                }
            };
            if has_actions {
                interested.push(Arc::clone(expander));
            }
        }

        let results = self
            .run_concurrently(node, interested, |expander, node| async move { expander.list_actions(&node).await })
            .await;
        self.status.finish(status);

        let mut expansion = Expansion::default();
        for (expander, result) in results? {
            let ListActionsResult {
                nodes: mut produced,
                error,
                source_description,
                is_primary_response,
            } = result;

            if let Some(error) = error {
                let error = escalate_fatal(error)?;
                self.report_failure(node, &source_description, expander.name(), &format!("{:#}", error));
                expansion.failures.push(ExpanderFailure {
                    expander: expander.name(),
                    error,
                });
            }
            for child in &mut produced {
                if child.expander.is_none() {
                    child.expander = Some(Arc::clone(&expander));
                }
            }
            if is_primary_response {
                produced.append(&mut expansion.nodes);
                expansion.nodes = produced;
            } else {
                expansion.nodes.append(&mut produced);
            }
        }
        Ok(expansion)
    }

    /// Delete through the expander that produced the node
    pub async fn delete_item(&self, node: &TreeNode) -> Result<(), ExpandError> {
        let not_deletable = || ExpandError::NotDeletable { node: node.id.clone() };
        let Some(expander) = &node.expander else {
            return Err(not_deletable());
        };
        if node.delete_url.is_none() {
            return Err(not_deletable());
        }

        let status = self.status.start(format!("Deleting: {}", node.id));
        let deleted = expander.delete(node).await;
        self.status.finish(status);
        match deleted {
            Ok(true) => {
                tracing::info!("Deleted {}", node.id);
                Ok(())
            }
            Ok(false) => Err(not_deletable()),
            Err(e) => {
                self.status.failure(format!("Failed to delete '{}': {:#}", node.id, e));
                Err(ExpandError::Backend(e))
            }
        }
    }

    /// Replace the node's content through its owning expander
    pub async fn update_item(&self, node: &TreeNode, content: &str) -> Result<(), ExpandError> {
        let Some(expander) = node.expander.as_ref().filter(|e| e.can_update(node)) else {
            return Err(ExpandError::NotUpdatable { node: node.id.clone() });
        };

        let status = self.status.start(format!("Updating: {}", node.id));
        let updated = expander.update(node, content).await;
        self.status.finish(status);
        updated.map_err(|e| {
            self.status.failure(format!("Failed to update '{}': {:#}", node.id, e));
            ExpandError::Backend(e)
        })
    }

    /// Run `call` for every expander concurrently on a clone of `node`,
    /// collecting exactly one output per expander before the deadline.
    async fn run_concurrently<T, F, Fut>(
        &self,
        node: &TreeNode,
        expanders: Vec<Arc<dyn Expander>>,
        call: F,
    ) -> Result<Vec<(Arc<dyn Expander>, T)>, ExpandError>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Expander>, TreeNode) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let expected = expanders.len();
        if expected == 0 {
            return Ok(Vec::new());
        }
        let mut pending: Vec<&'static str> = expanders.iter().map(|e| e.name()).collect();

        let timeout = node.timeout_override.unwrap_or(self.timeout);
        // Room for every result, so late senders never block
        let (tx, mut rx) = mpsc::channel(expected);
        let cancel = CancellationToken::new();

        for expander in expanders {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let work = call(Arc::clone(&expander), node.clone());
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Expander {} cancelled", expander.name());
                    }
                    output = work => {
                        let _ = tx.send((expander, output)).await;
                    }
                }
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut results = Vec::with_capacity(expected);
        while results.len() < expected {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(result) => {
                        if let Some(i) = pending.iter().position(|name| *name == result.0.name()) {
                            pending.swap_remove(i);
                        }
                        results.push(result);
                    }
                    None => {
                        // Only a panicking task drops its sender before the deadline
                        tracing::error!("Expanders {:?} exited without a result for {}", pending, node.id);
                        self.status.failure(format!("Failed to expand resource: {}", node.id));
                        return Err(ExpandError::ExpanderAborted {
                            node: node.id.clone(),
                            expanders: pending,
                        });
                    }
                },
                _ = &mut deadline => {
                    cancel.cancel();
                    self.status.publish(
                        StatusEvent::failure(format!("Timed out opening: {}", node.id))
                            .with_timeout(TIMEOUT_FAILURE_TIMEOUT),
                    );
                    return Err(ExpandError::Timeout {
                        node: node.id.clone(),
                        after: timeout,
                    });
                }
            }
        }
        Ok(results)
    }

    fn report_failure(&self, node: &TreeNode, source: &str, expander: &str, error: &str) {
        let source = if source.is_empty() { expander } else { source };
        tracing::warn!("Expander '{}' failed on {}: {}", source, node.id, error);
        self.status.failure(format!(
            "Expander '{}' failed on resource: {} Err: {}",
            source, node.id, error
        ));
    }
}

/// Invariant violations reported by an expander abort the whole call
fn escalate_fatal(error: anyhow::Error) -> Result<anyhow::Error, ExpandError> {
    match error.downcast::<ExpandError>() {
        Ok(expand_error) if expand_error.is_fatal() => Err(expand_error),
        Ok(expand_error) => Ok(expand_error.into()),
        Err(error) => Ok(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expanders::types::{ListActionsResult, RESOURCE_TYPE};
    use crate::notification::StatusKind;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    enum Behaviour {
        Primary(&'static str, Vec<&'static str>),
        Nodes(Vec<&'static str>),
        Fail,
        Sleep(Duration),
        Panic,
        ProbeError,
    }

    struct FakeExpander {
        name: &'static str,
        behaviour: Behaviour,
        applies: bool,
        finished: Arc<AtomicBool>,
    }

    impl FakeExpander {
        fn new(name: &'static str, behaviour: Behaviour) -> Self {
            Self {
                name,
                behaviour,
                applies: true,
                finished: Arc::new(AtomicBool::new(false)),
            }
        }

        fn arc(name: &'static str, behaviour: Behaviour) -> Arc<dyn Expander> {
            Arc::new(Self::new(name, behaviour))
        }
    }

    fn nodes(parent: &TreeNode, names: &[&str]) -> Vec<TreeNode> {
        names
            .iter()
            .map(|n| TreeNode::child_of(parent, format!("{}/{}", parent.id, n), *n, RESOURCE_TYPE))
            .collect()
    }

    #[async_trait]
    impl Expander for FakeExpander {
        fn name(&self) -> &'static str {
            self.name
        }

        fn does_expand(&self, _node: &TreeNode) -> Result<bool> {
            match self.behaviour {
                Behaviour::ProbeError => anyhow::bail!("misconfigured"),
                _ => Ok(self.applies),
            }
        }

        async fn expand(&self, node: &TreeNode) -> ExpanderResult {
            let result = match &self.behaviour {
                Behaviour::Primary(content, names) => {
                    ExpanderResult::primary(self.name, ExpanderResponse::json(*content), nodes(node, names))
                }
                Behaviour::Nodes(names) => ExpanderResult::nodes(self.name, nodes(node, names)),
                Behaviour::Fail => ExpanderResult::failed(self.name, anyhow::anyhow!("HTTP 500")),
                Behaviour::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    ExpanderResult::nodes(self.name, nodes(node, &["late"]))
                }
                Behaviour::Panic => panic!("expander bug"),
                Behaviour::ProbeError => unreachable!(),
            };
            self.finished.store(true, Ordering::SeqCst);
            result
        }

        async fn delete(&self, _node: &TreeNode) -> Result<bool> {
            match self.behaviour {
                Behaviour::Fail => anyhow::bail!("conflict"),
                _ => Ok(true),
            }
        }

        fn has_actions(&self, _node: &TreeNode) -> Result<bool> {
            match self.behaviour {
                Behaviour::ProbeError => anyhow::bail!("misconfigured"),
                _ => Ok(matches!(self.behaviour, Behaviour::Nodes(_))),
            }
        }

        async fn list_actions(&self, node: &TreeNode) -> ListActionsResult {
            ListActionsResult {
                nodes: nodes(node, &["restart"]),
                source_description: self.name.to_string(),
                ..Default::default()
            }
        }
    }

    fn dispatcher(expanders: Vec<Arc<dyn Expander>>) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(StatusBus::new());
        for expander in expanders {
            dispatcher.register(expander);
        }
        dispatcher
    }

    fn root() -> TreeNode {
        TreeNode::new("/root", "root", RESOURCE_TYPE)
    }

    fn ids(expansion: &Expansion) -> Vec<&str> {
        expansion.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_primary_nodes_are_prepended() {
        let dispatcher = dispatcher(vec![
            FakeExpander::arc("extra", Behaviour::Nodes(vec!["x1", "x2"])),
            FakeExpander::arc("main", Behaviour::Primary("{}", vec!["p1", "p2"])),
        ]);

        let expansion = dispatcher.expand_item(&mut root()).await.unwrap();
        assert_eq!(ids(&expansion), vec!["p1", "p2", "x1", "x2"]);
        assert_eq!(expansion.content.unwrap().response, "{}");
        assert!(expansion.failures.is_empty());
    }

    #[tokio::test]
    async fn test_nodes_remember_their_expander() {
        let dispatcher = dispatcher(vec![FakeExpander::arc("main", Behaviour::Primary("{}", vec!["p1"]))]);
        let expansion = dispatcher.expand_item(&mut root()).await.unwrap();
        assert_eq!(expansion.nodes[0].expander.as_ref().unwrap().name(), "main");
    }

    #[tokio::test]
    async fn test_two_primary_responses_fail_fatally() {
        let dispatcher = dispatcher(vec![
            FakeExpander::arc("a", Behaviour::Primary("a", vec![])),
            FakeExpander::arc("b", Behaviour::Primary("b", vec![])),
        ]);

        let error = dispatcher.expand_item(&mut root()).await.unwrap_err();
        assert!(matches!(error, ExpandError::DuplicatePrimaryResponse { .. }));
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn test_probe_error_is_fatal() {
        let dispatcher = dispatcher(vec![FakeExpander::arc("bad", Behaviour::ProbeError)]);
        let error = dispatcher.expand_item(&mut root()).await.unwrap_err();
        assert!(matches!(error, ExpandError::Probe { expander: "bad", .. }));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_nodes() {
        let dispatcher = dispatcher(vec![
            FakeExpander::arc("one", Behaviour::Nodes(vec!["a"])),
            FakeExpander::arc("broken", Behaviour::Fail),
            FakeExpander::arc("two", Behaviour::Nodes(vec!["b"])),
        ]);
        let mut events = dispatcher.status().subscribe();

        let expansion = dispatcher.expand_item(&mut root()).await.unwrap();
        let mut names = ids(&expansion);
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(expansion.failures.len(), 1);
        assert_eq!(expansion.failures[0].expander, "broken");

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            saw_failure |= event.message.contains("'broken' failed");
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_single_failing_expander_is_an_error() {
        let dispatcher = dispatcher(vec![FakeExpander::arc("only", Behaviour::Fail)]);
        let error = dispatcher.expand_item(&mut root()).await.unwrap_err();
        assert!(matches!(error, ExpandError::Backend(_)));
        assert!(!error.is_fatal());
    }

    #[tokio::test]
    async fn test_timeout_discards_partial_results() {
        let slow = FakeExpander::new("slow", Behaviour::Sleep(Duration::from_secs(5)));
        let finished = Arc::clone(&slow.finished);
        let dispatcher = dispatcher(vec![
            FakeExpander::arc("fast", Behaviour::Nodes(vec!["a"])),
            Arc::new(slow),
        ])
        .with_timeout(Duration::from_millis(50));

        let error = dispatcher.expand_item(&mut root()).await.unwrap_err();
        assert!(matches!(error, ExpandError::Timeout { .. }));

        // The slow expander is cancelled rather than left running
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_node_timeout_override() {
        let dispatcher = dispatcher(vec![FakeExpander::arc(
            "slow",
            Behaviour::Sleep(Duration::from_millis(200)),
        )]);
        let mut node = root();
        node.timeout_override = Some(Duration::from_millis(10));
        let error = dispatcher.expand_item(&mut node).await.unwrap_err();
        assert!(matches!(error, ExpandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_default_expander_supplies_content_only() {
        let mut dispatcher = dispatcher(vec![FakeExpander::arc("extra", Behaviour::Nodes(vec!["x"]))]);
        dispatcher.set_default_expander(FakeExpander::arc("default", Behaviour::Primary("body", vec!["ignored"])));

        let expansion = dispatcher.expand_item(&mut root()).await.unwrap();
        assert_eq!(expansion.content.as_ref().unwrap().response, "body");
        assert_eq!(ids(&expansion), vec!["x"]);

        let expansion = dispatcher.expand_item_allow_default(&mut root(), false).await.unwrap();
        assert!(expansion.content.is_none());
    }

    #[tokio::test]
    async fn test_panicking_expander_fails_the_call() {
        let dispatcher = dispatcher(vec![
            FakeExpander::arc("good", Behaviour::Nodes(vec!["a"])),
            FakeExpander::arc("panicky", Behaviour::Panic),
        ]);

        let error = dispatcher.expand_item(&mut root()).await.unwrap_err();
        match &error {
            ExpandError::ExpanderAborted { expanders, .. } => assert_eq!(expanders, &vec!["panicky"]),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn test_default_expander_probe_error_is_fatal() {
        let mut dispatcher = dispatcher(vec![FakeExpander::arc("extra", Behaviour::Nodes(vec!["x"]))]);
        dispatcher.set_default_expander(FakeExpander::arc("default", Behaviour::ProbeError));

        let error = dispatcher.expand_item(&mut root()).await.unwrap_err();
        assert!(matches!(error, ExpandError::Probe { expander: "default", .. }));

        // Without the fallback the same node expands normally
        let expansion = dispatcher.expand_item_allow_default(&mut root(), false).await.unwrap();
        assert_eq!(ids(&expansion), vec!["x"]);
    }

    #[tokio::test]
    async fn test_default_expander_skipped_when_primary_claimed() {
        let mut dispatcher = dispatcher(vec![FakeExpander::arc("main", Behaviour::Primary("main", vec![]))]);
        dispatcher.set_default_expander(FakeExpander::arc("default", Behaviour::Primary("default", vec![])));

        let expansion = dispatcher.expand_item(&mut root()).await.unwrap();
        assert_eq!(expansion.content.unwrap().response, "main");
    }

    #[tokio::test]
    async fn test_get_actions_merges_offering_expanders() {
        let dispatcher = dispatcher(vec![
            FakeExpander::arc("actions", Behaviour::Nodes(vec![])),
            FakeExpander::arc("none", Behaviour::Primary("{}", vec![])),
        ]);
        let expansion = dispatcher.get_actions(&root()).await.unwrap();
        assert_eq!(ids(&expansion), vec!["restart"]);
        assert_eq!(expansion.nodes[0].expander.as_ref().unwrap().name(), "actions");
    }

    #[tokio::test]
    async fn test_get_actions_error_finishes_status() {
        let dispatcher = dispatcher(vec![FakeExpander::arc("bad", Behaviour::ProbeError)]);
        let mut events = dispatcher.status().subscribe();

        let error = dispatcher.get_actions(&root()).await.unwrap_err();
        assert!(matches!(error, ExpandError::Probe { expander: "bad", .. }));

        let started = events.try_recv().unwrap();
        assert_eq!(started.kind, StatusKind::InProgress);
        let finished = events.try_recv().unwrap();
        assert_eq!(finished.id, started.id);
        assert_eq!(finished.kind, StatusKind::Success);
    }

    #[tokio::test]
    async fn test_delete_requires_owner_and_delete_url() {
        let dispatcher = dispatcher(vec![]);
        let mut node = root();
        let error = dispatcher.delete_item(&node).await.unwrap_err();
        assert!(matches!(error, ExpandError::NotDeletable { .. }));

        node.expander = Some(FakeExpander::arc("owner", Behaviour::Nodes(vec![])));
        let error = dispatcher.delete_item(&node).await.unwrap_err();
        assert!(matches!(error, ExpandError::NotDeletable { .. }));

        node.delete_url = Some("/root?api-version=1".to_string());
        dispatcher.delete_item(&node).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_failure_is_typed() {
        let dispatcher = dispatcher(vec![]);
        let mut node = root().with_delete_url("/root");
        node.expander = Some(FakeExpander::arc("owner", Behaviour::Fail));
        let error = dispatcher.delete_item(&node).await.unwrap_err();
        assert!(matches!(error, ExpandError::Backend(_)));
    }

    #[tokio::test]
    async fn test_update_requires_capable_expander() {
        let dispatcher = dispatcher(vec![]);
        let mut node = root();
        node.expander = Some(FakeExpander::arc("owner", Behaviour::Nodes(vec![])));
        let error = dispatcher.update_item(&node, "{}").await.unwrap_err();
        assert!(matches!(error, ExpandError::NotUpdatable { .. }));
    }
}

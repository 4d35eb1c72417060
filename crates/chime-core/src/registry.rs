//! Handler registry: maps dotted task names to callable handlers.
//!
//! Process-local and never persisted. Each worker registers its own subset;
//! the claim query restricts to the local name set, so a task whose name no
//! live worker knows simply stays pending.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ChimeError;
use crate::handle::TaskHandle;

/// A task handler.
///
/// Gets the task's params and a narrow handle to the record (logs, side
/// effects, next-occurrence override). The returned value is persisted as
/// the task's `result`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(&self, params: Value, task: TaskHandle) -> Result<Value, ChimeError>;
}

/// Adapter so plain async closures register without a trait impl.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value, TaskHandle) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ChimeError>> + Send + 'static,
{
    async fn run(&self, params: Value, task: TaskHandle) -> Result<Value, ChimeError> {
        (self.0)(params, task).await
    }
}

/// One node of a nested registration tree. Leaves register under the dotted
/// path of the keys leading to them; groups recurse.
pub enum HandlerNode {
    Leaf(Arc<dyn Handler>),
    Group(HashMap<String, HandlerNode>),
}

impl HandlerNode {
    pub fn leaf(handler: Arc<dyn Handler>) -> Self {
        Self::Leaf(handler)
    }

    pub fn func<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, TaskHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ChimeError>> + Send + 'static,
    {
        Self::Leaf(Arc::new(FnHandler(f)))
    }

    pub fn group(entries: impl IntoIterator<Item = (&'static str, HandlerNode)>) -> Self {
        Self::Group(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}

/// Registry of handlers (dotted name -> handler).
///
/// Registration is an upsert: the last handler registered under a name wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, TaskHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ChimeError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)));
    }

    /// Walks a nested tree, registering each leaf under its dotted path,
    /// optionally below `prefix`.
    pub fn register_tree(&mut self, tree: HashMap<String, HandlerNode>, prefix: Option<&str>) {
        for (key, node) in tree {
            let path = match prefix {
                Some(prefix) => format!("{prefix}.{key}"),
                None => key,
            };
            match node {
                HandlerNode::Leaf(handler) => self.register(path, handler),
                HandlerNode::Group(children) => self.register_tree(children, Some(&path)),
            }
        }
    }

    pub fn remove_all(&mut self) {
        self.handlers.clear();
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// The local name set the claim query restricts to.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok_handler() -> HandlerNode {
        HandlerNode::func(|_params, _task| async { Ok(json!(42)) })
    }

    #[test]
    fn register_is_an_upsert() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("job", |_p, _t| async { Ok(json!(1)) });
        registry.register_fn("job", |_p, _t| async { Ok(json!(2)) });

        assert_eq!(registry.len(), 1);
        assert!(registry.get("job").is_some());
    }

    #[test]
    fn tree_registers_dotted_paths() {
        let mut registry = HandlerRegistry::new();
        let tree = HashMap::from([
            (
                "emails".to_string(),
                HandlerNode::group([("welcome", ok_handler()), ("digest", ok_handler())]),
            ),
            ("cleanup".to_string(), ok_handler()),
        ]);

        registry.register_tree(tree, None);

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["cleanup", "emails.digest", "emails.welcome"]);
    }

    #[test]
    fn tree_prefix_nests_below_it() {
        let mut registry = HandlerRegistry::new();
        let tree = HashMap::from([(
            "deep".to_string(),
            HandlerNode::group([("leaf", ok_handler())]),
        )]);

        registry.register_tree(tree, Some("jobs"));

        assert!(registry.get("jobs.deep.leaf").is_some());
        assert!(registry.get("deep.leaf").is_none());
    }

    #[test]
    fn empty_groups_register_nothing() {
        let mut registry = HandlerRegistry::new();
        let tree = HashMap::from([("empty".to_string(), HandlerNode::group([]))]);

        registry.register_tree(tree, None);
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_all_clears() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("a", |_p, _t| async { Ok(json!(null)) });
        registry.register_fn("b", |_p, _t| async { Ok(json!(null)) });

        registry.remove_all();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }
}

//! Task layers: an ordered chain of parallel task sets.
//!
//! Layers run strictly in order. Tasks inside one layer are independent and
//! may run concurrently. A chain is built once, front to back, and walked
//! once by the executor.

use crate::task::Task;

/// One barrier's worth of parallel tasks, linked to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskLayer {
    tasks: Vec<Task>,
    child: Option<Box<TaskLayer>>,
}

impl TaskLayer {
    /// Build a layer from `tasks`. An empty task list yields `None`, so
    /// builders can hand their result straight to [`TaskLayer::append`].
    #[must_use]
    pub fn new(tasks: Vec<Task>) -> Option<Self> {
        if tasks.is_empty() {
            None
        } else {
            Some(Self { tasks, child: None })
        }
    }

    /// Attach `next` (with its whole chain) after the last layer.
    ///
    /// `None` leaves the chain unchanged. An empty layer with no child is
    /// replaced by `next`, which then acts as the head.
    pub fn append(&mut self, next: Option<TaskLayer>) -> &mut Self {
        let Some(next) = next else {
            return self;
        };
        if self.tasks.is_empty() && self.child.is_none() {
            *self = next;
        } else {
            attach(&mut self.child, next);
        }
        self
    }

    /// The tasks of this layer.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// The next layer, if any.
    #[must_use]
    pub fn child(&self) -> Option<&TaskLayer> {
        self.child.as_deref()
    }

    /// Walk the chain from this layer forward.
    #[must_use]
    pub fn layers(&self) -> Layers<'_> {
        Layers { next: Some(self) }
    }

    /// Number of layers in the chain.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers().count()
    }

    /// Number of tasks across the chain.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.layers().map(|layer| layer.tasks.len()).sum()
    }
}

fn attach(slot: &mut Option<Box<TaskLayer>>, next: TaskLayer) {
    match slot {
        Some(layer) => attach(&mut layer.child, next),
        None => *slot = Some(Box::new(next)),
    }
}

/// Forward iterator over a layer chain.
#[derive(Debug, Clone)]
pub struct Layers<'a> {
    next: Option<&'a TaskLayer>,
}

impl<'a> Iterator for Layers<'a> {
    type Item = &'a TaskLayer;

    fn next(&mut self) -> Option<Self::Item> {
        let layer = self.next?;
        self.next = layer.child();
        Some(layer)
    }
}

/// Assembles a layer chain from optional sub-layers.
///
/// Absent layers are skipped, so planners can chain every stage
/// unconditionally:
///
/// ```
/// use vmcluster_scheduler::GraphBuilder;
///
/// let graph = GraphBuilder::new().then(None).then(None).build();
/// assert!(graph.is_none());
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    head: Option<TaskLayer>,
}

impl GraphBuilder {
    /// Start an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `layer` (and its chain) if present.
    #[must_use]
    pub fn then(mut self, layer: Option<TaskLayer>) -> Self {
        match &mut self.head {
            Some(head) => {
                head.append(layer);
            }
            None => self.head = layer,
        }
        self
    }

    /// Finish the chain; `None` if no stage produced tasks.
    #[must_use]
    pub fn build(self) -> Option<TaskLayer> {
        self.head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Directive, Meta, TaskAction, TaskTarget};
    use vmcluster_core::{JobId, UserId};

    fn task(node: &str) -> Task {
        Task {
            job_id: JobId::generate_deterministic("layer", 1),
            owner: UserId::new("usr-1").unwrap(),
            action: TaskAction::PingDrone,
            target: TaskTarget::Pilot,
            node_id: node.to_string(),
            directive: Directive::Meta(Meta {
                cluster_id: "cl-1".to_string(),
                node_id: Some(node.to_string()),
            }),
            failure_allowed: false,
        }
    }

    fn layer(nodes: &[&str]) -> Option<TaskLayer> {
        TaskLayer::new(nodes.iter().map(|n| task(n)).collect())
    }

    fn flatten(chain: &TaskLayer) -> Vec<Vec<String>> {
        chain
            .layers()
            .map(|l| l.tasks().iter().map(|t| t.node_id.clone()).collect())
            .collect()
    }

    #[test]
    fn empty_task_list_is_no_layer() {
        assert!(TaskLayer::new(Vec::new()).is_none());
    }

    #[test]
    fn append_none_is_a_no_op() {
        let mut chain = layer(&["a"]).unwrap();
        let before = chain.clone();
        chain.append(None);
        assert_eq!(chain, before);
    }

    #[test]
    fn append_concatenates_chains() {
        let mut a = layer(&["a1"]).unwrap();
        a.append(layer(&["a2", "a3"]));
        let mut b = layer(&["b1"]).unwrap();
        b.append(layer(&["b2"]));

        let expected: Vec<Vec<String>> = flatten(&a).into_iter().chain(flatten(&b)).collect();
        a.append(Some(b));
        assert_eq!(flatten(&a), expected);
        assert_eq!(a.layer_count(), 4);
        assert_eq!(a.task_count(), 5);
    }

    #[test]
    fn append_is_associative() {
        let (x, y, z) = (layer(&["x"]), layer(&["y"]), layer(&["z"]));

        let mut left = x.clone().unwrap();
        left.append(y.clone()).append(z.clone());

        let mut tail = y.unwrap();
        tail.append(z);
        let mut right = x.unwrap();
        right.append(Some(tail));

        assert_eq!(left, right);
    }

    #[test]
    fn empty_receiver_absorbs_next() {
        let mut head = TaskLayer::default();
        head.append(layer(&["a"])).append(layer(&["b"]));
        assert_eq!(flatten(&head), vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn builder_skips_absent_layers() {
        let graph = GraphBuilder::new()
            .then(None)
            .then(layer(&["a"]))
            .then(None)
            .then(layer(&["b", "c"]))
            .build()
            .unwrap();
        assert_eq!(graph.layer_count(), 2);
        assert_eq!(graph.tasks().len(), 1);
        assert_eq!(graph.child().unwrap().tasks().len(), 2);
    }
}

/// Dependency tracking for one execution
///
/// Decides which nodes may be dispatched next. A node becomes eligible once every
/// predecessor is terminal; it runs if all of them completed and is skipped if any
/// failed or was skipped. Walking the plan in topological order lets a skip
/// cascade through all descendants in a single pass.

use crate::runtime::execution::NodeStatus;
use crate::workflow::ExecutionPlan;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Running,
    Done(NodeStatus),
}

/// Nodes released by one call to `advance`
#[derive(Debug, Default, PartialEq)]
pub struct Advance {
    /// Ready to dispatch, in execution order
    pub ready: Vec<String>,
    /// Newly skipped nodes with the predecessor that blocked them
    pub skipped: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct DependencyTracker {
    order: Vec<String>,
    predecessors: HashMap<String, Vec<String>>,
    states: HashMap<String, NodeState>,
}

impl DependencyTracker {
    pub fn new(plan: &ExecutionPlan) -> Self {
        let order = plan.order().to_vec();
        let predecessors = order
            .iter()
            .map(|id| (id.clone(), plan.predecessors(id)))
            .collect();
        let states = order.iter().map(|id| (id.clone(), NodeState::Waiting)).collect();
        Self {
            order,
            predecessors,
            states,
        }
    }

    /// Release every waiting node whose predecessors are all terminal
    pub fn advance(&mut self) -> Advance {
        let mut advance = Advance::default();

        for id in &self.order {
            if self.states.get(id) != Some(&NodeState::Waiting) {
                continue;
            }

            let preds = self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[]);
            let mut blocked_by = None;
            let mut all_done = true;
            for pred in preds {
                match self.states.get(pred) {
                    Some(NodeState::Done(NodeStatus::Completed)) => {}
                    Some(NodeState::Done(_)) => {
                        blocked_by.get_or_insert_with(|| pred.clone());
                    }
                    _ => all_done = false,
                }
            }
            if !all_done {
                continue;
            }

            match blocked_by {
                Some(cause) => {
                    self.states.insert(id.clone(), NodeState::Done(NodeStatus::Skipped));
                    advance.skipped.push((id.clone(), cause));
                }
                None => {
                    self.states.insert(id.clone(), NodeState::Running);
                    advance.ready.push(id.clone());
                }
            }
        }

        advance
    }

    pub fn complete(&mut self, node_id: &str, status: NodeStatus) {
        if let Some(state) = self.states.get_mut(node_id) {
            *state = NodeState::Done(status);
        }
    }

    /// Nodes never dispatched, in execution order
    pub fn undispatched(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.states.get(*id) == Some(&NodeState::Waiting))
            .cloned()
            .collect()
    }
}

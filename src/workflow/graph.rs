/// Petgraph-based workflow validation and ordering
///
/// Compiles a loaded `WorkflowGraph` into an `ExecutionPlan`: every edge endpoint must
/// exist, node ids must be unique and the edge relation must be acyclic. The plan
/// exposes a deterministic execution order and dependency lookups for the scheduler.

use crate::error::{EngineError, EngineResult};
use crate::workflow::types::{WorkflowGraph, WorkflowNode};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

/// Validated, execution-ready workflow
///
/// Node indices in the petgraph DAG follow declaration order, so ordering ties are
/// broken by the position of a node in the editor's node list, never by its id.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: WorkflowGraph,
    dag: DiGraph<String, ()>,
    node_id_to_index: HashMap<String, NodeIndex>,
    order: Vec<String>,
}

impl ExecutionPlan {
    /// Validate the graph and compute its execution order
    pub fn compile(graph: WorkflowGraph) -> EngineResult<Self> {
        tracing::debug!(
            "🏗️ Compiling workflow graph with {} nodes and {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );

        let mut dag = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in &graph.nodes {
            if node_id_to_index.contains_key(&node.id) {
                return Err(EngineError::InvalidGraph(format!("duplicate node id '{}'", node.id)));
            }
            let index = dag.add_node(node.id.clone());
            node_id_to_index.insert(node.id.clone(), index);
        }

        for edge in &graph.edges {
            let from = node_id_to_index.get(&edge.source).ok_or_else(|| {
                EngineError::InvalidGraph(format!("edge '{}' references unknown node '{}'", edge.id, edge.source))
            })?;
            let to = node_id_to_index.get(&edge.target).ok_or_else(|| {
                EngineError::InvalidGraph(format!("edge '{}' references unknown node '{}'", edge.id, edge.target))
            })?;
            dag.add_edge(*from, *to, ());
        }

        let order = stable_topological_order(&dag)?;
        tracing::debug!("📋 Execution order: {:?}", order);

        Ok(Self {
            graph,
            dag,
            node_id_to_index,
            order,
        })
    }

    /// Node ids in execution order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        let index = self.node_id_to_index.get(id)?;
        self.graph.nodes.get(index.index())
    }

    pub fn len(&self) -> usize {
        self.graph.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.nodes.is_empty()
    }

    /// Direct predecessors in declaration order, without duplicates
    pub fn predecessors(&self, id: &str) -> Vec<String> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<String> {
        let Some(&index) = self.node_id_to_index.get(id) else {
            return Vec::new();
        };
        let unique: BTreeSet<NodeIndex> = self.dag.neighbors_directed(index, direction).collect();
        unique.into_iter().map(|i| self.dag[i].clone()).collect()
    }
}

/// Kahn's algorithm with the ready set ordered by node index (declaration order)
///
/// Any node left unordered sits on or behind a cycle.
fn stable_topological_order(dag: &DiGraph<String, ()>) -> EngineResult<Vec<String>> {
    let mut in_degree: Vec<usize> = dag
        .node_indices()
        .map(|i| dag.neighbors_directed(i, Direction::Incoming).count())
        .collect();

    let mut ready: BTreeSet<NodeIndex> = dag.node_indices().filter(|i| in_degree[i.index()] == 0).collect();
    let mut order = Vec::with_capacity(dag.node_count());

    while let Some(current) = ready.pop_first() {
        order.push(dag[current].clone());
        for next in dag.neighbors_directed(current, Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < dag.node_count() {
        let stuck = dag
            .node_indices()
            .find(|i| in_degree[i.index()] > 0)
            .map(|i| dag[i].clone())
            .unwrap_or_default();
        tracing::error!("❌ Workflow contains a cycle (first blocked node: {})", stuck);
        return Err(EngineError::GraphCycle(stuck));
    }

    Ok(order)
}

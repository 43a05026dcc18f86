use std::collections::HashSet;

use petgraph::{
    stable_graph::{NodeIndex, StableGraph},
    visit::EdgeRef,
    Direction,
};

use crate::{error::Result, graph::Module};

pub trait Compiler {
    /// Name used in logs
    fn name(&self) -> &'static str;
    /// Run a compilation pass over every computation in `threads`, returning whether anything changed
    fn compile(&self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool>;
}

impl Compiler for () {
    fn name(&self) -> &'static str {
        "noop"
    }
    fn compile(&self, _: &mut Module, _: &ExecutionThreads) -> Result<bool> {
        Ok(false)
    }
}

macro_rules! tuple_impls {
    ([$($name:ident),+] , [$($idx:tt),+]) => {
        impl<
        $($name:
            Compiler, )+
        > Compiler for ($($name,)+) {
            fn name(&self) -> &'static str {
                "pipeline"
            }
            fn compile(&self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool> {
                let mut changed = false;
                $(
                    let c = self.$idx.compile(module, threads)?;
                    tracing::debug!(pass = self.$idx.name(), changed = c, "ran pass");
                    changed |= c;
                )+
                Ok(changed)
            }
        }
    };
}

tuple_impls!([M1], [0]);
tuple_impls!([M1, M2], [0, 1]);
tuple_impls!([M1, M2, M3], [0, 1, 2]);
tuple_impls!([M1, M2, M3, M4], [0, 1, 2, 3]);
tuple_impls!([M1, M2, M3, M4, M5], [0, 1, 2, 3, 4]);
tuple_impls!([M1, M2, M3, M4, M5, M6], [0, 1, 2, 3, 4, 5]);

/// The execution threads a pass is allowed to touch. An empty set means every thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionThreads(HashSet<String>);

impl ExecutionThreads {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<S: ToString>(threads: impl IntoIterator<Item = S>) -> Self {
        Self(threads.into_iter().map(|s| s.to_string()).collect())
    }

    pub fn contains(&self, thread: &str) -> bool {
        self.0.is_empty() || self.0.contains(thread)
    }
}

/// Move the outgoing edges of `from` that pass `filter` over to `to`, keeping their weights
pub fn move_outgoing_edges<N, E: Clone>(
    from: NodeIndex,
    to: NodeIndex,
    graph: &mut StableGraph<N, E>,
    filter: impl Fn(NodeIndex, &E) -> bool,
) {
    for (edge, weight, target) in graph
        .edges_directed(from, Direction::Outgoing)
        .filter(|e| filter(e.target(), e.weight()))
        .map(|e| (e.id(), e.weight().clone(), e.target()))
        .collect::<Vec<_>>()
    {
        graph.remove_edge(edge);
        graph.add_edge(to, target, weight);
    }
}

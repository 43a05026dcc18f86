use std::{
    collections::HashSet,
    fmt::{Display, Write},
};

use itertools::Itertools;
use petgraph::{
    algo::toposort,
    stable_graph::{NodeIndex, StableGraph},
    visit::{EdgeRef, IntoEdgeReferences},
    Direction,
};
use regex::Regex;

use crate::{
    compiler_utils::{move_outgoing_edges, ExecutionThreads},
    error::{CompileError, Result},
    op::{AllGather, Op, ReplicaGroup},
    shape::Shape,
};

pub type InstructionGraph = StableGraph<Instruction, Dependency>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ComputationId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Actual data dependency, the user consumes the source as operand `operand_index`
    Data { operand_index: u8 },
    /// Implicit dependency for ordering
    Control,
}

impl Dependency {
    pub fn as_data(self) -> Option<u8> {
        match self {
            Self::Data { operand_index } => Some(operand_index),
            Self::Control => None,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Self::Control)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub name: String,
    pub op: Op,
    pub shape: Shape,
}

impl Instruction {
    pub fn new(name: impl ToString, op: Op, shape: impl Into<Shape>) -> Self {
        Self {
            name: name.to_string(),
            op,
            shape: shape.into(),
        }
    }

    pub fn parameter(index: usize, name: impl ToString, shape: impl Into<Shape>) -> Self {
        Self::new(name, Op::Parameter(index), shape)
    }

    pub fn reshape(name: impl ToString, shape: impl Into<Shape>) -> Self {
        Self::new(name, Op::Reshape, shape)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn all_gather(
        name: impl ToString,
        shape: impl Into<Shape>,
        all_gather_dimension: usize,
        replica_groups: Vec<ReplicaGroup>,
        constrain_layout: bool,
        channel_id: Option<u64>,
        use_global_device_ids: bool,
    ) -> Self {
        Self::new(
            name,
            Op::AllGather(AllGather {
                all_gather_dimension,
                replica_groups,
                constrain_layout,
                channel_id,
                use_global_device_ids,
            }),
            shape,
        )
    }

    pub fn call(name: impl ToString, computation: ComputationId, shape: impl Into<Shape>) -> Self {
        Self::new(name, Op::Call(computation), shape)
    }

    pub fn custom(
        name: impl ToString,
        target: impl ToString,
        shape: impl Into<Shape>,
        has_side_effect: bool,
    ) -> Self {
        Self::new(
            name,
            Op::Custom {
                name: target.to_string(),
                has_side_effect,
            },
            shape,
        )
    }
}

/// A function-like subgraph of instructions with a single root
#[derive(Debug, Clone, Default)]
pub struct Computation {
    pub name: String,
    pub execution_thread: String,
    /// Edges point from operand to user
    pub graph: InstructionGraph,
    root: Option<NodeIndex>,
}

impl Computation {
    pub const MAIN_THREAD: &'static str = "main";

    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            execution_thread: Self::MAIN_THREAD.to_string(),
            ..Default::default()
        }
    }

    pub fn with_execution_thread(mut self, thread: impl ToString) -> Self {
        self.execution_thread = thread.to_string();
        self
    }

    pub fn add_op(&mut self, instruction: Instruction) -> NewOp {
        NewOp {
            new_op_id: self.graph.add_node(instruction),
            computation: self,
            num_operands: 0,
        }
    }

    pub fn add_instruction(&mut self, instruction: Instruction, operands: &[NodeIndex]) -> NodeIndex {
        operands
            .iter()
            .fold(self.add_op(instruction), |op, o| op.input(*o))
            .finish()
    }

    /// Create a control dependency so `a` is scheduled before `b`
    pub fn add_control_dependency(&mut self, a: NodeIndex, b: NodeIndex) {
        self.graph.add_edge(a, b, Dependency::Control);
    }

    pub fn contains(&self, node: NodeIndex) -> bool {
        self.graph.contains_node(node)
    }

    pub fn instruction(&self, node: NodeIndex) -> Result<&Instruction> {
        self.graph
            .node_weight(node)
            .ok_or_else(|| self.missing(node))
    }

    pub fn instruction_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn instructions(&self) -> impl Iterator<Item = (NodeIndex, &Instruction)> {
        self.graph
            .node_indices()
            .map(|n| (n, &self.graph[n]))
    }

    /// Get the operands of an instruction, in operand order
    pub fn operands(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .filter_map(|e| e.weight().as_data().map(|i| (e.source(), i)))
            .sorted_by_key(|(_, i)| *i)
            .map(|(n, _)| n)
            .collect()
    }

    /// Get the distinct users of an instruction, oldest first
    pub fn users(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .filter(|e| !e.weight().is_control())
            .map(|e| e.target())
            .sorted()
            .dedup()
            .collect()
    }

    pub fn user_count(&self, node: NodeIndex) -> usize {
        self.users(node).len()
    }

    /// Parameters ordered by their parameter number
    pub fn parameters(&self) -> Vec<NodeIndex> {
        self.instructions()
            .filter_map(|(n, inst)| match inst.op {
                Op::Parameter(i) => Some((i, n)),
                _ => None,
            })
            .sorted()
            .map(|(_, n)| n)
            .collect()
    }

    pub fn root_instruction(&self) -> Option<NodeIndex> {
        self.root
    }

    pub fn set_root(&mut self, node: NodeIndex) -> Result<()> {
        if !self.contains(node) {
            return Err(self.missing(node));
        }
        self.root = Some(node);
        Ok(())
    }

    /// Every instruction, operands before users
    pub fn make_instruction_post_order(&self) -> Result<Vec<NodeIndex>> {
        toposort(&self.graph, None).map_err(|_| CompileError::Cycle(self.name.clone()))
    }

    /// Redirect every data use of `old` to `new`. Control dependencies stay where they are.
    pub fn replace_all_uses(&mut self, old: NodeIndex, new: NodeIndex) -> Result<()> {
        let old_inst = self.instruction(old)?;
        let new_inst = self.instruction(new)?;
        if old == new {
            return Err(CompileError::SelfReplacement(old_inst.name.clone()));
        }
        if old_inst.shape != new_inst.shape {
            return Err(CompileError::ShapeMismatch {
                old: old_inst.name.clone(),
                old_shape: old_inst.shape.clone(),
                new: new_inst.name.clone(),
                new_shape: new_inst.shape.clone(),
            });
        }
        // The replacement may itself consume `old`, that use has to stay
        move_outgoing_edges(old, new, &mut self.graph, |target, dep| {
            target != new && !dep.is_control()
        });
        Ok(())
    }

    pub fn remove_instruction(&mut self, node: NodeIndex) -> Option<Instruction> {
        if self.root == Some(node) {
            self.root = None;
        }
        self.graph.remove_node(node)
    }

    /// Convert to debug-viewable graph
    pub fn debug_graph(&self, show_shapes: bool) -> StableGraph<String, u8> {
        let mut new_graph = StableGraph::default();
        let op_regex = Regex::new(r"(?s)\{.*|\(.*").unwrap();
        let id_map = self
            .instructions()
            .map(|(id, inst)| {
                let mut label = format!(
                    "{} {}",
                    op_regex.replace_all(&format!("{:?}", inst.op), ""),
                    inst.name
                );
                if show_shapes {
                    label.push_str(&format!(" | {:?}", inst.shape));
                }
                if self.root == Some(id) {
                    label.insert_str(0, "ROOT ");
                }
                (id, new_graph.add_node(label))
            })
            .collect::<std::collections::HashMap<_, _>>();
        for edge in self.graph.edge_references() {
            if let Some(operand_index) = edge.weight().as_data() {
                new_graph.add_edge(
                    id_map[&edge.source()],
                    id_map[&edge.target()],
                    operand_index,
                );
            }
        }
        new_graph
    }

    pub fn display(&self) -> std::io::Result<()> {
        display_graph(&self.debug_graph(false))
    }

    pub fn display_shapes(&self) -> std::io::Result<()> {
        display_graph(&self.debug_graph(true))
    }

    fn missing(&self, node: NodeIndex) -> CompileError {
        CompileError::MissingInstruction {
            computation: self.name.clone(),
            node,
        }
    }
}

impl Display for Computation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} {{", self.name)?;
        let order = self
            .make_instruction_post_order()
            .unwrap_or_else(|_| self.graph.node_indices().collect());
        for node in order {
            let inst = &self.graph[node];
            let mut line = String::new();
            if self.root == Some(node) {
                line.push_str("ROOT ");
            }
            let operands = self
                .operands(node)
                .into_iter()
                .map(|o| format!("%{}", self.graph[o].name))
                .join(", ");
            match &inst.op {
                Op::Parameter(i) => write!(line, "%{} = {} parameter({i})", inst.name, inst.shape)?,
                Op::AllGather(all_gather) => write!(
                    line,
                    "%{} = {} all-gather({operands}), {all_gather}",
                    inst.name, inst.shape
                )?,
                Op::Call(c) => write!(
                    line,
                    "%{} = {} call({operands}), to_apply={}",
                    inst.name, inst.shape, c.0
                )?,
                op => write!(line, "%{} = {} {op}({operands})", inst.name, inst.shape)?,
            }
            writeln!(f, "  {line}")?;
        }
        write!(f, "}}")
    }
}

pub struct NewOp<'a> {
    new_op_id: NodeIndex,
    computation: &'a mut Computation,
    num_operands: u8,
}

impl<'a> NewOp<'a> {
    pub fn finish(self) -> NodeIndex {
        self.new_op_id
    }

    pub fn input(mut self, id: NodeIndex) -> Self {
        self.computation.graph.add_edge(
            id,
            self.new_op_id,
            Dependency::Data {
                operand_index: self.num_operands,
            },
        );
        self.num_operands += 1;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    pub replica_count: usize,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self { replica_count: 1 }
    }
}

/// A whole program: computations calling each other, one of them the entry point
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub config: ModuleConfig,
    computations: Vec<Computation>,
    entry: Option<ComputationId>,
}

impl Module {
    pub fn new(name: impl ToString, replica_count: usize) -> Self {
        Self {
            name: name.to_string(),
            config: ModuleConfig { replica_count },
            ..Default::default()
        }
    }

    pub fn add_computation(&mut self, computation: Computation) -> ComputationId {
        self.computations.push(computation);
        ComputationId(self.computations.len() - 1)
    }

    /// Add a computation and make it the entry point
    pub fn add_entry_computation(&mut self, computation: Computation) -> ComputationId {
        let id = self.add_computation(computation);
        self.entry = Some(id);
        id
    }

    pub fn entry(&self) -> Option<ComputationId> {
        self.entry
    }

    pub fn computation(&self, id: ComputationId) -> Result<&Computation> {
        self.computations
            .get(id.0)
            .ok_or(CompileError::MissingComputation(id.0))
    }

    pub fn computation_mut(&mut self, id: ComputationId) -> Result<&mut Computation> {
        self.computations
            .get_mut(id.0)
            .ok_or(CompileError::MissingComputation(id.0))
    }

    pub fn computations(&self) -> impl Iterator<Item = (ComputationId, &Computation)> {
        self.computations
            .iter()
            .enumerate()
            .map(|(i, c)| (ComputationId(i), c))
    }

    pub fn instruction_count(&self) -> usize {
        self.computations.iter().map(|c| c.instruction_count()).sum()
    }

    /// Computations in the given threads, callees before their callers
    pub fn make_computation_post_order(&self, threads: &ExecutionThreads) -> Vec<ComputationId> {
        fn visit(
            module: &Module,
            id: ComputationId,
            visited: &mut HashSet<ComputationId>,
            order: &mut Vec<ComputationId>,
        ) {
            if !visited.insert(id) {
                return;
            }
            let Some(computation) = module.computations.get(id.0) else {
                return;
            };
            for callee in computation
                .instructions()
                .filter_map(|(n, inst)| match inst.op {
                    Op::Call(c) => Some((n, c)),
                    _ => None,
                })
                .sorted()
                .map(|(_, c)| c)
            {
                visit(module, callee, visited, order);
            }
            order.push(id);
        }

        let mut visited = HashSet::new();
        let mut order = vec![];
        for i in 0..self.computations.len() {
            visit(self, ComputationId(i), &mut visited, &mut order);
        }
        order
            .into_iter()
            .filter(|id| threads.contains(&self.computations[id.0].execution_thread))
            .collect()
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "module {}, replica_count={}", self.name, self.config.replica_count)?;
        for (id, computation) in self.computations() {
            if self.entry == Some(id) {
                write!(f, "ENTRY ")?;
            }
            writeln!(f, "{computation}")?;
        }
        Ok(())
    }
}

/// View a debug graph in the browser
pub fn display_graph(graph: &StableGraph<String, u8>) -> std::io::Result<()> {
    webbrowser::open(&graphviz_url(graph))
}

/// Link to the graph rendered by the Graphviz web viewer
pub fn graphviz_url(graph: &StableGraph<String, u8>) -> String {
    format!(
        "https://dreampuf.github.io/GraphvizOnline/#{}",
        urlencoding::encode(
            &petgraph::dot::Dot::with_config(graph, &[petgraph::dot::Config::EdgeNoLabel])
                .to_string()
        )
    )
}

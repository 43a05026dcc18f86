use std::collections::BTreeMap;

use petgraph::stable_graph::NodeIndex;
use tracing::{debug, trace};

use crate::{
    compilers::RemoveUnusedNodes,
    op::{AllGather, Op},
    prelude::*,
};

/// Collective rewrites, followed by the cleanup they rely on
pub type ReorderCompiler = (CollectiveTransformationReorder,);

/// A reshape that can be moved across the collective it follows, along with the collective
/// dimension once the reshape has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectiveTransformation {
    pub instruction: NodeIndex,
    pub transformed_collective_dimension: usize,
}

pub type TransformationChain = Vec<CollectiveTransformation>;

/// Move reshapes that follow an all-gather to before it, so the all-gather directly produces the
/// final shape.
///
/// ```text
/// p = f32[1,8] parameter(0)
/// ag = f32[4,8] all-gather(p), dimensions={0}
/// r = f32[4,2,4] reshape(ag)
/// ```
/// becomes
/// ```text
/// p = f32[1,8] parameter(0)
/// r = f32[1,2,4] reshape(p)
/// ag = f32[4,2,4] all-gather(r), dimensions={0}
/// ```
///
/// Only reshapes that keep both the number of row-major blocks before the gather dimension and the
/// gather dimension's size unchanged are moved. Merging other dimensions into the gather dimension
/// isn't supported.
#[derive(Debug, Default)]
pub struct CollectiveTransformationReorder;

/// The rewrite planned for one all-gather
struct Plan {
    all_gather: NodeIndex,
    name: String,
    shape: Shape,
    op: AllGather,
    transformations: TransformationChain,
}

impl CollectiveTransformationReorder {
    pub fn run(&self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool> {
        self.reorder_all_gather_transformations(module, threads)
    }

    fn reorder_all_gather_transformations(
        &self,
        module: &mut Module,
        threads: &ExecutionThreads,
    ) -> Result<bool> {
        // Plan every rewrite before touching the graph
        let mut plans = BTreeMap::new();
        for id in module.make_computation_post_order(threads) {
            let computation = module.computation(id)?;
            for node in computation.make_instruction_post_order()? {
                let inst = computation.instruction(node)?;
                let Op::AllGather(all_gather) = &inst.op else {
                    continue;
                };
                if computation.operands(node).len() != 1 {
                    continue;
                }
                if let Some(transformations) = all_gather_transformations(computation, node)? {
                    debug!(
                        computation = %computation.name,
                        all_gather = %inst.name,
                        reshapes = transformations.len(),
                        "planned all-gather reorder"
                    );
                    plans.insert(
                        (id, node),
                        Plan {
                            all_gather: node,
                            name: inst.name.clone(),
                            shape: inst.shape.clone(),
                            op: all_gather.clone(),
                            transformations,
                        },
                    );
                }
            }
        }
        if plans.is_empty() {
            return Ok(false);
        }

        for ((id, _), plan) in plans {
            rewrite(module.computation_mut(id)?, plan)?;
        }

        // Remove the original all-gathers and reshapes
        RemoveUnusedNodes.compile(module, threads)?;
        Ok(true)
    }
}

impl Compiler for CollectiveTransformationReorder {
    fn name(&self) -> &'static str {
        "collective-transformation-reorder"
    }

    fn compile(&self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool> {
        self.run(module, threads)
    }
}

/// Follow the single-user chain of reshapes hanging off `all_gather`
pub fn find_reshape_chain(computation: &Computation, all_gather: NodeIndex) -> Vec<NodeIndex> {
    let mut chain = vec![];
    let mut current = all_gather;
    loop {
        let [user] = computation.users(current)[..] else {
            break;
        };
        if !computation.graph[user].op.is_reshape() {
            break;
        }
        chain.push(user);
        current = user;
    }
    chain
}

/// Find where the all-gather dimension lands if the all-gather were applied after `reshaped`.
///
/// The reshape is movable when some output dimension starts after the same number of row-major
/// blocks as `all_gather_dimension` does in `all_gather_shape`, and has the same size.
///
/// Unit dimensions sitting right where the gathered dimension would start are skipped over, so
/// `[4,8] -> [1,4,8]` maps dimension 0 to 1. A plain stride scan would stop at the unit dimension
/// and reject that reshape.
pub fn reshaped_all_gather_dimension(
    all_gather_shape: &Shape,
    all_gather_dimension: usize,
    reshaped: &Shape,
) -> Option<usize> {
    if all_gather_dimension >= all_gather_shape.rank() {
        return None;
    }
    let all_gather_num_strides = all_gather_shape.stride_count(all_gather_dimension);
    let all_gather_size = all_gather_shape.dim(all_gather_dimension);
    let mut dim = 0;
    let mut num_strides = 1;
    while dim < reshaped.rank() && num_strides < all_gather_num_strides {
        num_strides *= reshaped.dim(dim);
        dim += 1;
    }
    if num_strides != all_gather_num_strides {
        return None;
    }
    // Unit dimensions don't change the block count, so the gathered dimension may sit after them
    while dim < reshaped.rank() && reshaped.dim(dim) == 1 && all_gather_size != 1 {
        dim += 1;
    }
    // TODO: support merging the dimensions that follow the all-gather dimension into it
    (dim < reshaped.rank() && reshaped.dim(dim) == all_gather_size).then_some(dim)
}

/// The reshapes after `all_gather` that can be moved before it, or `None` if there are none
pub fn all_gather_transformations(
    computation: &Computation,
    all_gather: NodeIndex,
) -> Result<Option<TransformationChain>> {
    let inst = computation.instruction(all_gather)?;
    let Op::AllGather(op) = &inst.op else {
        return Ok(None);
    };
    let mut shape = &inst.shape;
    let mut dimension = op.all_gather_dimension;
    let mut transformations = vec![];
    for node in find_reshape_chain(computation, all_gather) {
        let reshape = computation.instruction(node)?;
        let Some(new_dimension) = reshaped_all_gather_dimension(shape, dimension, &reshape.shape)
        else {
            trace!(reshape = %reshape.name, from = ?shape, to = ?reshape.shape, "reshape changes the all-gather dimension");
            break;
        };
        transformations.push(CollectiveTransformation {
            instruction: node,
            transformed_collective_dimension: new_dimension,
        });
        shape = &reshape.shape;
        dimension = new_dimension;
    }
    Ok((!transformations.is_empty()).then_some(transformations))
}

/// Reshape the all-gather's operand instead of its result, then gather the reshaped operand
fn rewrite(computation: &mut Computation, plan: Plan) -> Result<NodeIndex> {
    let Plan {
        all_gather: planned,
        name,
        shape,
        op: mut all_gather,
        transformations,
    } = plan;
    // Earlier rewrites may have replaced the operand
    let [mut operand] = computation.operands(planned)[..] else {
        return Err(CompileError::InvalidInstruction {
            instruction: name,
            reason: "all-gather no longer has a single operand".to_string(),
        });
    };
    let gathered_size = shape.dim(all_gather.all_gather_dimension);
    for transformation in &transformations {
        let reshape = computation.instruction(transformation.instruction)?;
        let per_replica_size = computation
            .instruction(operand)?
            .shape
            .dim(all_gather.all_gather_dimension);
        let reshaped = Instruction::reshape(
            format!("{}.operand", reshape.name),
            reshape
                .shape
                .clone()
                .with_dim(transformation.transformed_collective_dimension, per_replica_size),
        );
        operand = computation.add_instruction(reshaped, &[operand]);
        all_gather.all_gather_dimension = transformation.transformed_collective_dimension;
    }

    let new_shape = computation
        .instruction(operand)?
        .shape
        .clone()
        .with_dim(all_gather.all_gather_dimension, gathered_size);
    let last = transformations
        .last()
        .map(|t| t.instruction)
        .ok_or_else(|| CompileError::InvalidInstruction {
            instruction: name.clone(),
            reason: "planned without any transformations".to_string(),
        })?;
    let new_all_gather = computation.add_instruction(
        Instruction::new(
            format!("{name}.reordered"),
            Op::AllGather(all_gather),
            new_shape,
        ),
        &[operand],
    );
    computation.replace_all_uses(last, new_all_gather)?;
    if computation.root_instruction() == Some(last) {
        computation.set_root(new_all_gather)?;
    }
    debug!(computation = %computation.name, all_gather = %name, "moved reshapes before all-gather");
    Ok(new_all_gather)
}

use itertools::Itertools;
use petgraph::Direction;

use crate::{op::Op, prelude::*};

/// Generic platform-agnostic cleanups. It's a good idea to use these all the time.
pub type GenericCompiler = (RemoveUnusedNodes,);

/// Remove instructions nothing depends on. The root, parameters and side-effecting instructions
/// are always kept alive, along with everything they reach.
#[derive(Debug, Default)]
pub struct RemoveUnusedNodes;

impl Compiler for RemoveUnusedNodes {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn compile(&self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool> {
        let mut removed = 0;
        for id in module.make_computation_post_order(threads) {
            let computation = module.computation_mut(id)?;
            let root = computation
                .root_instruction()
                .ok_or_else(|| CompileError::MissingRoot(computation.name.clone()))?;
            // Reverse topo sort so users go before their operands
            for node in computation
                .make_instruction_post_order()?
                .into_iter()
                .rev()
                .collect_vec()
            {
                let inst = computation.instruction(node)?;
                if node == root
                    || inst.op.has_side_effect()
                    || matches!(inst.op, Op::Parameter(_))
                    || computation
                        .graph
                        .edges_directed(node, Direction::Outgoing)
                        .next()
                        .is_some()
                {
                    continue;
                }
                tracing::trace!(computation = %computation.name, instruction = %inst.name, "removing dead instruction");
                computation.remove_instruction(node);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "removed dead instructions");
        }
        Ok(removed > 0)
    }
}

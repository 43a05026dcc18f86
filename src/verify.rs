use petgraph::stable_graph::NodeIndex;

use crate::{
    error::{CompileError, Result},
    graph::{Computation, Module},
    op::Op,
    shape::Shape,
};

impl Module {
    /// Check that every computation is a well-formed, shape-consistent DAG
    pub fn verify(&self) -> Result<()> {
        for (_, computation) in self.computations() {
            let root = computation
                .root_instruction()
                .ok_or_else(|| CompileError::MissingRoot(computation.name.clone()))?;
            computation.instruction(root)?;
            for node in computation.make_instruction_post_order()? {
                self.verify_instruction(computation, node)?;
            }
        }
        Ok(())
    }

    fn verify_instruction(&self, computation: &Computation, node: NodeIndex) -> Result<()> {
        let inst = computation.instruction(node)?;
        let operands = computation
            .operands(node)
            .into_iter()
            .map(|o| computation.instruction(o).map(|i| &i.shape))
            .collect::<Result<Vec<_>>>()?;
        let invalid = |reason: String| CompileError::InvalidInstruction {
            instruction: inst.name.clone(),
            reason,
        };
        let expect_operands = |n: usize| {
            if operands.len() == n {
                Ok(())
            } else {
                Err(invalid(format!("expected {n} operands, got {}", operands.len())))
            }
        };
        if inst.shape.dims.iter().any(|d| *d == 0) {
            return Err(invalid(format!("zero-sized dimension in {:?}", inst.shape)));
        }

        match &inst.op {
            Op::Parameter(_) => expect_operands(0)?,
            Op::Reshape => {
                expect_operands(1)?;
                if operands[0].n_elements() != inst.shape.n_elements() {
                    return Err(invalid(format!(
                        "can't reshape {:?} to {:?}",
                        operands[0], inst.shape
                    )));
                }
            }
            Op::AllGather(all_gather) => {
                expect_operands(1)?;
                let dim = all_gather.all_gather_dimension;
                if dim >= operands[0].rank() {
                    return Err(invalid(format!(
                        "all-gather dimension {dim} out of range for {:?}",
                        operands[0]
                    )));
                }
                if all_gather
                    .replica_groups
                    .iter()
                    .any(|g| g.replica_ids.len() != all_gather.group_size(self.config.replica_count))
                {
                    return Err(invalid("replica groups differ in size".to_string()));
                }
                let expected = operands[0].clone().with_dim(
                    dim,
                    operands[0].dim(dim) * all_gather.group_size(self.config.replica_count),
                );
                if expected != inst.shape {
                    return Err(invalid(format!(
                        "all-gather of {:?} should produce {expected:?}, not {:?}",
                        operands[0], inst.shape
                    )));
                }
            }
            Op::Exp2 | Op::Log2 => {
                expect_operands(1)?;
                same_shape(&inst.shape, &operands).map_err(invalid)?;
            }
            Op::Add | Op::Mul => {
                expect_operands(2)?;
                same_shape(&inst.shape, &operands).map_err(invalid)?;
            }
            Op::Call(callee) => {
                let callee = self.computation(*callee)?;
                let params = callee
                    .parameters()
                    .into_iter()
                    .map(|p| callee.instruction(p).map(|i| &i.shape))
                    .collect::<Result<Vec<_>>>()?;
                if params != operands {
                    return Err(invalid(format!(
                        "call operands {operands:?} don't match parameters {params:?} of `{}`",
                        callee.name
                    )));
                }
                let root = callee
                    .root_instruction()
                    .ok_or_else(|| CompileError::MissingRoot(callee.name.clone()))?;
                if callee.instruction(root)?.shape != inst.shape {
                    return Err(invalid(format!("`{}` returns a different shape", callee.name)));
                }
            }
            Op::Custom { .. } => {}
        }
        Ok(())
    }
}

fn same_shape(shape: &Shape, operands: &[&Shape]) -> std::result::Result<(), String> {
    match operands.iter().find(|o| **o != shape) {
        Some(o) => Err(format!("operand {o:?} doesn't match {shape:?}")),
        None => Ok(()),
    }
}

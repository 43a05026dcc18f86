use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;

use crate::{
    error::{CompileError, Result},
    graph::{ComputationId, Module},
    op::Op,
    tensor::Tensor,
};

impl Module {
    /// Run the entry computation on every replica in lockstep. `args[r][i]` is parameter `i` of
    /// replica `r`, and the root value of each replica is returned.
    pub fn execute(&self, args: Vec<Vec<Tensor>>) -> Result<Vec<Tensor>> {
        let entry = self
            .entry()
            .ok_or_else(|| CompileError::Evaluation("module has no entry computation".to_string()))?;
        if args.len() != self.config.replica_count {
            return Err(CompileError::Evaluation(format!(
                "got arguments for {} replicas, module has {}",
                args.len(),
                self.config.replica_count
            )));
        }
        self.execute_computation(entry, &args)
    }

    fn execute_computation(&self, id: ComputationId, args: &[Vec<Tensor>]) -> Result<Vec<Tensor>> {
        let computation = self.computation(id)?;
        let root = computation
            .root_instruction()
            .ok_or_else(|| CompileError::MissingRoot(computation.name.clone()))?;
        let replicas = args.len();
        let mut values: HashMap<NodeIndex, Vec<Tensor>> = HashMap::new();
        for node in computation.make_instruction_post_order()? {
            let inst = computation.instruction(node)?;
            let srcs = computation
                .operands(node)
                .into_iter()
                .map(|o| {
                    values.get(&o).ok_or_else(|| {
                        CompileError::Evaluation(format!("operand of `{}` wasn't computed", inst.name))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let unary = |f: fn(f32) -> f32| -> Result<Vec<Tensor>> {
                let [a] = srcs[..] else {
                    return Err(arity(&inst.name, 1, srcs.len()));
                };
                Ok(a.iter()
                    .map(|t| Tensor {
                        shape: t.shape.clone(),
                        data: t.data.iter().copied().map(f).collect(),
                    })
                    .collect())
            };
            let binary = |f: fn(f32, f32) -> f32| -> Result<Vec<Tensor>> {
                let [a, b] = srcs[..] else {
                    return Err(arity(&inst.name, 2, srcs.len()));
                };
                a.iter()
                    .zip(b)
                    .map(|(a, b)| {
                        if a.shape != b.shape {
                            return Err(CompileError::Evaluation(format!(
                                "`{}` got mismatched shapes {:?} and {:?}",
                                inst.name, a.shape, b.shape
                            )));
                        }
                        Ok(Tensor {
                            shape: a.shape.clone(),
                            data: a.data.iter().zip(&b.data).map(|(a, b)| f(*a, *b)).collect(),
                        })
                    })
                    .collect()
            };

            let outputs = match &inst.op {
                Op::Parameter(i) => args
                    .iter()
                    .map(|replica_args| {
                        replica_args.get(*i).cloned().ok_or_else(|| {
                            CompileError::Evaluation(format!("missing argument for parameter {i}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                Op::Reshape => {
                    let [a] = srcs[..] else {
                        return Err(arity(&inst.name, 1, srcs.len()));
                    };
                    a.iter()
                        .map(|t| t.reshape(&inst.shape))
                        .collect::<Result<Vec<_>>>()?
                }
                Op::AllGather(all_gather) => {
                    let [a] = srcs[..] else {
                        return Err(arity(&inst.name, 1, srcs.len()));
                    };
                    (0..replicas)
                        .map(|r| {
                            let group = all_gather.group_of(r, replicas).ok_or_else(|| {
                                CompileError::Evaluation(format!(
                                    "replica {r} isn't in any group of `{}`",
                                    inst.name
                                ))
                            })?;
                            let parts = group
                                .iter()
                                .map(|m| {
                                    a.get(*m).ok_or_else(|| {
                                        CompileError::Evaluation(format!("replica {m} doesn't exist"))
                                    })
                                })
                                .collect::<Result<Vec<_>>>()?;
                            Tensor::concat(all_gather.all_gather_dimension, &parts)
                        })
                        .collect::<Result<Vec<_>>>()?
                }
                Op::Exp2 => unary(f32::exp2)?,
                Op::Log2 => unary(f32::log2)?,
                Op::Add => binary(|a, b| a + b)?,
                Op::Mul => binary(|a, b| a * b)?,
                Op::Call(callee) => {
                    let callee_args = (0..replicas)
                        .map(|r| srcs.iter().map(|s| s[r].clone()).collect::<Vec<_>>())
                        .collect::<Vec<_>>();
                    self.execute_computation(*callee, &callee_args)?
                }
                Op::Custom { name, .. } => {
                    return Err(CompileError::Evaluation(format!(
                        "custom op `{name}` can't be evaluated"
                    )))
                }
            };
            if let Some(t) = outputs.iter().find(|t| t.shape != inst.shape) {
                return Err(CompileError::Evaluation(format!(
                    "`{}` produced {:?} but is declared as {:?}",
                    inst.name, t.shape, inst.shape
                )));
            }
            values.insert(node, outputs);
        }
        values.remove(&root).ok_or_else(|| {
            CompileError::Evaluation(format!("root of `{}` wasn't computed", computation.name))
        })
    }
}

fn arity(name: &str, expected: usize, got: usize) -> CompileError {
    CompileError::Evaluation(format!("`{name}` expects {expected} operands, got {got}"))
}

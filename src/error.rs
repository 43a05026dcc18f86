use petgraph::stable_graph::NodeIndex;
use thiserror::Error;

use crate::shape::Shape;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("instruction {node:?} does not exist in computation `{computation}`")]
    MissingInstruction {
        computation: String,
        node: NodeIndex,
    },
    #[error("computation {0} does not exist in the module")]
    MissingComputation(usize),
    #[error("computation `{0}` has no root instruction")]
    MissingRoot(String),
    #[error("computation `{0}` contains a cycle")]
    Cycle(String),
    #[error("cannot replace the uses of `{0}` with itself")]
    SelfReplacement(String),
    #[error("cannot replace `{old}` ({old_shape:?}) with `{new}` ({new_shape:?}): shapes differ")]
    ShapeMismatch {
        old: String,
        old_shape: Shape,
        new: String,
        new_shape: Shape,
    },
    #[error("invalid instruction `{instruction}`: {reason}")]
    InvalidInstruction { instruction: String, reason: String },
    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;

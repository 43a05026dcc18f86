pub mod compiler_utils;
pub mod compilers;
pub mod error;
mod execute;
pub mod graph;
pub mod op;
pub mod shape;
pub mod tensor;
mod verify;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::compiler_utils::*;
    pub use crate::compilers::*;
    pub use crate::error::*;
    pub use crate::graph::*;
    pub use crate::op::Op;
    pub use crate::shape::*;
    pub use crate::tensor::*;
    pub use petgraph::stable_graph::NodeIndex;
}

use std::fmt::Display;

use itertools::Itertools;

use crate::graph::ComputationId;

/// The set of instruction kinds the graph understands. Anything the rewrites don't need to look
/// inside of lives in [`Op::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Op {
    /// Positional computation argument
    Parameter(usize),
    /// Row-major reinterpretation of the operand under the instruction's shape
    Reshape,
    AllGather(AllGather),
    Exp2,
    Log2,
    Add,
    Mul,
    /// Invoke another computation with the operands as its parameters
    Call(ComputationId),
    /// An opaque op. Side-effecting customs are never removed as dead code.
    Custom {
        name: String,
        has_side_effect: bool,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        self.into()
    }

    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            Op::Custom {
                has_side_effect: true,
                ..
            }
        )
    }

    pub fn is_reshape(&self) -> bool {
        matches!(self, Op::Reshape)
    }

    pub fn as_all_gather(&self) -> Option<&AllGather> {
        match self {
            Op::AllGather(all_gather) => Some(all_gather),
            _ => None,
        }
    }
}

/// Every participant in a replica group receives the concatenation, along `all_gather_dimension`,
/// of the operand contributed by each member of its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllGather {
    pub all_gather_dimension: usize,
    /// Empty means a single group containing every replica
    pub replica_groups: Vec<ReplicaGroup>,
    pub constrain_layout: bool,
    pub channel_id: Option<u64>,
    pub use_global_device_ids: bool,
}

impl AllGather {
    pub fn new(all_gather_dimension: usize, replica_groups: Vec<ReplicaGroup>) -> Self {
        Self {
            all_gather_dimension,
            replica_groups,
            constrain_layout: false,
            channel_id: None,
            use_global_device_ids: false,
        }
    }

    /// Number of participants in each group, given the module's replica count
    pub fn group_size(&self, replica_count: usize) -> usize {
        self.replica_groups
            .first()
            .map(|g| g.replica_ids.len())
            .unwrap_or(replica_count)
    }

    /// Members of the group `replica` belongs to, in gather order
    pub fn group_of(&self, replica: usize, replica_count: usize) -> Option<Vec<usize>> {
        if self.replica_groups.is_empty() {
            return (replica < replica_count).then(|| (0..replica_count).collect());
        }
        self.replica_groups
            .iter()
            .find(|g| g.replica_ids.contains(&replica))
            .map(|g| g.replica_ids.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ReplicaGroup {
    pub replica_ids: Vec<usize>,
}

impl ReplicaGroup {
    pub fn new(replica_ids: impl IntoIterator<Item = usize>) -> Self {
        Self {
            replica_ids: replica_ids.into_iter().collect(),
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Custom { name, .. } => write!(f, "custom-call[{name}]"),
            op => write!(f, "{}", op.name()),
        }
    }
}

impl Display for AllGather {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dimensions={{{}}}, replica_groups={{{}}}",
            self.all_gather_dimension,
            self.replica_groups
                .iter()
                .map(|g| format!("{{{}}}", g.replica_ids.iter().join(",")))
                .join(",")
        )?;
        if let Some(channel_id) = self.channel_id {
            write!(f, ", channel_id={channel_id}")?;
        }
        if self.constrain_layout {
            write!(f, ", constrain_layout=true")?;
        }
        if self.use_global_device_ids {
            write!(f, ", use_global_device_ids=true")?;
        }
        Ok(())
    }
}

use crate::{op::ReplicaGroup, prelude::*};

/// Per-replica parameter -> all-gather -> chain of reshapes, the last reshape being the root
pub fn gather_reshapes(
    operand: &[usize],
    dim: usize,
    replicas: usize,
    reshapes: &[&[usize]],
) -> (Module, ComputationId) {
    let mut module = Module::new("gather_reshapes", replicas);
    let mut c = Computation::new("entry");
    let p = c.add_instruction(Instruction::parameter(0, "p", operand.to_vec()), &[]);
    let gathered = Shape::new(operand).with_dim(dim, operand[dim] * replicas);
    let mut prev = c.add_instruction(
        Instruction::all_gather("ag", gathered, dim, vec![], false, None, false),
        &[p],
    );
    for (i, shape) in reshapes.iter().enumerate() {
        prev = c.add_instruction(Instruction::reshape(format!("r{i}"), shape.to_vec()), &[prev]);
    }
    c.set_root(prev).unwrap();
    let id = module.add_entry_computation(c);
    (module, id)
}

/// all-gather over dimension 0 of [4, 8] from per-replica [1, 8], reshaped to [4, 2, 4] and consumed
/// by an exp
pub fn end_to_end() -> Module {
    let mut module = Module::new("end_to_end", 4);
    let mut c = Computation::new("entry");
    let p = c.add_instruction(Instruction::parameter(0, "p", [1, 8]), &[]);
    let ag = c.add_instruction(
        Instruction::all_gather("ag", [4, 8], 0, vec![], false, None, false),
        &[p],
    );
    let r = c.add_instruction(Instruction::reshape("r", [4, 2, 4]), &[ag]);
    let exp = c.add_instruction(Instruction::new("exp", Op::Exp2, [4, 2, 4]), &[r]);
    c.set_root(exp).unwrap();
    module.add_entry_computation(c);
    module
}

/// all-gather -> a (movable) -> b (merges the gather dimension) -> two consumers
pub fn truncated_chain() -> Module {
    let mut module = Module::new("truncated_chain", 2);
    let mut c = Computation::new("entry");
    let p = c.add_instruction(Instruction::parameter(0, "p", [1, 3, 4]), &[]);
    let ag = c.add_instruction(
        Instruction::all_gather("ag", [2, 3, 4], 0, vec![], false, None, false),
        &[p],
    );
    let a = c.add_instruction(Instruction::reshape("a", [2, 3, 2, 2]), &[ag]);
    let b = c.add_instruction(Instruction::reshape("b", [6, 4]), &[a]);
    let exp = c.add_instruction(Instruction::new("exp", Op::Exp2, [6, 4]), &[b]);
    let mul = c.add_instruction(Instruction::new("mul", Op::Mul, [6, 4]), &[b, b]);
    let add = c.add_instruction(Instruction::new("add", Op::Add, [6, 4]), &[exp, mul]);
    c.set_root(add).unwrap();
    module.add_entry_computation(c);
    module
}

/// Two independent all-gathers in the entry and one inside a called computation, all with grouped
/// replicas and collective attributes set
pub fn many_gathers() -> Module {
    let groups = vec![ReplicaGroup::new([0, 1]), ReplicaGroup::new([2, 3])];
    let mut module = Module::new("many_gathers", 4);

    let mut body = Computation::new("body");
    let x = body.add_instruction(Instruction::parameter(0, "x", [2, 6]), &[]);
    let ag = body.add_instruction(
        Instruction::all_gather("body_ag", [2, 12], 1, groups.clone(), true, Some(7), true),
        &[x],
    );
    let r = body.add_instruction(Instruction::reshape("body_r", [2, 12, 1]), &[ag]);
    let r = body.add_instruction(Instruction::reshape("body_r2", [2, 4, 3]), &[r]);
    body.set_root(r).unwrap();
    let body = module.add_computation(body);

    let mut c = Computation::new("entry");
    let p0 = c.add_instruction(Instruction::parameter(0, "p0", [2, 6]), &[]);
    let p1 = c.add_instruction(Instruction::parameter(1, "p1", [3, 4]), &[]);
    let call = c.add_instruction(Instruction::call("call", body, [2, 4, 3]), &[p0]);
    let ag0 = c.add_instruction(
        Instruction::all_gather("ag0", [3, 8], 1, groups.clone(), false, Some(1), false),
        &[p1],
    );
    let r0 = c.add_instruction(Instruction::reshape("r0", [3, 8, 1]), &[ag0]);
    let r0 = c.add_instruction(Instruction::reshape("r0_lead", [1, 3, 8]), &[r0]);
    let ag1 = c.add_instruction(
        Instruction::all_gather("ag1", [2, 12], 1, groups, false, None, true),
        &[p0],
    );
    let r1 = c.add_instruction(Instruction::reshape("r1", [24]), &[ag1]);
    let r2 = c.add_instruction(Instruction::reshape("r2", [2, 4, 3]), &[r1]);
    let r3 = c.add_instruction(Instruction::reshape("r3", [24]), &[r0]);
    let r3 = c.add_instruction(Instruction::reshape("r3_back", [2, 4, 3]), &[r3]);
    let sum = c.add_instruction(Instruction::new("sum", Op::Add, [2, 4, 3]), &[call, r2]);
    let sum = c.add_instruction(Instruction::new("sum2", Op::Add, [2, 4, 3]), &[sum, r3]);
    c.set_root(sum).unwrap();
    module.add_entry_computation(c);
    module
}

/// Nothing to reorder anywhere
pub fn no_collectives() -> Module {
    let mut module = Module::new("no_collectives", 1);
    let mut c = Computation::new("entry");
    let p = c.add_instruction(Instruction::parameter(0, "p", [2, 4]), &[]);
    let r = c.add_instruction(Instruction::reshape("r", [8]), &[p]);
    let exp = c.add_instruction(Instruction::new("exp", Op::Exp2, [8]), &[r]);
    c.set_root(exp).unwrap();
    module.add_entry_computation(c);
    module
}

/// Two all-gathers in sequence over 2 replicas, each followed by one reshape:
/// p -> ag1 (on `dim1`) -> r1 -> ag2 (on `dim2`) -> r2
pub fn sequential_gathers(
    operand: &[usize],
    dim1: usize,
    r1: &[usize],
    dim2: usize,
    r2: &[usize],
) -> Module {
    let mut module = Module::new("sequential_gathers", 2);
    let mut c = Computation::new("entry");
    let p = c.add_instruction(Instruction::parameter(0, "p", operand.to_vec()), &[]);
    let gathered = Shape::new(operand).with_dim(dim1, operand[dim1] * 2);
    let ag1 = c.add_instruction(
        Instruction::all_gather("ag1", gathered, dim1, vec![], false, None, false),
        &[p],
    );
    let r1_node = c.add_instruction(Instruction::reshape("r1", r1.to_vec()), &[ag1]);
    let gathered = Shape::new(r1).with_dim(dim2, r1[dim2] * 2);
    let ag2 = c.add_instruction(
        Instruction::all_gather("ag2", gathered, dim2, vec![], false, None, false),
        &[r1_node],
    );
    let r2 = c.add_instruction(Instruction::reshape("r2", r2.to_vec()), &[ag2]);
    c.set_root(r2).unwrap();
    module.add_entry_computation(c);
    module
}

/// Sequential all-gathers whose rewrites leave nothing further to move
pub fn sequential_gathers_settled() -> Module {
    sequential_gathers(&[2, 1, 4], 1, &[2, 2, 2, 2], 0, &[4, 4, 2])
}

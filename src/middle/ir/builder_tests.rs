//! Tests for SSA construction: phi placement at joins, incomplete phis and
//! sealing, trivial-phi removal, the deferred-label protocol and register
//! compaction.

use super::{
    builder::{IrBuilder, IrLabel},
    BlockIndex, IrArgSize, IrCond, IrFunction, IrIndex, IrKind, IrType,
};
use crate::frontend::{
    ast::{AstIndex, BasicTypeKind},
    intern::IdentId,
};

fn new_func() -> IrFunction {
    IrFunction::new(IdentId(0), AstIndex::UNDEFINED)
}

fn i32_ty() -> IrType {
    IrType::basic(BasicTypeKind::I32)
}

fn const_i32(value: i64) -> IrIndex {
    IrIndex::small_constant(value, BasicTypeKind::I32).unwrap()
}

/// Every live vreg must have exactly one definition and a user set matching
/// the multiset of its operand occurrences
fn check_single_definition(func: &IrFunction) {
    use hashbrown::HashMap;

    let mut uses: HashMap<u32, usize> = HashMap::new();

    for instr in func.instructions.indices() {
        for arg in func.instr_args(instr) {
            if arg.kind() == IrKind::VirtReg {
                *uses.entry(arg.payload()).or_default() += 1;
            }
        }
    }
    for phi in func.phis.iter() {
        // Removed phis are unlinked; only count reachable ones
        let in_block = func
            .block_phis(phi.block)
            .iter()
            .any(|p| func.phis[*p].result == phi.result);
        if !in_block {
            continue;
        }
        for arg in func.arrays.handles(phi.args) {
            if arg.kind() == IrKind::VirtReg {
                *uses.entry(arg.payload()).or_default() += 1;
            }
        }
    }

    for (index, vreg) in func.virt_regs.enumerate() {
        assert!(!vreg.is_removed(), "finalize left a removed vreg behind");

        // The definition must reference this register as its result
        match vreg.definition.kind() {
            IrKind::Instruction => {
                let result = func.instr_result(vreg.definition.as_instr());
                assert_eq!(result, Some(IrIndex::virt_reg(index)));
            }
            IrKind::Phi => {
                let phi = &func.phis[vreg.definition.as_phi()];
                assert_eq!(phi.result, IrIndex::virt_reg(index));
            }
            kind => panic!("vreg defined by {kind:?}"),
        }

        let expected = uses.get(&index.0).copied().unwrap_or(0);
        assert_eq!(
            vreg.users.len as usize, expected,
            "user set of %{} does not match operand occurrences",
            index.0
        );
    }
}

#[test]
fn diamond_produces_one_phi_with_ordered_operands() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(Some(i32_ty()), false);

    let entry = b.entry_block();
    let x = b.func.new_variable(i32_ty());
    b.write_variable(entry, x, const_i32(1));

    // if (c) x = 2; else x = 3;
    let mut then_label = IrLabel::new();
    let mut else_label = IrLabel::new();
    let mut merge_label = IrLabel::new();

    b.add_bin_branch(entry, IrCond::SGt, IrArgSize::S32, const_i32(7), const_i32(0));
    b.add_branch_to_label(entry, &mut then_label);
    b.add_branch_to_label(entry, &mut else_label);

    let then_block = b.label_block(&mut then_label);
    b.seal_block(then_block);
    b.write_variable(then_block, x, const_i32(2));
    b.add_jump_to_label(then_block, &mut merge_label);

    let else_block = b.label_block(&mut else_label);
    b.seal_block(else_block);
    b.write_variable(else_block, x, const_i32(3));
    b.add_jump_to_label(else_block, &mut merge_label);

    let merge = b.label_block(&mut merge_label);
    b.seal_block(merge);

    let value = b.read_variable(merge, x);
    assert_eq!(value.kind(), IrKind::VirtReg);

    // Exactly one phi in the merge block, arity = predecessor count,
    // operands positionally parallel to the predecessors
    let phis = b.func.block_phis(merge);
    assert_eq!(phis.len(), 1);

    let phi = &b.func.phis[phis[0]];
    assert_eq!(phi.result, value);
    assert_eq!(
        phi.args.len,
        b.func.block(merge).predecessors.len,
        "phi arity must equal predecessor count"
    );

    let args: Vec<IrIndex> = b.func.arrays.handles(phi.args).collect();
    assert_eq!(args, vec![const_i32(2), const_i32(3)]);

    // Close out the function: the merged value is the return value
    let ret_var = b.ret_var;
    b.write_variable(merge, x, value);
    b.write_variable(merge, ret_var, value);
    b.add_return(merge);
    b.seal_block(b.exit_block());
    b.finalize();

    check_single_definition(&func);
}

#[test]
fn single_predecessor_reads_are_short_circuited() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(None, false);

    let entry = b.entry_block();
    let x = b.func.new_variable(i32_ty());
    b.write_variable(entry, x, const_i32(42));

    // entry -> next (single predecessor)
    let next = b.func.add_block();
    b.add_block_target(entry, next);
    b.add_jump(entry);
    b.seal_block(next);

    // The read must resolve through the predecessor without materializing
    // a phi
    let value = b.read_variable(next, x);
    assert_eq!(value, const_i32(42));
    assert!(b.func.block_phis(next).is_empty());
}

#[test]
fn loop_with_invariant_variable_removes_the_trivial_phi() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(None, false);

    let entry = b.entry_block();
    let x = b.func.new_variable(i32_ty());
    b.write_variable(entry, x, const_i32(5));

    let vregs_before = b.func.live_vreg_count();

    // entry -> header; header -> {body, exit-ish}; body -> header
    let header = b.func.add_block();
    b.add_block_target(entry, header);
    b.add_jump(entry);

    // Reading in the unsealed header creates an incomplete phi
    let header_value = b.read_variable(header, x);
    assert_eq!(header_value.kind(), IrKind::VirtReg);

    let body = b.func.add_block();
    let after = b.func.add_block();
    b.add_unary_branch(header, IrCond::NotZero, IrArgSize::S32, header_value);
    b.add_block_target(header, body);
    b.add_block_target(header, after);
    b.seal_block(body);

    // The body never writes x; its back edge completes the header
    b.add_block_target(body, header);
    b.add_jump(body);
    b.seal_block(header);
    b.seal_block(after);

    // Sealing found the phi trivial: reads now resolve to the pre-loop
    // definition directly
    let after_value = b.read_variable(after, x);
    assert_eq!(after_value, const_i32(5));
    assert!(b.func.block_phis(header).is_empty());

    b.add_jump(after);
    let exit = b.exit_block();
    b.add_block_target(after, exit);
    b.seal_block(exit);
    b.finalize();

    // The phi's register was compacted away: the count matches what existed
    // before the loop was generated
    assert_eq!(b.func.live_vreg_count(), vregs_before);
    check_single_definition(&func);
}

#[test]
fn deferred_label_inherits_its_sole_predecessor() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(None, false);

    let entry = b.entry_block();
    let blocks_before = b.func.blocks.len();

    // A single jump to an unallocated label allocates nothing
    let mut label = IrLabel::new();
    b.add_jump_to_label(entry, &mut label);

    assert!(!label.allocated);
    assert_eq!(label.num_preds, 1);
    assert_eq!(b.label_block(&mut label), entry);
    assert_eq!(b.func.blocks.len(), blocks_before);
    assert!(!b.func.block(entry).is_finished());
}

#[test]
fn second_jump_materializes_the_label_block() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(None, false);

    let entry = b.entry_block();
    let other = b.func.add_block();
    b.seal_block(other);

    let mut label = IrLabel::new();
    b.add_jump_to_label(entry, &mut label);
    b.add_jump_to_label(other, &mut label);

    assert!(label.allocated);
    assert_eq!(label.num_preds, 2);

    let merge = label.block;
    assert_ne!(merge, entry);
    assert_ne!(merge, other);
    assert_eq!(b.func.block(merge).predecessors.len, 2);

    // Both predecessors were finished with jumps
    assert!(b.func.block(entry).is_finished());
    assert!(b.func.block(other).is_finished());
}

#[test]
#[should_panic(expected = "sealed")]
fn adding_a_predecessor_to_a_sealed_block_is_a_contract_violation() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(None, false);

    let entry = b.entry_block();
    // The entry block is sealed by `begin`
    let other = b.func.add_block();
    b.add_block_target(other, entry);
}

#[test]
#[should_panic(expected = "finished")]
fn finishing_a_block_twice_is_a_contract_violation() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(None, false);

    let entry = b.entry_block();
    let target = b.func.add_block();
    b.add_block_target(entry, target);
    b.add_jump(entry);
    b.add_jump(entry);
}

#[test]
fn terminators_are_unique_and_last() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(None, false);

    let entry = b.entry_block();
    let (_, _) = b.emit(
        entry,
        super::IrOpcode::Add,
        IrCond::None,
        IrArgSize::S32,
        &[const_i32(1), const_i32(2)],
        Some(i32_ty()),
    );
    b.add_return(entry);
    b.seal_block(b.exit_block());

    let instrs = b.func.block_instrs(entry);
    let terminators: Vec<_> = instrs
        .iter()
        .filter(|i| b.func.instructions[**i].op.is_terminator())
        .collect();

    assert_eq!(terminators.len(), 1);
    assert_eq!(
        *terminators[0],
        *instrs.last().unwrap(),
        "the terminator must be the last instruction"
    );
}

#[test]
fn entry_and_exit_blocks_have_fixed_indices() {
    let mut func = new_func();
    let mut b = IrBuilder::new(&mut func);
    b.begin(Some(i32_ty()), false);

    assert_eq!(b.entry_block().as_block(), BlockIndex(0));
    assert_eq!(b.exit_block().as_block(), BlockIndex(1));
    assert!(b.func.block(b.entry_block()).is_sealed());
    assert!(b.func.block(b.exit_block()).is_finished());

    // A non-void function reads its return variable in the exit block
    // through an incomplete phi until sealing
    assert!(b.ret_var.is_defined());
}

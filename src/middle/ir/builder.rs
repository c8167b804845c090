//! Direct SSA construction from unstructured control flow, after Braun,
//! Buchwald et al. Values are written and read through SSA variables; reads
//! in blocks without a local definition recurse into predecessors, placing
//! phis at join points. Blocks whose predecessor set is not yet final receive
//! *incomplete* phis which are completed when the block is sealed. Phis that
//! turn out to merge a single value are removed on the fly.

use hashbrown::HashMap;

use super::{
    BlockFlags, InstrFlags, InstrHeader, IrArgSize, IrCond, IrFunction, IrIndex, IrKind, IrOpcode,
    IrType, PhiIndex, VregFlags,
};
use crate::index::Index;

/// Per-function SSA construction state layered over the function's arenas
pub struct IrBuilder<'f> {
    pub func: &'f mut IrFunction,
    /// `(block, variable) -> value`; scratch for the duration of one function
    block_var_def: HashMap<(u32, u32), IrIndex>,
    /// Implicit return variable, defined iff the return type is non-void
    pub ret_var: IrIndex,
}

/// Deferred jump target used by the statement generator. As long as a label
/// has a single, unallocated predecessor the generator keeps emitting into
/// that predecessor directly, which avoids empty fall-through blocks.
#[derive(Debug, Clone, Copy)]
pub struct IrLabel {
    pub block: IrIndex,
    pub num_preds: u32,
    pub allocated: bool,
}

impl IrLabel {
    pub fn new() -> Self {
        Self {
            block: IrIndex::NONE,
            num_preds: 0,
            allocated: false,
        }
    }
}

impl Default for IrLabel {
    fn default() -> Self {
        Self::new()
    }
}

impl<'f> IrBuilder<'f> {
    pub fn new(func: &'f mut IrFunction) -> Self {
        Self {
            func,
            block_var_def: HashMap::new(),
            ret_var: IrIndex::NONE,
        }
    }

    /// Allocates entry and exit blocks and emits the function epilogue into
    /// the exit block. The entry block is sealed immediately; the exit block
    /// is finished here and sealed once every return has been wired.
    pub fn begin(&mut self, return_type: Option<IrType>, is_noreturn: bool) {
        let entry = self.func.add_block();
        let exit = self.func.add_block();
        debug_assert_eq!(entry.as_block(), IrFunction::ENTRY);
        debug_assert_eq!(exit.as_block(), IrFunction::EXIT);

        if is_noreturn {
            self.add_unreachable(exit);
        } else if let Some(ty) = return_type {
            self.ret_var = self.func.new_variable(ty);

            // Reading in the unsealed exit block leaves an incomplete phi
            // that picks up one operand per return once the exit is sealed
            let value = self.read_variable(exit, self.ret_var);
            self.emit(
                exit,
                IrOpcode::RetVal,
                IrCond::None,
                IrArgSize::S64,
                &[value],
                None,
            );
            self.func.block_mut(exit).flags.insert(BlockFlags::FINISHED);
        } else {
            self.emit(exit, IrOpcode::Ret, IrCond::None, IrArgSize::S64, &[], None);
            self.func.block_mut(exit).flags.insert(BlockFlags::FINISHED);
        }

        self.seal_block(entry);
    }

    pub fn entry_block(&self) -> IrIndex {
        IrIndex::block(IrFunction::ENTRY)
    }

    pub fn exit_block(&self) -> IrIndex {
        IrIndex::block(IrFunction::EXIT)
    }

    /* ───── variable primitives ───── */

    pub fn write_variable(&mut self, block: IrIndex, var: IrIndex, value: IrIndex) {
        debug_assert_eq!(var.kind(), IrKind::Variable);
        self.block_var_def
            .insert((block.payload(), var.payload()), value);
    }

    pub fn read_variable(&mut self, block: IrIndex, var: IrIndex) -> IrIndex {
        debug_assert_eq!(var.kind(), IrKind::Variable);

        if let Some(value) = self.block_var_def.get(&(block.payload(), var.payload())) {
            return *value;
        }

        self.read_variable_recursive(block, var)
    }

    fn read_variable_recursive(&mut self, block: IrIndex, var: IrIndex) -> IrIndex {
        let value;

        if !self.func.block(block).is_sealed() {
            // Incomplete phi; operands arrive when the block is sealed
            let phi = self.add_phi(block, var);
            value = self.func.phis[phi].result;
            self.write_variable(block, var, value);
        } else if self.func.block(block).predecessors.len == 1 {
            let pred = self.func.arrays.get(self.func.block(block).predecessors, 0);
            value = self.read_variable(pred, var);
            self.write_variable(block, var, value);
        } else {
            // Break potential cycles with an operandless phi before recursing
            let phi = self.add_phi(block, var);
            let result = self.func.phis[phi].result;
            self.write_variable(block, var, result);

            value = self.add_phi_operands(phi);
            self.write_variable(block, var, value);
        }

        value
    }

    /// Creates an empty phi in `block` merging `var`, linked at the front of
    /// the block's phi list
    fn add_phi(&mut self, block: IrIndex, var: IrIndex) -> PhiIndex {
        let ty = self.func.variable_types[var.payload() as usize];

        let phi_index = self.func.phis.next_index();
        let phi_handle = IrIndex::phi(phi_index);
        let result = self.func.new_virt_reg(phi_handle, ty);

        let old_first = self.func.block(block).first_phi;
        self.func.phis.push(super::IrPhi {
            block,
            result,
            var,
            args: super::IrSmallArray::EMPTY,
            prev_phi: IrIndex::NONE,
            next_phi: old_first,
        });

        if old_first.is_defined() {
            self.func.phis[old_first.as_phi()].prev_phi = phi_handle;
        }
        self.func.block_mut(block).first_phi = phi_handle;

        phi_index
    }

    /// Appends one operand per predecessor (positionally parallel to the
    /// predecessor list) and then checks the phi for triviality
    fn add_phi_operands(&mut self, phi: PhiIndex) -> IrIndex {
        let phi_handle = IrIndex::phi(phi);
        let block = self.func.phis[phi].block;
        let var = self.func.phis[phi].var;

        let preds: Vec<IrIndex> = self
            .func
            .arrays
            .handles(self.func.block(block).predecessors)
            .collect();

        for pred in preds {
            let arg = self.read_variable(pred, var);

            let mut args = self.func.phis[phi].args;
            self.func.arrays.push(&mut args, arg);
            self.func.phis[phi].args = args;

            self.func.add_user(arg, phi_handle);
        }

        self.try_remove_trivial_phi(phi)
    }

    /// If the phi merges a single value (arguments are all that value or the
    /// phi itself), reroutes every user to the value, removes the phi and
    /// retries its phi users. Returns the value the phi's result stands for.
    pub fn try_remove_trivial_phi(&mut self, phi: PhiIndex) -> IrIndex {
        let phi_handle = IrIndex::phi(phi);
        let result = self.func.phis[phi].result;

        // Recursive retries may reach a phi that was removed along the way
        if self.func.virt_regs[result.as_vreg()].is_removed() {
            return result;
        }

        let mut same = IrIndex::NONE;

        for arg in self.func.arrays.handles(self.func.phis[phi].args) {
            if arg == same || arg == result {
                continue;
            }
            if same.is_defined() {
                // Merges at least two distinct values: not trivial
                return result;
            }
            same = arg;
        }

        // The phi no longer uses its arguments
        let args: Vec<IrIndex> = self.func.arrays.handles(self.func.phis[phi].args).collect();
        for arg in args {
            self.func.remove_user(arg, phi_handle);
        }

        // Reroute every user of the phi's result to `same`
        let users: Vec<IrIndex> = self
            .func
            .arrays
            .handles(self.func.virt_regs[result.as_vreg()].users)
            .collect();

        for user in &users {
            match user.kind() {
                IrKind::Instruction => {
                    let instr = user.as_instr();
                    let num_args = self.func.instructions[instr].num_args as usize;
                    for i in 0..num_args {
                        if self.func.instr_arg(instr, i) == result {
                            self.func.set_instr_arg(instr, i, same);
                            self.func.add_user(same, *user);
                        }
                    }
                }
                IrKind::Phi => {
                    let user_phi = user.as_phi();
                    let args = self.func.phis[user_phi].args;
                    let replaced = self.func.arrays.replace_all(args, result, same);
                    for _ in 0..replaced {
                        self.func.add_user(same, *user);
                    }
                }
                kind => unreachable!("vreg user is neither instruction nor phi: {kind:?}"),
            }
        }

        // Definitions recorded for the phi's result now stand for `same`
        for value in self.block_var_def.values_mut() {
            if *value == result {
                *value = same;
            }
        }

        self.remove_phi(phi);

        // Users that are phis may have become trivial themselves
        for user in users {
            if user.kind() == IrKind::Phi && user != phi_handle {
                self.try_remove_trivial_phi(user.as_phi());
            }
        }

        same
    }

    /// Unlinks the phi from its block and tombstones its result register;
    /// the register arena is compacted by [`IrBuilder::finalize`]
    fn remove_phi(&mut self, phi: PhiIndex) {
        let result = self.func.phis[phi].result;
        let block = self.func.phis[phi].block;
        let prev = self.func.phis[phi].prev_phi;
        let next = self.func.phis[phi].next_phi;

        if prev.is_defined() {
            self.func.phis[prev.as_phi()].next_phi = next;
        } else {
            self.func.block_mut(block).first_phi = next;
        }
        if next.is_defined() {
            self.func.phis[next.as_phi()].prev_phi = prev;
        }

        let vreg = &mut self.func.virt_regs[result.as_vreg()];
        vreg.flags.insert(VregFlags::REMOVED);
        self.func.num_removed_vregs += 1;
    }

    /* ───── sealing and block wiring ───── */

    /// Declares the block's predecessor set final, completing every
    /// incomplete phi. Sealing twice is a no-op.
    pub fn seal_block(&mut self, block: IrIndex) {
        if self.func.block(block).is_sealed() {
            return;
        }

        for phi in self.func.block_phis(block) {
            self.add_phi_operands(phi);
        }

        self.func.block_mut(block).flags.insert(BlockFlags::SEALED);
    }

    /// Wires a CFG edge in both directions. The target must not be sealed.
    pub fn add_block_target(&mut self, from: IrIndex, to: IrIndex) {
        assert!(
            !self.func.block(to).is_sealed(),
            "cannot add a predecessor to a sealed block"
        );

        let mut successors = self.func.block(from).successors;
        self.func.arrays.push(&mut successors, to);
        self.func.block_mut(from).successors = successors;

        let mut predecessors = self.func.block(to).predecessors;
        self.func.arrays.push(&mut predecessors, from);
        self.func.block_mut(to).predecessors = predecessors;
    }

    /* ───── instruction emission ───── */

    /// Appends an instruction to `block`, laying out `[result?, args...]` in
    /// the payload arena and linking it into the block's instruction list.
    /// Returns the instruction handle and its result register (or undefined).
    pub fn emit(
        &mut self,
        block: IrIndex,
        op: IrOpcode,
        cond: IrCond,
        arg_size: IrArgSize,
        args: &[IrIndex],
        result_ty: Option<IrType>,
    ) -> (IrIndex, IrIndex) {
        assert!(
            !self.func.block(block).is_finished(),
            "cannot append to a finished block"
        );

        let instr_index = self.func.instructions.next_index();
        let instr_handle = IrIndex::instruction(instr_index);

        let payload_offset = self.func.payload.len() as u32;
        let mut flags = InstrFlags::empty();
        let mut result = IrIndex::NONE;

        if let Some(ty) = result_ty {
            flags.insert(InstrFlags::HAS_RESULT);
            result = self.func.new_virt_reg(instr_handle, ty);
            self.func.payload.push(result);
        }
        self.func.payload.extend_from_slice(args);

        self.func.instructions.push(InstrHeader {
            op,
            cond,
            arg_size,
            payload_offset,
            num_args: args.len() as u8,
            flags,
        });

        for arg in args {
            self.func.add_user(*arg, instr_handle);
        }

        // Link into the block's doubly linked list; termini point back at
        // the block's own handle
        let last = self.func.block(block).last_instr;
        self.func.next_instr.push(block);
        self.func.prev_instr.push(if last.is_defined() { last } else { block });

        if last.is_defined() && last.kind() == IrKind::Instruction {
            self.func.next_instr[last.payload() as usize] = instr_handle;
        } else {
            self.func.block_mut(block).first_instr = instr_handle;
        }
        self.func.block_mut(block).last_instr = instr_handle;

        (instr_handle, result)
    }

    fn finish(&mut self, block: IrIndex) {
        let flags = &mut self.func.block_mut(block).flags;
        assert!(
            !flags.contains(BlockFlags::FINISHED),
            "block is already finished"
        );
        flags.insert(BlockFlags::FINISHED);
    }

    /* ───── terminators ───── */

    pub fn add_jump(&mut self, block: IrIndex) {
        self.emit(block, IrOpcode::Jump, IrCond::None, IrArgSize::S64, &[], None);
        self.finish(block);
    }

    /// Branch on `value` being zero / non-zero; targets are wired separately
    pub fn add_unary_branch(
        &mut self,
        block: IrIndex,
        cond: IrCond,
        arg_size: IrArgSize,
        value: IrIndex,
    ) {
        debug_assert!(matches!(cond, IrCond::Zero | IrCond::NotZero));
        self.emit(block, IrOpcode::BranchUnary, cond, arg_size, &[value], None);
        self.finish(block);
    }

    pub fn add_bin_branch(
        &mut self,
        block: IrIndex,
        cond: IrCond,
        arg_size: IrArgSize,
        lhs: IrIndex,
        rhs: IrIndex,
    ) {
        self.emit(
            block,
            IrOpcode::BranchBinary,
            cond,
            arg_size,
            &[lhs, rhs],
            None,
        );
        self.finish(block);
    }

    /// A `return` in the middle of the function: jump to the exit block
    pub fn add_return(&mut self, block: IrIndex) {
        self.add_block_target(block, self.exit_block());
        self.add_jump(block);
    }

    pub fn add_unreachable(&mut self, block: IrIndex) {
        self.emit(
            block,
            IrOpcode::Unreachable,
            IrCond::None,
            IrArgSize::S64,
            &[],
            None,
        );
        self.finish(block);
    }

    /* ───── label protocol ───── */

    /// Materializes a block for `label`. A deferred single predecessor gets a
    /// jump into the new block.
    fn force_label_block(&mut self, label: &mut IrLabel) -> IrIndex {
        if label.allocated {
            return label.block;
        }

        if label.num_preds == 0 {
            label.block = self.func.add_block();
            label.allocated = true;
        } else {
            // One deferred predecessor inherited the label; give the label a
            // real block and wire the deferred block into it
            debug_assert_eq!(label.num_preds, 1);
            let deferred = label.block;
            let block = self.func.add_block();
            self.add_block_target(deferred, block);
            self.add_jump(deferred);
            label.block = block;
            label.allocated = true;
        }

        label.block
    }

    /// Jump from `from` to `label`. The first jump to an unallocated label is
    /// deferred: the label simply inherits `from`, saving a redundant block.
    pub fn add_jump_to_label(&mut self, from: IrIndex, label: &mut IrLabel) {
        if label.allocated {
            self.add_block_target(from, label.block);
            self.add_jump(from);
            label.num_preds += 1;
        } else if label.num_preds == 0 {
            label.block = from;
            label.num_preds = 1;
        } else {
            self.force_label_block(label);
            self.add_block_target(from, label.block);
            self.add_jump(from);
            label.num_preds += 1;
        }
    }

    /// Wires one successor edge of an already-emitted branch to `label`
    pub fn add_branch_to_label(&mut self, from: IrIndex, label: &mut IrLabel) {
        let target = self.force_label_block(label);
        self.add_block_target(from, target);
        label.num_preds += 1;
    }

    /// The block in which generation continues at `label`. A label that
    /// inherited its sole predecessor continues in that block directly. The
    /// caller seals the block once it knows no further predecessors arrive.
    pub fn label_block(&mut self, label: &mut IrLabel) -> IrIndex {
        if label.allocated || label.num_preds == 1 {
            return label.block;
        }

        // Unreached label (e.g. code after an infinite loop): give it an
        // empty sealed block with no predecessors
        let block = self.force_label_block(label);
        self.seal_block(block);
        block
    }

    /* ───── finalize ───── */

    /// Compacts the virtual register arena: live registers from the right are
    /// swapped into removed holes from the left while redirecting their
    /// definitions and users, then the arena is truncated
    pub fn finalize(&mut self) {
        if self.func.num_removed_vregs == 0 {
            return;
        }

        let mut left = 0usize;
        let mut right = self.func.virt_regs.len();

        loop {
            // First hole from the left
            while left < right && !self.func.virt_regs.raw[left].is_removed() {
                left += 1;
            }
            // Last live register from the right
            while right > left && self.func.virt_regs.raw[right - 1].is_removed() {
                right -= 1;
            }
            if left + 1 >= right {
                break;
            }

            let old = IrIndex::virt_reg(super::VregIndex::new(right - 1));
            let new = IrIndex::virt_reg(super::VregIndex::new(left));

            // Move the live register into the hole
            self.func.virt_regs.raw.swap(left, right - 1);

            // Redirect its definition
            let definition = self.func.virt_regs.raw[left].definition;
            match definition.kind() {
                IrKind::Instruction => self.func.set_instr_result(definition.as_instr(), new),
                IrKind::Phi => self.func.phis[definition.as_phi()].result = new,
                kind => unreachable!("vreg defined by {kind:?}"),
            }

            // Redirect every use
            let users: Vec<IrIndex> = self
                .func
                .arrays
                .handles(self.func.virt_regs.raw[left].users)
                .collect();
            for user in users {
                match user.kind() {
                    IrKind::Instruction => {
                        let instr = user.as_instr();
                        let num_args = self.func.instructions[instr].num_args as usize;
                        for i in 0..num_args {
                            if self.func.instr_arg(instr, i) == old {
                                self.func.set_instr_arg(instr, i, new);
                            }
                        }
                    }
                    IrKind::Phi => {
                        let args = self.func.phis[user.as_phi()].args;
                        self.func.arrays.replace_all(args, old, new);
                    }
                    kind => unreachable!("vreg user is {kind:?}"),
                }
            }

            left += 1;
            right -= 1;
        }

        let live = self.func.virt_regs.len() - self.func.num_removed_vregs as usize;
        self.func.virt_regs.truncate(live);
        self.func.num_removed_vregs = 0;
    }
}

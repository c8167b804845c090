//! IR generation: a tree walk over the type-checked AST emitting SSA through
//! the builder. Statement visitors thread the current block and deferred
//! labels; expression visitors return an [`ExprValue`] that is either a
//! plain SSA value or a pointer to storage (locals demoted to stack slots,
//! globals, aggregate fields). Short-circuit operators and the structured
//! control statements all lower through the label protocol.

use hashbrown::{HashMap, HashSet};

use crate::{
    context::CompilationContext,
    diag::CompileResult,
    frontend::ast::{
        AstIndex, AstKind, AstNodes, AttributeKind, BasicTypeKind, BinaryOpKind, CastKind,
        MemberAccessKind, NodeFlags, UnaryOpKind,
    },
    middle::{
        driver,
        eval,
        ir::{
            builder::{IrBuilder, IrLabel},
            ExternKind, GlobalFlags, IrArgSize, IrCond, IrFunction, IrGlobal, IrIndex, IrOpcode,
            IrType,
        },
        layout, type_check,
    },
};

/// Driver entry point for `ir_gen_done`
pub(crate) fn ir_gen(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    match &ctx.ast.node(node).kind {
        AstKind::Module { decls, .. } => {
            let decls = *decls;

            // Reserve handles for every function and global first so that
            // calls (including recursive and forward ones) resolve without
            // generating their target
            reserve_decls(ctx, decls)?;

            for i in 0..decls.len as usize {
                let item = ctx.ast.list_item(decls, i);
                driver::require_ir_gen(ctx, item)?;
            }
            Ok(())
        }

        AstKind::FunctionDecl { .. } => gen_function(ctx, node),

        AstKind::VariableDecl { .. }
            if ctx.ast.node(node).flags.contains(NodeFlags::IS_GLOBAL) =>
        {
            reserve_global(ctx, node);
            Ok(())
        }

        AstKind::StructDecl { members, .. } => {
            let members = *members;
            for i in 0..members.len as usize {
                let member = ctx.ast.list_item(members, i);
                if matches!(ctx.ast.node(member).kind, AstKind::FunctionDecl { .. }) {
                    driver::require_ir_gen(ctx, member)?;
                }
            }
            Ok(())
        }

        // Aliases, enums, imports and plain types produce no IR of their own
        _ => Ok(()),
    }
}

fn reserve_decls(ctx: &mut CompilationContext, decls: AstNodes) -> CompileResult<()> {
    for i in 0..decls.len as usize {
        let item = ctx.ast.list_item(decls, i);
        match &ctx.ast.node(item).kind {
            AstKind::FunctionDecl { .. } => {
                reserve_function(ctx, item);
            }
            AstKind::VariableDecl { .. }
                if ctx.ast.node(item).flags.contains(NodeFlags::IS_GLOBAL) =>
            {
                reserve_global(ctx, item);
            }
            AstKind::StructDecl { members, .. } => {
                let members = *members;
                for m in 0..members.len as usize {
                    let member = ctx.ast.list_item(members, m);
                    if matches!(ctx.ast.node(member).kind, AstKind::FunctionDecl { .. }) {
                        reserve_function(ctx, member);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Assigns the function its IR handle and extern kind without generating the
/// body; safe to call more than once
pub(crate) fn reserve_function(ctx: &mut CompilationContext, decl: AstIndex) -> IrIndex {
    let (name, signature, ir, attrib) = match &ctx.ast.node(decl).kind {
        AstKind::FunctionDecl {
            name,
            signature,
            ir,
            ..
        } => (*name, *signature, *ir, ctx.ast.node(decl).attrib),
        _ => unreachable!("reserving a non-function"),
    };

    if ir.is_defined() {
        return ir;
    }

    let extern_kind = attrib
        .map(|info| {
            let attributes = ctx.ast.attrib_info(info).attributes;
            let mut kind = ExternKind::None;
            for i in 0..attributes.len as usize {
                let attr = ctx.ast.list_item(attributes, i);
                if let AstKind::Attribute { kind: attr_kind } = &ctx.ast.node(attr).kind {
                    kind = match attr_kind {
                        AttributeKind::ExternModule(library) => ExternKind::Module(*library),
                        AttributeKind::ExternSyscall(number) => ExternKind::Syscall(*number),
                    };
                }
            }
            kind
        })
        .unwrap_or(ExternKind::None);

    let index = ctx.ir.functions.push(IrFunction::new(name, signature));
    ctx.ir.function_externs.push(extern_kind);

    let handle = IrIndex::function(index);
    if let AstKind::FunctionDecl { ir: slot, .. } = &mut ctx.ast.node_mut(decl).kind {
        *slot = handle;
    }
    handle
}

/// Materializes a module-level variable as an IR global, initialized from
/// its constant initializer or zeroed
fn reserve_global(ctx: &mut CompilationContext, decl: AstIndex) -> IrIndex {
    if let Some(handle) = ctx.ir.globals_by_decl.get(&decl).copied() {
        return handle;
    }

    let (name, ty, initializer) = match &ctx.ast.node(decl).kind {
        AstKind::VariableDecl {
            name,
            ty,
            initializer,
            ..
        } => (*name, *ty, *initializer),
        _ => unreachable!("reserving a non-variable"),
    };

    let size = layout::size_of(ctx, ty);
    let mut data = vec![0u8; size as usize];

    if initializer.is_defined() {
        if let Ok(value) = eval::eval_static_expr(ctx, initializer) {
            let bytes = value.as_int().to_le_bytes();
            let n = (size as usize).min(bytes.len());
            data[..n].copy_from_slice(&bytes[..n]);
        }
    }

    let ir_ty = layout::ir_type_of(ctx, ty);
    let handle = ctx.ir.add_global(IrGlobal {
        name: Some(name),
        ty: ir_ty,
        data,
        flags: GlobalFlags::empty(),
    });
    ctx.ir.globals_by_decl.insert(decl, handle);
    handle
}

fn gen_function(ctx: &mut CompilationContext, decl: AstIndex) -> CompileResult<()> {
    let handle = reserve_function(ctx, decl);

    let (name, signature, body, scope, template_params) = match &ctx.ast.node(decl).kind {
        AstKind::FunctionDecl {
            name,
            signature,
            body,
            scope,
            template_params,
            ..
        } => (*name, *signature, *body, *scope, *template_params),
        _ => unreachable!(),
    };
    let _ = scope;

    // Extern and templated functions carry no body
    if !body.is_defined() || !template_params.is_empty() {
        return Ok(());
    }

    let (return_type, params) = match &ctx.ast.node(signature).kind {
        AstKind::FunctionSignature {
            return_type,
            params,
        } => (*return_type, *params),
        _ => return Ok(()),
    };

    let temp_mark = ctx.temp.mark();

    let mut func = IrFunction::new(name, signature);
    {
        let mut gen = FuncGen {
            ctx: &mut *ctx,
            b: IrBuilder::new(&mut func),
            vars: HashMap::new(),
            addressed: HashSet::new(),
            loops: Vec::new(),
        };
        gen.run(return_type, params, body)?;
    }

    ctx.ir.functions[handle.as_function()] = func;
    ctx.temp.reset(temp_mark);
    Ok(())
}

/// Storage of a named local: an SSA variable, or a stack slot for
/// aggregates and address-taken locals
#[derive(Debug, Clone, Copy)]
enum VarSlot {
    Variable(IrIndex),
    Slot { addr: IrIndex, ty: AstIndex },
}

/// An expression's generated form
#[derive(Debug, Clone, Copy)]
enum ExprValue {
    Value(IrIndex),
    Ptr { addr: IrIndex, ty: AstIndex },
}

enum ContinueTarget {
    /// `while` jumps straight back to the loop header
    Header(IrIndex),
    /// `for` routes through the increment code
    Label(IrLabel),
}

struct LoopFrame {
    exit: IrLabel,
    cont: ContinueTarget,
}

struct FuncGen<'ctx, 'f> {
    ctx: &'ctx mut CompilationContext,
    b: IrBuilder<'f>,
    vars: HashMap<AstIndex, VarSlot>,
    /// Locals whose address is taken; these live in stack slots
    addressed: HashSet<AstIndex>,
    loops: Vec<LoopFrame>,
}

impl<'ctx, 'f> FuncGen<'ctx, 'f> {
    fn run(
        &mut self,
        return_type: AstIndex,
        params: AstNodes,
        body: AstIndex,
    ) -> CompileResult<()> {
        collect_addressed_locals(self.ctx, body, &mut self.addressed);

        let is_noreturn = type_check::is_noreturn(self.ctx, return_type);
        let returns_value = return_type.is_defined()
            && !type_check::is_noreturn_or_void(self.ctx, return_type);

        let ret_ir_ty = returns_value.then(|| layout::ir_type_of(self.ctx, return_type));
        self.b.begin(ret_ir_ty, is_noreturn);

        let entry = self.b.entry_block();
        let mut cur = entry;

        // Parameters: one Param instruction each, written to an SSA variable
        // (or spilled when address-taken)
        for i in 0..params.len as usize {
            let param = self.ctx.ast.list_item(params, i);
            let (ty, index) = match &self.ctx.ast.node(param).kind {
                AstKind::VariableDecl { ty, index, .. } => (*ty, *index),
                _ => continue,
            };

            let ir_ty = layout::ir_type_of(self.ctx, ty);
            let position = self.ctx.ir.int_constant(index as i64, BasicTypeKind::U32);
            let (_, value) = self.b.emit(
                entry,
                IrOpcode::Param,
                IrCond::None,
                self.arg_size_of(ty),
                &[position],
                Some(ir_ty),
            );

            self.bind_local(param, ty, ir_ty, value, entry);
        }

        self.gen_stmt(body, &mut cur)?;

        // Implicit fall-through return
        if !self.b.func.block(cur).is_finished() {
            self.b.add_return(cur);
        }

        let exit = self.b.exit_block();
        self.b.seal_block(exit);
        self.b.finalize();
        Ok(())
    }

    fn arg_size_of(&self, ty: AstIndex) -> IrArgSize {
        IrArgSize::from_byte_size(layout::size_of(self.ctx, ty))
    }

    /// Binds a declared local (or parameter) to SSA storage
    fn bind_local(
        &mut self,
        decl: AstIndex,
        ty: AstIndex,
        ir_ty: IrType,
        initial: IrIndex,
        block: IrIndex,
    ) {
        let needs_slot = self.addressed.contains(&decl) || layout::is_pass_by_ptr(self.ctx, ty)
            || matches!(
                self.ctx.ast.node(ty).kind,
                AstKind::StructDecl { .. } | AstKind::StaticArrayType { .. }
            );

        if needs_slot {
            let size = layout::size_of(self.ctx, ty);
            let align = layout::align_of(self.ctx, ty);
            let addr = self.b.func.add_stack_slot(ir_ty, size, align);
            self.vars.insert(decl, VarSlot::Slot { addr, ty });

            if initial.is_defined() {
                self.store(block, addr, initial, ty);
            }
        } else {
            let var = self.b.func.new_variable(ir_ty);
            self.vars.insert(decl, VarSlot::Variable(var));
            if initial.is_defined() {
                self.b.write_variable(block, var, initial);
            }
        }
    }

    fn store(&mut self, block: IrIndex, addr: IrIndex, value: IrIndex, ty: AstIndex) {
        self.b.emit(
            block,
            IrOpcode::Store,
            IrCond::None,
            self.arg_size_of(ty),
            &[addr, value],
            None,
        );
    }

    fn load(&mut self, block: IrIndex, value: ExprValue) -> IrIndex {
        match value {
            ExprValue::Value(v) => v,
            ExprValue::Ptr { addr, ty } => {
                let ir_ty = layout::ir_type_of(self.ctx, ty);
                let (_, result) = self.b.emit(
                    block,
                    IrOpcode::Load,
                    IrCond::None,
                    self.arg_size_of(ty),
                    &[addr],
                    Some(ir_ty),
                );
                result
            }
        }
    }

    /* ───── statements ───── */

    fn gen_stmt(&mut self, node: AstIndex, cur: &mut IrIndex) -> CompileResult<()> {
        match &self.ctx.ast.node(node).kind {
            AstKind::Block { statements, .. } => {
                let statements = *statements;
                for i in 0..statements.len as usize {
                    if self.b.func.block(*cur).is_finished() {
                        // Everything after a terminator is unreachable
                        break;
                    }
                    let stmt = self.ctx.ast.list_item(statements, i);
                    self.gen_stmt(stmt, cur)?;
                }
                Ok(())
            }

            AstKind::VariableDecl {
                ty, initializer, ..
            } => {
                let (ty, initializer) = (*ty, *initializer);
                let ir_ty = layout::ir_type_of(self.ctx, ty);

                let initial = if initializer.is_defined() {
                    let value = self.gen_expr(initializer, cur)?;
                    self.load(*cur, value)
                } else {
                    IrIndex::zero(ir_ty)
                };

                self.bind_local(node, ty, ir_ty, initial, *cur);
                Ok(())
            }

            AstKind::IfStmt {
                condition,
                then_branch,
                else_branch,
            } => {
                let (condition, then_branch, else_branch) =
                    (*condition, *then_branch, *else_branch);

                let mut then_label = IrLabel::new();
                let mut else_label = IrLabel::new();
                let mut end_label = IrLabel::new();

                self.gen_branch(condition, &mut then_label, &mut else_label, cur)?;

                let mut then_block = self.resume_at(&mut then_label);
                self.gen_stmt(then_branch, &mut then_block)?;
                if !self.b.func.block(then_block).is_finished() {
                    self.b.add_jump_to_label(then_block, &mut end_label);
                }

                let mut else_block = self.resume_at(&mut else_label);
                if else_branch.is_defined() {
                    self.gen_stmt(else_branch, &mut else_block)?;
                }
                if !self.b.func.block(else_block).is_finished() {
                    self.b.add_jump_to_label(else_block, &mut end_label);
                }

                *cur = self.resume_at(&mut end_label);
                Ok(())
            }

            AstKind::WhileStmt { condition, body } => {
                let (condition, body) = (*condition, *body);

                // The header gets its back edge only after the body, so it
                // stays unsealed until then
                let header = self.b.func.add_block();
                self.b
                    .func
                    .block_mut(header)
                    .flags
                    .insert(super::BlockFlags::LOOP_HEADER);
                self.b.add_block_target(*cur, header);
                self.b.add_jump(*cur);

                let mut body_label = IrLabel::new();
                let mut exit_label = IrLabel::new();

                let mut header_end = header;
                self.gen_branch(condition, &mut body_label, &mut exit_label, &mut header_end)?;

                let mut body_block = self.resume_at(&mut body_label);
                self.loops.push(LoopFrame {
                    exit: exit_label,
                    cont: ContinueTarget::Header(header),
                });
                self.gen_stmt(body, &mut body_block)?;
                let frame = self.loops.pop().expect("loop frame pushed above");
                exit_label = frame.exit;

                if !self.b.func.block(body_block).is_finished() {
                    self.b.add_block_target(body_block, header);
                    self.b.add_jump(body_block);
                }

                self.b.seal_block(header);

                *cur = self.resume_at(&mut exit_label);
                Ok(())
            }

            AstKind::ForStmt {
                init,
                condition,
                increment,
                body,
                ..
            } => {
                let (init, condition, increment, body) = (*init, *condition, *increment, *body);

                for i in 0..init.len as usize {
                    let stmt = self.ctx.ast.list_item(init, i);
                    self.gen_stmt(stmt, cur)?;
                }

                let header = self.b.func.add_block();
                self.b
                    .func
                    .block_mut(header)
                    .flags
                    .insert(super::BlockFlags::LOOP_HEADER);
                self.b.add_block_target(*cur, header);
                self.b.add_jump(*cur);

                let mut body_label = IrLabel::new();
                let mut exit_label = IrLabel::new();
                let cont_label = IrLabel::new();

                let mut header_end = header;
                if condition.is_defined() {
                    self.gen_branch(
                        condition,
                        &mut body_label,
                        &mut exit_label,
                        &mut header_end,
                    )?;
                } else {
                    self.b.add_jump_to_label(header_end, &mut body_label);
                }

                let mut body_block = self.resume_at(&mut body_label);
                self.loops.push(LoopFrame {
                    exit: exit_label,
                    cont: ContinueTarget::Label(cont_label),
                });
                self.gen_stmt(body, &mut body_block)?;
                let frame = self.loops.pop().expect("loop frame pushed above");
                exit_label = frame.exit;
                let mut cont_label = match frame.cont {
                    ContinueTarget::Label(label) => label,
                    ContinueTarget::Header(_) => unreachable!(),
                };

                if !self.b.func.block(body_block).is_finished() {
                    self.b.add_jump_to_label(body_block, &mut cont_label);
                }

                // Increment section, then the back edge
                let mut incr_block = self.resume_at(&mut cont_label);
                for i in 0..increment.len as usize {
                    let expr = self.ctx.ast.list_item(increment, i);
                    self.gen_expr(expr, &mut incr_block)?;
                }
                if !self.b.func.block(incr_block).is_finished() {
                    self.b.add_block_target(incr_block, header);
                    self.b.add_jump(incr_block);
                }

                self.b.seal_block(header);

                *cur = self.resume_at(&mut exit_label);
                Ok(())
            }

            AstKind::ReturnStmt { value } => {
                let value = *value;

                if value.is_defined() {
                    let generated = self.gen_expr(value, cur)?;
                    let loaded = self.load(*cur, generated);
                    if self.b.ret_var.is_defined() {
                        let ret_var = self.b.ret_var;
                        self.b.write_variable(*cur, ret_var, loaded);
                    }
                }

                self.b.add_return(*cur);
                Ok(())
            }

            AstKind::BreakStmt => {
                let Some(mut frame) = self.loops.pop() else {
                    return Ok(());
                };
                self.b.add_jump_to_label(*cur, &mut frame.exit);
                self.loops.push(frame);
                Ok(())
            }

            AstKind::ContinueStmt => {
                let Some(mut frame) = self.loops.pop() else {
                    return Ok(());
                };
                match &mut frame.cont {
                    ContinueTarget::Header(header) => {
                        let header = *header;
                        self.b.add_block_target(*cur, header);
                        self.b.add_jump(*cur);
                    }
                    ContinueTarget::Label(label) => {
                        self.b.add_jump_to_label(*cur, label);
                    }
                }
                self.loops.push(frame);
                Ok(())
            }

            // Declarations nested in a body produce no code here
            AstKind::FunctionDecl { .. }
            | AstKind::Alias { .. }
            | AstKind::StructDecl { .. }
            | AstKind::EnumDecl { .. }
            | AstKind::EnumMember { .. } => driver::require_ir_gen(self.ctx, node),

            // Expression statement
            _ => {
                self.gen_expr(node, cur)?;
                Ok(())
            }
        }
    }

    /// Continues generation at a label, sealing it once materialized
    fn resume_at(&mut self, label: &mut IrLabel) -> IrIndex {
        let block = self.b.label_block(label);
        if label.allocated {
            self.b.seal_block(block);
        }
        block
    }

    /* ───── conditions ───── */

    /// Lowers a boolean expression into control flow targeting two labels,
    /// short-circuiting `&&` and `||`
    fn gen_branch(
        &mut self,
        node: AstIndex,
        true_label: &mut IrLabel,
        false_label: &mut IrLabel,
        cur: &mut IrIndex,
    ) -> CompileResult<()> {
        match &self.ctx.ast.node(node).kind {
            AstKind::BinaryOp { op, lhs, rhs, .. } if op.is_comparison() => {
                let (op, lhs, rhs) = (*op, *lhs, *rhs);
                let operand_ty = self.ctx.ast.expr_type(lhs);
                let signed = layout::basic_of(self.ctx, operand_ty).is_signed();

                let lhs_value = self.gen_expr(lhs, cur)?;
                let lhs_value = self.load(*cur, lhs_value);
                let rhs_value = self.gen_expr(rhs, cur)?;
                let rhs_value = self.load(*cur, rhs_value);

                let cond = comparison_cond(op, signed);
                let size = self.arg_size_of(operand_ty);
                self.b.add_bin_branch(*cur, cond, size, lhs_value, rhs_value);
                self.b.add_branch_to_label(*cur, true_label);
                self.b.add_branch_to_label(*cur, false_label);
                Ok(())
            }

            AstKind::BinaryOp {
                op: BinaryOpKind::LogicalAnd,
                lhs,
                rhs,
                ..
            } => {
                let (lhs, rhs) = (*lhs, *rhs);
                let mut mid_label = IrLabel::new();

                self.gen_branch(lhs, &mut mid_label, false_label, cur)?;
                let mut mid_block = self.resume_at(&mut mid_label);
                self.gen_branch(rhs, true_label, false_label, &mut mid_block)
            }

            AstKind::BinaryOp {
                op: BinaryOpKind::LogicalOr,
                lhs,
                rhs,
                ..
            } => {
                let (lhs, rhs) = (*lhs, *rhs);
                let mut mid_label = IrLabel::new();

                self.gen_branch(lhs, true_label, &mut mid_label, cur)?;
                let mut mid_block = self.resume_at(&mut mid_label);
                self.gen_branch(rhs, true_label, false_label, &mut mid_block)
            }

            AstKind::UnaryOp {
                op: UnaryOpKind::LogicalNot,
                child,
                ..
            } => {
                let child = *child;
                self.gen_branch(child, false_label, true_label, cur)
            }

            AstKind::BoolLiteral { value, .. } => {
                let target = if *value { true_label } else { false_label };
                self.b.add_jump_to_label(*cur, target);
                Ok(())
            }

            _ => {
                let value = self.gen_expr(node, cur)?;
                let value = self.load(*cur, value);
                self.b
                    .add_unary_branch(*cur, IrCond::NotZero, IrArgSize::S8, value);
                self.b.add_branch_to_label(*cur, true_label);
                self.b.add_branch_to_label(*cur, false_label);
                Ok(())
            }
        }
    }

    /* ───── expressions ───── */

    fn gen_expr(&mut self, node: AstIndex, cur: &mut IrIndex) -> CompileResult<ExprValue> {
        match &self.ctx.ast.node(node).kind {
            AstKind::IntLiteral { value, ty } => {
                let (value, ty) = (*value, *ty);
                let basic = layout::basic_of(self.ctx, ty);
                Ok(ExprValue::Value(self.ctx.ir.int_constant(value, basic)))
            }

            AstKind::BoolLiteral { value, .. } => Ok(ExprValue::Value(
                self.ctx
                    .ir
                    .int_constant(*value as i64, BasicTypeKind::Bool),
            )),

            AstKind::NullLiteral { ty } => {
                let ty = *ty;
                let ir_ty = layout::ir_type_of(self.ctx, ty);
                Ok(ExprValue::Value(IrIndex::zero(ir_ty)))
            }

            AstKind::StringLiteral { .. } => self.gen_string_literal(node),

            AstKind::ArrayLiteral { items, ty } => {
                let (items, ty) = (*items, *ty);
                self.gen_array_literal(items, ty, cur)
            }

            AstKind::NameUse { entity, .. } => {
                let entity = *entity;
                self.gen_name_use(node, entity, cur)
            }

            AstKind::MemberExpr { .. } => self.gen_member(node, cur),

            AstKind::UnaryOp { .. } => self.gen_unary(node, cur),

            AstKind::BinaryOp { .. } => self.gen_binary(node, cur),

            AstKind::Call { .. } => self.gen_call(node, cur),

            AstKind::IndexOp { .. } => {
                let addr = self.gen_element_addr(node, cur)?;
                Ok(addr)
            }

            AstKind::Cast { .. } => self.gen_cast(node, cur),

            _ => Ok(ExprValue::Value(IrIndex::NONE)),
        }
    }

    /// A literal string becomes a read-only zero-terminated global plus an
    /// `{i64 length, u8* ptr}` slice aggregate
    fn gen_string_literal(&mut self, node: AstIndex) -> CompileResult<ExprValue> {
        let (value, ty) = match &self.ctx.ast.node(node).kind {
            AstKind::StringLiteral { value, ty } => (value.clone(), *ty),
            _ => unreachable!(),
        };

        let mut data = value.as_bytes().to_vec();
        data.push(0);

        let u8_ty = self.ctx.basic_type(BasicTypeKind::U8);
        let array_node = self.ctx.static_array_type(u8_ty, data.len() as u64);
        let array_ty = layout::ir_type_of(self.ctx, array_node);

        let global = self.ctx.ir.add_global(IrGlobal {
            name: None,
            ty: array_ty,
            data,
            flags: GlobalFlags::READ_ONLY | GlobalFlags::ZERO_TERMINATED,
        });

        let length = self
            .ctx
            .ir
            .int_constant(value.len() as i64, BasicTypeKind::I64);
        let slice_ty = layout::ir_type_of(self.ctx, ty);
        let aggregate = self.ctx.ir.add_aggregate(slice_ty, vec![length, global]);

        Ok(ExprValue::Value(aggregate))
    }

    fn gen_array_literal(
        &mut self,
        items: AstNodes,
        ty: AstIndex,
        cur: &mut IrIndex,
    ) -> CompileResult<ExprValue> {
        let (base, _) = match &self.ctx.ast.node(ty).kind {
            AstKind::StaticArrayType { base, length, .. } => (*base, *length),
            _ => (AstIndex::UNDEFINED, 0),
        };

        let ir_ty = layout::ir_type_of(self.ctx, ty);
        let size = layout::size_of(self.ctx, ty);
        let align = layout::align_of(self.ctx, ty);
        let slot = self.b.func.add_stack_slot(ir_ty, size, align);

        let elem_size = layout::size_of(self.ctx, base).max(1);
        for i in 0..items.len as usize {
            let item = self.ctx.ast.list_item(items, i);
            let value = self.gen_expr(item, cur)?;
            let value = self.load(*cur, value);

            let offset = self
                .ctx
                .ir
                .int_constant((i as u32 * elem_size) as i64, BasicTypeKind::I64);
            let (_, addr) = self.b.emit(
                *cur,
                IrOpcode::PtrOffset,
                IrCond::None,
                IrArgSize::S64,
                &[slot, offset],
                Some(layout::ir_type_of(self.ctx, base)),
            );
            self.store(*cur, addr, value, base);
        }

        Ok(ExprValue::Ptr { addr: slot, ty })
    }

    fn gen_name_use(
        &mut self,
        node: AstIndex,
        entity: AstIndex,
        cur: &mut IrIndex,
    ) -> CompileResult<ExprValue> {
        if !entity.is_defined() {
            return Ok(ExprValue::Value(IrIndex::NONE));
        }

        match &self.ctx.ast.node(entity).kind {
            AstKind::VariableDecl { ty, .. } => {
                let ty = *ty;

                if let Some(slot) = self.vars.get(&entity).copied() {
                    return Ok(match slot {
                        VarSlot::Variable(var) => {
                            ExprValue::Value(self.b.read_variable(*cur, var))
                        }
                        VarSlot::Slot { addr, ty } => ExprValue::Ptr { addr, ty },
                    });
                }

                // Module-level variable
                let addr = reserve_global(self.ctx, entity);
                Ok(ExprValue::Ptr { addr, ty })
            }

            AstKind::EnumMember { ty, value, .. } => {
                let (ty, value) = (*ty, *value);
                let basic = layout::basic_of(self.ctx, ty);
                let constant = match eval::eval_static_expr(self.ctx, value) {
                    Ok(value) => value.as_int(),
                    Err(_) => 0,
                };
                Ok(ExprValue::Value(self.ctx.ir.int_constant(constant, basic)))
            }

            AstKind::FunctionDecl { .. } => {
                Ok(ExprValue::Value(reserve_function(self.ctx, entity)))
            }

            _ => {
                let _ = node;
                Ok(ExprValue::Value(IrIndex::NONE))
            }
        }
    }

    fn gen_member(&mut self, node: AstIndex, cur: &mut IrIndex) -> CompileResult<ExprValue> {
        let (aggregate, member, member_index, access, ty) = match &self.ctx.ast.node(node).kind {
            AstKind::MemberExpr {
                aggregate,
                member,
                member_index,
                access,
                ty,
                ..
            } => (*aggregate, *member, *member_index, *access, *ty),
            _ => unreachable!(),
        };

        match access {
            MemberAccessKind::EnumMember => {
                let basic = layout::basic_of(self.ctx, ty);
                let value = match &self.ctx.ast.node(member).kind {
                    AstKind::EnumMember { value, .. } => *value,
                    _ => AstIndex::UNDEFINED,
                };
                let constant = match eval::eval_static_expr(self.ctx, value) {
                    Ok(value) => value.as_int(),
                    Err(_) => 0,
                };
                Ok(ExprValue::Value(self.ctx.ir.int_constant(constant, basic)))
            }

            MemberAccessKind::StructField => {
                let needs_deref = self.ctx.ast.node(node).flags.contains(NodeFlags::NEEDS_DEREF);
                let base_addr = self.aggregate_addr(aggregate, needs_deref, cur)?;

                let struct_ty = self.struct_type_of(aggregate, needs_deref);
                let offset = layout::field_offset(self.ctx, struct_ty, member_index);

                let addr = self.ptr_offset(base_addr, offset as i64, ty, cur);
                Ok(ExprValue::Ptr { addr, ty })
            }

            MemberAccessKind::SliceLength => self.slice_member(aggregate, 0, ty, cur),
            MemberAccessKind::SlicePtr => self.slice_member(aggregate, 1, ty, cur),

            MemberAccessKind::StaticArrayLength => {
                let agg_ty = self.ctx.ast.expr_type(aggregate);
                let length = match &self.ctx.ast.node(agg_ty).kind {
                    AstKind::StaticArrayType { length, .. } => *length,
                    _ => 0,
                };
                Ok(ExprValue::Value(
                    self.ctx
                        .ir
                        .int_constant(length as i64, BasicTypeKind::I64),
                ))
            }

            MemberAccessKind::StaticArrayPtr => {
                let value = self.gen_expr(aggregate, cur)?;
                match value {
                    ExprValue::Ptr { addr, .. } => Ok(ExprValue::Value(addr)),
                    ExprValue::Value(v) => Ok(ExprValue::Value(v)),
                }
            }

            MemberAccessKind::Method | MemberAccessKind::Unresolved => {
                Ok(ExprValue::Value(IrIndex::NONE))
            }
        }
    }

    /// The `length` (position 0) or `ptr` (position 1) word of a slice
    fn slice_member(
        &mut self,
        aggregate: AstIndex,
        position: u32,
        ty: AstIndex,
        cur: &mut IrIndex,
    ) -> CompileResult<ExprValue> {
        let value = self.gen_expr(aggregate, cur)?;

        match value {
            // Constant slice (string literal): project the aggregate member
            ExprValue::Value(handle)
                if handle.kind() == super::IrKind::ConstantAggregate =>
            {
                let member = self.ctx.ir.aggregates[handle.as_aggregate()].members
                    [position as usize];
                Ok(ExprValue::Value(member))
            }
            ExprValue::Ptr { addr, .. } => {
                let offset = position as i64 * layout::POINTER_SIZE as i64;
                let member_addr = self.ptr_offset(addr, offset, ty, cur);
                Ok(ExprValue::Ptr {
                    addr: member_addr,
                    ty,
                })
            }
            // TODO: split register-backed slices into a pair of SSA
            // variables so length/ptr work without a spill
            ExprValue::Value(_) => Ok(ExprValue::Value(IrIndex::NONE)),
        }
    }

    /// Address of an aggregate expression, dereferencing once for
    /// pointer-typed receivers
    fn aggregate_addr(
        &mut self,
        aggregate: AstIndex,
        needs_deref: bool,
        cur: &mut IrIndex,
    ) -> CompileResult<IrIndex> {
        let value = self.gen_expr(aggregate, cur)?;

        Ok(match (value, needs_deref) {
            // The receiver is a pointer value; its value is the address
            (ExprValue::Value(v), true) => v,
            (ExprValue::Ptr { addr, ty }, true) => {
                self.load(*cur, ExprValue::Ptr { addr, ty })
            }
            (ExprValue::Ptr { addr, .. }, false) => addr,
            (ExprValue::Value(v), false) => v,
        })
    }

    fn struct_type_of(&self, aggregate: AstIndex, needs_deref: bool) -> AstIndex {
        let mut ty = self.ctx.ast.expr_type(aggregate);
        if needs_deref {
            if let AstKind::PtrType { base } = &self.ctx.ast.node(ty).kind {
                ty = *base;
            }
        }
        ty
    }

    fn ptr_offset(
        &mut self,
        base: IrIndex,
        offset: i64,
        result_ty: AstIndex,
        cur: &mut IrIndex,
    ) -> IrIndex {
        if offset == 0 {
            return base;
        }

        let offset = self.ctx.ir.int_constant(offset, BasicTypeKind::I64);
        let ir_ty = layout::ir_type_of(self.ctx, result_ty);
        let (_, result) = self.b.emit(
            *cur,
            IrOpcode::PtrOffset,
            IrCond::None,
            IrArgSize::S64,
            &[base, offset],
            Some(ir_ty),
        );
        result
    }

    fn gen_unary(&mut self, node: AstIndex, cur: &mut IrIndex) -> CompileResult<ExprValue> {
        let (op, child, ty) = match &self.ctx.ast.node(node).kind {
            AstKind::UnaryOp { op, child, ty } => (*op, *child, *ty),
            _ => unreachable!(),
        };

        match op {
            UnaryOpKind::AddressOf => {
                let value = self.gen_expr(child, cur)?;
                match value {
                    ExprValue::Ptr { addr, .. } => Ok(ExprValue::Value(addr)),
                    // Function addresses are already plain values
                    ExprValue::Value(v) => Ok(ExprValue::Value(v)),
                }
            }

            UnaryOpKind::Deref => {
                let value = self.gen_expr(child, cur)?;
                let addr = self.load(*cur, value);
                Ok(ExprValue::Ptr { addr, ty })
            }

            UnaryOpKind::Negate | UnaryOpKind::BitwiseNot => {
                let value = self.gen_expr(child, cur)?;
                let value = self.load(*cur, value);

                let opcode = if op == UnaryOpKind::Negate {
                    IrOpcode::Neg
                } else {
                    IrOpcode::Not
                };
                let ir_ty = layout::ir_type_of(self.ctx, ty);
                let (_, result) = self.b.emit(
                    *cur,
                    opcode,
                    IrCond::None,
                    self.arg_size_of(ty),
                    &[value],
                    Some(ir_ty),
                );
                Ok(ExprValue::Value(result))
            }

            UnaryOpKind::LogicalNot => {
                let value = self.gen_expr(child, cur)?;
                let value = self.load(*cur, value);

                let one = self.ctx.ir.int_constant(1, BasicTypeKind::Bool);
                let ir_ty = layout::ir_type_of(self.ctx, ty);
                let (_, result) = self.b.emit(
                    *cur,
                    IrOpcode::Xor,
                    IrCond::None,
                    IrArgSize::S8,
                    &[value, one],
                    Some(ir_ty),
                );
                Ok(ExprValue::Value(result))
            }
        }
    }

    fn gen_binary(&mut self, node: AstIndex, cur: &mut IrIndex) -> CompileResult<ExprValue> {
        let (op, lhs, rhs, ty) = match &self.ctx.ast.node(node).kind {
            AstKind::BinaryOp { op, lhs, rhs, ty } => (*op, *lhs, *rhs, *ty),
            _ => unreachable!(),
        };

        if op == BinaryOpKind::Assign {
            let value = self.gen_expr(rhs, cur)?;
            let value = self.load(*cur, value);
            self.gen_assignment(lhs, value, cur)?;
            return Ok(ExprValue::Value(IrIndex::NONE));
        }

        if let Some(operation) = op.compound_operation() {
            // Read-modify-write through the same lvalue
            let current = self.gen_expr(lhs, cur)?;
            let current_value = self.load(*cur, current);
            let rhs_value = self.gen_expr(rhs, cur)?;
            let rhs_value = self.load(*cur, rhs_value);

            let operand_ty = self.ctx.ast.expr_type(lhs);
            let result = self.emit_arith(operation, current_value, rhs_value, operand_ty, cur);
            self.gen_assignment(lhs, result, cur)?;
            return Ok(ExprValue::Value(IrIndex::NONE));
        }

        if matches!(op, BinaryOpKind::LogicalAnd | BinaryOpKind::LogicalOr) {
            return self.gen_short_circuit(node, cur);
        }

        if op.is_comparison() {
            let operand_ty = self.ctx.ast.expr_type(lhs);
            let signed = layout::basic_of(self.ctx, operand_ty).is_signed();

            let lhs_value = self.gen_expr(lhs, cur)?;
            let lhs_value = self.load(*cur, lhs_value);
            let rhs_value = self.gen_expr(rhs, cur)?;
            let rhs_value = self.load(*cur, rhs_value);

            let ir_ty = layout::ir_type_of(self.ctx, ty);
            let (_, result) = self.b.emit(
                *cur,
                IrOpcode::Cmp,
                comparison_cond(op, signed),
                self.arg_size_of(operand_ty),
                &[lhs_value, rhs_value],
                Some(ir_ty),
            );
            return Ok(ExprValue::Value(result));
        }

        let lhs_value = self.gen_expr(lhs, cur)?;
        let lhs_value = self.load(*cur, lhs_value);
        let rhs_value = self.gen_expr(rhs, cur)?;
        let rhs_value = self.load(*cur, rhs_value);

        Ok(ExprValue::Value(self.emit_arith(
            op, lhs_value, rhs_value, ty, cur,
        )))
    }

    /// `&&` / `||` in value position merge through an SSA variable
    fn gen_short_circuit(
        &mut self,
        node: AstIndex,
        cur: &mut IrIndex,
    ) -> CompileResult<ExprValue> {
        let bool_ir = IrType::basic(BasicTypeKind::Bool);
        let temp = self.b.func.new_variable(bool_ir);

        let mut true_label = IrLabel::new();
        let mut false_label = IrLabel::new();
        let mut end_label = IrLabel::new();

        self.gen_branch(node, &mut true_label, &mut false_label, cur)?;

        let true_block = self.resume_at(&mut true_label);
        let one = self.ctx.ir.int_constant(1, BasicTypeKind::Bool);
        self.b.write_variable(true_block, temp, one);
        self.b.add_jump_to_label(true_block, &mut end_label);

        let false_block = self.resume_at(&mut false_label);
        let zero = self.ctx.ir.int_constant(0, BasicTypeKind::Bool);
        self.b.write_variable(false_block, temp, zero);
        self.b.add_jump_to_label(false_block, &mut end_label);

        *cur = self.resume_at(&mut end_label);
        Ok(ExprValue::Value(self.b.read_variable(*cur, temp)))
    }

    fn emit_arith(
        &mut self,
        op: BinaryOpKind,
        lhs: IrIndex,
        rhs: IrIndex,
        ty: AstIndex,
        cur: &mut IrIndex,
    ) -> IrIndex {
        let signed = layout::basic_of(self.ctx, ty).is_signed();

        let opcode = match op {
            BinaryOpKind::Add => IrOpcode::Add,
            BinaryOpKind::Subtract => IrOpcode::Sub,
            BinaryOpKind::Multiply => IrOpcode::Mul,
            BinaryOpKind::Divide => {
                if signed {
                    IrOpcode::SDiv
                } else {
                    IrOpcode::UDiv
                }
            }
            BinaryOpKind::Modulus => {
                if signed {
                    IrOpcode::SRem
                } else {
                    IrOpcode::URem
                }
            }
            BinaryOpKind::BitwiseAnd => IrOpcode::And,
            BinaryOpKind::BitwiseOr => IrOpcode::Or,
            BinaryOpKind::BitwiseXor => IrOpcode::Xor,
            BinaryOpKind::ShiftLeft => IrOpcode::Shl,
            BinaryOpKind::ShiftRight => {
                if signed {
                    IrOpcode::Sar
                } else {
                    IrOpcode::Shr
                }
            }
            _ => IrOpcode::Mov,
        };

        let ir_ty = layout::ir_type_of(self.ctx, ty);
        let (_, result) = self.b.emit(
            *cur,
            opcode,
            IrCond::None,
            self.arg_size_of(ty),
            &[lhs, rhs],
            Some(ir_ty),
        );
        result
    }

    /// Writes `value` into the storage an lvalue expression denotes
    fn gen_assignment(
        &mut self,
        lvalue: AstIndex,
        value: IrIndex,
        cur: &mut IrIndex,
    ) -> CompileResult<()> {
        // Plain SSA locals take the fast path
        if let AstKind::NameUse { entity, .. } = &self.ctx.ast.node(lvalue).kind {
            let entity = *entity;
            if let Some(VarSlot::Variable(var)) = self.vars.get(&entity).copied() {
                self.b.write_variable(*cur, var, value);
                return Ok(());
            }
        }

        let target = self.gen_expr(lvalue, cur)?;
        match target {
            ExprValue::Ptr { addr, ty } => {
                self.store(*cur, addr, value, ty);
                Ok(())
            }
            ExprValue::Value(_) => {
                // Not addressable; the checker reported this already
                Ok(())
            }
        }
    }

    fn gen_call(&mut self, node: AstIndex, cur: &mut IrIndex) -> CompileResult<ExprValue> {
        let (callee, args, ty) = match &self.ctx.ast.node(node).kind {
            AstKind::Call { callee, args, ty } => (*callee, *args, *ty),
            _ => unreachable!(),
        };

        let returns_value =
            ty.is_defined() && !type_check::is_noreturn_or_void(self.ctx, ty);
        let result_ty = returns_value.then(|| layout::ir_type_of(self.ctx, ty));

        // Resolve the callee to a handle or an indirect value, plus an
        // optional implicit receiver
        let mut call_args: Vec<IrIndex> = Vec::new();
        let mut extern_syscall = None;

        match &self.ctx.ast.node(callee).kind {
            AstKind::NameUse { entity, .. }
                if matches!(
                    self.ctx.ast.node(*entity).kind,
                    AstKind::FunctionDecl { .. }
                ) =>
            {
                let entity = *entity;
                let handle = reserve_function(self.ctx, entity);

                match self.ctx.ir.function_externs[handle.as_function().0 as usize] {
                    ExternKind::Syscall(number) => {
                        let number = self.ctx.ir.int_constant(number as i64, BasicTypeKind::U32);
                        extern_syscall = Some(number);
                    }
                    _ => call_args.push(handle),
                }
            }
            AstKind::MemberExpr {
                aggregate,
                member,
                access: MemberAccessKind::Method,
                ..
            } => {
                let (aggregate, member) = (*aggregate, *member);
                let handle = reserve_function(self.ctx, member);
                call_args.push(handle);

                let needs_deref = self
                    .ctx
                    .ast
                    .node(callee)
                    .flags
                    .contains(NodeFlags::NEEDS_DEREF);
                let this_addr = self.aggregate_addr(aggregate, needs_deref, cur)?;
                call_args.push(this_addr);
            }
            _ => {
                // Indirect call through a function-typed value
                let value = self.gen_expr(callee, cur)?;
                let value = self.load(*cur, value);
                call_args.push(value);
            }
        }

        if let Some(number) = extern_syscall {
            call_args.insert(0, number);
        }

        // Explicit arguments; aggregates over a register go by pointer
        for i in 0..args.len as usize {
            let arg = self.ctx.ast.list_item(args, i);
            let arg_ty = self.ctx.ast.expr_type(arg);
            let generated = self.gen_expr(arg, cur)?;

            let value = if arg_ty.is_defined() && layout::is_pass_by_ptr(self.ctx, arg_ty) {
                match generated {
                    ExprValue::Ptr { addr, .. } => addr,
                    ExprValue::Value(v) => self.spill_to_slot(v, arg_ty, cur),
                }
            } else {
                self.load(*cur, generated)
            };
            call_args.push(value);
        }

        // Missing trailing arguments fall back to parameter defaults
        let signature = self.ctx.ast.expr_type(callee);
        if let AstKind::FunctionSignature { params, .. } = &self.ctx.ast.node(signature).kind {
            let params = *params;
            let is_method = matches!(
                self.ctx.ast.node(callee).kind,
                AstKind::MemberExpr {
                    access: MemberAccessKind::Method,
                    ..
                }
            );
            let offset = is_method as usize;

            for i in (args.len as usize + offset)..params.len as usize {
                let param = self.ctx.ast.list_item(params, i);
                let default = match &self.ctx.ast.node(param).kind {
                    AstKind::VariableDecl { initializer, .. } => *initializer,
                    _ => AstIndex::UNDEFINED,
                };
                if !default.is_defined() {
                    break;
                }
                let generated = self.gen_expr(default, cur)?;
                let value = self.load(*cur, generated);
                call_args.push(value);
            }
        }

        let opcode = if extern_syscall.is_some() {
            IrOpcode::Syscall
        } else {
            IrOpcode::Call
        };

        let size = if ty.is_defined() {
            self.arg_size_of(ty)
        } else {
            IrArgSize::S64
        };
        let (_, result) = self
            .b
            .emit(*cur, opcode, IrCond::None, size, &call_args, result_ty);

        Ok(ExprValue::Value(result))
    }

    fn spill_to_slot(&mut self, value: IrIndex, ty: AstIndex, cur: &mut IrIndex) -> IrIndex {
        let ir_ty = layout::ir_type_of(self.ctx, ty);
        let size = layout::size_of(self.ctx, ty);
        let align = layout::align_of(self.ctx, ty);
        let slot = self.b.func.add_stack_slot(ir_ty, size, align);
        self.store(*cur, slot, value, ty);
        slot
    }

    /// Address of `object[index]`
    fn gen_element_addr(&mut self, node: AstIndex, cur: &mut IrIndex) -> CompileResult<ExprValue> {
        let (object, index, ty) = match &self.ctx.ast.node(node).kind {
            AstKind::IndexOp { object, index, ty } => (*object, *index, *ty),
            _ => unreachable!(),
        };

        let object_ty = self.ctx.ast.expr_type(object);

        let base_ptr = match self.ctx.ast.node(object_ty).kind {
            AstKind::SliceType { .. } => {
                let ptr_ty = self.ctx.pointer_type(ty);
                let member = self.slice_member(object, 1, ptr_ty, cur)?;
                self.load(*cur, member)
            }
            AstKind::StaticArrayType { .. } => {
                let value = self.gen_expr(object, cur)?;
                match value {
                    ExprValue::Ptr { addr, .. } => addr,
                    ExprValue::Value(v) => v,
                }
            }
            // Raw pointer indexing
            _ => {
                let value = self.gen_expr(object, cur)?;
                self.load(*cur, value)
            }
        };

        let index_value = self.gen_expr(index, cur)?;
        let index_value = self.load(*cur, index_value);

        let elem_size = layout::size_of(self.ctx, ty).max(1);
        let size_const = self
            .ctx
            .ir
            .int_constant(elem_size as i64, BasicTypeKind::I64);
        let (_, byte_offset) = self.b.emit(
            *cur,
            IrOpcode::Mul,
            IrCond::None,
            IrArgSize::S64,
            &[index_value, size_const],
            Some(IrType::basic(BasicTypeKind::I64)),
        );

        let ir_ty = layout::ir_type_of(self.ctx, ty);
        let (_, addr) = self.b.emit(
            *cur,
            IrOpcode::PtrOffset,
            IrCond::None,
            IrArgSize::S64,
            &[base_ptr, byte_offset],
            Some(ir_ty),
        );

        Ok(ExprValue::Ptr { addr, ty })
    }

    fn gen_cast(&mut self, node: AstIndex, cur: &mut IrIndex) -> CompileResult<ExprValue> {
        let (expr, cast, ty) = match &self.ctx.ast.node(node).kind {
            AstKind::Cast { expr, cast, ty, .. } => (*expr, *cast, *ty),
            _ => unreachable!(),
        };

        let value = self.gen_expr(expr, cur)?;

        let opcode = match cast {
            CastKind::NoOp
            | CastKind::EnumToInt
            | CastKind::IntToEnum
            | CastKind::Unchecked => return Ok(value),
            CastKind::IntWiden { signed: true } => IrOpcode::SExt,
            CastKind::IntWiden { signed: false } => IrOpcode::ZExt,
            CastKind::IntNarrow => IrOpcode::Trunc,
            CastKind::IntToPtr | CastKind::PtrToInt | CastKind::PtrToPtr => IrOpcode::Bitcast,
            CastKind::SliceToPtr => {
                let ptr = self.slice_member(expr, 1, ty, cur)?;
                let loaded = self.load(*cur, ptr);
                return Ok(ExprValue::Value(loaded));
            }
        };

        let loaded = self.load(*cur, value);
        let ir_ty = layout::ir_type_of(self.ctx, ty);
        let (_, result) = self.b.emit(
            *cur,
            opcode,
            IrCond::None,
            self.arg_size_of(ty),
            &[loaded],
            Some(ir_ty),
        );
        Ok(ExprValue::Value(result))
    }
}

fn comparison_cond(op: BinaryOpKind, signed: bool) -> IrCond {
    match op {
        BinaryOpKind::Equals => IrCond::Eq,
        BinaryOpKind::NotEquals => IrCond::Ne,
        BinaryOpKind::LessThan => {
            if signed {
                IrCond::SLt
            } else {
                IrCond::ULt
            }
        }
        BinaryOpKind::LessThanOrEqualTo => {
            if signed {
                IrCond::SLe
            } else {
                IrCond::ULe
            }
        }
        BinaryOpKind::GreaterThan => {
            if signed {
                IrCond::SGt
            } else {
                IrCond::UGt
            }
        }
        BinaryOpKind::GreaterThanOrEqualTo => {
            if signed {
                IrCond::SGe
            } else {
                IrCond::UGe
            }
        }
        _ => IrCond::None,
    }
}

/// Pre-scan for `&local` so those locals can live in stack slots from the
/// start
fn collect_addressed_locals(
    ctx: &CompilationContext,
    node: AstIndex,
    out: &mut HashSet<AstIndex>,
) {
    if !node.is_defined() {
        return;
    }

    match &ctx.ast.node(node).kind {
        AstKind::UnaryOp {
            op: UnaryOpKind::AddressOf,
            child,
            ..
        } => {
            if let AstKind::NameUse { entity, .. } = &ctx.ast.node(*child).kind {
                if entity.is_defined() {
                    out.insert(*entity);
                }
            }
            collect_addressed_locals(ctx, *child, out);
        }

        AstKind::Block { statements, .. } => {
            for i in 0..statements.len as usize {
                collect_addressed_locals(ctx, ctx.ast.list_item(*statements, i), out);
            }
        }
        AstKind::IfStmt {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_addressed_locals(ctx, *condition, out);
            collect_addressed_locals(ctx, *then_branch, out);
            collect_addressed_locals(ctx, *else_branch, out);
        }
        AstKind::WhileStmt { condition, body } => {
            collect_addressed_locals(ctx, *condition, out);
            collect_addressed_locals(ctx, *body, out);
        }
        AstKind::ForStmt {
            init,
            condition,
            increment,
            body,
            ..
        } => {
            for i in 0..init.len as usize {
                collect_addressed_locals(ctx, ctx.ast.list_item(*init, i), out);
            }
            collect_addressed_locals(ctx, *condition, out);
            for i in 0..increment.len as usize {
                collect_addressed_locals(ctx, ctx.ast.list_item(*increment, i), out);
            }
            collect_addressed_locals(ctx, *body, out);
        }
        AstKind::ReturnStmt { value } => collect_addressed_locals(ctx, *value, out),
        AstKind::VariableDecl { initializer, .. } => {
            collect_addressed_locals(ctx, *initializer, out)
        }
        AstKind::BinaryOp { lhs, rhs, .. } => {
            collect_addressed_locals(ctx, *lhs, out);
            collect_addressed_locals(ctx, *rhs, out);
        }
        AstKind::UnaryOp { child, .. } => collect_addressed_locals(ctx, *child, out),
        AstKind::Call { callee, args, .. } => {
            collect_addressed_locals(ctx, *callee, out);
            for i in 0..args.len as usize {
                collect_addressed_locals(ctx, ctx.ast.list_item(*args, i), out);
            }
        }
        AstKind::IndexOp { object, index, .. } => {
            collect_addressed_locals(ctx, *object, out);
            collect_addressed_locals(ctx, *index, out);
        }
        AstKind::Cast { expr, .. } => collect_addressed_locals(ctx, *expr, out),
        AstKind::MemberExpr { aggregate, .. } => collect_addressed_locals(ctx, *aggregate, out),
        _ => {}
    }
}

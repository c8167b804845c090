//! The type checker. Bottom-up synthesis over resolved nodes with a
//! contextual expected type that biases integer literals and enables the
//! implicit integer coercions allowed in assignments, calls and returns.
//! Several lowerings happen here rather than during IR generation: a bare
//! use of a function becomes a paren-free call, member access on
//! slices/static arrays synthesizes `length`/`ptr`, and `cast(T)` is
//! classified into an explicit conversion kind.

use crate::{
    context::CompilationContext,
    diag::{CompileResult, DiagKind},
    frontend::ast::{
        AstIndex, AstKind, AstNodes, BasicTypeKind, BinaryOpKind, CastKind, MemberAccessKind,
        NodeFlags, UnaryOpKind,
    },
    middle::{driver, eval},
};

pub(crate) fn type_check(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    match &ctx.ast.node(node).kind {
        AstKind::Module { decls, .. } => {
            let decls = *decls;
            for i in 0..decls.len as usize {
                let item = ctx.ast.list_item(decls, i);
                driver::require_type_check(ctx, item)?;
            }
            Ok(())
        }

        AstKind::StructDecl { members, .. } => {
            let members = *members;
            for i in 0..members.len as usize {
                let member = ctx.ast.list_item(members, i);
                driver::require_type_check(ctx, member)?;
            }
            Ok(())
        }

        AstKind::EnumDecl { members, .. } => {
            let members = *members;
            for i in 0..members.len as usize {
                let member = ctx.ast.list_item(members, i);
                driver::require_type_check(ctx, member)?;
            }
            Ok(())
        }

        AstKind::EnumMember { .. } => check_enum_member(ctx, node),

        AstKind::FunctionDecl { .. } => check_function(ctx, node),

        AstKind::VariableDecl { .. } => check_variable(ctx, node),

        AstKind::Alias { .. }
        | AstKind::AliasArray { .. }
        | AstKind::Import { .. }
        | AstKind::Attribute { .. }
        | AstKind::Error => Ok(()),

        // Type entities have nothing to synthesize
        AstKind::BasicType { .. }
        | AstKind::PtrType { .. }
        | AstKind::SliceType { .. }
        | AstKind::StaticArrayType { .. }
        | AstKind::FunctionSignature { .. } => Ok(()),

        // Statements or expressions entered directly
        _ => {
            let mut checker = Checker {
                ctx,
                return_type: AstIndex::UNDEFINED,
            };
            checker.check_stmt(node)
        }
    }
}

/// "void or noreturn" (the name is historical; both mean "no value")
pub(crate) fn is_noreturn_or_void(ctx: &CompilationContext, ty: AstIndex) -> bool {
    matches!(
        ctx.ast.node(ty).kind,
        AstKind::BasicType {
            basic: BasicTypeKind::Void | BasicTypeKind::Noreturn
        }
    )
}

pub(crate) fn is_noreturn(ctx: &CompilationContext, ty: AstIndex) -> bool {
    matches!(
        ctx.ast.node(ty).kind,
        AstKind::BasicType {
            basic: BasicTypeKind::Noreturn
        }
    )
}

fn basic_kind(ctx: &CompilationContext, ty: AstIndex) -> Option<BasicTypeKind> {
    match &ctx.ast.node(ty).kind {
        AstKind::BasicType { basic } => Some(*basic),
        _ => None,
    }
}

fn is_integer(ctx: &CompilationContext, ty: AstIndex) -> bool {
    basic_kind(ctx, ty).is_some_and(|b| b.is_integer())
}

fn is_bool(ctx: &CompilationContext, ty: AstIndex) -> bool {
    basic_kind(ctx, ty) == Some(BasicTypeKind::Bool)
}

/// Canonical type nodes make equality an index comparison
fn same_type(a: AstIndex, b: AstIndex) -> bool {
    a == b
}

fn literal_fits(value: i64, basic: BasicTypeKind) -> bool {
    match basic {
        BasicTypeKind::I8 => i8::try_from(value).is_ok(),
        BasicTypeKind::I16 => i16::try_from(value).is_ok(),
        BasicTypeKind::I32 => i32::try_from(value).is_ok(),
        BasicTypeKind::I64 => true,
        BasicTypeKind::U8 => u8::try_from(value).is_ok(),
        BasicTypeKind::U16 => u16::try_from(value).is_ok(),
        BasicTypeKind::U32 => u32::try_from(value).is_ok(),
        BasicTypeKind::U64 => value >= 0,
        _ => false,
    }
}

/// Scoped enum members get the enum as their type and auto-increment values;
/// manifest constants infer their type from the value
fn check_enum_member(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    let (parent_scope, ty, value) = match &ctx.ast.node(node).kind {
        AstKind::EnumMember {
            parent_scope,
            ty,
            value,
            ..
        } => (*parent_scope, *ty, *value),
        _ => unreachable!(),
    };

    let is_scoped = ctx.ast.node(node).flags.contains(NodeFlags::IS_MEMBER);

    if is_scoped {
        let enum_decl = ctx.scopes.get(parent_scope).owner;
        let (base, members) = match &ctx.ast.node(enum_decl).kind {
            AstKind::EnumDecl { base, members, .. } => (*base, *members),
            _ => (AstIndex::UNDEFINED, AstNodes::EMPTY),
        };
        let base = if base.is_defined() {
            base
        } else {
            ctx.basic_type(BasicTypeKind::I32)
        };

        let assigned = if value.is_defined() {
            let mut checker = Checker {
                ctx: &mut *ctx,
                return_type: AstIndex::UNDEFINED,
            };
            checker.check_expr(value, base)?
        } else {
            // Previous member's value plus one, or zero for the first
            let position = (0..members.len as usize)
                .find(|i| ctx.ast.list_item(members, *i) == node)
                .unwrap_or(0);

            let next = if position == 0 {
                0
            } else {
                let previous = ctx.ast.list_item(members, position - 1);
                driver::require_type_check(ctx, previous)?;
                let prev_value = match &ctx.ast.node(previous).kind {
                    AstKind::EnumMember { value, .. } => *value,
                    _ => AstIndex::UNDEFINED,
                };
                match eval::eval_static_expr(ctx, prev_value) {
                    Ok(value) => value.as_int() + 1,
                    Err(_) => 0,
                }
            };

            let loc = ctx.ast.node(node).loc;
            ctx.ast.add_node(
                loc,
                AstKind::IntLiteral {
                    value: next,
                    ty: base,
                },
                NodeFlags::empty(),
            )
        };

        if let AstKind::EnumMember {
            ty: ty_slot,
            value: value_slot,
            ..
        } = &mut ctx.ast.node_mut(node).kind
        {
            *ty_slot = enum_decl;
            *value_slot = assigned;
        }
        return Ok(());
    }

    // Manifest constant: explicit type or inferred from the value
    let mut checker = Checker {
        ctx: &mut *ctx,
        return_type: AstIndex::UNDEFINED,
    };
    let checked = checker.check_expr(value, ty)?;
    let inferred = checker.ctx.ast.expr_type(checked);

    let final_ty = if ty.is_defined() { ty } else { inferred };
    if let AstKind::EnumMember {
        ty: ty_slot,
        value: value_slot,
        ..
    } = &mut ctx.ast.node_mut(node).kind
    {
        *ty_slot = final_ty;
        *value_slot = checked;
    }

    Ok(())
}

fn check_variable(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    let (ty, initializer) = match &ctx.ast.node(node).kind {
        AstKind::VariableDecl {
            ty, initializer, ..
        } => (*ty, *initializer),
        _ => unreachable!(),
    };

    // Aggregate-typed variables need the aggregate's members resolved for
    // layout queries
    if ty.is_defined()
        && matches!(
            ctx.ast.node(ty).kind,
            AstKind::StructDecl { .. } | AstKind::EnumDecl { .. }
        )
    {
        driver::require_name_resolve(ctx, ty)?;
    }

    if !initializer.is_defined() {
        return Ok(());
    }

    let mut checker = Checker {
        ctx: &mut *ctx,
        return_type: AstIndex::UNDEFINED,
    };
    let checked = checker.check_expr(initializer, ty)?;
    let coerced = checker.coerce(checked, ty);

    if let AstKind::VariableDecl {
        initializer: slot, ..
    } = &mut ctx.ast.node_mut(node).kind
    {
        *slot = coerced;
    }

    Ok(())
}

fn check_function(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    let (signature, body, template_params) = match &ctx.ast.node(node).kind {
        AstKind::FunctionDecl {
            signature,
            body,
            template_params,
            ..
        } => (*signature, *body, *template_params),
        _ => unreachable!(),
    };

    // Templated functions are checked per instantiation, which is outside
    // this pipeline
    if !template_params.is_empty() {
        return Ok(());
    }

    let (return_type, params) = match &ctx.ast.node(signature).kind {
        AstKind::FunctionSignature {
            return_type,
            params,
        } => (*return_type, *params),
        _ => (AstIndex::UNDEFINED, AstNodes::EMPTY),
    };

    for i in 0..params.len as usize {
        let param = ctx.ast.list_item(params, i);
        driver::require_type_check(ctx, param)?;
    }

    if body.is_defined() {
        let mut checker = Checker { ctx, return_type };
        checker.check_stmt(body)?;
    }

    Ok(())
}

/// Statement/expression checker carrying the enclosing function's return
/// type
struct Checker<'a> {
    ctx: &'a mut CompilationContext,
    return_type: AstIndex,
}

impl<'a> Checker<'a> {
    fn error(&mut self, kind: DiagKind, node: AstIndex) {
        let loc = self.ctx.ast.node(node).loc;
        self.ctx.error(kind, Some(loc));
    }

    fn type_mismatch(&mut self, node: AstIndex, expected: AstIndex, found: AstIndex) {
        let kind = DiagKind::TypeMismatch {
            expected: self.ctx.type_name(expected),
            found: self.ctx.type_name(found),
        };
        self.error(kind, node);
    }

    fn check_stmt(&mut self, node: AstIndex) -> CompileResult<()> {
        match &self.ctx.ast.node(node).kind {
            AstKind::Block { statements, .. } => {
                let statements = *statements;
                self.check_stmt_list(statements)
            }

            AstKind::IfStmt {
                condition,
                then_branch,
                else_branch,
            } => {
                let (condition, then_branch, else_branch) =
                    (*condition, *then_branch, *else_branch);

                let bool_ty = self.ctx.basic_type(BasicTypeKind::Bool);
                let checked = self.check_expr(condition, bool_ty)?;
                self.require_bool(checked);
                if let AstKind::IfStmt { condition: slot, .. } =
                    &mut self.ctx.ast.node_mut(node).kind
                {
                    *slot = checked;
                }

                self.check_stmt(then_branch)?;
                if else_branch.is_defined() {
                    self.check_stmt(else_branch)?;
                }
                Ok(())
            }

            AstKind::WhileStmt { condition, body } => {
                let (condition, body) = (*condition, *body);

                let bool_ty = self.ctx.basic_type(BasicTypeKind::Bool);
                let checked = self.check_expr(condition, bool_ty)?;
                self.require_bool(checked);
                if let AstKind::WhileStmt { condition: slot, .. } =
                    &mut self.ctx.ast.node_mut(node).kind
                {
                    *slot = checked;
                }

                self.check_stmt(body)
            }

            AstKind::ForStmt {
                init,
                condition,
                increment,
                body,
                ..
            } => {
                let (init, condition, increment, body) = (*init, *condition, *increment, *body);

                self.check_stmt_list(init)?;

                if condition.is_defined() {
                    let bool_ty = self.ctx.basic_type(BasicTypeKind::Bool);
                    let checked = self.check_expr(condition, bool_ty)?;
                    self.require_bool(checked);
                    if let AstKind::ForStmt { condition: slot, .. } =
                        &mut self.ctx.ast.node_mut(node).kind
                    {
                        *slot = checked;
                    }
                }

                for i in 0..increment.len as usize {
                    let expr = self.ctx.ast.list_item(increment, i);
                    let checked = self.check_expr(expr, AstIndex::UNDEFINED)?;
                    self.ctx.ast.set_list_item(increment, i, checked);
                }

                self.check_stmt(body)
            }

            AstKind::ReturnStmt { value } => {
                let value = *value;
                let return_type = self.return_type;

                if value.is_defined() {
                    let checked = self.check_expr(value, return_type)?;
                    let coerced = self.coerce(checked, return_type);
                    if let AstKind::ReturnStmt { value: slot } =
                        &mut self.ctx.ast.node_mut(node).kind
                    {
                        *slot = coerced;
                    }
                } else if return_type.is_defined()
                    && !is_noreturn_or_void(self.ctx, return_type)
                {
                    let void_ty = self.ctx.basic_type(BasicTypeKind::Void);
                    self.type_mismatch(node, return_type, void_ty);
                }
                Ok(())
            }

            AstKind::BreakStmt | AstKind::ContinueStmt => Ok(()),

            AstKind::VariableDecl { .. }
            | AstKind::FunctionDecl { .. }
            | AstKind::Alias { .. }
            | AstKind::StructDecl { .. }
            | AstKind::EnumDecl { .. }
            | AstKind::EnumMember { .. } => driver::require_type_check(self.ctx, node),

            // Expression statement
            _ => {
                self.check_expr(node, AstIndex::UNDEFINED)?;
                Ok(())
            }
        }
    }

    fn check_stmt_list(&mut self, statements: AstNodes) -> CompileResult<()> {
        for i in 0..statements.len as usize {
            let stmt = self.ctx.ast.list_item(statements, i);

            match self.ctx.ast.node(stmt).kind {
                AstKind::VariableDecl { .. }
                | AstKind::FunctionDecl { .. }
                | AstKind::Alias { .. }
                | AstKind::StructDecl { .. }
                | AstKind::EnumDecl { .. }
                | AstKind::EnumMember { .. }
                | AstKind::Block { .. }
                | AstKind::IfStmt { .. }
                | AstKind::WhileStmt { .. }
                | AstKind::ForStmt { .. }
                | AstKind::ReturnStmt { .. }
                | AstKind::BreakStmt
                | AstKind::ContinueStmt => self.check_stmt(stmt)?,
                _ => {
                    let checked = self.check_expr(stmt, AstIndex::UNDEFINED)?;
                    self.ctx.ast.set_list_item(statements, i, checked);
                }
            }
        }
        Ok(())
    }

    fn require_bool(&mut self, expr: AstIndex) {
        let ty = self.ctx.ast.expr_type(expr);
        if ty.is_defined() && !is_bool(self.ctx, ty) {
            let bool_ty = self.ctx.basic_type(BasicTypeKind::Bool);
            self.type_mismatch(expr, bool_ty, ty);
        }
    }

    /// Checks an expression, returning the possibly-replaced node with its
    /// type synthesized. `expected` biases literals and enables implicit
    /// integer coercion; it is advisory, not enforced here.
    fn check_expr(&mut self, node: AstIndex, expected: AstIndex) -> CompileResult<AstIndex> {
        match &self.ctx.ast.node(node).kind {
            AstKind::IntLiteral { .. } => {
                let biased = expected.is_defined()
                    && (is_integer(self.ctx, expected)
                        || matches!(
                            self.ctx.ast.node(expected).kind,
                            AstKind::EnumDecl { .. }
                        ));
                let ty = if biased {
                    expected
                } else {
                    self.ctx.basic_type(BasicTypeKind::I64)
                };
                self.ctx.ast.set_expr_type(node, ty);
                Ok(node)
            }

            AstKind::BoolLiteral { .. } => {
                let ty = self.ctx.basic_type(BasicTypeKind::Bool);
                self.ctx.ast.set_expr_type(node, ty);
                Ok(node)
            }

            AstKind::NullLiteral { .. } => {
                let ty = if expected.is_defined()
                    && matches!(self.ctx.ast.node(expected).kind, AstKind::PtrType { .. })
                {
                    expected
                } else {
                    self.ctx.basic_type(BasicTypeKind::Null)
                };
                self.ctx.ast.set_expr_type(node, ty);
                Ok(node)
            }

            AstKind::StringLiteral { .. } => {
                let u8_ty = self.ctx.basic_type(BasicTypeKind::U8);
                let ty = self.ctx.slice_type(u8_ty);
                self.ctx.ast.set_expr_type(node, ty);
                Ok(node)
            }

            AstKind::ArrayLiteral { items, .. } => {
                let items = *items;
                let mut element_ty = AstIndex::UNDEFINED;

                for i in 0..items.len as usize {
                    let item = self.ctx.ast.list_item(items, i);
                    let checked = self.check_expr(item, element_ty)?;
                    self.ctx.ast.set_list_item(items, i, checked);
                    if !element_ty.is_defined() {
                        element_ty = self.ctx.ast.expr_type(checked);
                    }
                }

                let ty = self.ctx.static_array_type(element_ty, items.len as u64);
                self.ctx.ast.set_expr_type(node, ty);
                Ok(node)
            }

            AstKind::NameUse { .. } => self.check_name_use(node, false),

            AstKind::MemberExpr { .. } => self.check_member(node),

            AstKind::UnaryOp { .. } => self.check_unary(node),

            AstKind::BinaryOp { .. } => self.check_binary(node, expected),

            AstKind::Call { .. } => self.check_call(node),

            AstKind::IndexOp { .. } => self.check_index(node),

            AstKind::Cast { .. } => self.check_cast(node),

            // Already wrapped on a previous visit
            AstKind::TypeRef { .. } => Ok(node),

            // Entities that can appear in expression position after
            // resolution replaced a name use. Type entities carry no type
            // slot of their own; wrap them and attach the metatype so using
            // a type where a concrete value is expected is diagnosed, while
            // a context expecting the metatype (alias bias) accepts it.
            _ => {
                let is_type_entity = self.ctx.ast.node(node).flags.contains(NodeFlags::IS_TYPE)
                    || matches!(
                        self.ctx.ast.node(node).kind,
                        AstKind::StructDecl { .. } | AstKind::EnumDecl { .. }
                    );
                if is_type_entity {
                    let alias_meta = self.ctx.basic_type(BasicTypeKind::AliasMeta);
                    let ty = if expected.is_defined() && expected == alias_meta {
                        alias_meta
                    } else {
                        self.ctx.basic_type(BasicTypeKind::TypeMeta)
                    };

                    let loc = self.ctx.ast.node(node).loc;
                    return Ok(self.ctx.ast.add_node(
                        loc,
                        AstKind::TypeRef { entity: node, ty },
                        NodeFlags::IS_TYPE,
                    ));
                }
                Ok(node)
            }
        }
    }

    fn check_name_use(&mut self, node: AstIndex, allow_callable: bool) -> CompileResult<AstIndex> {
        let entity = match &self.ctx.ast.node(node).kind {
            AstKind::NameUse { entity, .. } => *entity,
            _ => unreachable!(),
        };

        if !entity.is_defined() {
            // Unresolved: the error was reported during name resolution
            return Ok(node);
        }

        match &self.ctx.ast.node(entity).kind {
            AstKind::VariableDecl { .. } => {
                // The declaration may appear later in its block; its type
                // node must be resolved before it is read
                driver::require_name_resolve(self.ctx, entity)?;
                let ty = match &self.ctx.ast.node(entity).kind {
                    AstKind::VariableDecl { ty, .. } => *ty,
                    _ => unreachable!(),
                };
                self.ctx.ast.set_expr_type(node, ty);
                self.ctx
                    .ast
                    .node_mut(node)
                    .flags
                    .insert(NodeFlags::IS_LVALUE);
                Ok(node)
            }

            AstKind::EnumMember { .. } => {
                driver::require_type_check(self.ctx, entity)?;
                let ty = match &self.ctx.ast.node(entity).kind {
                    AstKind::EnumMember { ty, .. } => *ty,
                    _ => unreachable!(),
                };
                self.ctx.ast.set_expr_type(node, ty);
                Ok(node)
            }

            AstKind::FunctionDecl {
                signature,
                template_params,
                name,
                ..
            } => {
                let signature = *signature;
                let templated = !template_params.is_empty();
                let name = *name;

                if templated {
                    let kind =
                        DiagKind::TemplateUnsupported(self.ctx.idents.get(name).to_string());
                    self.error(kind, node);
                    return Ok(node);
                }

                if allow_callable {
                    self.ctx.ast.set_expr_type(node, signature);
                    return Ok(node);
                }

                // Paren-free call
                let loc = self.ctx.ast.node(node).loc;
                let args = self.ctx.ast.add_list(&[]);
                let call = self.ctx.ast.add_node(
                    loc,
                    AstKind::Call {
                        callee: node,
                        args,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                );
                self.check_call(call)
            }

            _ => Ok(node),
        }
    }

    fn check_member(&mut self, node: AstIndex) -> CompileResult<AstIndex> {
        let (aggregate, member_ident) = match &self.ctx.ast.node(node).kind {
            AstKind::MemberExpr {
                aggregate,
                member_ident,
                ..
            } => (*aggregate, *member_ident),
            _ => unreachable!(),
        };

        // Enum member access through the type name: `Color.red`
        if let AstKind::EnumDecl { scope, members, .. } = &self.ctx.ast.node(aggregate).kind {
            let (scope, members) = (*scope, *members);

            let Some(member) = self.ctx.scopes.get(scope).entities.get(&member_ident).copied()
            else {
                let kind = DiagKind::NoSuchMember(
                    self.ctx.type_name(aggregate),
                    self.ctx.idents.get(member_ident).to_string(),
                );
                self.error(kind, node);
                return Ok(node);
            };

            driver::require_type_check(self.ctx, member)?;
            let member_index = (0..members.len as usize)
                .find(|i| self.ctx.ast.list_item(members, *i) == member)
                .unwrap_or(0) as u32;

            if let AstKind::MemberExpr {
                member: member_slot,
                member_index: index_slot,
                access,
                ty,
                ..
            } = &mut self.ctx.ast.node_mut(node).kind
            {
                *member_slot = member;
                *index_slot = member_index;
                *access = MemberAccessKind::EnumMember;
                *ty = aggregate;
            }
            return Ok(node);
        }

        let aggregate = self.check_expr(aggregate, AstIndex::UNDEFINED)?;
        if let AstKind::MemberExpr {
            aggregate: slot, ..
        } = &mut self.ctx.ast.node_mut(node).kind
        {
            *slot = aggregate;
        }

        let mut agg_ty = self.ctx.ast.expr_type(aggregate);
        if !agg_ty.is_defined() {
            return Ok(node);
        }

        // One level of pointer is dereferenced implicitly
        if let AstKind::PtrType { base } = &self.ctx.ast.node(agg_ty).kind {
            let base = *base;
            if matches!(self.ctx.ast.node(base).kind, AstKind::StructDecl { .. }) {
                agg_ty = base;
                self.ctx
                    .ast
                    .node_mut(node)
                    .flags
                    .insert(NodeFlags::NEEDS_DEREF);
            }
        }

        match &self.ctx.ast.node(agg_ty).kind {
            AstKind::StructDecl { scope, .. } => {
                let scope = *scope;
                // Member types must be resolved before field lookup
                driver::require_name_resolve(self.ctx, agg_ty)?;

                let Some(member) =
                    self.ctx.scopes.get(scope).entities.get(&member_ident).copied()
                else {
                    let kind = DiagKind::NoSuchMember(
                        self.ctx.type_name(agg_ty),
                        self.ctx.idents.get(member_ident).to_string(),
                    );
                    self.error(kind, node);
                    return Ok(node);
                };

                match &self.ctx.ast.node(member).kind {
                    AstKind::VariableDecl { ty, index, .. } => {
                        let (ty, index) = (*ty, *index);
                        let aggregate_lvalue = self
                            .ctx
                            .ast
                            .node(aggregate)
                            .flags
                            .contains(NodeFlags::IS_LVALUE);

                        if let AstKind::MemberExpr {
                            member: member_slot,
                            member_index: index_slot,
                            access,
                            ty: ty_slot,
                            ..
                        } = &mut self.ctx.ast.node_mut(node).kind
                        {
                            *member_slot = member;
                            *index_slot = index;
                            *access = MemberAccessKind::StructField;
                            *ty_slot = ty;
                        }
                        if aggregate_lvalue
                            || self.ctx.ast.node(node).flags.contains(NodeFlags::NEEDS_DEREF)
                        {
                            self.ctx
                                .ast
                                .node_mut(node)
                                .flags
                                .insert(NodeFlags::IS_LVALUE);
                        }
                    }
                    AstKind::FunctionDecl { signature, .. } => {
                        let signature = *signature;
                        if let AstKind::MemberExpr {
                            member: member_slot,
                            access,
                            ty: ty_slot,
                            ..
                        } = &mut self.ctx.ast.node_mut(node).kind
                        {
                            *member_slot = member;
                            *access = MemberAccessKind::Method;
                            *ty_slot = signature;
                        }
                    }
                    _ => {
                        let kind = DiagKind::NoSuchMember(
                            self.ctx.type_name(agg_ty),
                            self.ctx.idents.get(member_ident).to_string(),
                        );
                        self.error(kind, node);
                    }
                }
                Ok(node)
            }

            AstKind::SliceType { base } => {
                let base = *base;
                self.synthesize_sequence_member(
                    node,
                    member_ident,
                    MemberAccessKind::SliceLength,
                    MemberAccessKind::SlicePtr,
                    base,
                    agg_ty,
                )
            }

            AstKind::StaticArrayType { base, .. } => {
                let base = *base;
                self.synthesize_sequence_member(
                    node,
                    member_ident,
                    MemberAccessKind::StaticArrayLength,
                    MemberAccessKind::StaticArrayPtr,
                    base,
                    agg_ty,
                )
            }

            _ => {
                let kind = DiagKind::NoSuchMember(
                    self.ctx.type_name(agg_ty),
                    self.ctx.idents.get(member_ident).to_string(),
                );
                self.error(kind, node);
                Ok(node)
            }
        }
    }

    /// `length` / `ptr` pseudo-members of slices and static arrays
    fn synthesize_sequence_member(
        &mut self,
        node: AstIndex,
        member_ident: crate::frontend::intern::IdentId,
        length_access: MemberAccessKind,
        ptr_access: MemberAccessKind,
        base: AstIndex,
        agg_ty: AstIndex,
    ) -> CompileResult<AstIndex> {
        use crate::frontend::intern::known;

        let (access, ty) = if member_ident == known::LENGTH {
            (length_access, self.ctx.basic_type(BasicTypeKind::I64))
        } else if member_ident == known::PTR {
            (ptr_access, self.ctx.pointer_type(base))
        } else {
            let kind = DiagKind::NoSuchMember(
                self.ctx.type_name(agg_ty),
                self.ctx.idents.get(member_ident).to_string(),
            );
            self.error(kind, node);
            return Ok(node);
        };

        if let AstKind::MemberExpr {
            access: access_slot,
            ty: ty_slot,
            ..
        } = &mut self.ctx.ast.node_mut(node).kind
        {
            *access_slot = access;
            *ty_slot = ty;
        }
        Ok(node)
    }

    fn check_unary(&mut self, node: AstIndex) -> CompileResult<AstIndex> {
        let (op, child) = match &self.ctx.ast.node(node).kind {
            AstKind::UnaryOp { op, child, .. } => (*op, *child),
            _ => unreachable!(),
        };

        // Taking a function's address yields the callable itself
        if op == UnaryOpKind::AddressOf {
            if let AstKind::NameUse { entity, .. } = &self.ctx.ast.node(child).kind {
                if matches!(
                    self.ctx.ast.node(*entity).kind,
                    AstKind::FunctionDecl { .. }
                ) {
                    let checked = self.check_name_use(child, true)?;
                    let ty = self.ctx.ast.expr_type(checked);
                    if let AstKind::UnaryOp { child: slot, .. } =
                        &mut self.ctx.ast.node_mut(node).kind
                    {
                        *slot = checked;
                    }
                    self.ctx.ast.set_expr_type(node, ty);
                    return Ok(node);
                }
            }
        }

        let checked = self.check_expr(child, AstIndex::UNDEFINED)?;
        if let AstKind::UnaryOp { child: slot, .. } = &mut self.ctx.ast.node_mut(node).kind {
            *slot = checked;
        }

        let child_ty = self.ctx.ast.expr_type(checked);
        if !child_ty.is_defined() {
            return Ok(node);
        }

        let result_ty = match op {
            UnaryOpKind::Negate | UnaryOpKind::BitwiseNot => {
                if !is_integer(self.ctx, child_ty)
                    && !basic_kind(self.ctx, child_ty).is_some_and(|b| b.is_float())
                {
                    let i64_ty = self.ctx.basic_type(BasicTypeKind::I64);
                    self.type_mismatch(node, i64_ty, child_ty);
                }
                child_ty
            }
            UnaryOpKind::LogicalNot => {
                self.require_bool(checked);
                self.ctx.basic_type(BasicTypeKind::Bool)
            }
            UnaryOpKind::AddressOf => {
                if !self
                    .ctx
                    .ast
                    .node(checked)
                    .flags
                    .contains(NodeFlags::IS_LVALUE)
                {
                    self.error(DiagKind::AddressOfNonLvalue, node);
                }
                self.ctx.pointer_type(child_ty)
            }
            UnaryOpKind::Deref => match &self.ctx.ast.node(child_ty).kind {
                AstKind::PtrType { base } => {
                    let base = *base;
                    self.ctx
                        .ast
                        .node_mut(node)
                        .flags
                        .insert(NodeFlags::IS_LVALUE);
                    base
                }
                _ => {
                    let kind = DiagKind::TypeMismatch {
                        expected: "a pointer".to_string(),
                        found: self.ctx.type_name(child_ty),
                    };
                    self.error(kind, node);
                    AstIndex::UNDEFINED
                }
            },
        };

        self.ctx.ast.set_expr_type(node, result_ty);
        Ok(node)
    }

    fn check_binary(&mut self, node: AstIndex, expected: AstIndex) -> CompileResult<AstIndex> {
        let (op, lhs, rhs) = match &self.ctx.ast.node(node).kind {
            AstKind::BinaryOp { op, lhs, rhs, .. } => (*op, *lhs, *rhs),
            _ => unreachable!(),
        };

        if op.is_assignment() {
            let lhs = self.check_expr(lhs, AstIndex::UNDEFINED)?;
            if !self.ctx.ast.node(lhs).flags.contains(NodeFlags::IS_LVALUE) {
                self.error(DiagKind::LvalueRequired, lhs);
            }

            let lhs_ty = self.ctx.ast.expr_type(lhs);
            let rhs = self.check_expr(rhs, lhs_ty)?;
            let rhs = self.coerce(rhs, lhs_ty);

            if op.compound_operation().is_some()
                && lhs_ty.is_defined()
                && !is_integer(self.ctx, lhs_ty)
            {
                let i64_ty = self.ctx.basic_type(BasicTypeKind::I64);
                self.type_mismatch(node, i64_ty, lhs_ty);
            }

            if let AstKind::BinaryOp {
                lhs: lhs_slot,
                rhs: rhs_slot,
                ..
            } = &mut self.ctx.ast.node_mut(node).kind
            {
                *lhs_slot = lhs;
                *rhs_slot = rhs;
            }
            let void_ty = self.ctx.basic_type(BasicTypeKind::Void);
            self.ctx.ast.set_expr_type(node, void_ty);
            return Ok(node);
        }

        if matches!(op, BinaryOpKind::LogicalAnd | BinaryOpKind::LogicalOr) {
            let bool_ty = self.ctx.basic_type(BasicTypeKind::Bool);
            let lhs = self.check_expr(lhs, bool_ty)?;
            let rhs = self.check_expr(rhs, bool_ty)?;
            self.require_bool(lhs);
            self.require_bool(rhs);

            if let AstKind::BinaryOp {
                lhs: lhs_slot,
                rhs: rhs_slot,
                ..
            } = &mut self.ctx.ast.node_mut(node).kind
            {
                *lhs_slot = lhs;
                *rhs_slot = rhs;
            }
            self.ctx.ast.set_expr_type(node, bool_ty);
            return Ok(node);
        }

        // Arithmetic, bitwise and comparison operators want both sides in
        // one type; the expected type biases literals on the left
        let operand_expected = if expected.is_defined() && is_integer(self.ctx, expected) {
            expected
        } else {
            AstIndex::UNDEFINED
        };

        let lhs = self.check_expr(lhs, operand_expected)?;
        let lhs_ty = self.ctx.ast.expr_type(lhs);
        let rhs = self.check_expr(rhs, lhs_ty)?;
        let rhs_ty = self.ctx.ast.expr_type(rhs);

        let (lhs, rhs, operand_ty) = if !lhs_ty.is_defined() || !rhs_ty.is_defined() {
            (lhs, rhs, AstIndex::UNDEFINED)
        } else if same_type(lhs_ty, rhs_ty) {
            (lhs, rhs, lhs_ty)
        } else if self.can_coerce(rhs, rhs_ty, lhs_ty) {
            let rhs = self.coerce(rhs, lhs_ty);
            (lhs, rhs, lhs_ty)
        } else if self.can_coerce(lhs, lhs_ty, rhs_ty) {
            let lhs = self.coerce(lhs, rhs_ty);
            (lhs, rhs, rhs_ty)
        } else {
            self.type_mismatch(node, lhs_ty, rhs_ty);
            (lhs, rhs, lhs_ty)
        };

        if let AstKind::BinaryOp {
            lhs: lhs_slot,
            rhs: rhs_slot,
            ..
        } = &mut self.ctx.ast.node_mut(node).kind
        {
            *lhs_slot = lhs;
            *rhs_slot = rhs;
        }

        let result_ty = if op.is_comparison() {
            self.ctx.basic_type(BasicTypeKind::Bool)
        } else {
            operand_ty
        };
        self.ctx.ast.set_expr_type(node, result_ty);
        Ok(node)
    }

    fn check_call(&mut self, node: AstIndex) -> CompileResult<AstIndex> {
        let (callee, args) = match &self.ctx.ast.node(node).kind {
            AstKind::Call { callee, args, .. } => (*callee, *args),
            _ => unreachable!(),
        };

        // Checking the callee in callable context; methods keep their
        // receiver inside the member expression
        let callee = match self.ctx.ast.node(callee).kind {
            AstKind::NameUse { .. } => self.check_name_use(callee, true)?,
            AstKind::MemberExpr { .. } => self.check_member(callee)?,
            _ => self.check_expr(callee, AstIndex::UNDEFINED)?,
        };
        if let AstKind::Call { callee: slot, .. } = &mut self.ctx.ast.node_mut(node).kind {
            *slot = callee;
        }

        let signature = self.ctx.ast.expr_type(callee);
        if !signature.is_defined() {
            return Ok(node);
        }

        let (return_type, params) = match &self.ctx.ast.node(signature).kind {
            AstKind::FunctionSignature {
                return_type,
                params,
            } => (*return_type, *params),
            _ => {
                self.error(DiagKind::NotCallable, node);
                return Ok(node);
            }
        };

        // A method call binds its receiver to the implicit leading `this`
        let is_method = matches!(
            self.ctx.ast.node(callee).kind,
            AstKind::MemberExpr {
                access: MemberAccessKind::Method,
                ..
            }
        );
        let param_offset = is_method as usize;
        let positional = (params.len as usize).saturating_sub(param_offset);

        if args.len as usize > positional {
            let kind = DiagKind::ArgumentCountMismatch {
                expected: positional,
                found: args.len as usize,
            };
            self.error(kind, node);
        } else {
            // Missing trailing arguments must have defaults
            for i in args.len as usize..positional {
                let param = self.ctx.ast.list_item(params, i + param_offset);
                let has_default = match &self.ctx.ast.node(param).kind {
                    AstKind::VariableDecl { initializer, .. } => initializer.is_defined(),
                    _ => false,
                };
                if !has_default {
                    self.error(DiagKind::MissingDefaultArgument(i), node);
                    break;
                }
            }
        }

        for i in 0..(args.len as usize).min(positional) {
            let param = self.ctx.ast.list_item(params, i + param_offset);
            let param_ty = match &self.ctx.ast.node(param).kind {
                AstKind::VariableDecl { ty, .. } => *ty,
                _ => AstIndex::UNDEFINED,
            };

            let arg = self.ctx.ast.list_item(args, i);
            let checked = self.check_expr(arg, param_ty)?;
            let coerced = self.coerce(checked, param_ty);
            self.ctx.ast.set_list_item(args, i, coerced);
        }

        self.ctx.ast.set_expr_type(node, return_type);
        Ok(node)
    }

    fn check_index(&mut self, node: AstIndex) -> CompileResult<AstIndex> {
        let (object, index) = match &self.ctx.ast.node(node).kind {
            AstKind::IndexOp { object, index, .. } => (*object, *index),
            _ => unreachable!(),
        };

        let object = self.check_expr(object, AstIndex::UNDEFINED)?;
        let i64_ty = self.ctx.basic_type(BasicTypeKind::I64);
        let index = self.check_expr(index, i64_ty)?;
        let index_ty = self.ctx.ast.expr_type(index);
        if index_ty.is_defined() && !is_integer(self.ctx, index_ty) {
            self.type_mismatch(node, i64_ty, index_ty);
        }

        let object_ty = self.ctx.ast.expr_type(object);
        let element_ty = if object_ty.is_defined() {
            match &self.ctx.ast.node(object_ty).kind {
                AstKind::SliceType { base }
                | AstKind::StaticArrayType { base, .. }
                | AstKind::PtrType { base } => *base,
                _ => {
                    let kind = DiagKind::TypeMismatch {
                        expected: "a slice, array or pointer".to_string(),
                        found: self.ctx.type_name(object_ty),
                    };
                    self.error(kind, node);
                    AstIndex::UNDEFINED
                }
            }
        } else {
            AstIndex::UNDEFINED
        };

        if let AstKind::IndexOp {
            object: object_slot,
            index: index_slot,
            ..
        } = &mut self.ctx.ast.node_mut(node).kind
        {
            *object_slot = object;
            *index_slot = index;
        }
        self.ctx
            .ast
            .node_mut(node)
            .flags
            .insert(NodeFlags::IS_LVALUE);
        self.ctx.ast.set_expr_type(node, element_ty);
        Ok(node)
    }

    fn check_cast(&mut self, node: AstIndex) -> CompileResult<AstIndex> {
        let (target, expr) = match &self.ctx.ast.node(node).kind {
            AstKind::Cast { target, expr, .. } => (*target, *expr),
            _ => unreachable!(),
        };

        let expr = self.check_expr(expr, AstIndex::UNDEFINED)?;
        let from = self.ctx.ast.expr_type(expr);

        let cast = if from.is_defined() {
            match classify_cast(self.ctx, from, target) {
                Some(kind) => kind,
                None => {
                    let kind = DiagKind::InvalidCast {
                        from: self.ctx.type_name(from),
                        to: self.ctx.type_name(target),
                    };
                    self.error(kind, node);
                    CastKind::NoOp
                }
            }
        } else {
            CastKind::NoOp
        };

        if let AstKind::Cast {
            expr: expr_slot,
            cast: cast_slot,
            ..
        } = &mut self.ctx.ast.node_mut(node).kind
        {
            *expr_slot = expr;
            *cast_slot = cast;
        }
        self.ctx.ast.set_expr_type(node, target);
        Ok(node)
    }

    fn can_coerce(&self, node: AstIndex, from: AstIndex, to: AstIndex) -> bool {
        if same_type(from, to) {
            return true;
        }

        // Common-value literals adapt to any integer type that fits
        if let AstKind::IntLiteral { value, .. } = &self.ctx.ast.node(node).kind {
            if let Some(basic) = basic_kind(self.ctx, to) {
                if basic.is_integer() && literal_fits(*value, basic) {
                    return true;
                }
            }
        }

        match (basic_kind(self.ctx, from), basic_kind(self.ctx, to)) {
            (Some(from), Some(to)) if from.is_integer() && to.is_integer() => {
                // Widening within one signedness, or unsigned into a strictly
                // wider signed type; never between signednesses at one width
                if from.size() < to.size() {
                    from.is_signed() == to.is_signed() || !from.is_signed()
                } else {
                    false
                }
            }
            _ => {
                // Null coerces into any pointer
                basic_kind(self.ctx, from) == Some(BasicTypeKind::Null)
                    && matches!(self.ctx.ast.node(to).kind, AstKind::PtrType { .. })
            }
        }
    }

    /// Adjusts `node` to type `to`, retyping literals and wrapping widening
    /// conversions; reports a mismatch when no implicit coercion applies
    fn coerce(&mut self, node: AstIndex, to: AstIndex) -> AstIndex {
        let from = self.ctx.ast.expr_type(node);

        if !to.is_defined() || !from.is_defined() || same_type(from, to) {
            return node;
        }

        if let AstKind::IntLiteral { value, .. } = &self.ctx.ast.node(node).kind {
            let value = *value;
            if let Some(basic) = basic_kind(self.ctx, to) {
                if basic.is_integer() && literal_fits(value, basic) {
                    self.ctx.ast.set_expr_type(node, to);
                    return node;
                }
            }
            if matches!(self.ctx.ast.node(to).kind, AstKind::EnumDecl { .. }) {
                self.ctx.ast.set_expr_type(node, to);
                return node;
            }
        }

        if self.can_coerce(node, from, to) {
            // Widening integer conversion materializes as an explicit cast
            if let (Some(from_basic), Some(_)) =
                (basic_kind(self.ctx, from), basic_kind(self.ctx, to))
            {
                let loc = self.ctx.ast.node(node).loc;
                return self.ctx.ast.add_node(
                    loc,
                    AstKind::Cast {
                        target: to,
                        expr: node,
                        cast: CastKind::IntWiden {
                            signed: from_basic.is_signed(),
                        },
                        ty: to,
                    },
                    NodeFlags::empty(),
                );
            }
            // null into pointer: retype in place
            self.ctx.ast.set_expr_type(node, to);
            return node;
        }

        self.type_mismatch(node, to, from);
        node
    }
}

/// The checked cast kinds: integer resizing, pointer/integer,
/// pointer/pointer, slice-to-pointer and enum/integer
fn classify_cast(ctx: &CompilationContext, from: AstIndex, to: AstIndex) -> Option<CastKind> {
    if from == to {
        return Some(CastKind::NoOp);
    }

    let from_kind = &ctx.ast.node(from).kind;
    let to_kind = &ctx.ast.node(to).kind;

    match (from_kind, to_kind) {
        (AstKind::BasicType { basic: f }, AstKind::BasicType { basic: t })
            if f.is_integer() && t.is_integer() =>
        {
            Some(if f.size() < t.size() {
                CastKind::IntWiden { signed: f.is_signed() }
            } else if f.size() > t.size() {
                CastKind::IntNarrow
            } else {
                CastKind::NoOp
            })
        }
        (AstKind::BasicType { basic }, AstKind::PtrType { .. }) if basic.is_integer() => {
            Some(CastKind::IntToPtr)
        }
        (AstKind::PtrType { .. }, AstKind::BasicType { basic }) if basic.is_integer() => {
            Some(CastKind::PtrToInt)
        }
        (AstKind::PtrType { .. }, AstKind::PtrType { .. }) => Some(CastKind::PtrToPtr),
        (AstKind::SliceType { .. }, AstKind::PtrType { .. }) => Some(CastKind::SliceToPtr),
        (AstKind::EnumDecl { .. }, AstKind::BasicType { basic }) if basic.is_integer() => {
            Some(CastKind::EnumToInt)
        }
        (AstKind::BasicType { basic }, AstKind::EnumDecl { .. }) if basic.is_integer() => {
            Some(CastKind::IntToEnum)
        }
        (
            AstKind::BasicType {
                basic: BasicTypeKind::Null,
            },
            AstKind::PtrType { .. },
        ) => Some(CastKind::NoOp),
        _ => None,
    }
}

//! Name resolution. Identifier uses are resolved through the lexical scope
//! chain; a handful of rewrites happen at the use site: alias uses are
//! replaced by the alias's (resolved) initializer, type entities replace the
//! use index directly, and a bare struct-member use becomes `this.member`.
//! Resolution functions return the possibly-replaced node index and callers
//! write it back into the owning slot, so other holders of the original
//! index are unaffected.

use crate::{
    context::CompilationContext,
    diag::{CompileResult, DiagKind},
    frontend::{
        ast::{AstIndex, AstKind, AstNodes, MemberAccessKind, NodeFlags},
        intern::known,
    },
    middle::{driver, eval},
};

/// Declaration-level entry point used by the analysis driver
pub(crate) fn name_resolve(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    match &ctx.ast.node(node).kind {
        AstKind::Module { decls, .. } => {
            let decls = *decls;
            for i in 0..decls.len as usize {
                let item = ctx.ast.list_item(decls, i);
                driver::require_name_resolve(ctx, item)?;
            }
        }

        AstKind::Alias { expr, .. } => {
            let expr = *expr;
            let mut resolved = resolve_expr(ctx, expr)?;

            // An array literal bound to an alias becomes an alias array: the
            // compile-time list of entities `#foreach` iterates
            if let AstKind::ArrayLiteral { items, .. } = &ctx.ast.node(resolved).kind {
                let items = *items;
                let mut entities = Vec::new();
                for i in 0..items.len as usize {
                    let item = ctx.ast.list_item(items, i);
                    entities.push(resolved_entity(ctx, item));
                }
                let entities = ctx.ast.add_list(&entities);
                let loc = ctx.ast.node(resolved).loc;
                resolved = ctx
                    .ast
                    .add_node(loc, AstKind::AliasArray { items: entities }, NodeFlags::empty());
            }

            if let AstKind::Alias { expr: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = resolved;
            }
        }

        AstKind::AliasArray { items } => {
            let items = *items;
            resolve_list(ctx, items)?;
        }

        AstKind::StructDecl { members, .. } => {
            let members = *members;
            for i in 0..members.len as usize {
                let member = ctx.ast.list_item(members, i);
                driver::require_name_resolve(ctx, member)?;
            }
        }

        AstKind::EnumDecl { base, members, .. } => {
            let (base, members) = (*base, *members);

            if base.is_defined() {
                let resolved = resolve_expr(ctx, base)?;
                if let AstKind::EnumDecl { base: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                    *slot = resolved;
                }
            }

            for i in 0..members.len as usize {
                let member = ctx.ast.list_item(members, i);
                driver::require_name_resolve(ctx, member)?;
            }
        }

        AstKind::EnumMember { ty, value, .. } => {
            let (ty, value) = (*ty, *value);

            if ty.is_defined() {
                let resolved = resolve_expr(ctx, ty)?;
                if let AstKind::EnumMember { ty: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                    *slot = resolved;
                }
            }
            if value.is_defined() {
                let resolved = resolve_expr(ctx, value)?;
                if let AstKind::EnumMember { value: slot, .. } = &mut ctx.ast.node_mut(node).kind
                {
                    *slot = resolved;
                }
            }
        }

        AstKind::FunctionDecl {
            signature, body, ..
        } => {
            let (signature, body) = (*signature, *body);

            let resolved = resolve_expr(ctx, signature)?;
            if let AstKind::FunctionDecl { signature: slot, .. } =
                &mut ctx.ast.node_mut(node).kind
            {
                *slot = resolved;
            }

            if body.is_defined() {
                driver::require_name_resolve(ctx, body)?;
            }
        }

        AstKind::VariableDecl { ty, initializer, .. } => {
            let (ty, initializer) = (*ty, *initializer);

            if ty.is_defined() {
                let resolved = resolve_expr(ctx, ty)?;
                if let AstKind::VariableDecl { ty: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                    *slot = resolved;
                }
            }
            if initializer.is_defined() {
                let resolved = resolve_expr(ctx, initializer)?;
                if let AstKind::VariableDecl {
                    initializer: slot, ..
                } = &mut ctx.ast.node_mut(node).kind
                {
                    *slot = resolved;
                }
            }
        }

        AstKind::Block { statements, .. } => {
            let statements = *statements;
            for i in 0..statements.len as usize {
                let stmt = ctx.ast.list_item(statements, i);
                resolve_statement(ctx, statements, i, stmt)?;
            }
        }

        AstKind::IfStmt {
            condition,
            then_branch,
            else_branch,
        } => {
            let (condition, then_branch, else_branch) = (*condition, *then_branch, *else_branch);

            let resolved = resolve_expr(ctx, condition)?;
            if let AstKind::IfStmt { condition: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = resolved;
            }

            driver::require_name_resolve(ctx, then_branch)?;
            if else_branch.is_defined() {
                driver::require_name_resolve(ctx, else_branch)?;
            }
        }

        AstKind::WhileStmt { condition, body } => {
            let (condition, body) = (*condition, *body);

            let resolved = resolve_expr(ctx, condition)?;
            if let AstKind::WhileStmt { condition: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = resolved;
            }

            driver::require_name_resolve(ctx, body)?;
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
                let item = ctx.ast.list_item(init, i);
                resolve_statement(ctx, init, i, item)?;
            }

            if condition.is_defined() {
                let resolved = resolve_expr(ctx, condition)?;
                if let AstKind::ForStmt { condition: slot, .. } = &mut ctx.ast.node_mut(node).kind
                {
                    *slot = resolved;
                }
            }

            resolve_list(ctx, increment)?;
            driver::require_name_resolve(ctx, body)?;
        }

        AstKind::ReturnStmt { value } => {
            let value = *value;
            if value.is_defined() {
                let resolved = resolve_expr(ctx, value)?;
                if let AstKind::ReturnStmt { value: slot } = &mut ctx.ast.node_mut(node).kind {
                    *slot = resolved;
                }
            }
        }

        AstKind::BreakStmt | AstKind::ContinueStmt | AstKind::Import { .. } => {}

        // Driver entered directly on an expression node
        _ => {
            resolve_expr(ctx, node)?;
        }
    }

    Ok(())
}

/// One statement in a list: declarations go through the driver, expressions
/// are resolved and their replacement written back into the list slot
fn resolve_statement(
    ctx: &mut CompilationContext,
    list: AstNodes,
    index: usize,
    stmt: AstIndex,
) -> CompileResult<()> {
    match ctx.ast.node(stmt).kind {
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
        | AstKind::ContinueStmt => driver::require_name_resolve(ctx, stmt),
        _ => {
            let resolved = resolve_expr(ctx, stmt)?;
            ctx.ast.set_list_item(list, index, resolved);
            Ok(())
        }
    }
}

fn resolve_list(ctx: &mut CompilationContext, list: AstNodes) -> CompileResult<()> {
    for i in 0..list.len as usize {
        let item = ctx.ast.list_item(list, i);
        let resolved = resolve_expr(ctx, item)?;
        ctx.ast.set_list_item(list, i, resolved);
    }
    Ok(())
}

/// Chases a resolved name use to the entity it denotes
pub(crate) fn resolved_entity(ctx: &CompilationContext, node: AstIndex) -> AstIndex {
    match &ctx.ast.node(node).kind {
        AstKind::NameUse { entity, .. } if entity.is_defined() => *entity,
        _ => node,
    }
}

/// Resolves an expression subtree, returning the possibly-replaced index
pub(crate) fn resolve_expr(
    ctx: &mut CompilationContext,
    node: AstIndex,
) -> CompileResult<AstIndex> {
    match &ctx.ast.node(node).kind {
        AstKind::NameUse { .. } => resolve_name_use(ctx, node),

        AstKind::MemberExpr { aggregate, .. } => {
            let aggregate = *aggregate;
            let resolved = resolve_expr(ctx, aggregate)?;
            if let AstKind::MemberExpr { aggregate: slot, .. } = &mut ctx.ast.node_mut(node).kind
            {
                *slot = resolved;
            }
            // The member itself resolves during type checking, once the
            // aggregate's type is known
            Ok(node)
        }

        AstKind::UnaryOp { child, .. } => {
            let child = *child;
            let resolved = resolve_expr(ctx, child)?;
            if let AstKind::UnaryOp { child: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = resolved;
            }
            Ok(node)
        }

        AstKind::BinaryOp { lhs, rhs, .. } => {
            let (lhs, rhs) = (*lhs, *rhs);
            let lhs_resolved = resolve_expr(ctx, lhs)?;
            let rhs_resolved = resolve_expr(ctx, rhs)?;
            if let AstKind::BinaryOp {
                lhs: lhs_slot,
                rhs: rhs_slot,
                ..
            } = &mut ctx.ast.node_mut(node).kind
            {
                *lhs_slot = lhs_resolved;
                *rhs_slot = rhs_resolved;
            }
            Ok(node)
        }

        AstKind::Call { callee, args, .. } => {
            let (callee, args) = (*callee, *args);
            let resolved = resolve_expr(ctx, callee)?;
            if let AstKind::Call { callee: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = resolved;
            }
            resolve_list(ctx, args)?;
            Ok(node)
        }

        AstKind::IndexOp { object, index, .. } => {
            let (object, index) = (*object, *index);
            let object_resolved = resolve_expr(ctx, object)?;
            let index_resolved = resolve_expr(ctx, index)?;
            if let AstKind::IndexOp {
                object: object_slot,
                index: index_slot,
                ..
            } = &mut ctx.ast.node_mut(node).kind
            {
                *object_slot = object_resolved;
                *index_slot = index_resolved;
            }
            Ok(node)
        }

        AstKind::Cast { target, expr, .. } => {
            let (target, expr) = (*target, *expr);
            let target_resolved = resolve_expr(ctx, target)?;
            let expr_resolved = resolve_expr(ctx, expr)?;
            if let AstKind::Cast {
                target: target_slot,
                expr: expr_slot,
                ..
            } = &mut ctx.ast.node_mut(node).kind
            {
                *target_slot = target_resolved;
                *expr_slot = expr_resolved;
            }
            Ok(node)
        }

        AstKind::ArrayLiteral { items, .. } => {
            let items = *items;
            resolve_list(ctx, items)?;
            Ok(node)
        }

        // Derived type nodes resolve their base and collapse into the
        // canonical entity for that type
        AstKind::PtrType { base } => {
            let base = *base;
            let base = resolve_expr(ctx, base)?;
            let base = resolved_entity(ctx, base);
            Ok(ctx.pointer_type(base))
        }

        AstKind::SliceType { base } => {
            let base = *base;
            let base = resolve_expr(ctx, base)?;
            let base = resolved_entity(ctx, base);
            Ok(ctx.slice_type(base))
        }

        AstKind::StaticArrayType {
            base, length_expr, ..
        } => {
            let (base, length_expr) = (*base, *length_expr);
            let base = resolve_expr(ctx, base)?;
            let base = resolved_entity(ctx, base);

            let length = if length_expr.is_defined() {
                let length_expr = resolve_expr(ctx, length_expr)?;
                match eval::eval_static_expr(ctx, length_expr) {
                    Ok(value) => value.as_int().max(0) as u64,
                    Err(_) => 0,
                }
            } else {
                0
            };

            Ok(ctx.static_array_type(base, length))
        }

        AstKind::FunctionSignature {
            return_type,
            params,
        } => {
            let (return_type, params) = (*return_type, *params);

            let resolved = resolve_expr(ctx, return_type)?;
            if let AstKind::FunctionSignature {
                return_type: slot, ..
            } = &mut ctx.ast.node_mut(node).kind
            {
                *slot = resolved;
            }

            for i in 0..params.len as usize {
                let param = ctx.ast.list_item(params, i);
                driver::require_name_resolve(ctx, param)?;
            }

            Ok(node)
        }

        // Literals, entities and already-collapsed types resolve to
        // themselves
        _ => Ok(node),
    }
}

/// Resolves one identifier use through the scope chain and applies the
/// post-resolution rewrites
fn resolve_name_use(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<AstIndex> {
    let (scope, ident) = match &ctx.ast.node(node).kind {
        AstKind::NameUse { scope, ident, .. } => (*scope, *ident),
        _ => unreachable!(),
    };

    let Some(entity) = ctx.scopes.lookup(scope, ident) else {
        let kind = DiagKind::UndefinedIdentifier(ctx.idents.get(ident).to_string());
        let loc = ctx.ast.node(node).loc;
        ctx.error(kind, Some(loc));
        // The use keeps its undefined entity; downstream passes treat it as
        // an error sentinel and do not cascade
        return Ok(node);
    };

    match &ctx.ast.node(entity).kind {
        // Type entities and compile-time lists replace the use directly
        AstKind::BasicType { .. }
        | AstKind::PtrType { .. }
        | AstKind::SliceType { .. }
        | AstKind::StaticArrayType { .. }
        | AstKind::FunctionSignature { .. }
        | AstKind::StructDecl { .. }
        | AstKind::EnumDecl { .. }
        | AstKind::AliasArray { .. } => Ok(entity),

        // Transparent alias substitution: the use index is replaced by the
        // alias's resolved initializer
        AstKind::Alias { .. } => {
            driver::require_name_resolve(ctx, entity)?;
            match &ctx.ast.node(entity).kind {
                AstKind::Alias { expr, .. } => Ok(*expr),
                _ => unreachable!(),
            }
        }

        // A struct field used without a receiver becomes `this.member`
        AstKind::VariableDecl { index, .. }
            if ctx.ast.node(entity).flags.contains(NodeFlags::IS_MEMBER) =>
        {
            let member_index = *index;
            let loc = ctx.ast.node(node).loc;

            let this_use = ctx.ast.add_node(
                loc,
                AstKind::NameUse {
                    scope,
                    ident: known::THIS,
                    entity: AstIndex::UNDEFINED,
                    ty: AstIndex::UNDEFINED,
                },
                NodeFlags::empty(),
            );
            let this_use = resolve_name_use(ctx, this_use)?;

            Ok(ctx.ast.add_node(
                loc,
                AstKind::MemberExpr {
                    aggregate: this_use,
                    member_ident: ident,
                    member: entity,
                    member_index,
                    access: MemberAccessKind::StructField,
                    ty: AstIndex::UNDEFINED,
                },
                NodeFlags::NEEDS_DEREF,
            ))
        }

        // Ordinary value entities: record the resolution on the use
        _ => {
            if let AstKind::NameUse { entity: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = entity;
            }
            Ok(node)
        }
    }
}

//! The lazy analysis driver. Every semantic property is computed on demand
//! through a `require_*` function that is safe to call from any context: the
//! per-node tri-state makes repeated calls idempotent and the context's stack
//! of in-progress computations turns infinite recursion into a reported
//! cycle. This is the only sequencing discipline between the passes; they may
//! otherwise be entered in any order.

use itertools::Itertools;

use crate::{
    context::CompilationContext,
    diag::{CompileResult, DiagKind},
    frontend::ast::{AnalysisState, AstIndex, PropState, Property},
    middle::{ir, register, resolve, type_check},
};

pub fn require_property(
    ctx: &mut CompilationContext,
    node: AstIndex,
    property: Property,
) -> CompileResult<()> {
    match property {
        Property::NameRegisterSelf => require_name_register_self(ctx, node),
        Property::NameRegisterNested => require_name_register_nested(ctx, node),
        Property::NameResolve => require_name_resolve(ctx, node),
        Property::TypeCheck => require_type_check(ctx, node),
        Property::IrGen => require_ir_gen(ctx, node),
    }
}

pub fn require_name_register_self(
    ctx: &mut CompilationContext,
    node: AstIndex,
) -> CompileResult<()> {
    if !enter(ctx, node, Property::NameRegisterSelf)? {
        return Ok(());
    }

    let result = register::name_register_self(ctx, node);
    finish(ctx, node, Property::NameRegisterSelf, AnalysisState::NameRegisterSelfDone);
    result
}

pub fn require_name_register_nested(
    ctx: &mut CompilationContext,
    node: AstIndex,
) -> CompileResult<()> {
    require_name_register_self(ctx, node)?;

    if !enter(ctx, node, Property::NameRegisterNested)? {
        return Ok(());
    }

    let result = register::name_register_nested(ctx, node);
    finish(
        ctx,
        node,
        Property::NameRegisterNested,
        AnalysisState::NameRegisterNestedDone,
    );
    result
}

pub fn require_name_resolve(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    require_name_register_nested(ctx, node)?;

    if !enter(ctx, node, Property::NameResolve)? {
        return Ok(());
    }

    let result = resolve::name_resolve(ctx, node);
    finish(ctx, node, Property::NameResolve, AnalysisState::NameResolveDone);
    result
}

pub fn require_type_check(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    require_name_resolve(ctx, node)?;

    if !enter(ctx, node, Property::TypeCheck)? {
        return Ok(());
    }

    let result = type_check::type_check(ctx, node);
    finish(ctx, node, Property::TypeCheck, AnalysisState::TypeCheckDone);
    result
}

pub fn require_ir_gen(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<()> {
    require_type_check(ctx, node)?;

    if !enter(ctx, node, Property::IrGen)? {
        return Ok(());
    }

    let result = ir::ast_lowering::ir_gen(ctx, node);
    finish(ctx, node, Property::IrGen, AnalysisState::IrGenDone);
    result
}

/// Inspects the property tri-state. `Ok(true)` means the caller must compute
/// the property (it has been marked `calculating` and pushed on the stack);
/// `Ok(false)` means it is already calculated. A property that is currently
/// `calculating` is a circular dependency.
fn enter(
    ctx: &mut CompilationContext,
    node: AstIndex,
    property: Property,
) -> CompileResult<bool> {
    match ctx.ast.node(node).props.get(property) {
        PropState::Calculated => Ok(false),
        PropState::NotCalculated => {
            ctx.ast
                .node_mut(node)
                .props
                .set(property, PropState::Calculating);
            ctx.analysis_stack.push((node, property));
            Ok(true)
        }
        PropState::Calculating => {
            // Report the stack path from the offending entry to the top
            let start = ctx
                .analysis_stack
                .iter()
                .position(|entry| *entry == (node, property))
                .unwrap_or(0);

            let path = ctx.analysis_stack[start..]
                .iter()
                .map(|(participant, _)| ctx.node_name(*participant))
                .chain(std::iter::once(ctx.node_name(node)))
                .join(" -> ");

            let loc = ctx.ast.node(node).loc;
            Err(ctx.fatal(DiagKind::CircularDependency(path), Some(loc)))
        }
    }
}

fn finish(
    ctx: &mut CompilationContext,
    node: AstIndex,
    property: Property,
    state: AnalysisState,
) {
    let top = ctx.analysis_stack.pop();
    debug_assert_eq!(top, Some((node, property)));

    let node = ctx.ast.node_mut(node);
    node.props.set(property, PropState::Calculated);
    if node.state < state {
        node.advance_state(state);
    }
}

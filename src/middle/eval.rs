//! Compile-time expression evaluation over resolved AST nodes. Powers `#if`
//! conditions, `#assert`, enum member values and static-array lengths.

use crate::{
    context::CompilationContext,
    diag::{CompileResult, DiagKind},
    frontend::ast::{AstIndex, AstKind, BinaryOpKind, UnaryOpKind},
    middle::driver,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticValue {
    Int(i64),
    Bool(bool),
    Str(Box<str>),
}

impl StaticValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            StaticValue::Int(value) => *value != 0,
            StaticValue::Bool(value) => *value,
            StaticValue::Str(value) => !value.is_empty(),
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            StaticValue::Int(value) => *value,
            StaticValue::Bool(value) => *value as i64,
            StaticValue::Str(_) => 0,
        }
    }

    pub fn display(&self) -> String {
        match self {
            StaticValue::Int(value) => value.to_string(),
            StaticValue::Bool(value) => value.to_string(),
            StaticValue::Str(value) => value.to_string(),
        }
    }
}

/// Evaluates a resolved expression to a constant, reporting `NotConstant`
/// for anything outside the compile-time subset
pub fn eval_static_expr(
    ctx: &mut CompilationContext,
    node: AstIndex,
) -> CompileResult<StaticValue> {
    match &ctx.ast.node(node).kind {
        AstKind::IntLiteral { value, .. } => Ok(StaticValue::Int(*value)),
        AstKind::BoolLiteral { value, .. } => Ok(StaticValue::Bool(*value)),
        AstKind::StringLiteral { value, .. } => Ok(StaticValue::Str(value.clone())),
        AstKind::NullLiteral { .. } => Ok(StaticValue::Int(0)),

        AstKind::NameUse { entity, .. } => {
            let entity = *entity;
            if !entity.is_defined() {
                return not_constant(ctx, node);
            }
            eval_entity(ctx, entity, node)
        }

        AstKind::MemberExpr { member, .. } => {
            let member = *member;
            if !member.is_defined() {
                return not_constant(ctx, node);
            }
            eval_entity(ctx, member, node)
        }

        AstKind::EnumMember { .. } => eval_entity(ctx, node, node),

        AstKind::UnaryOp { op, child, .. } => {
            let (op, child) = (*op, *child);
            let value = eval_static_expr(ctx, child)?;

            Ok(match op {
                UnaryOpKind::Negate => StaticValue::Int(-value.as_int()),
                UnaryOpKind::LogicalNot => StaticValue::Bool(!value.is_truthy()),
                UnaryOpKind::BitwiseNot => StaticValue::Int(!value.as_int()),
                UnaryOpKind::AddressOf | UnaryOpKind::Deref => {
                    return not_constant(ctx, node);
                }
            })
        }

        AstKind::BinaryOp { op, lhs, rhs, .. } => {
            let (op, lhs, rhs) = (*op, *lhs, *rhs);

            // Short-circuit forms do not evaluate the right side needlessly
            if op == BinaryOpKind::LogicalAnd {
                let left = eval_static_expr(ctx, lhs)?;
                if !left.is_truthy() {
                    return Ok(StaticValue::Bool(false));
                }
                return Ok(StaticValue::Bool(eval_static_expr(ctx, rhs)?.is_truthy()));
            }
            if op == BinaryOpKind::LogicalOr {
                let left = eval_static_expr(ctx, lhs)?;
                if left.is_truthy() {
                    return Ok(StaticValue::Bool(true));
                }
                return Ok(StaticValue::Bool(eval_static_expr(ctx, rhs)?.is_truthy()));
            }

            let left = eval_static_expr(ctx, lhs)?.as_int();
            let right = eval_static_expr(ctx, rhs)?.as_int();

            Ok(match op {
                BinaryOpKind::Add => StaticValue::Int(left.wrapping_add(right)),
                BinaryOpKind::Subtract => StaticValue::Int(left.wrapping_sub(right)),
                BinaryOpKind::Multiply => StaticValue::Int(left.wrapping_mul(right)),
                BinaryOpKind::Divide => {
                    StaticValue::Int(left.checked_div(right).unwrap_or(0))
                }
                BinaryOpKind::Modulus => {
                    StaticValue::Int(left.checked_rem(right).unwrap_or(0))
                }
                BinaryOpKind::BitwiseAnd => StaticValue::Int(left & right),
                BinaryOpKind::BitwiseOr => StaticValue::Int(left | right),
                BinaryOpKind::BitwiseXor => StaticValue::Int(left ^ right),
                BinaryOpKind::ShiftLeft => StaticValue::Int(left.wrapping_shl(right as u32)),
                BinaryOpKind::ShiftRight => StaticValue::Int(left.wrapping_shr(right as u32)),
                BinaryOpKind::Equals => StaticValue::Bool(left == right),
                BinaryOpKind::NotEquals => StaticValue::Bool(left != right),
                BinaryOpKind::LessThan => StaticValue::Bool(left < right),
                BinaryOpKind::LessThanOrEqualTo => StaticValue::Bool(left <= right),
                BinaryOpKind::GreaterThan => StaticValue::Bool(left > right),
                BinaryOpKind::GreaterThanOrEqualTo => StaticValue::Bool(left >= right),
                _ => return not_constant(ctx, node),
            })
        }

        AstKind::Cast { expr, .. } => {
            let expr = *expr;
            eval_static_expr(ctx, expr)
        }

        _ => not_constant(ctx, node),
    }
}

/// Evaluates a resolved entity: enum members and aliases of constants
fn eval_entity(
    ctx: &mut CompilationContext,
    entity: AstIndex,
    use_site: AstIndex,
) -> CompileResult<StaticValue> {
    match &ctx.ast.node(entity).kind {
        AstKind::EnumMember { value, .. } => {
            let value = *value;
            if value.is_defined() {
                return eval_static_expr(ctx, value);
            }

            // Auto-valued member: the enum declaration assigns values during
            // its type check
            driver::require_type_check(ctx, entity)?;
            let value = match &ctx.ast.node(entity).kind {
                AstKind::EnumMember { value, .. } => *value,
                _ => unreachable!(),
            };
            if value.is_defined() {
                return eval_static_expr(ctx, value);
            }
            not_constant(ctx, use_site)
        }
        AstKind::IntLiteral { value, .. } => Ok(StaticValue::Int(*value)),
        AstKind::BoolLiteral { value, .. } => Ok(StaticValue::Bool(*value)),
        _ => not_constant(ctx, use_site),
    }
}

fn not_constant(ctx: &mut CompilationContext, node: AstIndex) -> CompileResult<StaticValue> {
    let loc = ctx.ast.node(node).loc;
    Err(ctx.fatal(DiagKind::NotConstant, Some(loc)))
}

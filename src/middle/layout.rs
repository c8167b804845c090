//! Type layout: sizes, alignments and the mapping from type nodes to packed
//! IR types. Aggregates over eight bytes are passed by pointer.

use crate::{
    context::CompilationContext,
    frontend::ast::{AstIndex, AstKind, BasicTypeKind, NodeFlags},
    middle::ir::{IrType, IrTypeKind},
};

pub const POINTER_SIZE: u32 = 8;

pub fn size_of(ctx: &CompilationContext, ty: AstIndex) -> u32 {
    if !ty.is_defined() {
        return 0;
    }

    match &ctx.ast.node(ty).kind {
        AstKind::BasicType { basic } => basic.size(),
        AstKind::PtrType { .. } | AstKind::FunctionSignature { .. } => POINTER_SIZE,
        // `{i64 length, T* ptr}`
        AstKind::SliceType { .. } => 2 * POINTER_SIZE,
        AstKind::StaticArrayType { base, length, .. } => {
            size_of(ctx, *base).saturating_mul(*length as u32)
        }
        AstKind::StructDecl { members, .. } => {
            let is_union = ctx.ast.node(ty).flags.contains(NodeFlags::IS_UNION);
            let mut size = 0u32;

            for i in 0..members.len as usize {
                let member = ctx.ast.list_item(*members, i);
                let AstKind::VariableDecl { ty: field_ty, .. } = &ctx.ast.node(member).kind
                else {
                    continue;
                };

                let field_size = size_of(ctx, *field_ty);
                if is_union {
                    size = size.max(field_size);
                } else {
                    let align = align_of(ctx, *field_ty).max(1);
                    size = size.next_multiple_of(align) + field_size;
                }
            }

            let align = align_of(ctx, ty).max(1);
            size.next_multiple_of(align)
        }
        AstKind::EnumDecl { base, .. } => {
            if base.is_defined() {
                size_of(ctx, *base)
            } else {
                BasicTypeKind::I32.size()
            }
        }
        _ => 0,
    }
}

pub fn align_of(ctx: &CompilationContext, ty: AstIndex) -> u32 {
    if !ty.is_defined() {
        return 1;
    }

    match &ctx.ast.node(ty).kind {
        AstKind::BasicType { basic } => basic.size().max(1),
        AstKind::PtrType { .. } | AstKind::SliceType { .. } | AstKind::FunctionSignature { .. } => {
            POINTER_SIZE
        }
        AstKind::StaticArrayType { base, .. } => align_of(ctx, *base),
        AstKind::StructDecl { members, .. } => {
            let mut align = 1u32;
            for i in 0..members.len as usize {
                let member = ctx.ast.list_item(*members, i);
                if let AstKind::VariableDecl { ty: field_ty, .. } = &ctx.ast.node(member).kind {
                    align = align.max(align_of(ctx, *field_ty));
                }
            }
            align
        }
        AstKind::EnumDecl { base, .. } => {
            if base.is_defined() {
                align_of(ctx, *base)
            } else {
                BasicTypeKind::I32.size()
            }
        }
        _ => 1,
    }
}

/// Byte offset of a struct field, honoring each preceding field's alignment
pub fn field_offset(ctx: &CompilationContext, struct_ty: AstIndex, field_index: u32) -> u32 {
    let AstKind::StructDecl { members, .. } = &ctx.ast.node(struct_ty).kind else {
        return 0;
    };

    if ctx.ast.node(struct_ty).flags.contains(NodeFlags::IS_UNION) {
        return 0;
    }

    let mut offset = 0u32;
    let mut index = 0u32;

    for i in 0..members.len as usize {
        let member = ctx.ast.list_item(*members, i);
        let AstKind::VariableDecl { ty: field_ty, .. } = &ctx.ast.node(member).kind else {
            continue;
        };

        let align = align_of(ctx, *field_ty).max(1);
        offset = offset.next_multiple_of(align);

        if index == field_index {
            return offset;
        }

        offset += size_of(ctx, *field_ty);
        index += 1;
    }

    offset
}

/// Aggregates wider than a register are passed by pointer
pub fn is_pass_by_ptr(ctx: &CompilationContext, ty: AstIndex) -> bool {
    matches!(
        ctx.ast.node(ty).kind,
        AstKind::StructDecl { .. } | AstKind::SliceType { .. } | AstKind::StaticArrayType { .. }
    ) && size_of(ctx, ty) > POINTER_SIZE
}

/// Maps a (canonical) type node to its packed IR type. Structurally
/// identical type ASTs share a canonical node, so they map to the same
/// IR type.
pub fn ir_type_of(ctx: &mut CompilationContext, ty: AstIndex) -> IrType {
    if !ty.is_defined() {
        return IrType::basic(BasicTypeKind::Void);
    }

    let canonical = ctx.canonicalize_type(ty);

    match &ctx.ast.node(canonical).kind {
        AstKind::BasicType { basic } => IrType::basic(*basic),
        AstKind::PtrType { .. } => IrType::node(IrTypeKind::Pointer, canonical),
        AstKind::SliceType { .. } => IrType::node(IrTypeKind::Slice, canonical),
        AstKind::StaticArrayType { .. } => IrType::node(IrTypeKind::StaticArray, canonical),
        AstKind::FunctionSignature { .. } => IrType::node(IrTypeKind::FuncSig, canonical),
        AstKind::StructDecl { .. } => IrType::node(IrTypeKind::Struct, canonical),
        AstKind::EnumDecl { .. } => IrType::node(IrTypeKind::Enum, canonical),
        _ => IrType::basic(BasicTypeKind::Void),
    }
}

/// The basic integer type an expression of type `ty` computes in, used to
/// pick instruction widths and signedness
pub fn basic_of(ctx: &CompilationContext, ty: AstIndex) -> BasicTypeKind {
    match &ctx.ast.node(ty).kind {
        AstKind::BasicType { basic } => *basic,
        AstKind::EnumDecl { base, .. } => {
            if base.is_defined() {
                basic_of(ctx, *base)
            } else {
                BasicTypeKind::I32
            }
        }
        AstKind::PtrType { .. } | AstKind::FunctionSignature { .. } => BasicTypeKind::U64,
        _ => BasicTypeKind::I64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilationContext;

    #[test]
    fn basic_and_derived_sizes() {
        let mut ctx = CompilationContext::new(0);

        let u8_ty = ctx.basic_type(BasicTypeKind::U8);
        let i64_ty = ctx.basic_type(BasicTypeKind::I64);
        assert_eq!(size_of(&ctx, u8_ty), 1);
        assert_eq!(size_of(&ctx, i64_ty), 8);

        let ptr = ctx.pointer_type(u8_ty);
        assert_eq!(size_of(&ctx, ptr), 8);

        let slice = ctx.slice_type(u8_ty);
        assert_eq!(size_of(&ctx, slice), 16);
        assert!(is_pass_by_ptr(&ctx, slice));

        let array = ctx.static_array_type(i64_ty, 4);
        assert_eq!(size_of(&ctx, array), 32);
    }

    #[test]
    fn identical_type_asts_share_an_ir_type() {
        let mut ctx = CompilationContext::new(0);

        let u8_ty = ctx.basic_type(BasicTypeKind::U8);
        let a = ctx.pointer_type(u8_ty);
        let b = ctx.pointer_type(u8_ty);

        assert_eq!(ir_type_of(&mut ctx, a), ir_type_of(&mut ctx, b));
        assert_eq!(ir_type_of(&mut ctx, a).kind(), IrTypeKind::Pointer);
    }
}

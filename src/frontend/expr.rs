//! Pratt (top-down operator precedence) expression parser. Null denotations
//! handle literals, names, grouping, prefix operators, casts and array
//! literals; left denotations handle calls, indexing, member access and the
//! binary/assignment operator ladder.
//!
//! A `prefer_type` flag is threaded through to disambiguate `T*` from `a*b`
//! and `arr[]` from `arr[i]`. Independently of the flag, a `*` whose right
//! context is `,` `)` `]` `[` `;` or `function` is read as a postfix
//! pointer-type constructor.

use crate::{
    diag::{CompileResult, DiagKind},
    frontend::{
        ast::{AstIndex, AstKind, BinaryOpKind, CastKind, NodeFlags, UnaryOpKind},
        lexer::TokenKind,
        parser::Parser,
    },
};

/* Binding powers; higher binds tighter */
const BP_POSTFIX: u32 = 310;
const BP_PREFIX: u32 = 290;
const BP_MULTIPLICATIVE: u32 = 250;
const BP_ADDITIVE: u32 = 230;
const BP_SHIFT: u32 = 210;
const BP_COMPARISON: u32 = 190;
const BP_EQUALITY: u32 = 170;
const BP_BITWISE_AND: u32 = 150;
const BP_BITWISE_XOR: u32 = 130;
const BP_BITWISE_OR: u32 = 110;
const BP_LOGICAL_AND: u32 = 90;
const BP_LOGICAL_OR: u32 = 70;
const BP_ASSIGNMENT: u32 = 30;

/// `(left_bp, right_bp)` for an infix or postfix token; assignment is
/// right-associative so its right binding power is one lower
fn infix_binding_power(kind: TokenKind) -> Option<(u32, u32)> {
    let bp = match kind {
        TokenKind::OpenParen | TokenKind::OpenBracket | TokenKind::Dot => BP_POSTFIX,
        TokenKind::Asterisk | TokenKind::Divide | TokenKind::Modulus | TokenKind::KwFunction => {
            BP_MULTIPLICATIVE
        }
        TokenKind::Plus | TokenKind::Minus => BP_ADDITIVE,
        TokenKind::ShiftLeft | TokenKind::ShiftRight => BP_SHIFT,
        TokenKind::LessThan
        | TokenKind::LessThanOrEqualTo
        | TokenKind::GreaterThan
        | TokenKind::GreaterThanOrEqualTo => BP_COMPARISON,
        TokenKind::DoubleEquals | TokenKind::NotEquals => BP_EQUALITY,
        TokenKind::Ampersand => BP_BITWISE_AND,
        TokenKind::BitwiseXor => BP_BITWISE_XOR,
        TokenKind::BitwiseOr => BP_BITWISE_OR,
        TokenKind::LogicalAnd => BP_LOGICAL_AND,
        TokenKind::LogicalOr => BP_LOGICAL_OR,
        kind if kind.is_assignment_operator() => return Some((BP_ASSIGNMENT, BP_ASSIGNMENT - 1)),
        _ => return None,
    };

    Some((bp, bp))
}

fn binary_op_kind(kind: TokenKind) -> BinaryOpKind {
    match kind {
        TokenKind::Plus => BinaryOpKind::Add,
        TokenKind::Minus => BinaryOpKind::Subtract,
        TokenKind::Asterisk => BinaryOpKind::Multiply,
        TokenKind::Divide => BinaryOpKind::Divide,
        TokenKind::Modulus => BinaryOpKind::Modulus,
        TokenKind::Ampersand => BinaryOpKind::BitwiseAnd,
        TokenKind::BitwiseOr => BinaryOpKind::BitwiseOr,
        TokenKind::BitwiseXor => BinaryOpKind::BitwiseXor,
        TokenKind::ShiftLeft => BinaryOpKind::ShiftLeft,
        TokenKind::ShiftRight => BinaryOpKind::ShiftRight,
        TokenKind::DoubleEquals => BinaryOpKind::Equals,
        TokenKind::NotEquals => BinaryOpKind::NotEquals,
        TokenKind::LessThan => BinaryOpKind::LessThan,
        TokenKind::LessThanOrEqualTo => BinaryOpKind::LessThanOrEqualTo,
        TokenKind::GreaterThan => BinaryOpKind::GreaterThan,
        TokenKind::GreaterThanOrEqualTo => BinaryOpKind::GreaterThanOrEqualTo,
        TokenKind::LogicalAnd => BinaryOpKind::LogicalAnd,
        TokenKind::LogicalOr => BinaryOpKind::LogicalOr,
        TokenKind::Equals => BinaryOpKind::Assign,
        TokenKind::PlusEquals => BinaryOpKind::AddAssign,
        TokenKind::MinusEquals => BinaryOpKind::SubtractAssign,
        TokenKind::MultiplyEquals => BinaryOpKind::MultiplyAssign,
        TokenKind::DivideEquals => BinaryOpKind::DivideAssign,
        TokenKind::ModulusEquals => BinaryOpKind::ModulusAssign,
        TokenKind::BitwiseAndEquals => BinaryOpKind::BitwiseAndAssign,
        TokenKind::BitwiseOrEquals => BinaryOpKind::BitwiseOrAssign,
        TokenKind::BitwiseXorEquals => BinaryOpKind::BitwiseXorAssign,
        TokenKind::ShiftLeftEquals => BinaryOpKind::ShiftLeftAssign,
        TokenKind::ShiftRightEquals => BinaryOpKind::ShiftRightAssign,
        kind => unreachable!("not a binary operator token: {kind:?}"),
    }
}

impl<'ctx> Parser<'ctx> {
    pub(super) fn parse_expression(&mut self) -> CompileResult<AstIndex> {
        self.parse_expr_bp(0, false)
    }

    pub(super) fn parse_expression_pref(&mut self, prefer_type: bool) -> CompileResult<AstIndex> {
        self.parse_expr_bp(0, prefer_type)
    }

    /// A type expression: the same grammar with the type preference enabled
    pub(super) fn parse_type_expr(&mut self) -> CompileResult<AstIndex> {
        self.parse_expr_bp(0, true)
    }

    fn parse_expr_bp(&mut self, min_bp: u32, prefer_type: bool) -> CompileResult<AstIndex> {
        let mut lhs = self.parse_null_denotation(prefer_type)?;

        loop {
            let kind = self.peek_kind();

            // A star in a type-ending right context is a postfix pointer-type
            // constructor rather than multiplication
            if kind == TokenKind::Asterisk
                && (prefer_type || self.peek_kind_at(1).ends_type_position())
            {
                if BP_MULTIPLICATIVE <= min_bp {
                    break;
                }
                let star = self.bump();
                lhs = self.ctx.ast.add_node(
                    star,
                    AstKind::PtrType { base: lhs },
                    NodeFlags::IS_TYPE,
                );
                continue;
            }

            // In type position a parenthesis belongs to the declared name
            // that follows, never to a call
            if kind == TokenKind::OpenParen && prefer_type {
                break;
            }

            let Some((lbp, rbp)) = infix_binding_power(kind) else {
                break;
            };
            if lbp <= min_bp {
                break;
            }

            lhs = self.parse_left_denotation(lhs, kind, rbp, prefer_type)?;
        }

        Ok(lhs)
    }

    fn parse_null_denotation(&mut self, prefer_type: bool) -> CompileResult<AstIndex> {
        match self.peek_kind() {
            TokenKind::IntegerLiteral => {
                let tok = self.bump();
                let value = self.parse_int_text(tok)?;
                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::IntLiteral {
                        value,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            TokenKind::BooleanLiteral => {
                let tok = self.bump();
                let value = self.token_text(tok) == "true";
                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::BoolLiteral {
                        value,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            TokenKind::KwNull => {
                let tok = self.bump();
                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::NullLiteral {
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            TokenKind::StringLiteral => {
                let tok = self.bump();
                let value = unescape(self.token_text(tok));
                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::StringLiteral {
                        value: value.into_boxed_str(),
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            TokenKind::Identifier => {
                let (tok, ident) = self.expect_identifier()?;
                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::NameUse {
                        scope: self.current_scope,
                        ident,
                        entity: AstIndex::UNDEFINED,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            TokenKind::OpenParen => {
                self.bump();
                let inner = self.parse_expr_bp(0, prefer_type)?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::OpenBracket => {
                // `[a, b, c]` literal array; in alias context this becomes an
                // alias array during name resolution
                let tok = self.bump();
                let mut items = Vec::new();

                while self.peek_kind() != TokenKind::CloseBracket {
                    items.push(self.parse_expr_bp(0, false)?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::CloseBracket)?;

                let items = self.ctx.ast.add_list(&items);
                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::ArrayLiteral {
                        items,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            TokenKind::KwCast => {
                // `cast(T) expr`
                let tok = self.bump();
                self.expect(TokenKind::OpenParen)?;
                let target = self.parse_type_expr()?;
                self.expect(TokenKind::CloseParen)?;
                let expr = self.parse_expr_bp(BP_PREFIX, false)?;

                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::Cast {
                        target,
                        expr,
                        cast: CastKind::Unchecked,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            kind if prefix_op(kind).is_some() => {
                let tok = self.bump();
                let op = prefix_op(kind).unwrap();
                let child = self.parse_expr_bp(BP_PREFIX, prefer_type)?;

                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::UnaryOp {
                        op,
                        child,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            kind => {
                let found = format!("{kind} ({})", self.token_text(self.tok));
                Err(self.ctx.fatal(
                    DiagKind::UnexpectedToken {
                        expected: "expression".to_string(),
                        found,
                    },
                    Some(self.tok),
                ))
            }
        }
    }

    fn parse_left_denotation(
        &mut self,
        lhs: AstIndex,
        kind: TokenKind,
        rbp: u32,
        prefer_type: bool,
    ) -> CompileResult<AstIndex> {
        match kind {
            // Function call
            TokenKind::OpenParen => {
                let tok = self.bump();
                let mut args = Vec::new();

                while self.peek_kind() != TokenKind::CloseParen {
                    args.push(self.parse_expr_bp(0, false)?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::CloseParen)?;

                let args = self.ctx.ast.add_list(&args);
                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::Call {
                        callee: lhs,
                        args,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            // Index, slice type, or static-array type
            TokenKind::OpenBracket => {
                let tok = self.bump();

                if self.eat(TokenKind::CloseBracket) {
                    return Ok(self.ctx.ast.add_node(
                        tok,
                        AstKind::SliceType { base: lhs },
                        NodeFlags::IS_TYPE,
                    ));
                }

                let index = self.parse_expr_bp(0, false)?;
                self.expect(TokenKind::CloseBracket)?;

                if prefer_type {
                    return Ok(self.ctx.ast.add_node(
                        tok,
                        AstKind::StaticArrayType {
                            base: lhs,
                            length_expr: index,
                            length: 0,
                        },
                        NodeFlags::IS_TYPE,
                    ));
                }

                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::IndexOp {
                        object: lhs,
                        index,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            // Member access
            TokenKind::Dot => {
                let tok = self.bump();
                let (_, member_ident) = self.expect_identifier()?;

                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::MemberExpr {
                        aggregate: lhs,
                        member_ident,
                        member: AstIndex::UNDEFINED,
                        member_index: 0,
                        access: crate::frontend::ast::MemberAccessKind::Unresolved,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
            // Function-signature type: `RetType function(T1, T2 name)`
            TokenKind::KwFunction => {
                let tok = self.bump();
                self.expect(TokenKind::OpenParen)?;

                let mut params = Vec::new();
                while self.peek_kind() != TokenKind::CloseParen {
                    let loc = self.tok;
                    let ty = self.parse_type_expr()?;
                    let name = if self.peek_kind() == TokenKind::Identifier {
                        let (_, name) = self.expect_identifier()?;
                        name
                    } else {
                        self.ctx.idents.get_or_intern("")
                    };

                    params.push(self.ctx.ast.add_node(
                        loc,
                        AstKind::VariableDecl {
                            name,
                            parent_scope: self.current_scope,
                            ty,
                            initializer: AstIndex::UNDEFINED,
                            index: params.len() as u32,
                        },
                        NodeFlags::IS_PARAMETER,
                    ));

                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::CloseParen)?;

                let params = self.ctx.ast.add_list(&params);
                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::FunctionSignature {
                        return_type: lhs,
                        params,
                    },
                    NodeFlags::IS_TYPE,
                ))
            }
            // Binary and assignment operators
            _ => {
                let tok = self.bump();
                let op = binary_op_kind(kind);
                let rhs = self.parse_expr_bp(rbp, prefer_type)?;

                Ok(self.ctx.ast.add_node(
                    tok,
                    AstKind::BinaryOp {
                        op,
                        lhs,
                        rhs,
                        ty: AstIndex::UNDEFINED,
                    },
                    NodeFlags::empty(),
                ))
            }
        }
    }
}

fn prefix_op(kind: TokenKind) -> Option<UnaryOpKind> {
    Some(match kind {
        TokenKind::Minus => UnaryOpKind::Negate,
        TokenKind::Bang => UnaryOpKind::LogicalNot,
        TokenKind::Tilde => UnaryOpKind::BitwiseNot,
        TokenKind::Ampersand => UnaryOpKind::AddressOf,
        TokenKind::Asterisk => UnaryOpKind::Deref,
        _ => return None,
    })
}

/// Decodes the escape sequences of a string literal, including the
/// surrounding quotes
fn unescape(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);

    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('0') => result.push('\0'),
            Some('\\') => result.push('\\'),
            Some('"') => result.push('"'),
            Some(other) => result.push(other),
            None => break,
        }
    }

    result
}

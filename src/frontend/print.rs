//! Source-form AST printer: renders the node arena back into the surface
//! grammar. Used by the `-e ast` emit mode and to check that re-parsing a
//! printed tree is stable.

use crate::{
    context::CompilationContext,
    frontend::ast::{AstIndex, AstKind, AstNodes, BinaryOpKind, NodeFlags, UnaryOpKind},
};

pub fn print_ast(ctx: &CompilationContext, module: AstIndex) -> String {
    let mut printer = Printer {
        ctx,
        out: String::new(),
        indent: 0,
    };
    printer.print_node(module);
    printer.out
}

struct Printer<'ctx> {
    ctx: &'ctx CompilationContext,
    out: String,
    indent: usize,
}

impl<'ctx> Printer<'ctx> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn ident(&self, id: crate::frontend::intern::IdentId) -> &str {
        self.ctx.idents.get(id)
    }

    fn print_items(&mut self, items: AstNodes) {
        for i in 0..items.len as usize {
            let item = self.ctx.ast.list_item(items, i);
            self.print_node(item);
        }
    }

    fn print_node(&mut self, node: AstIndex) {
        if !node.is_defined() {
            return;
        }

        match &self.ctx.ast.node(node).kind {
            AstKind::Module { path, decls, .. } => {
                let path = self.ctx.path_name(path);
                let decls = *decls;
                self.line(&format!("module {path};"));
                self.print_items(decls);
            }
            AstKind::Import { path } => {
                let path = self.ctx.path_name(path);
                self.line(&format!("import {path};"));
            }
            AstKind::Alias { name, expr, .. } => {
                let text = format!(
                    "alias {} = {};",
                    self.ident(*name),
                    self.expr_text(*expr)
                );
                self.line(&text);
            }
            AstKind::StructDecl { name, members, .. } => {
                let keyword = if self.ctx.ast.node(node).flags.contains(NodeFlags::IS_UNION) {
                    "union"
                } else {
                    "struct"
                };
                let members = *members;
                if members.is_empty()
                    && self.ctx.ast.node(node).flags.contains(NodeFlags::IS_OPAQUE)
                {
                    self.line(&format!("{keyword} {};", self.ident(*name)));
                    return;
                }
                self.line(&format!("{keyword} {} {{", self.ident(*name)));
                self.indent += 1;
                self.print_items(members);
                self.indent -= 1;
                self.line("}");
            }
            AstKind::EnumDecl {
                name,
                base,
                members,
                ..
            } => {
                let mut head = "enum".to_string();
                if let Some(name) = name {
                    head.push(' ');
                    head.push_str(self.ident(*name));
                }
                if base.is_defined() {
                    head.push_str(&format!(" : {}", self.expr_text(*base)));
                }
                let members = *members;
                head.push_str(" {");
                self.line(&head);
                self.indent += 1;
                for i in 0..members.len as usize {
                    let member = self.ctx.ast.list_item(members, i);
                    if let AstKind::EnumMember { name, value, .. } =
                        &self.ctx.ast.node(member).kind
                    {
                        let text = if value.is_defined() {
                            format!("{} = {},", self.ident(*name), self.expr_text(*value))
                        } else {
                            format!("{},", self.ident(*name))
                        };
                        self.line(&text);
                    }
                }
                self.indent -= 1;
                self.line("}");
            }
            AstKind::EnumMember { name, ty, value, .. } => {
                let text = if ty.is_defined() {
                    format!(
                        "enum {} {} = {};",
                        self.expr_text(*ty),
                        self.ident(*name),
                        self.expr_text(*value)
                    )
                } else {
                    format!("enum {} = {};", self.ident(*name), self.expr_text(*value))
                };
                self.line(&text);
            }
            AstKind::FunctionDecl {
                name,
                signature,
                body,
                ..
            } => {
                let (return_type, params) = match &self.ctx.ast.node(*signature).kind {
                    AstKind::FunctionSignature {
                        return_type,
                        params,
                    } => (*return_type, *params),
                    _ => return,
                };

                let mut param_texts = Vec::new();
                for i in 0..params.len as usize {
                    let param = self.ctx.ast.list_item(params, i);
                    if let AstKind::VariableDecl {
                        name,
                        ty,
                        initializer,
                        ..
                    } = &self.ctx.ast.node(param).kind
                    {
                        let mut text =
                            format!("{} {}", self.expr_text(*ty), self.ident(*name));
                        if initializer.is_defined() {
                            text.push_str(&format!(" = {}", self.expr_text(*initializer)));
                        }
                        param_texts.push(text);
                    }
                }

                let head = format!(
                    "{} {}({})",
                    self.expr_text(return_type),
                    self.ident(*name),
                    param_texts.join(", ")
                );

                let body = *body;
                if body.is_defined() {
                    self.line(&head);
                    self.print_node(body);
                } else {
                    self.line(&format!("{head};"));
                }
            }
            AstKind::VariableDecl {
                name,
                ty,
                initializer,
                ..
            } => {
                let text = if initializer.is_defined() {
                    format!(
                        "{} {} = {};",
                        self.expr_text(*ty),
                        self.ident(*name),
                        self.expr_text(*initializer)
                    )
                } else {
                    format!("{} {};", self.expr_text(*ty), self.ident(*name))
                };
                self.line(&text);
            }
            AstKind::Block { statements, .. } => {
                let statements = *statements;
                self.line("{");
                self.indent += 1;
                self.print_items(statements);
                self.indent -= 1;
                self.line("}");
            }
            AstKind::IfStmt {
                condition,
                then_branch,
                else_branch,
            } => {
                let text = format!("if ({})", self.expr_text(*condition));
                let (then_branch, else_branch) = (*then_branch, *else_branch);
                self.line(&text);
                self.print_node(then_branch);
                if else_branch.is_defined() {
                    self.line("else");
                    self.print_node(else_branch);
                }
            }
            AstKind::WhileStmt { condition, body } => {
                let text = format!("while ({})", self.expr_text(*condition));
                let body = *body;
                self.line(&text);
                self.print_node(body);
            }
            AstKind::ForStmt {
                condition, body, ..
            } => {
                let text = if condition.is_defined() {
                    format!("for (...; {}; ...)", self.expr_text(*condition))
                } else {
                    "for (;;)".to_string()
                };
                let body = *body;
                self.line(&text);
                self.print_node(body);
            }
            AstKind::ReturnStmt { value } => {
                let text = if value.is_defined() {
                    format!("return {};", self.expr_text(*value))
                } else {
                    "return;".to_string()
                };
                self.line(&text);
            }
            AstKind::BreakStmt => self.line("break;"),
            AstKind::ContinueStmt => self.line("continue;"),
            AstKind::StaticIf {
                condition,
                then_items,
                else_items,
            } => {
                let text = format!("#if ({})", self.expr_text(*condition));
                let (then_items, else_items) = (*then_items, *else_items);
                self.line(&text);
                self.line("{");
                self.indent += 1;
                self.print_items(then_items);
                self.indent -= 1;
                self.line("}");
                if !else_items.is_empty() {
                    self.line("else {");
                    self.indent += 1;
                    self.print_items(else_items);
                    self.indent -= 1;
                    self.line("}");
                }
            }
            AstKind::StaticVersion {
                version,
                then_items,
                else_items,
            } => {
                let text = format!("#version ({})", self.ident(*version));
                let (then_items, else_items) = (*then_items, *else_items);
                self.line(&text);
                self.line("{");
                self.indent += 1;
                self.print_items(then_items);
                self.indent -= 1;
                self.line("}");
                if !else_items.is_empty() {
                    self.line("else {");
                    self.indent += 1;
                    self.print_items(else_items);
                    self.indent -= 1;
                    self.line("}");
                }
            }
            AstKind::StaticForeach {
                key,
                value,
                iterable,
                body,
            } => {
                let head = match key {
                    Some(key) => format!(
                        "#foreach ({}, {}; {})",
                        self.ident(*key),
                        self.ident(*value),
                        self.expr_text(*iterable)
                    ),
                    None => format!(
                        "#foreach ({}; {})",
                        self.ident(*value),
                        self.expr_text(*iterable)
                    ),
                };
                let body = *body;
                self.line(&head);
                self.line("{");
                self.indent += 1;
                self.print_items(body);
                self.indent -= 1;
                self.line("}");
            }
            AstKind::StaticAssert { condition, message } => {
                let text = if message.is_defined() {
                    format!(
                        "#assert ({}, {});",
                        self.expr_text(*condition),
                        self.expr_text(*message)
                    )
                } else {
                    format!("#assert ({});", self.expr_text(*condition))
                };
                self.line(&text);
            }
            // Expression statement
            _ => {
                let text = format!("{};", self.expr_text(node));
                self.line(&text);
            }
        }
    }

    fn expr_text(&self, node: AstIndex) -> String {
        if !node.is_defined() {
            return String::new();
        }

        match &self.ctx.ast.node(node).kind {
            AstKind::IntLiteral { value, .. } => value.to_string(),
            AstKind::BoolLiteral { value, .. } => value.to_string(),
            AstKind::NullLiteral { .. } => "null".to_string(),
            AstKind::StringLiteral { value, .. } => {
                format!("\"{}\"", value.escape_default())
            }
            AstKind::NameUse { ident, .. } => self.ident(*ident).to_string(),
            AstKind::TypeRef { entity, .. } => self.expr_text(*entity),
            AstKind::MemberExpr {
                aggregate,
                member_ident,
                ..
            } => format!(
                "{}.{}",
                self.expr_text(*aggregate),
                self.ident(*member_ident)
            ),
            AstKind::ArrayLiteral { items, .. } => {
                let items: Vec<String> = self
                    .ctx
                    .ast
                    .list(*items)
                    .iter()
                    .map(|item| self.expr_text(*item))
                    .collect();
                format!("[{}]", items.join(", "))
            }
            AstKind::BinaryOp { op, lhs, rhs, .. } => {
                format!(
                    "({} {} {})",
                    self.expr_text(*lhs),
                    binary_op_text(*op),
                    self.expr_text(*rhs)
                )
            }
            AstKind::UnaryOp { op, child, .. } => {
                format!("{}{}", unary_op_text(*op), self.expr_text(*child))
            }
            AstKind::Call { callee, args, .. } => {
                let args: Vec<String> = self
                    .ctx
                    .ast
                    .list(*args)
                    .iter()
                    .map(|arg| self.expr_text(*arg))
                    .collect();
                format!("{}({})", self.expr_text(*callee), args.join(", "))
            }
            AstKind::IndexOp { object, index, .. } => {
                format!("{}[{}]", self.expr_text(*object), self.expr_text(*index))
            }
            AstKind::Cast { target, expr, .. } => {
                format!("cast({}) {}", self.expr_text(*target), self.expr_text(*expr))
            }
            AstKind::BasicType { basic } => basic.to_string(),
            AstKind::PtrType { base } => format!("{}*", self.expr_text(*base)),
            AstKind::SliceType { base } => format!("{}[]", self.expr_text(*base)),
            AstKind::StaticArrayType {
                base,
                length_expr,
                length,
            } => {
                if length_expr.is_defined() {
                    format!("{}[{}]", self.expr_text(*base), self.expr_text(*length_expr))
                } else {
                    format!("{}[{length}]", self.expr_text(*base))
                }
            }
            AstKind::FunctionSignature {
                return_type,
                params,
            } => {
                let params: Vec<String> = self
                    .ctx
                    .ast
                    .list(*params)
                    .iter()
                    .filter_map(|p| match &self.ctx.ast.node(*p).kind {
                        AstKind::VariableDecl { ty, .. } => Some(self.expr_text(*ty)),
                        _ => None,
                    })
                    .collect();
                format!(
                    "{} function({})",
                    self.expr_text(*return_type),
                    params.join(", ")
                )
            }
            AstKind::StructDecl { name, .. } => self.ident(*name).to_string(),
            AstKind::EnumDecl {
                name: Some(name), ..
            } => self.ident(*name).to_string(),
            AstKind::EnumMember { name, .. } => self.ident(*name).to_string(),
            AstKind::AliasArray { items } => {
                let items: Vec<String> = self
                    .ctx
                    .ast
                    .list(*items)
                    .iter()
                    .map(|item| self.expr_text(*item))
                    .collect();
                format!("[{}]", items.join(", "))
            }
            _ => String::new(),
        }
    }
}

fn binary_op_text(op: BinaryOpKind) -> &'static str {
    match op {
        BinaryOpKind::Add => "+",
        BinaryOpKind::Subtract => "-",
        BinaryOpKind::Multiply => "*",
        BinaryOpKind::Divide => "/",
        BinaryOpKind::Modulus => "%",
        BinaryOpKind::BitwiseAnd => "&",
        BinaryOpKind::BitwiseOr => "|",
        BinaryOpKind::BitwiseXor => "^",
        BinaryOpKind::ShiftLeft => "<<",
        BinaryOpKind::ShiftRight => ">>",
        BinaryOpKind::Equals => "==",
        BinaryOpKind::NotEquals => "!=",
        BinaryOpKind::LessThan => "<",
        BinaryOpKind::LessThanOrEqualTo => "<=",
        BinaryOpKind::GreaterThan => ">",
        BinaryOpKind::GreaterThanOrEqualTo => ">=",
        BinaryOpKind::LogicalAnd => "&&",
        BinaryOpKind::LogicalOr => "||",
        BinaryOpKind::Assign => "=",
        BinaryOpKind::AddAssign => "+=",
        BinaryOpKind::SubtractAssign => "-=",
        BinaryOpKind::MultiplyAssign => "*=",
        BinaryOpKind::DivideAssign => "/=",
        BinaryOpKind::ModulusAssign => "%=",
        BinaryOpKind::BitwiseAndAssign => "&=",
        BinaryOpKind::BitwiseOrAssign => "|=",
        BinaryOpKind::BitwiseXorAssign => "^=",
        BinaryOpKind::ShiftLeftAssign => "<<=",
        BinaryOpKind::ShiftRightAssign => ">>=",
    }
}

fn unary_op_text(op: UnaryOpKind) -> &'static str {
    match op {
        UnaryOpKind::Negate => "-",
        UnaryOpKind::LogicalNot => "!",
        UnaryOpKind::BitwiseNot => "~",
        UnaryOpKind::AddressOf => "&",
        UnaryOpKind::Deref => "*",
    }
}

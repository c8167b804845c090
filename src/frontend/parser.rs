//! Recursive-descent parser for declarations and statements. Expressions are
//! handled by the Pratt parser in [`super::expr`].
//!
//! The parser consumes the pre-tokenized buffer on the compilation context
//! and allocates AST nodes directly into its arena. Errors are reported and
//! recovery happens at item/statement granularity by resynchronizing past the
//! nearest `;` or `}`.

use crate::{
    context::CompilationContext,
    diag::{CompileResult, DiagKind, Fatal},
    frontend::{
        ast::{
            AstIndex, AstKind, AstNodes, AttributeInfo, AttributeKind, AttributeMask, NodeFlags,
        },
        intern::{known, IdentId},
        lexer::{TokenIndex, TokenKind},
    },
    middle::scope::{ScopeIndex, ScopeKind},
};

/// Counts into the attribute stack. The invariant `immediate <= scope <=
/// effective` always holds: the top `immediate` entries attach to the next
/// declaration only, the next `scope - immediate` entries are `@a:`-style
/// scope attributes, and everything up to `effective` is visible from
/// enclosing attribute scopes.
#[derive(Debug, Clone, Copy, Default)]
struct AttribState {
    immediate: usize,
    scope: usize,
    effective: usize,
}

/// Items appear in two flavors: declarations (modules, structs) and
/// statements (function bodies). Static conditionals exist in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemContext {
    Decl,
    Stmt,
}

pub struct Parser<'ctx> {
    pub(super) ctx: &'ctx mut CompilationContext,
    file_id: u32,
    pub(super) tok: TokenIndex,
    pub(super) current_scope: ScopeIndex,
    attrib_stack: Vec<AstIndex>,
    attrib_state: AttribState,
}

/// Parses one source file into a module declaration node
pub fn parse_file(ctx: &mut CompilationContext, file_id: u32) -> CompileResult<AstIndex> {
    let first_token = ctx.files[file_id as usize].first_token;
    let root_scope = ctx.root_scope;

    let mut parser = Parser {
        ctx,
        file_id,
        tok: first_token,
        current_scope: root_scope,
        attrib_stack: Vec::new(),
        attrib_state: AttribState::default(),
    };

    parser.parse_module()
}

impl<'ctx> Parser<'ctx> {
    /* ───── token access ───── */

    pub(super) fn peek_kind(&self) -> TokenKind {
        self.ctx.tokens.kind(self.tok)
    }

    pub(super) fn peek_kind_at(&self, ahead: u32) -> TokenKind {
        let index = (self.tok + ahead).min(self.ctx.tokens.len() as u32 - 1);
        self.ctx.tokens.kind(index)
    }

    pub(super) fn bump(&mut self) -> TokenIndex {
        let tok = self.tok;
        if self.peek_kind() != TokenKind::Eof {
            self.tok += 1;
        }
        tok
    }

    pub(super) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.bump();
            return true;
        }
        false
    }

    pub(super) fn token_text(&self, tok: TokenIndex) -> &str {
        let file = &self.ctx.files[self.file_id as usize];
        let span = self.ctx.tokens.span(&file.source, tok);
        file.source.value_of_span(span)
    }

    pub(super) fn expect(&mut self, kind: TokenKind) -> CompileResult<TokenIndex> {
        if self.peek_kind() == kind {
            return Ok(self.bump());
        }

        let found = self.peek_kind();
        Err(self.ctx.fatal(
            DiagKind::UnexpectedToken {
                expected: kind.to_string(),
                found: format!("{found} ({})", self.token_text(self.tok)),
            },
            Some(self.tok),
        ))
    }

    pub(super) fn expect_identifier(&mut self) -> CompileResult<(TokenIndex, IdentId)> {
        let tok = self.expect(TokenKind::Identifier)?;
        let text = self.token_text(tok).to_owned();
        let ident = self.ctx.idents.get_or_intern(&text);
        Ok((tok, ident))
    }

    /// Resynchronizes past the next `;` (or a closing `}`) so that one
    /// compile surfaces multiple parse errors
    fn skip_past(&mut self) {
        let mut depth = 0u32;

        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::Semicolon if depth == 0 => {
                    self.bump();
                    return;
                }
                TokenKind::OpenBrace => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::CloseBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    /* ───── module level ───── */

    fn parse_module(&mut self) -> CompileResult<AstIndex> {
        let loc = self.tok;

        // `module a.b.c;` header, or a synthetic path when absent
        let path = if self.peek_kind() == TokenKind::KwModule {
            self.bump();
            let path = self.parse_dotted_path()?;
            self.expect(TokenKind::Semicolon)?;
            path
        } else {
            vec![self
                .ctx
                .idents
                .get_or_intern(&format!("file{}", self.file_id))]
        };

        let scope = self
            .ctx
            .scopes
            .push(ScopeKind::Global, Some(self.ctx.root_scope), "module");
        self.current_scope = scope;

        let decls = self.parse_items_until(TokenKind::Eof, ItemContext::Decl)?;

        let module = self.ctx.ast.add_node(
            loc,
            AstKind::Module {
                path: path.into_boxed_slice(),
                file_id: self.file_id,
                scope,
                decls,
            },
            NodeFlags::empty(),
        );
        self.ctx.scopes.get_mut(scope).owner = module;

        Ok(module)
    }

    fn parse_dotted_path(&mut self) -> CompileResult<Vec<IdentId>> {
        let (_, first) = self.expect_identifier()?;
        let mut path = vec![first];

        while self.eat(TokenKind::Dot) {
            let (_, segment) = self.expect_identifier()?;
            path.push(segment);
        }

        Ok(path)
    }

    /// Parses items until `terminator`, recovering from errors at item
    /// granularity
    fn parse_items_until(
        &mut self,
        terminator: TokenKind,
        context: ItemContext,
    ) -> CompileResult<AstNodes> {
        let mut items = Vec::new();

        while self.peek_kind() != terminator && self.peek_kind() != TokenKind::Eof {
            match self.parse_item(context) {
                Ok(item) => {
                    if item.is_defined() {
                        items.push(item)
                    }
                }
                Err(Fatal) => self.skip_past(),
            }
        }

        Ok(self.ctx.ast.add_list(&items))
    }

    /// One item: attributes, then a declaration or statement. Returns an
    /// undefined index for constructs that produce no node (attribute-only
    /// forms).
    fn parse_item(&mut self, context: ItemContext) -> CompileResult<AstIndex> {
        // Attribute forms: `@a @b decl`, `@a @b : decls...`, `@a @b { decls }`
        if self.peek_kind() == TokenKind::At {
            while self.peek_kind() == TokenKind::At {
                self.parse_attribute()?;
            }

            if self.attrib_state.immediate > 0 {
                if self.eat(TokenKind::Colon) {
                    // Everything immediate becomes scope-level and applies to
                    // the following declarations of this scope
                    self.attrib_state.immediate = 0;
                    return Ok(AstIndex::UNDEFINED);
                }

                if self.peek_kind() == TokenKind::OpenBrace {
                    return self.parse_attribute_block(context);
                }
            }
        }

        match context {
            ItemContext::Decl => self.parse_declaration(),
            ItemContext::Stmt => self.parse_statement(),
        }
    }

    /* ───── attributes ───── */

    /// `@extern(module, "lib")` or `@extern(syscall, N)`
    fn parse_attribute(&mut self) -> CompileResult<()> {
        let at = self.expect(TokenKind::At)?;
        let (name_tok, name) = self.expect_identifier()?;

        if name != known::EXTERN {
            self.ctx.error(
                DiagKind::UnexpectedToken {
                    expected: "extern".to_string(),
                    found: self.token_text(name_tok).to_string(),
                },
                Some(name_tok),
            );
            // Still consume the argument list so parsing can continue
        }

        self.expect(TokenKind::OpenParen)?;

        // `module` lexes as a keyword; `syscall` is a plain identifier
        let kind = if self.eat(TokenKind::KwModule) {
            self.expect(TokenKind::Comma)?;
            let lib_tok = self.expect(TokenKind::StringLiteral)?;
            let text = self.token_text(lib_tok).trim_matches('"').to_string();
            let library = self.ctx.idents.get_or_intern(&text);
            AttributeKind::ExternModule(library)
        } else {
            let (selector_tok, selector) = self.expect_identifier()?;
            if selector != known::SYSCALL {
                let found = self.token_text(selector_tok).to_string();
                return Err(self.ctx.fatal(
                    DiagKind::UnexpectedToken {
                        expected: "module or syscall".to_string(),
                        found,
                    },
                    Some(selector_tok),
                ));
            }
            self.expect(TokenKind::Comma)?;
            let num_tok = self.expect(TokenKind::IntegerLiteral)?;
            let number = self.parse_int_text(num_tok)? as u32;
            AttributeKind::ExternSyscall(number)
        };

        self.expect(TokenKind::CloseParen)?;

        let node = self
            .ctx
            .ast
            .add_node(at, AstKind::Attribute { kind }, NodeFlags::empty());

        self.attrib_stack.push(node);
        self.attrib_state.immediate += 1;
        self.attrib_state.scope += 1;
        self.attrib_state.effective += 1;

        Ok(())
    }

    /// `@a { decls }`: the immediate attributes become the scope attributes
    /// of a `no_scope` scope and drop at the closing brace
    fn parse_attribute_block(&mut self, context: ItemContext) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::OpenBrace)?;

        // The immediate attributes are the entered scope's scope-level
        // attributes; the enclosing scope's counters resume after the block
        let entered = self.attrib_state.immediate;
        let outer_scope_attrs = self.attrib_state.scope - entered;
        self.attrib_state.immediate = 0;
        self.attrib_state.scope = entered;

        let outer_scope = self.current_scope;
        let scope =
            self.ctx
                .scopes
                .push(ScopeKind::NoScope, Some(outer_scope), "attribute block");
        self.current_scope = scope;

        let items = self.parse_items_until(TokenKind::CloseBrace, context);
        self.current_scope = outer_scope;
        let items = items?;
        self.expect(TokenKind::CloseBrace)?;

        self.pop_attribute_scope(outer_scope_attrs);

        // The items register into the enclosing scope through the
        // transparent no_scope; the block itself is represented as an
        // always-taken static conditional so the item array survives
        Ok(self.ctx.ast.add_node(
            loc,
            AstKind::StaticIf {
                condition: AstIndex::UNDEFINED,
                then_items: items,
                else_items: AstNodes::EMPTY,
            },
            NodeFlags::empty(),
        ))
    }

    /// Marks remaining scope-level attributes broadcast and pops them,
    /// restoring the enclosing scope's counters
    fn pop_attribute_scope(&mut self, outer_scope_attrs: usize) {
        debug_assert!(self.attrib_state.immediate <= self.attrib_state.scope);
        debug_assert!(self.attrib_state.scope <= self.attrib_state.effective);

        let remaining = self.attrib_state.scope;
        let base = self.attrib_stack.len() - remaining;
        for attr in &self.attrib_stack[base..] {
            self.ctx
                .ast
                .node_mut(*attr)
                .flags
                .insert(NodeFlags::IS_BROADCAST);
        }

        self.attrib_stack.truncate(base);
        self.attrib_state.effective -= remaining;
        self.attrib_state.scope = outer_scope_attrs;
        self.attrib_state.immediate = 0;
    }

    /// Snapshots the current effective attributes into a fresh
    /// attribute-info block on `decl`, then consumes the immediate ones
    fn attach_attributes(&mut self, decl: AstIndex) {
        if self.attrib_state.effective == 0 {
            return;
        }

        let base = self.attrib_stack.len() - self.attrib_state.effective;
        let visible: Vec<AstIndex> = self.attrib_stack[base..].to_vec();

        let mut mask = AttributeMask::empty();
        for attr in &visible {
            if let AstKind::Attribute { kind } = &self.ctx.ast.node(*attr).kind {
                match kind {
                    AttributeKind::ExternModule(_) => mask.insert(AttributeMask::EXTERN_MODULE),
                    AttributeKind::ExternSyscall(_) => mask.insert(AttributeMask::EXTERN_SYSCALL),
                }
            }
        }

        let attributes = self.ctx.ast.add_list(&visible);
        let info = self
            .ctx
            .ast
            .add_attrib_info(AttributeInfo { attributes, mask });

        let node = self.ctx.ast.node_mut(decl);
        node.attrib = Some(info);
        node.flags.insert(NodeFlags::HAS_ATTRIBUTES);

        // Immediate attributes attach to this declaration only
        let immediate = self.attrib_state.immediate;
        self.attrib_stack
            .truncate(self.attrib_stack.len() - immediate);
        self.attrib_state.immediate = 0;
        self.attrib_state.scope -= immediate;
        self.attrib_state.effective -= immediate;
    }

    /* ───── declarations ───── */

    fn parse_declaration(&mut self) -> CompileResult<AstIndex> {
        match self.peek_kind() {
            TokenKind::KwImport => self.parse_import(),
            TokenKind::KwAlias => self.parse_alias(),
            TokenKind::KwStruct | TokenKind::KwUnion => self.parse_struct(),
            TokenKind::KwEnum => self.parse_enum(),
            TokenKind::HashIf => self.parse_static_if(ItemContext::Decl),
            TokenKind::HashVersion => self.parse_static_version(ItemContext::Decl),
            TokenKind::HashForeach => self.parse_static_foreach(ItemContext::Decl),
            TokenKind::HashAssert => self.parse_static_assert(),
            TokenKind::HashInline => {
                self.bump();
                self.parse_var_or_function(NodeFlags::IS_INLINE)
            }
            TokenKind::Error => {
                let tok = self.bump();
                Err(self.ctx.fatal(DiagKind::MalformedLiteral, Some(tok)))
            }
            _ => self.parse_var_or_function(NodeFlags::empty()),
        }
    }

    fn parse_import(&mut self) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::KwImport)?;
        let path = self.parse_dotted_path()?;
        self.expect(TokenKind::Semicolon)?;

        Ok(self.ctx.ast.add_node(
            loc,
            AstKind::Import {
                path: path.into_boxed_slice(),
            },
            NodeFlags::empty(),
        ))
    }

    /// `alias name = expr;`
    fn parse_alias(&mut self) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::KwAlias)?;
        let (_, name) = self.expect_identifier()?;
        self.expect(TokenKind::Equals)?;
        let expr = self.parse_expression_pref(true)?;
        self.expect(TokenKind::Semicolon)?;

        let node = self.ctx.ast.add_node(
            loc,
            AstKind::Alias {
                name,
                parent_scope: self.current_scope,
                expr,
            },
            NodeFlags::empty(),
        );
        self.attach_attributes(node);
        Ok(node)
    }

    /// `struct Name [T, ...] { members }` / `union Name { ... }` /
    /// `struct Name;` (opaque)
    fn parse_struct(&mut self) -> CompileResult<AstIndex> {
        let loc = self.bump();
        let is_union = self.ctx.tokens.kind(loc) == TokenKind::KwUnion;
        let (_, name) = self.expect_identifier()?;

        let template_params = if self.peek_kind() == TokenKind::OpenBracket {
            self.parse_template_params()?
        } else {
            AstNodes::EMPTY
        };

        let mut flags = NodeFlags::empty();
        if is_union {
            flags.insert(NodeFlags::IS_UNION);
        }

        let parent_scope = self.current_scope;
        let scope = self
            .ctx
            .scopes
            .push(ScopeKind::Member, Some(parent_scope), "struct");

        let members = if self.eat(TokenKind::Semicolon) {
            flags.insert(NodeFlags::IS_OPAQUE);
            AstNodes::EMPTY
        } else {
            self.expect(TokenKind::OpenBrace)?;
            self.current_scope = scope;
            let members = self.parse_items_until(TokenKind::CloseBrace, ItemContext::Decl);
            self.current_scope = parent_scope;
            let members = members?;
            self.expect(TokenKind::CloseBrace)?;
            members
        };

        // Assign member indices to the fields
        let mut field_index = 0;
        for i in 0..members.len as usize {
            let member = self.ctx.ast.list_item(members, i);
            if let AstKind::VariableDecl { index, .. } = &mut self.ctx.ast.node_mut(member).kind {
                *index = field_index;
                field_index += 1;
            }
            self.ctx
                .ast
                .node_mut(member)
                .flags
                .insert(NodeFlags::IS_MEMBER);
        }

        let node = self.ctx.ast.add_node(
            loc,
            AstKind::StructDecl {
                name,
                parent_scope,
                scope,
                members,
                template_params,
            },
            flags,
        );
        self.ctx.scopes.get_mut(scope).owner = node;
        self.attach_attributes(node);
        Ok(node)
    }

    /// `[T, U, Args...]`
    fn parse_template_params(&mut self) -> CompileResult<AstNodes> {
        self.expect(TokenKind::OpenBracket)?;

        let mut params = Vec::new();
        let mut seen_variadic = false;

        while self.peek_kind() != TokenKind::CloseBracket {
            let (tok, name) = self.expect_identifier()?;

            let mut flags = NodeFlags::IS_PARAMETER;
            if self.eat(TokenKind::Ellipsis) {
                if seen_variadic {
                    self.ctx.error(DiagKind::DuplicateVariadic, Some(tok));
                }
                seen_variadic = true;
                flags.insert(NodeFlags::IS_VARIADIC_PARAM);
            }

            params.push(self.ctx.ast.add_node(
                tok,
                AstKind::VariableDecl {
                    name,
                    parent_scope: self.current_scope,
                    ty: AstIndex::UNDEFINED,
                    initializer: AstIndex::UNDEFINED,
                    index: params.len() as u32,
                },
                flags,
            ));

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::CloseBracket)?;
        Ok(self.ctx.ast.add_list(&params))
    }

    /// The four enum shapes, in priority order:
    /// `enum X;` | `enum X = expr;` | `enum T X = expr;` |
    /// `enum [X] [: T] { ... }`
    fn parse_enum(&mut self) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::KwEnum)?;

        if self.peek_kind() == TokenKind::Identifier {
            match self.peek_kind_at(1) {
                // enum X;
                TokenKind::Semicolon => {
                    let (_, name) = self.expect_identifier()?;
                    self.bump();
                    return self.finish_enum_type(loc, Some(name), AstIndex::UNDEFINED, None);
                }
                // enum X = expr;
                TokenKind::Equals => {
                    let (_, name) = self.expect_identifier()?;
                    self.bump();
                    let value = self.parse_expression()?;
                    self.expect(TokenKind::Semicolon)?;
                    return Ok(self.make_enum_member(loc, name, AstIndex::UNDEFINED, value));
                }
                // enum X : T { ... } | enum X { ... }
                TokenKind::Colon | TokenKind::OpenBrace => {
                    let (_, name) = self.expect_identifier()?;
                    let base = if self.eat(TokenKind::Colon) {
                        self.parse_type_expr()?
                    } else {
                        AstIndex::UNDEFINED
                    };
                    return self.finish_enum_type(loc, Some(name), base, Some(()));
                }
                // enum T X = expr;
                _ => {
                    let ty = self.parse_type_expr()?;
                    let (_, name) = self.expect_identifier()?;
                    self.expect(TokenKind::Equals)?;
                    let value = self.parse_expression()?;
                    self.expect(TokenKind::Semicolon)?;
                    return Ok(self.make_enum_member(loc, name, ty, value));
                }
            }
        }

        // Anonymous: enum { ... } | enum : T { ... }
        let base = if self.eat(TokenKind::Colon) {
            self.parse_type_expr()?
        } else {
            AstIndex::UNDEFINED
        };
        self.finish_enum_type(loc, None, base, Some(()))
    }

    fn make_enum_member(
        &mut self,
        loc: TokenIndex,
        name: IdentId,
        ty: AstIndex,
        value: AstIndex,
    ) -> AstIndex {
        let node = self.ctx.ast.add_node(
            loc,
            AstKind::EnumMember {
                name,
                parent_scope: self.current_scope,
                ty,
                value,
            },
            NodeFlags::empty(),
        );
        self.attach_attributes(node);
        node
    }

    /// The `enum [X] [: T] { members }` shape; `with_body` is `None` for the
    /// bodyless `enum X;` form
    fn finish_enum_type(
        &mut self,
        loc: TokenIndex,
        name: Option<IdentId>,
        base: AstIndex,
        with_body: Option<()>,
    ) -> CompileResult<AstIndex> {
        let parent_scope = self.current_scope;
        let scope = self
            .ctx
            .scopes
            .push(ScopeKind::Member, Some(parent_scope), "enum");

        let members = if with_body.is_some() {
            self.expect(TokenKind::OpenBrace)?;
            self.current_scope = scope;
            let members = self.parse_enum_members();
            self.current_scope = parent_scope;
            let members = members?;
            self.expect(TokenKind::CloseBrace)?;
            members
        } else {
            AstNodes::EMPTY
        };

        let node = self.ctx.ast.add_node(
            loc,
            AstKind::EnumDecl {
                name,
                parent_scope,
                base,
                scope,
                members,
            },
            NodeFlags::empty(),
        );
        self.ctx.scopes.get_mut(scope).owner = node;
        self.attach_attributes(node);
        Ok(node)
    }

    /// `A, B = expr, C` plus nested static conditionals
    fn parse_enum_members(&mut self) -> CompileResult<AstNodes> {
        let mut members = Vec::new();

        while self.peek_kind() != TokenKind::CloseBrace && self.peek_kind() != TokenKind::Eof {
            match self.peek_kind() {
                TokenKind::HashIf => members.push(self.parse_static_if(ItemContext::Decl)?),
                TokenKind::HashVersion => {
                    members.push(self.parse_static_version(ItemContext::Decl)?)
                }
                TokenKind::HashForeach => {
                    members.push(self.parse_static_foreach(ItemContext::Decl)?)
                }
                _ => {
                    let (tok, name) = self.expect_identifier()?;
                    let value = if self.eat(TokenKind::Equals) {
                        self.parse_expression()?
                    } else {
                        AstIndex::UNDEFINED
                    };

                    let node = self.make_enum_member(tok, name, AstIndex::UNDEFINED, value);
                    self.ctx
                        .ast
                        .node_mut(node)
                        .flags
                        .insert(NodeFlags::IS_MEMBER);
                    members.push(node);
                }
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        Ok(self.ctx.ast.add_list(&members))
    }

    /* ───── static conditionals ───── */

    /// `#if (expr) items [else items]`
    fn parse_static_if(&mut self, context: ItemContext) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::HashIf)?;
        self.expect(TokenKind::OpenParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::CloseParen)?;

        let then_items = self.parse_item_block(context)?;
        let else_items = if self.eat(TokenKind::KwElse) {
            self.parse_item_block(context)?
        } else {
            AstNodes::EMPTY
        };

        Ok(self.ctx.ast.add_node(
            loc,
            AstKind::StaticIf {
                condition,
                then_items,
                else_items,
            },
            NodeFlags::empty(),
        ))
    }

    /// `#version (ident) items [else items]`
    fn parse_static_version(&mut self, context: ItemContext) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::HashVersion)?;
        self.expect(TokenKind::OpenParen)?;
        let (_, version) = self.expect_identifier()?;
        self.expect(TokenKind::CloseParen)?;

        let then_items = self.parse_item_block(context)?;
        let else_items = if self.eat(TokenKind::KwElse) {
            self.parse_item_block(context)?
        } else {
            AstNodes::EMPTY
        };

        Ok(self.ctx.ast.add_node(
            loc,
            AstKind::StaticVersion {
                version,
                then_items,
                else_items,
            },
            NodeFlags::empty(),
        ))
    }

    /// `#foreach (key, value; iterable) items` /
    /// `#foreach (value; iterable) items`
    fn parse_static_foreach(&mut self, context: ItemContext) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::HashForeach)?;
        self.expect(TokenKind::OpenParen)?;

        let (_, first) = self.expect_identifier()?;
        let (key, value) = if self.eat(TokenKind::Comma) {
            let (_, second) = self.expect_identifier()?;
            (Some(first), second)
        } else {
            (None, first)
        };

        self.expect(TokenKind::Semicolon)?;
        let iterable = self.parse_expression()?;
        self.expect(TokenKind::CloseParen)?;

        let body = self.parse_item_block(context)?;

        Ok(self.ctx.ast.add_node(
            loc,
            AstKind::StaticForeach {
                key,
                value,
                iterable,
                body,
            },
            NodeFlags::empty(),
        ))
    }

    /// `#assert (expr [, "message"]);`
    fn parse_static_assert(&mut self) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::HashAssert)?;
        self.expect(TokenKind::OpenParen)?;
        let condition = self.parse_expression()?;

        let message = if self.eat(TokenKind::Comma) {
            self.parse_expression()?
        } else {
            AstIndex::UNDEFINED
        };

        self.expect(TokenKind::CloseParen)?;
        self.expect(TokenKind::Semicolon)?;

        Ok(self.ctx.ast.add_node(
            loc,
            AstKind::StaticAssert { condition, message },
            NodeFlags::empty(),
        ))
    }

    /// `{ items }` or a single item
    fn parse_item_block(&mut self, context: ItemContext) -> CompileResult<AstNodes> {
        if self.eat(TokenKind::OpenBrace) {
            let items = self.parse_items_until(TokenKind::CloseBrace, context)?;
            self.expect(TokenKind::CloseBrace)?;
            return Ok(items);
        }

        let item = self.parse_item(context)?;
        Ok(self.ctx.ast.add_list(&[item]))
    }

    /* ───── variables and functions ───── */

    /// `type name;` | `type name = expr;` | `type name(params) { ... }`
    fn parse_var_or_function(&mut self, extra_flags: NodeFlags) -> CompileResult<AstIndex> {
        let loc = self.tok;
        let ty = self.parse_type_expr()?;
        let (_, name) = self.expect_identifier()?;

        if self.peek_kind() == TokenKind::OpenParen
            || self.peek_kind() == TokenKind::OpenBracket
        {
            return self.parse_function(loc, ty, name, extra_flags);
        }

        let initializer = if self.eat(TokenKind::Equals) {
            self.parse_expression()?
        } else {
            AstIndex::UNDEFINED
        };
        self.expect(TokenKind::Semicolon)?;

        let mut flags = extra_flags;
        if self.ctx.scopes.get(self.current_scope).kind == ScopeKind::Global
            || self.enclosing_registration_scope_is_global()
        {
            flags.insert(NodeFlags::IS_GLOBAL);
        }

        let node = self.ctx.ast.add_node(
            loc,
            AstKind::VariableDecl {
                name,
                parent_scope: self.current_scope,
                ty,
                initializer,
                index: 0,
            },
            flags,
        );
        self.attach_attributes(node);
        Ok(node)
    }

    /// Whether names declared here land in a global scope once transparent
    /// `no_scope` scopes are skipped
    fn enclosing_registration_scope_is_global(&self) -> bool {
        let mut scope = self.current_scope;
        loop {
            let s = self.ctx.scopes.get(scope);
            match s.kind {
                ScopeKind::NoScope => match s.parent {
                    Some(parent) => scope = parent,
                    None => return false,
                },
                ScopeKind::Global => return true,
                _ => return false,
            }
        }
    }

    /// Parses the signature and body of a function declaration. The
    /// attribute snapshot is taken when the declaration node is made, before
    /// the signature; the attribute state is zeroed for the body and restored
    /// afterwards so body-local declarations never inherit `@extern`.
    fn parse_function(
        &mut self,
        loc: TokenIndex,
        return_type: AstIndex,
        name: IdentId,
        extra_flags: NodeFlags,
    ) -> CompileResult<AstIndex> {
        let template_params = if self.peek_kind() == TokenKind::OpenBracket {
            self.parse_template_params()?
        } else {
            AstNodes::EMPTY
        };

        let parent_scope = self.current_scope;
        let scope = self
            .ctx
            .scopes
            .push(ScopeKind::Local, Some(parent_scope), "function");

        self.expect(TokenKind::OpenParen)?;
        self.current_scope = scope;
        let params = self.parse_parameters();
        self.current_scope = parent_scope;
        let params = params?;
        self.expect(TokenKind::CloseParen)?;

        let signature = self.ctx.ast.add_node(
            loc,
            AstKind::FunctionSignature {
                return_type,
                params,
            },
            NodeFlags::IS_TYPE,
        );

        let node = self.ctx.ast.add_node(
            loc,
            AstKind::FunctionDecl {
                name,
                parent_scope,
                signature,
                body: AstIndex::UNDEFINED,
                scope,
                template_params,
                ir: crate::middle::ir::IrIndex::NONE,
            },
            extra_flags,
        );
        self.ctx.scopes.get_mut(scope).owner = node;
        self.attach_attributes(node);

        // Body, with a zeroed attribute state
        let body = if self.eat(TokenKind::Semicolon) {
            AstIndex::UNDEFINED
        } else {
            let saved_state = self.attrib_state;
            let saved_len = self.attrib_stack.len();
            self.attrib_state = AttribState::default();

            self.current_scope = scope;
            let body = self.parse_block();
            self.current_scope = parent_scope;

            self.attrib_stack.truncate(saved_len);
            self.attrib_state = saved_state;
            body?
        };

        if let AstKind::FunctionDecl { body: slot, .. } = &mut self.ctx.ast.node_mut(node).kind {
            *slot = body;
        }

        Ok(node)
    }

    /// `type name [= default] (, ...)*`
    fn parse_parameters(&mut self) -> CompileResult<AstNodes> {
        let mut params = Vec::new();

        while self.peek_kind() != TokenKind::CloseParen {
            let loc = self.tok;
            let ty = self.parse_type_expr()?;
            let (_, name) = self.expect_identifier()?;

            let initializer = if self.eat(TokenKind::Equals) {
                self.parse_expression()?
            } else {
                AstIndex::UNDEFINED
            };

            params.push(self.ctx.ast.add_node(
                loc,
                AstKind::VariableDecl {
                    name,
                    parent_scope: self.current_scope,
                    ty,
                    initializer,
                    index: params.len() as u32,
                },
                NodeFlags::IS_PARAMETER,
            ));

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        Ok(self.ctx.ast.add_list(&params))
    }

    /* ───── statements ───── */

    pub(super) fn parse_block(&mut self) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::OpenBrace)?;

        let outer_scope = self.current_scope;
        let scope = self
            .ctx
            .scopes
            .push(ScopeKind::Local, Some(outer_scope), "block");
        self.current_scope = scope;

        let statements = self.parse_items_until(TokenKind::CloseBrace, ItemContext::Stmt);
        self.current_scope = outer_scope;
        let statements = statements?;
        self.expect(TokenKind::CloseBrace)?;

        Ok(self
            .ctx
            .ast
            .add_node(loc, AstKind::Block { statements, scope }, NodeFlags::empty()))
    }

    fn parse_statement(&mut self) -> CompileResult<AstIndex> {
        match self.peek_kind() {
            TokenKind::OpenBrace => self.parse_block(),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwReturn => {
                let loc = self.bump();
                let value = if self.peek_kind() == TokenKind::Semicolon {
                    AstIndex::UNDEFINED
                } else {
                    self.parse_expression()?
                };
                self.expect(TokenKind::Semicolon)?;
                Ok(self
                    .ctx
                    .ast
                    .add_node(loc, AstKind::ReturnStmt { value }, NodeFlags::empty()))
            }
            TokenKind::KwBreak => {
                let loc = self.bump();
                self.expect(TokenKind::Semicolon)?;
                Ok(self.ctx.ast.add_node(loc, AstKind::BreakStmt, NodeFlags::empty()))
            }
            TokenKind::KwContinue => {
                let loc = self.bump();
                self.expect(TokenKind::Semicolon)?;
                Ok(self
                    .ctx
                    .ast
                    .add_node(loc, AstKind::ContinueStmt, NodeFlags::empty()))
            }
            TokenKind::KwAlias
            | TokenKind::KwStruct
            | TokenKind::KwUnion
            | TokenKind::KwEnum => self.parse_declaration(),
            TokenKind::HashIf => self.parse_static_if(ItemContext::Stmt),
            TokenKind::HashVersion => self.parse_static_version(ItemContext::Stmt),
            TokenKind::HashForeach => self.parse_static_foreach(ItemContext::Stmt),
            TokenKind::HashAssert => self.parse_static_assert(),
            TokenKind::Semicolon => {
                // Empty statement produces no node
                self.bump();
                Ok(AstIndex::UNDEFINED)
            }
            _ if self.looks_like_declaration() => self.parse_var_or_function(NodeFlags::empty()),
            _ => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(expr)
            }
        }
    }

    /// Lookahead deciding `i32* x = ...;` (declaration) versus `a * b;`
    /// (expression): a dotted identifier followed by any run of `*` and
    /// matched `[...]` and then another identifier is a declaration
    fn looks_like_declaration(&self) -> bool {
        if self.peek_kind() != TokenKind::Identifier {
            return false;
        }

        let mut ahead = 1;

        // Dotted type path
        while self.peek_kind_at(ahead) == TokenKind::Dot
            && self.peek_kind_at(ahead + 1) == TokenKind::Identifier
        {
            ahead += 2;
        }

        loop {
            match self.peek_kind_at(ahead) {
                TokenKind::Asterisk => ahead += 1,
                TokenKind::OpenBracket => {
                    let mut depth = 1;
                    ahead += 1;
                    while depth > 0 {
                        match self.peek_kind_at(ahead) {
                            TokenKind::OpenBracket => depth += 1,
                            TokenKind::CloseBracket => depth -= 1,
                            TokenKind::Eof => return false,
                            _ => {}
                        }
                        ahead += 1;
                    }
                }
                TokenKind::Identifier => return true,
                _ => return false,
            }
        }
    }

    /// `if (cond) stmt [else stmt]`
    fn parse_if(&mut self) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::KwIf)?;
        self.expect(TokenKind::OpenParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::CloseParen)?;

        let then_branch = self.parse_statement()?;
        let else_branch = if self.eat(TokenKind::KwElse) {
            self.parse_statement()?
        } else {
            AstIndex::UNDEFINED
        };

        Ok(self.ctx.ast.add_node(
            loc,
            AstKind::IfStmt {
                condition,
                then_branch,
                else_branch,
            },
            NodeFlags::empty(),
        ))
    }

    /// `while (cond) stmt`
    fn parse_while(&mut self) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::KwWhile)?;
        self.expect(TokenKind::OpenParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::CloseParen)?;
        let body = self.parse_statement()?;

        Ok(self
            .ctx
            .ast
            .add_node(loc, AstKind::WhileStmt { condition, body }, NodeFlags::empty()))
    }

    /// `for ([init]; [cond]; [incr]) stmt`
    fn parse_for(&mut self) -> CompileResult<AstIndex> {
        let loc = self.expect(TokenKind::KwFor)?;
        self.expect(TokenKind::OpenParen)?;

        let outer_scope = self.current_scope;
        let scope = self
            .ctx
            .scopes
            .push(ScopeKind::Local, Some(outer_scope), "for");
        self.current_scope = scope;

        let result: CompileResult<AstIndex> = (|| {
            let init = if self.eat(TokenKind::Semicolon) {
                AstNodes::EMPTY
            } else {
                let stmt = self.parse_statement()?;
                self.ctx.ast.add_list(&[stmt])
            };

            let condition = if self.peek_kind() == TokenKind::Semicolon {
                AstIndex::UNDEFINED
            } else {
                self.parse_expression()?
            };
            self.expect(TokenKind::Semicolon)?;

            let increment = if self.peek_kind() == TokenKind::CloseParen {
                AstNodes::EMPTY
            } else {
                let expr = self.parse_expression()?;
                self.ctx.ast.add_list(&[expr])
            };
            self.expect(TokenKind::CloseParen)?;

            let body = self.parse_statement()?;

            Ok(self.ctx.ast.add_node(
                loc,
                AstKind::ForStmt {
                    init,
                    condition,
                    increment,
                    body,
                    scope,
                },
                NodeFlags::empty(),
            ))
        })();

        self.current_scope = outer_scope;
        result
    }

    /* ───── literal helpers shared with the expression parser ───── */

    pub(super) fn parse_int_text(&mut self, tok: TokenIndex) -> CompileResult<i64> {
        let text = self.token_text(tok).replace('_', "");

        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
        {
            i64::from_str_radix(hex, 16)
        } else {
            text.parse::<i64>()
        };

        parsed.map_err(|_| self.ctx.fatal(DiagKind::MalformedLiteral, Some(tok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{
        ast::{AstKind, AstKindTag, AttributeMask, BinaryOpKind},
        SourceFile,
    };

    fn parse(source: &str) -> (CompilationContext, AstIndex) {
        let mut ctx = CompilationContext::new(0);
        let (file_id, _) = ctx.add_file(SourceFile::in_memory(source));
        let module = parse_file(&mut ctx, file_id).expect("parse failed");
        (ctx, module)
    }

    fn module_decls(ctx: &CompilationContext, module: AstIndex) -> Vec<AstIndex> {
        match &ctx.ast.node(module).kind {
            AstKind::Module { decls, .. } => ctx.ast.list(*decls).to_vec(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn enum_shapes_parse_in_priority_order() {
        let (ctx, module) = parse(
            "module m;\n\
             enum A;\n\
             enum B = 1 + 2;\n\
             enum u32 C = 3;\n\
             enum D : u8 { one, two = 5, three }\n\
             enum { anon }\n",
        );

        let decls = module_decls(&ctx, module);
        assert_eq!(decls.len(), 5);

        assert_eq!(ctx.ast.tag(decls[0]), AstKindTag::EnumDecl);
        assert_eq!(ctx.ast.tag(decls[1]), AstKindTag::EnumMember);
        assert_eq!(ctx.ast.tag(decls[2]), AstKindTag::EnumMember);
        assert_eq!(ctx.ast.tag(decls[3]), AstKindTag::EnumDecl);
        assert_eq!(ctx.ast.tag(decls[4]), AstKindTag::EnumDecl);

        // The bodyless shape has no members; the scoped shape has three
        match &ctx.ast.node(decls[0]).kind {
            AstKind::EnumDecl { members, name, .. } => {
                assert!(members.is_empty());
                assert!(name.is_some());
            }
            _ => unreachable!(),
        }
        match &ctx.ast.node(decls[3]).kind {
            AstKind::EnumDecl { members, base, .. } => {
                assert_eq!(members.len, 3);
                assert!(base.is_defined());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn pratt_precedence_binds_multiplication_tighter() {
        let (ctx, module) = parse("module m;\ni64 x = 1 + 2 * 3;\n");

        let decls = module_decls(&ctx, module);
        let initializer = match &ctx.ast.node(decls[0]).kind {
            AstKind::VariableDecl { initializer, .. } => *initializer,
            _ => unreachable!(),
        };

        // (1 + (2 * 3))
        match &ctx.ast.node(initializer).kind {
            AstKind::BinaryOp { op, lhs, rhs, .. } => {
                assert_eq!(*op, BinaryOpKind::Add);
                assert_eq!(ctx.ast.tag(*lhs), AstKindTag::IntLiteral);
                match &ctx.ast.node(*rhs).kind {
                    AstKind::BinaryOp { op, .. } => assert_eq!(*op, BinaryOpKind::Multiply),
                    _ => panic!("rhs should be the multiplication"),
                }
            }
            _ => panic!("initializer should be an addition"),
        }
    }

    #[test]
    fn assignment_is_right_associative() {
        let (ctx, module) = parse("module m;\nvoid f() { a = b = 1; }\n");

        let decls = module_decls(&ctx, module);
        let body = match &ctx.ast.node(decls[0]).kind {
            AstKind::FunctionDecl { body, .. } => *body,
            _ => unreachable!(),
        };
        let stmt = match &ctx.ast.node(body).kind {
            AstKind::Block { statements, .. } => ctx.ast.list_item(*statements, 0),
            _ => unreachable!(),
        };

        // a = (b = 1)
        match &ctx.ast.node(stmt).kind {
            AstKind::BinaryOp { op, rhs, .. } => {
                assert_eq!(*op, BinaryOpKind::Assign);
                match &ctx.ast.node(*rhs).kind {
                    AstKind::BinaryOp { op, .. } => assert_eq!(*op, BinaryOpKind::Assign),
                    _ => panic!("rhs should be the inner assignment"),
                }
            }
            _ => panic!("statement should be an assignment"),
        }
    }

    #[test]
    fn star_is_a_pointer_type_in_type_context() {
        let (ctx, module) = parse("module m;\nu8* p;\nu8** q;\n");

        let decls = module_decls(&ctx, module);

        let ty = match &ctx.ast.node(decls[0]).kind {
            AstKind::VariableDecl { ty, .. } => *ty,
            _ => unreachable!(),
        };
        assert_eq!(ctx.ast.tag(ty), AstKindTag::PtrType);

        let ty = match &ctx.ast.node(decls[1]).kind {
            AstKind::VariableDecl { ty, .. } => *ty,
            _ => unreachable!(),
        };
        match &ctx.ast.node(ty).kind {
            AstKind::PtrType { base } => assert_eq!(ctx.ast.tag(*base), AstKindTag::PtrType),
            _ => panic!("should be a pointer to pointer"),
        }
    }

    #[test]
    fn star_in_expression_context_is_multiplication() {
        let (ctx, module) = parse("module m;\nvoid f() { x = a * b; }\n");

        let decls = module_decls(&ctx, module);
        let body = match &ctx.ast.node(decls[0]).kind {
            AstKind::FunctionDecl { body, .. } => *body,
            _ => unreachable!(),
        };
        let stmt = match &ctx.ast.node(body).kind {
            AstKind::Block { statements, .. } => ctx.ast.list_item(*statements, 0),
            _ => unreachable!(),
        };

        match &ctx.ast.node(stmt).kind {
            AstKind::BinaryOp { rhs, .. } => match &ctx.ast.node(*rhs).kind {
                AstKind::BinaryOp { op, .. } => assert_eq!(*op, BinaryOpKind::Multiply),
                _ => panic!("rhs should be a multiplication"),
            },
            _ => panic!("statement should be an assignment"),
        }
    }

    #[test]
    fn empty_brackets_make_a_slice_type() {
        let (ctx, module) = parse("module m;\nu8[] s;\nu8[4] a;\n");

        let decls = module_decls(&ctx, module);

        let ty = match &ctx.ast.node(decls[0]).kind {
            AstKind::VariableDecl { ty, .. } => *ty,
            _ => unreachable!(),
        };
        assert_eq!(ctx.ast.tag(ty), AstKindTag::SliceType);

        let ty = match &ctx.ast.node(decls[1]).kind {
            AstKind::VariableDecl { ty, .. } => *ty,
            _ => unreachable!(),
        };
        assert_eq!(ctx.ast.tag(ty), AstKindTag::StaticArrayType);
    }

    #[test]
    fn cast_parses_a_type_then_a_unary_operand() {
        let (ctx, module) = parse("module m;\nvoid f() { x = cast(u8*) y + 1; }\n");

        let decls = module_decls(&ctx, module);
        let body = match &ctx.ast.node(decls[0]).kind {
            AstKind::FunctionDecl { body, .. } => *body,
            _ => unreachable!(),
        };
        let stmt = match &ctx.ast.node(body).kind {
            AstKind::Block { statements, .. } => ctx.ast.list_item(*statements, 0),
            _ => unreachable!(),
        };

        // x = ((cast(u8*) y) + 1): the cast binds tighter than +
        match &ctx.ast.node(stmt).kind {
            AstKind::BinaryOp { rhs, .. } => match &ctx.ast.node(*rhs).kind {
                AstKind::BinaryOp { op, lhs, .. } => {
                    assert_eq!(*op, BinaryOpKind::Add);
                    assert_eq!(ctx.ast.tag(*lhs), AstKindTag::Cast);
                }
                _ => panic!("rhs should be the addition"),
            },
            _ => panic!("statement should be an assignment"),
        }
    }

    #[test]
    fn bare_attributes_attach_to_one_declaration_only() {
        let (ctx, module) = parse(
            "module m;\n\
             @extern(syscall, 2) void g1();\n\
             void g2();\n",
        );

        let decls = module_decls(&ctx, module);

        let g1 = ctx.ast.node(decls[0]);
        let info = g1.attrib.expect("g1 should carry attributes");
        assert!(ctx
            .ast
            .attrib_info(info)
            .mask
            .contains(AttributeMask::EXTERN_SYSCALL));

        assert!(ctx.ast.node(decls[1]).attrib.is_none());
    }

    #[test]
    fn colon_attributes_broadcast_to_the_rest_of_the_scope() {
        let (ctx, module) = parse(
            "module m;\n\
             @extern(module, \"kernel32\"):\n\
             void f1();\n\
             void f2();\n",
        );

        let decls = module_decls(&ctx, module);
        assert_eq!(decls.len(), 2);

        for decl in decls {
            let info = ctx.ast.node(decl).attrib.expect("should carry attributes");
            assert!(ctx
                .ast
                .attrib_info(info)
                .mask
                .contains(AttributeMask::EXTERN_MODULE));
        }
    }

    #[test]
    fn attribute_blocks_drop_at_the_closing_brace() {
        let (ctx, module) = parse(
            "module m;\n\
             @extern(syscall, 3) {\n\
                 void h1();\n\
             }\n\
             void h2();\n",
        );

        let decls = module_decls(&ctx, module);
        // The block parses into a passthrough conditional plus h2
        assert_eq!(decls.len(), 2);

        let block_items = match &ctx.ast.node(decls[0]).kind {
            AstKind::StaticIf { then_items, .. } => ctx.ast.list(*then_items).to_vec(),
            _ => panic!("attribute block should parse as a passthrough"),
        };
        let h1 = ctx.ast.node(block_items[0]);
        assert!(h1.attrib.is_some());

        assert!(ctx.ast.node(decls[1]).attrib.is_none());
    }

    #[test]
    fn parse_errors_resynchronize_at_the_next_item() {
        let (ctx, module) = parse(
            "module m;\n\
             i32 bad = ;\n\
             i32 good = 1;\n",
        );

        assert!(ctx.has_errors());

        // The good declaration after the bad one still parsed
        let decls = module_decls(&ctx, module);
        let found = decls.iter().any(|d| match &ctx.ast.node(*d).kind {
            AstKind::VariableDecl { name, .. } => ctx.idents.get(*name) == "good",
            _ => false,
        });
        assert!(found);
    }
}

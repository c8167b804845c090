//! Name registration and static expansion. `name_register_self` inserts a
//! declaration's name into its enclosing scope; `name_register_nested`
//! recurses into children. Between the two, every item array (module/struct
//! declarations, block statements, scoped enum members) is swept for static
//! conditionals: `#if`/`#version` select a branch, `#foreach` clones its body
//! per alias-array element, `#assert` evaluates and vanishes. Replacement
//! happens in place through `replace_range`, and newly inserted ranges are
//! swept again so nested conditionals expand too.

use hashbrown::HashMap;

use crate::{
    context::CompilationContext,
    diag::{CompileResult, DiagKind},
    frontend::{
        ast::{
            AstIndex, AstKind, AstKindTag, AstNodes, BasicTypeKind, NodeFlags,
        },
        intern::{IdentId, Identifiers},
    },
    middle::{driver, eval, resolve, scope::{ScopeIndex, ScopeKind}},
};

/// Registers the node's declared name in its enclosing scope (skipping
/// transparent `no_scope` scopes)
pub(crate) fn name_register_self(
    ctx: &mut CompilationContext,
    node: AstIndex,
) -> CompileResult<()> {
    match &ctx.ast.node(node).kind {
        AstKind::Module { path, file_id, .. } => {
            let path = path.clone();
            let file_id = *file_id;

            if let Some(existing) = ctx.packages.get(&path).copied() {
                let existing_file = match &ctx.ast.node(existing).kind {
                    AstKind::Module { file_id, .. } => *file_id,
                    _ => unreachable!("package map entry is not a module"),
                };

                let kind = DiagKind::ModuleConflict {
                    name: ctx.path_name(&path),
                    first: ctx.files[existing_file as usize].source.origin.to_string(),
                    second: ctx.files[file_id as usize].source.origin.to_string(),
                };
                let loc = ctx.ast.node(node).loc;
                ctx.error(kind, Some(loc));
                // The first module keeps the package path
            } else {
                ctx.packages.insert(path, node);
            }
        }

        AstKind::Alias { name, parent_scope, .. }
        | AstKind::StructDecl { name, parent_scope, .. }
        | AstKind::EnumMember { name, parent_scope, .. }
        | AstKind::FunctionDecl { name, parent_scope, .. }
        | AstKind::VariableDecl { name, parent_scope, .. } => {
            let name = *name;
            let parent_scope = *parent_scope;
            register_name(ctx, parent_scope, name, node);
        }

        AstKind::EnumDecl {
            name: Some(name),
            parent_scope,
            ..
        } => {
            let name = *name;
            let parent_scope = *parent_scope;
            register_name(ctx, parent_scope, name, node);
        }

        // Anonymous enums, imports, statics and everything else declare no
        // name of their own
        _ => {}
    }

    Ok(())
}

fn register_name(ctx: &mut CompilationContext, scope: ScopeIndex, name: IdentId, node: AstIndex) {
    let target = registration_scope(ctx, scope);

    if let Err(_existing) = ctx.scopes.insert(target, name, node) {
        let kind = DiagKind::DuplicateDeclaration(ctx.idents.get(name).to_string());
        let loc = ctx.ast.node(node).loc;
        ctx.error(kind, Some(loc));
    }
}

/// The nearest enclosing scope that introduces a name lookup level
fn registration_scope(ctx: &CompilationContext, mut scope: ScopeIndex) -> ScopeIndex {
    while ctx.scopes.get(scope).kind == ScopeKind::NoScope {
        match ctx.scopes.get(scope).parent {
            Some(parent) => scope = parent,
            None => break,
        }
    }
    scope
}

/// Recurses into children, running the static expansion sweep over each item
/// array on the way
pub(crate) fn name_register_nested(
    ctx: &mut CompilationContext,
    node: AstIndex,
) -> CompileResult<()> {
    match &ctx.ast.node(node).kind {
        AstKind::Module { scope, decls, .. } => {
            let scope = *scope;
            let decls = *decls;

            process_imports(ctx, decls, scope)?;

            let decls = register_and_expand(ctx, decls, scope)?;
            if let AstKind::Module { decls: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = decls;
            }

            for i in 0..decls.len as usize {
                let item = ctx.ast.list_item(decls, i);
                driver::require_name_register_nested(ctx, item)?;
            }
        }

        AstKind::StructDecl { scope, members, .. } => {
            let scope = *scope;
            let members = *members;

            let members = register_and_expand(ctx, members, scope)?;
            if let AstKind::StructDecl { members: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = members;
            }

            for i in 0..members.len as usize {
                let item = ctx.ast.list_item(members, i);
                driver::require_name_register_nested(ctx, item)?;
            }
        }

        AstKind::EnumDecl {
            name,
            parent_scope,
            scope,
            members,
            ..
        } => {
            let anonymous = name.is_none();
            let parent_scope = *parent_scope;
            let scope = *scope;
            let members = *members;

            let members = register_and_expand(ctx, members, scope)?;
            if let AstKind::EnumDecl { members: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = members;
            }

            // Members of an anonymous enum are visible in the surrounding
            // scope as well
            if anonymous {
                for i in 0..members.len as usize {
                    let member = ctx.ast.list_item(members, i);
                    if let AstKind::EnumMember { name, .. } = &ctx.ast.node(member).kind {
                        let name = *name;
                        register_name(ctx, parent_scope, name, member);
                    }
                }
            }
        }

        AstKind::FunctionDecl {
            parent_scope,
            signature,
            body,
            scope,
            ..
        } => {
            let parent_scope = *parent_scope;
            let signature = *signature;
            let body = *body;
            let scope = *scope;

            // A function declared in a member scope receives an implicit
            // leading `this` parameter typed as a pointer to the aggregate
            if ctx.scopes.get(registration_scope(ctx, parent_scope)).kind == ScopeKind::Member {
                synthesize_this_parameter(ctx, node, signature, scope);
            }

            if let AstKind::FunctionSignature { params, .. } = ctx.ast.node(signature).kind {
                for i in 0..params.len as usize {
                    let param = ctx.ast.list_item(params, i);
                    driver::require_name_register_self(ctx, param)?;
                }
            }

            if body.is_defined() {
                driver::require_name_register_nested(ctx, body)?;
            }
        }

        AstKind::Block { statements, scope } => {
            let scope = *scope;
            let statements = *statements;

            let statements = register_and_expand(ctx, statements, scope)?;
            if let AstKind::Block { statements: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = statements;
            }

            for i in 0..statements.len as usize {
                let item = ctx.ast.list_item(statements, i);
                driver::require_name_register_nested(ctx, item)?;
            }
        }

        AstKind::IfStmt {
            then_branch,
            else_branch,
            ..
        } => {
            let (then_branch, else_branch) = (*then_branch, *else_branch);
            driver::require_name_register_nested(ctx, then_branch)?;
            if else_branch.is_defined() {
                driver::require_name_register_nested(ctx, else_branch)?;
            }
        }

        AstKind::WhileStmt { body, .. } => {
            let body = *body;
            driver::require_name_register_nested(ctx, body)?;
        }

        AstKind::ForStmt { init, body, scope, .. } => {
            let scope = *scope;
            let init = *init;
            let body = *body;

            let init = register_and_expand(ctx, init, scope)?;
            if let AstKind::ForStmt { init: slot, .. } = &mut ctx.ast.node_mut(node).kind {
                *slot = init;
            }
            driver::require_name_register_nested(ctx, body)?;
        }

        // Leaves: declarations without nested declaration arrays,
        // expressions, and statements without bodies
        _ => {}
    }

    Ok(())
}

/// Prepends an implicit `this` parameter (pointer to the owning aggregate)
/// to the signature of a member function, shifting the declared parameters
fn synthesize_this_parameter(
    ctx: &mut CompilationContext,
    func: AstIndex,
    signature: AstIndex,
    func_scope: ScopeIndex,
) {
    let member_scope = match &ctx.ast.node(func).kind {
        AstKind::FunctionDecl { parent_scope, .. } => registration_scope(ctx, *parent_scope),
        _ => return,
    };
    let aggregate = ctx.scopes.get(member_scope).owner;
    if !aggregate.is_defined() {
        return;
    }

    let params = match &ctx.ast.node(signature).kind {
        AstKind::FunctionSignature { params, .. } => *params,
        _ => return,
    };

    let this_ty = ctx.pointer_type(aggregate);
    let loc = ctx.ast.node(func).loc;
    let this_param = ctx.ast.add_node(
        loc,
        AstKind::VariableDecl {
            name: crate::frontend::intern::known::THIS,
            parent_scope: func_scope,
            ty: this_ty,
            initializer: AstIndex::UNDEFINED,
            index: 0,
        },
        NodeFlags::IS_PARAMETER,
    );

    let mut rebuilt = vec![this_param];
    for i in 0..params.len as usize {
        let param = ctx.ast.list_item(params, i);
        if let AstKind::VariableDecl { index, .. } = &mut ctx.ast.node_mut(param).kind {
            *index += 1;
        }
        rebuilt.push(param);
    }

    let rebuilt = ctx.ast.add_list(&rebuilt);
    if let AstKind::FunctionSignature { params: slot, .. } = &mut ctx.ast.node_mut(signature).kind
    {
        *slot = rebuilt;
    }
}

/// Binds `import a.b;` items to their modules' scopes
fn process_imports(
    ctx: &mut CompilationContext,
    decls: AstNodes,
    scope: ScopeIndex,
) -> CompileResult<()> {
    for i in 0..decls.len as usize {
        let item = ctx.ast.list_item(decls, i);

        let path = match &ctx.ast.node(item).kind {
            AstKind::Import { path } => path.clone(),
            _ => continue,
        };

        match ctx.packages.get(&path).copied() {
            Some(module) => {
                let imported_scope = match &ctx.ast.node(module).kind {
                    AstKind::Module { scope, .. } => *scope,
                    _ => continue,
                };
                ctx.scopes.get_mut(scope).imports.push(imported_scope);
            }
            None => {
                let kind = DiagKind::UndefinedIdentifier(ctx.path_name(&path));
                let loc = ctx.ast.node(item).loc;
                ctx.error(kind, Some(loc));
            }
        }
    }

    Ok(())
}

/// Registers the selves of all plain items, then sweeps the array expanding
/// static conditionals in place. The array reference may relocate; the
/// running index stays valid because replacement rewrites the array before
/// the sweep continues.
fn register_and_expand(
    ctx: &mut CompilationContext,
    mut list: AstNodes,
    container_scope: ScopeIndex,
) -> CompileResult<AstNodes> {
    for i in 0..list.len as usize {
        let item = ctx.ast.list_item(list, i);
        if !is_static_item(ctx.ast.tag(item)) {
            driver::require_name_register_self(ctx, item)?;
        }
    }

    let mut i = 0usize;
    while i < list.len as usize {
        let item = ctx.ast.list_item(list, i);

        match ctx.ast.tag(item) {
            AstKindTag::StaticIf => {
                let (condition, then_items, else_items) = match &ctx.ast.node(item).kind {
                    AstKind::StaticIf {
                        condition,
                        then_items,
                        else_items,
                    } => (*condition, *then_items, *else_items),
                    _ => unreachable!(),
                };

                // An undefined condition is the always-taken attribute-block
                // passthrough
                let selected = if !condition.is_defined() {
                    then_items
                } else {
                    let condition = resolve::resolve_expr(ctx, condition)?;
                    match eval::eval_static_expr(ctx, condition) {
                        Ok(value) if value.is_truthy() => then_items,
                        // A non-constant condition was already reported;
                        // taking the else branch keeps the compile going
                        _ => else_items,
                    }
                };

                list = splice(ctx, list, i, selected)?;
            }

            AstKindTag::StaticVersion => {
                let (version, then_items, else_items) = match &ctx.ast.node(item).kind {
                    AstKind::StaticVersion {
                        version,
                        then_items,
                        else_items,
                    } => (*version, *then_items, *else_items),
                    _ => unreachable!(),
                };

                let selected = match Identifiers::version_bit(version) {
                    Some(bit) if ctx.enabled_versions & bit != 0 => then_items,
                    Some(_) => else_items,
                    None => {
                        let kind =
                            DiagKind::UnknownVersion(ctx.idents.get(version).to_string());
                        let loc = ctx.ast.node(item).loc;
                        ctx.error(kind, Some(loc));
                        else_items
                    }
                };

                list = splice(ctx, list, i, selected)?;
            }

            AstKindTag::StaticForeach => {
                let expanded = expand_foreach(ctx, item, container_scope)?;
                let replacement = ctx.ast.list(expanded).to_vec();
                list = ctx.ast.replace_range(list, i, 1, &replacement);
                // Re-sweep the inserted range for nested conditionals
            }

            AstKindTag::StaticAssert => {
                run_static_assert(ctx, item)?;
                list = ctx.ast.replace_range(list, i, 1, &[]);
            }

            _ => {
                driver::require_name_register_self(ctx, item)?;
                i += 1;
            }
        }
    }

    Ok(list)
}

fn is_static_item(tag: AstKindTag) -> bool {
    matches!(
        tag,
        AstKindTag::StaticIf
            | AstKindTag::StaticVersion
            | AstKindTag::StaticForeach
            | AstKindTag::StaticAssert
    )
}

/// Replaces a single conditional at `at` with the selected branch's items
fn splice(
    ctx: &mut CompilationContext,
    list: AstNodes,
    at: usize,
    selected: AstNodes,
) -> CompileResult<AstNodes> {
    let replacement = ctx.ast.list(selected).to_vec();
    Ok(ctx.ast.replace_range(list, at, 1, &replacement))
}

/// `#assert(cond, "message")`: evaluates, reports on zero, expands to nothing
fn run_static_assert(ctx: &mut CompilationContext, item: AstIndex) -> CompileResult<()> {
    let (condition, message) = match &ctx.ast.node(item).kind {
        AstKind::StaticAssert { condition, message } => (*condition, *message),
        _ => unreachable!(),
    };

    let condition = resolve::resolve_expr(ctx, condition)?;
    let Ok(value) = eval::eval_static_expr(ctx, condition) else {
        // Already reported as non-constant
        return Ok(());
    };

    if !value.is_truthy() {
        let text = if message.is_defined() {
            let message = resolve::resolve_expr(ctx, message)?;
            match eval::eval_static_expr(ctx, message) {
                Ok(value) => format!(": {}", value.display()),
                Err(_) => String::new(),
            }
        } else {
            String::new()
        };

        let loc = ctx.ast.node(item).loc;
        ctx.error(DiagKind::StaticAssertFailed(text), Some(loc));
    }

    Ok(())
}

/// Expands `#foreach (key, value; iterable) { body }`: the iterable must
/// resolve to an alias array; the body is cloned once per element into a
/// fresh instance scope binding `key -> index` (an enum member of type `u64`)
/// and `value -> element`
fn expand_foreach(
    ctx: &mut CompilationContext,
    item: AstIndex,
    container_scope: ScopeIndex,
) -> CompileResult<AstNodes> {
    let (key, value, iterable, body) = match &ctx.ast.node(item).kind {
        AstKind::StaticForeach {
            key,
            value,
            iterable,
            body,
        } => (*key, *value, *iterable, *body),
        _ => unreachable!(),
    };

    let iterable = resolve::resolve_expr(ctx, iterable)?;
    let iterable = resolve::resolved_entity(ctx, iterable);

    let items = match &ctx.ast.node(iterable).kind {
        AstKind::AliasArray { items } => *items,
        _ => {
            let loc = ctx.ast.node(item).loc;
            ctx.error(DiagKind::NonIterableForeach, Some(loc));
            return Ok(AstNodes::EMPTY);
        }
    };

    let mut expanded = Vec::new();

    for k in 0..items.len as usize {
        let element = ctx.ast.list_item(items, k);
        let element = resolve::resolved_entity(ctx, element);

        // Fresh instance scope with the two bindings
        let instance =
            ctx.scopes
                .push(ScopeKind::Local, Some(container_scope), "foreach instance");

        if let Some(key) = key {
            let index_literal = ctx.ast.add_node(
                ctx.ast.node(item).loc,
                AstKind::IntLiteral {
                    value: k as i64,
                    ty: ctx.basic_type(BasicTypeKind::U64),
                },
                NodeFlags::empty(),
            );
            let key_member = ctx.ast.add_node(
                ctx.ast.node(item).loc,
                AstKind::EnumMember {
                    name: key,
                    parent_scope: instance,
                    ty: ctx.basic_type(BasicTypeKind::U64),
                    value: index_literal,
                },
                NodeFlags::empty(),
            );
            let _ = ctx.scopes.insert(instance, key, key_member);
        }
        let _ = ctx.scopes.insert(instance, value, element);

        let mut cloner = Cloner {
            container: container_scope,
            instance,
            value_binding: value,
            element,
            scope_map: HashMap::new(),
        };

        for b in 0..body.len as usize {
            let body_item = ctx.ast.list_item(body, b);
            expanded.push(cloner.clone_node(ctx, body_item));
        }
    }

    Ok(ctx.ast.add_list(&expanded))
}

/// Recursive subtree cloner for `#foreach` bodies. Name-lookup scopes that
/// pointed at the container are redirected to the instance scope so the
/// bindings are found; registration scopes of top-level cloned declarations
/// stay on the container so the expanded items are visible there. A cloned
/// declaration named exactly like the value binding takes the name of the
/// iterated element instead, so each instance declares a distinct name.
struct Cloner {
    container: ScopeIndex,
    instance: ScopeIndex,
    value_binding: IdentId,
    element: AstIndex,
    scope_map: HashMap<ScopeIndex, ScopeIndex>,
}

impl Cloner {
    fn lookup_scope(&self, old: ScopeIndex) -> ScopeIndex {
        if old == self.container {
            return self.instance;
        }
        self.scope_map.get(&old).copied().unwrap_or(old)
    }

    fn registration_scope(&self, old: ScopeIndex) -> ScopeIndex {
        if old == self.container {
            return self.container;
        }
        self.scope_map.get(&old).copied().unwrap_or(old)
    }

    fn clone_scope(&mut self, ctx: &mut CompilationContext, old: ScopeIndex) -> ScopeIndex {
        let (kind, parent, debug_name) = {
            let scope = ctx.scopes.get(old);
            (scope.kind, scope.parent, scope.debug_name)
        };

        let parent = parent.map(|p| self.lookup_scope(p));
        let new = ctx.scopes.push(kind, parent, debug_name);
        self.scope_map.insert(old, new);
        new
    }

    fn clone_name(&self, ctx: &CompilationContext, name: IdentId) -> IdentId {
        if name != self.value_binding {
            return name;
        }

        match &ctx.ast.node(self.element).kind {
            AstKind::Alias { name, .. }
            | AstKind::StructDecl { name, .. }
            | AstKind::EnumMember { name, .. }
            | AstKind::FunctionDecl { name, .. }
            | AstKind::VariableDecl { name, .. } => *name,
            _ => name,
        }
    }

    fn clone_list(&mut self, ctx: &mut CompilationContext, list: AstNodes) -> AstNodes {
        let items: Vec<AstIndex> = ctx.ast.list(list).to_vec();
        let cloned: Vec<AstIndex> = items
            .into_iter()
            .map(|item| self.clone_node(ctx, item))
            .collect();
        ctx.ast.add_list(&cloned)
    }

    fn clone_node(&mut self, ctx: &mut CompilationContext, node: AstIndex) -> AstIndex {
        if !node.is_defined() {
            return node;
        }

        let loc = ctx.ast.node(node).loc;
        let flags = ctx.ast.node(node).flags;
        let attrib = ctx.ast.node(node).attrib;

        // Shared type singletons are referenced, never cloned
        if flags.contains(NodeFlags::IS_TYPE)
            && matches!(ctx.ast.node(node).kind, AstKind::BasicType { .. })
        {
            return node;
        }

        let kind = match &ctx.ast.node(node).kind {
            AstKind::Alias { name, parent_scope, expr } => {
                let (name, parent_scope, expr) = (*name, *parent_scope, *expr);
                AstKind::Alias {
                    name: self.clone_name(ctx, name),
                    parent_scope: self.registration_scope(parent_scope),
                    expr: self.clone_node(ctx, expr),
                }
            }
            AstKind::EnumMember {
                name,
                parent_scope,
                ty,
                value,
            } => {
                let (name, parent_scope, ty, value) = (*name, *parent_scope, *ty, *value);
                AstKind::EnumMember {
                    name: self.clone_name(ctx, name),
                    parent_scope: self.registration_scope(parent_scope),
                    ty: self.clone_node(ctx, ty),
                    value: self.clone_node(ctx, value),
                }
            }
            AstKind::VariableDecl {
                name,
                parent_scope,
                ty,
                initializer,
                index,
            } => {
                let (name, parent_scope, ty, initializer, index) =
                    (*name, *parent_scope, *ty, *initializer, *index);
                AstKind::VariableDecl {
                    name: self.clone_name(ctx, name),
                    parent_scope: self.registration_scope(parent_scope),
                    ty: self.clone_node(ctx, ty),
                    initializer: self.clone_node(ctx, initializer),
                    index,
                }
            }
            AstKind::FunctionDecl {
                name,
                parent_scope,
                signature,
                body,
                scope,
                template_params,
                ..
            } => {
                let (name, parent_scope, signature, body, scope, template_params) = (
                    *name,
                    *parent_scope,
                    *signature,
                    *body,
                    *scope,
                    *template_params,
                );
                let new_scope = self.clone_scope(ctx, scope);
                AstKind::FunctionDecl {
                    name: self.clone_name(ctx, name),
                    parent_scope: self.registration_scope(parent_scope),
                    signature: self.clone_node(ctx, signature),
                    body: self.clone_node(ctx, body),
                    scope: new_scope,
                    template_params: self.clone_list(ctx, template_params),
                    ir: crate::middle::ir::IrIndex::NONE,
                }
            }
            AstKind::Block { statements, scope } => {
                let (statements, scope) = (*statements, *scope);
                let new_scope = self.clone_scope(ctx, scope);
                AstKind::Block {
                    statements: self.clone_list(ctx, statements),
                    scope: new_scope,
                }
            }
            AstKind::IfStmt {
                condition,
                then_branch,
                else_branch,
            } => {
                let (condition, then_branch, else_branch) =
                    (*condition, *then_branch, *else_branch);
                AstKind::IfStmt {
                    condition: self.clone_node(ctx, condition),
                    then_branch: self.clone_node(ctx, then_branch),
                    else_branch: self.clone_node(ctx, else_branch),
                }
            }
            AstKind::WhileStmt { condition, body } => {
                let (condition, body) = (*condition, *body);
                AstKind::WhileStmt {
                    condition: self.clone_node(ctx, condition),
                    body: self.clone_node(ctx, body),
                }
            }
            AstKind::ForStmt {
                init,
                condition,
                increment,
                body,
                scope,
            } => {
                let (init, condition, increment, body, scope) =
                    (*init, *condition, *increment, *body, *scope);
                let new_scope = self.clone_scope(ctx, scope);
                AstKind::ForStmt {
                    init: self.clone_list(ctx, init),
                    condition: self.clone_node(ctx, condition),
                    increment: self.clone_list(ctx, increment),
                    body: self.clone_node(ctx, body),
                    scope: new_scope,
                }
            }
            AstKind::ReturnStmt { value } => {
                let value = *value;
                AstKind::ReturnStmt {
                    value: self.clone_node(ctx, value),
                }
            }
            AstKind::BreakStmt => AstKind::BreakStmt,
            AstKind::ContinueStmt => AstKind::ContinueStmt,
            AstKind::StaticIf {
                condition,
                then_items,
                else_items,
            } => {
                let (condition, then_items, else_items) =
                    (*condition, *then_items, *else_items);
                AstKind::StaticIf {
                    condition: self.clone_node(ctx, condition),
                    then_items: self.clone_list(ctx, then_items),
                    else_items: self.clone_list(ctx, else_items),
                }
            }
            AstKind::StaticVersion {
                version,
                then_items,
                else_items,
            } => {
                let (version, then_items, else_items) = (*version, *then_items, *else_items);
                AstKind::StaticVersion {
                    version,
                    then_items: self.clone_list(ctx, then_items),
                    else_items: self.clone_list(ctx, else_items),
                }
            }
            AstKind::StaticAssert { condition, message } => {
                let (condition, message) = (*condition, *message);
                AstKind::StaticAssert {
                    condition: self.clone_node(ctx, condition),
                    message: self.clone_node(ctx, message),
                }
            }
            AstKind::NameUse { scope, ident, .. } => {
                let (scope, ident) = (*scope, *ident);
                AstKind::NameUse {
                    scope: self.lookup_scope(scope),
                    ident,
                    entity: AstIndex::UNDEFINED,
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::MemberExpr {
                aggregate,
                member_ident,
                ..
            } => {
                let (aggregate, member_ident) = (*aggregate, *member_ident);
                AstKind::MemberExpr {
                    aggregate: self.clone_node(ctx, aggregate),
                    member_ident,
                    member: AstIndex::UNDEFINED,
                    member_index: 0,
                    access: crate::frontend::ast::MemberAccessKind::Unresolved,
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::IntLiteral { value, ty } => {
                let (value, ty) = (*value, *ty);
                AstKind::IntLiteral { value, ty }
            }
            AstKind::BoolLiteral { value, .. } => {
                let value = *value;
                AstKind::BoolLiteral {
                    value,
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::NullLiteral { .. } => AstKind::NullLiteral {
                ty: AstIndex::UNDEFINED,
            },
            AstKind::StringLiteral { value, .. } => {
                let value = value.clone();
                AstKind::StringLiteral {
                    value,
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::ArrayLiteral { items, .. } => {
                let items = *items;
                AstKind::ArrayLiteral {
                    items: self.clone_list(ctx, items),
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::BinaryOp { op, lhs, rhs, .. } => {
                let (op, lhs, rhs) = (*op, *lhs, *rhs);
                AstKind::BinaryOp {
                    op,
                    lhs: self.clone_node(ctx, lhs),
                    rhs: self.clone_node(ctx, rhs),
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::UnaryOp { op, child, .. } => {
                let (op, child) = (*op, *child);
                AstKind::UnaryOp {
                    op,
                    child: self.clone_node(ctx, child),
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::Call { callee, args, .. } => {
                let (callee, args) = (*callee, *args);
                AstKind::Call {
                    callee: self.clone_node(ctx, callee),
                    args: self.clone_list(ctx, args),
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::IndexOp { object, index, .. } => {
                let (object, index) = (*object, *index);
                AstKind::IndexOp {
                    object: self.clone_node(ctx, object),
                    index: self.clone_node(ctx, index),
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::Cast { target, expr, .. } => {
                let (target, expr) = (*target, *expr);
                AstKind::Cast {
                    target: self.clone_node(ctx, target),
                    expr: self.clone_node(ctx, expr),
                    cast: crate::frontend::ast::CastKind::Unchecked,
                    ty: AstIndex::UNDEFINED,
                }
            }
            AstKind::PtrType { base } => {
                let base = *base;
                AstKind::PtrType {
                    base: self.clone_node(ctx, base),
                }
            }
            AstKind::SliceType { base } => {
                let base = *base;
                AstKind::SliceType {
                    base: self.clone_node(ctx, base),
                }
            }
            AstKind::StaticArrayType {
                base,
                length_expr,
                length,
            } => {
                let (base, length_expr, length) = (*base, *length_expr, *length);
                AstKind::StaticArrayType {
                    base: self.clone_node(ctx, base),
                    length_expr: self.clone_node(ctx, length_expr),
                    length,
                }
            }
            AstKind::FunctionSignature {
                return_type,
                params,
            } => {
                let (return_type, params) = (*return_type, *params);
                AstKind::FunctionSignature {
                    return_type: self.clone_node(ctx, return_type),
                    params: self.clone_list(ctx, params),
                }
            }
            // Shared entities and uncloneable kinds are referenced as-is
            _ => return node,
        };

        let cloned = ctx.ast.add_node(loc, kind, flags);
        ctx.ast.node_mut(cloned).attrib = attrib;
        cloned
    }
}

//! The compilation context: one per compiler invocation, owning every arena,
//! table and diagnostic. All passes thread a mutable reference to it; there
//! are no hidden singletons and no locking.

use hashbrown::HashMap;

use crate::{
    diag::{DiagKind, Diagnostic, Fatal},
    frontend::{
        ast::{Ast, AstIndex, AstKind, BasicTypeKind, NodeFlags, Property},
        intern::{IdentId, Identifiers},
        lexer::{self, Span, TokenBuffer, TokenIndex},
        SourceFile,
    },
    middle::{
        ir::IrStore,
        scope::{ScopeIndex, ScopeKind, Scopes},
    },
};

/// A source file registered with the context plus the index of its first
/// token in the shared token buffer
#[derive(Debug)]
pub struct FileEntry {
    pub source: SourceFile,
    pub first_token: TokenIndex,
}

/// Structural key for canonicalized derived type nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TypeKey {
    Pointer(AstIndex),
    Slice(AstIndex),
    StaticArray(AstIndex, u64),
}

/// Scratch arena for transient per-function data; reset via saved markers at
/// function boundaries
#[derive(Debug, Default)]
pub struct TempArena {
    data: Vec<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct TempMark(usize);

impl TempArena {
    pub fn mark(&self) -> TempMark {
        TempMark(self.data.len())
    }

    pub fn reset(&mut self, mark: TempMark) {
        self.data.truncate(mark.0);
    }

    pub fn push(&mut self, value: u32) {
        self.data.push(value);
    }
}

pub struct CompilationContext {
    pub files: Vec<FileEntry>,
    pub tokens: TokenBuffer,
    pub idents: Identifiers,
    pub ast: Ast,
    pub scopes: Scopes,
    pub root_scope: ScopeIndex,
    basic_types: [AstIndex; BasicTypeKind::ALL.len()],
    type_cache: HashMap<TypeKey, AstIndex>,

    /// Top-level module declaration nodes in registration order
    pub modules: Vec<AstIndex>,
    /// Package tree: dotted module path -> module declaration
    pub packages: HashMap<Box<[IdentId]>, AstIndex>,

    /// Bitmask of enabled built-in `#version` identifiers
    pub enabled_versions: u32,

    pub diagnostics: Vec<Diagnostic>,
    /// In-progress (node, property) computations, used for cycle detection
    pub analysis_stack: Vec<(AstIndex, Property)>,

    pub ir: IrStore,
    pub temp: TempArena,
}

impl CompilationContext {
    pub fn new(enabled_versions: u32) -> Self {
        let mut ast = Ast::new();
        let mut scopes = Scopes::new();
        let mut idents = Identifiers::new();

        let root_scope = scopes.push(ScopeKind::Global, None, "root");

        // Shared singleton nodes for the basic types, bound in the root scope
        // under their spellings where they have one
        let mut basic_types = [AstIndex::UNDEFINED; BasicTypeKind::ALL.len()];
        for (i, basic) in BasicTypeKind::ALL.iter().enumerate() {
            let node = ast.add_node(0, AstKind::BasicType { basic: *basic }, NodeFlags::IS_TYPE);
            basic_types[i] = node;

            let named = !matches!(
                basic,
                BasicTypeKind::Null | BasicTypeKind::AliasMeta | BasicTypeKind::TypeMeta
            );
            if named {
                let ident = idents.get_or_intern(&basic.to_string());
                // The root scope is empty at this point; inserts cannot fail
                let _ = scopes.insert(root_scope, ident, node);
            }
        }

        Self {
            files: Vec::new(),
            tokens: TokenBuffer::default(),
            idents,
            ast,
            scopes,
            root_scope,
            basic_types,
            type_cache: HashMap::new(),
            modules: Vec::new(),
            packages: HashMap::new(),
            enabled_versions,
            diagnostics: Vec::new(),
            analysis_stack: Vec::new(),
            ir: IrStore::default(),
            temp: TempArena::default(),
        }
    }

    /* ───── files and tokens ───── */

    /// Tokenizes `source` into the shared token buffer and returns the file
    /// id and the index of its first token
    pub fn add_file(&mut self, source: SourceFile) -> (u32, TokenIndex) {
        let first_token = self.tokens.len() as TokenIndex;
        let buffer = lexer::tokenize(&source);

        self.tokens.kinds.extend_from_slice(&buffer.kinds);
        self.tokens.offsets.extend_from_slice(&buffer.offsets);

        let file_id = self.files.len() as u32;
        self.files.push(FileEntry {
            source,
            first_token,
        });

        (file_id, first_token)
    }

    /// The file a token belongs to, recovered from the per-file first-token
    /// table
    pub fn file_of_loc(&self, loc: TokenIndex) -> u32 {
        match self
            .files
            .binary_search_by_key(&loc, |entry| entry.first_token)
        {
            Ok(i) => i as u32,
            Err(i) => (i - 1) as u32,
        }
    }

    pub fn span_of_loc(&self, loc: TokenIndex) -> (u32, Span) {
        let file_id = self.file_of_loc(loc);
        let span = self
            .tokens
            .span(&self.files[file_id as usize].source, loc);
        (file_id, span)
    }

    /* ───── diagnostics ───── */

    /// Records and prints a recoverable diagnostic
    pub fn error(&mut self, kind: DiagKind, loc: Option<TokenIndex>) {
        let diagnostic = Diagnostic { kind, loc };

        match loc {
            Some(loc) => {
                let (file_id, span) = self.span_of_loc(loc);
                let source = &self.files[file_id as usize].source;
                diagnostic.print(Some(source.format_span_position(span)));
                source.highlight_span(span);
            }
            None => diagnostic.print(None),
        }

        self.diagnostics.push(diagnostic);
    }

    /// Records the diagnostic and raises the unrecoverable-error signal
    pub fn fatal(&mut self, kind: DiagKind, loc: Option<TokenIndex>) -> Fatal {
        self.error(kind, loc);
        Fatal
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /* ───── type node constructors ───── */

    pub fn basic_type(&self, basic: BasicTypeKind) -> AstIndex {
        self.basic_types[basic as usize]
    }

    /// Canonical pointer-type node for `base`; structurally identical type
    /// ASTs share one node so they map to one IR type
    pub fn pointer_type(&mut self, base: AstIndex) -> AstIndex {
        if let Some(node) = self.type_cache.get(&TypeKey::Pointer(base)) {
            return *node;
        }

        let node = self
            .ast
            .add_node(0, AstKind::PtrType { base }, NodeFlags::IS_TYPE);
        self.type_cache.insert(TypeKey::Pointer(base), node);
        node
    }

    pub fn slice_type(&mut self, base: AstIndex) -> AstIndex {
        if let Some(node) = self.type_cache.get(&TypeKey::Slice(base)) {
            return *node;
        }

        let node = self
            .ast
            .add_node(0, AstKind::SliceType { base }, NodeFlags::IS_TYPE);
        self.type_cache.insert(TypeKey::Slice(base), node);
        node
    }

    pub fn static_array_type(&mut self, base: AstIndex, length: u64) -> AstIndex {
        if let Some(node) = self.type_cache.get(&TypeKey::StaticArray(base, length)) {
            return *node;
        }

        let node = self.ast.add_node(
            0,
            AstKind::StaticArrayType {
                base,
                length_expr: AstIndex::UNDEFINED,
                length,
            },
            NodeFlags::IS_TYPE,
        );
        self.type_cache
            .insert(TypeKey::StaticArray(base, length), node);
        node
    }

    /// Registers an already-built derived type node as the canonical one if
    /// no equivalent exists, returning the canonical node
    pub fn canonicalize_type(&mut self, node: AstIndex) -> AstIndex {
        match self.ast.node(node).kind {
            AstKind::PtrType { base } => self.pointer_type(base),
            AstKind::SliceType { base } => self.slice_type(base),
            AstKind::StaticArrayType { base, length, .. } => self.static_array_type(base, length),
            _ => node,
        }
    }

    /* ───── display helpers ───── */

    /// A short human-readable name for a node, used in cycle reports
    pub fn node_name(&self, node: AstIndex) -> String {
        match &self.ast.node(node).kind {
            AstKind::Module { path, .. } => format!("module {}", self.path_name(path)),
            AstKind::Alias { name, .. } => format!("alias {}", self.idents.get(*name)),
            AstKind::StructDecl { name, .. } => format!("struct {}", self.idents.get(*name)),
            AstKind::EnumDecl {
                name: Some(name), ..
            } => format!("enum {}", self.idents.get(*name)),
            AstKind::EnumDecl { name: None, .. } => "enum".to_string(),
            AstKind::EnumMember { name, .. } => format!("enum member {}", self.idents.get(*name)),
            AstKind::FunctionDecl { name, .. } => {
                format!("function {}", self.idents.get(*name))
            }
            AstKind::VariableDecl { name, .. } => {
                format!("variable {}", self.idents.get(*name))
            }
            AstKind::NameUse { ident, .. } => format!("`{}`", self.idents.get(*ident)),
            kind => format!("{}", kind.tag()),
        }
    }

    pub fn path_name(&self, path: &[IdentId]) -> String {
        path.iter()
            .map(|id| self.idents.get(*id))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// The spelling of a type node, for diagnostics
    pub fn type_name(&self, ty: AstIndex) -> String {
        if !ty.is_defined() {
            return "{unknown}".to_string();
        }

        match &self.ast.node(ty).kind {
            AstKind::BasicType { basic } => basic.to_string(),
            AstKind::PtrType { base } => format!("{}*", self.type_name(*base)),
            AstKind::SliceType { base } => format!("{}[]", self.type_name(*base)),
            AstKind::StaticArrayType { base, length, .. } => {
                format!("{}[{length}]", self.type_name(*base))
            }
            AstKind::StructDecl { name, .. } => self.idents.get(*name).to_string(),
            AstKind::EnumDecl {
                name: Some(name), ..
            } => self.idents.get(*name).to_string(),
            AstKind::EnumDecl { name: None, base, .. } => {
                format!("enum({})", self.type_name(*base))
            }
            AstKind::FunctionSignature {
                return_type,
                params,
            } => {
                let params = self
                    .ast
                    .list(*params)
                    .iter()
                    .map(|p| match &self.ast.node(*p).kind {
                        AstKind::VariableDecl { ty, .. } => self.type_name(*ty),
                        _ => "{unknown}".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} function({params})", self.type_name(*return_type))
            }
            AstKind::Error => "{error}".to_string(),
            kind => format!("{}", kind.tag()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_type_names_resolve_in_the_root_scope() {
        let mut ctx = CompilationContext::new(0);

        let i32_id = ctx.idents.get_or_intern("i32");
        let node = ctx.scopes.lookup(ctx.root_scope, i32_id).unwrap();

        assert_eq!(node, ctx.basic_type(BasicTypeKind::I32));
        assert!(matches!(
            ctx.ast.node(node).kind,
            AstKind::BasicType {
                basic: BasicTypeKind::I32
            }
        ));
    }

    #[test]
    fn derived_type_nodes_are_canonical() {
        let mut ctx = CompilationContext::new(0);

        let base = ctx.basic_type(BasicTypeKind::U8);
        let a = ctx.pointer_type(base);
        let b = ctx.pointer_type(base);
        assert_eq!(a, b);

        let s1 = ctx.static_array_type(base, 16);
        let s2 = ctx.static_array_type(base, 16);
        let s3 = ctx.static_array_type(base, 8);
        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
    }

    #[test]
    fn file_of_loc_uses_first_token_table() {
        let mut ctx = CompilationContext::new(0);

        let (file_a, first_a) = ctx.add_file(SourceFile::in_memory("module a;"));
        let (file_b, first_b) = ctx.add_file(SourceFile::in_memory("module b;"));

        assert_eq!(ctx.file_of_loc(first_a), file_a);
        assert_eq!(ctx.file_of_loc(first_a + 1), file_a);
        assert_eq!(ctx.file_of_loc(first_b), file_b);
        assert_eq!(ctx.file_of_loc(first_b + 2), file_b);
    }
}

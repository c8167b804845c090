//! Lexical scope tree. Scopes only point upward; the identifier map is the
//! only downward edge.

use hashbrown::HashMap;

use crate::{
    frontend::{ast::AstIndex, intern::IdentId},
    index::{simple_index, IndexVec},
};

simple_index! {
    /// Handle to a scope in the scope arena
    pub struct ScopeIndex;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Member,
    Local,
    /// Bounds attribute visibility (`@a { ... }`) without introducing a name
    /// lookup level
    NoScope,
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeIndex>,
    pub debug_name: &'static str,
    /// The declaration this scope belongs to (struct, function, module), if
    /// any. Member scopes use it to recover the aggregate for implicit `this`.
    pub owner: AstIndex,
    pub entities: HashMap<IdentId, AstIndex>,
    /// Scopes of imported modules, consulted after this scope's own entities
    /// (non-transitively)
    pub imports: Vec<ScopeIndex>,
}

#[derive(Debug, Default)]
pub struct Scopes {
    arena: IndexVec<ScopeIndex, Scope>,
}

impl Scopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        kind: ScopeKind,
        parent: Option<ScopeIndex>,
        debug_name: &'static str,
    ) -> ScopeIndex {
        self.arena.push(Scope {
            kind,
            parent,
            debug_name,
            owner: AstIndex::UNDEFINED,
            entities: HashMap::new(),
            imports: Vec::new(),
        })
    }

    pub fn get(&self, index: ScopeIndex) -> &Scope {
        &self.arena[index]
    }

    pub fn get_mut(&mut self, index: ScopeIndex) -> &mut Scope {
        &mut self.arena[index]
    }

    /// Inserts `ident` into `scope`; on conflict returns the existing entity
    pub fn insert(
        &mut self,
        scope: ScopeIndex,
        ident: IdentId,
        entity: AstIndex,
    ) -> Result<(), AstIndex> {
        match self.arena[scope].entities.try_insert(ident, entity) {
            Ok(_) => Ok(()),
            Err(occupied) => Err(occupied.entry.get().to_owned()),
        }
    }

    /// Walks the scope chain from `scope` to the root looking for `ident`.
    /// `no_scope` scopes are name-transparent but still walked through; each
    /// scope's imports are consulted after its own entities.
    pub fn lookup(&self, scope: ScopeIndex, ident: IdentId) -> Option<AstIndex> {
        let mut current = Some(scope);

        while let Some(index) = current {
            let scope = &self.arena[index];

            if let Some(entity) = scope.entities.get(&ident) {
                return Some(*entity);
            }

            for import in &scope.imports {
                if let Some(entity) = self.arena[*import].entities.get(&ident) {
                    return Some(*entity);
                }
            }

            current = scope.parent;
        }

        None
    }

    /// The nearest enclosing member scope, used to find the aggregate for
    /// implicit `this`
    pub fn enclosing_member_scope(&self, scope: ScopeIndex) -> Option<ScopeIndex> {
        let mut current = Some(scope);

        while let Some(index) = current {
            let scope = &self.arena[index];

            if scope.kind == ScopeKind::Member {
                return Some(index);
            }

            current = scope.parent;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parents() {
        let mut scopes = Scopes::new();
        let root = scopes.push(ScopeKind::Global, None, "root");
        let inner = scopes.push(ScopeKind::Local, Some(root), "inner");

        scopes.insert(root, IdentId(100), AstIndex(1)).unwrap();
        scopes.insert(inner, IdentId(101), AstIndex(2)).unwrap();

        assert_eq!(scopes.lookup(inner, IdentId(100)), Some(AstIndex(1)));
        assert_eq!(scopes.lookup(inner, IdentId(101)), Some(AstIndex(2)));
        assert_eq!(scopes.lookup(root, IdentId(101)), None);
    }

    #[test]
    fn duplicate_insert_reports_existing_entity() {
        let mut scopes = Scopes::new();
        let root = scopes.push(ScopeKind::Global, None, "root");

        scopes.insert(root, IdentId(7), AstIndex(1)).unwrap();
        assert_eq!(scopes.insert(root, IdentId(7), AstIndex(2)), Err(AstIndex(1)));
    }

    #[test]
    fn shadowing_resolves_to_the_nearest_scope() {
        let mut scopes = Scopes::new();
        let root = scopes.push(ScopeKind::Global, None, "root");
        let inner = scopes.push(ScopeKind::Local, Some(root), "inner");

        scopes.insert(root, IdentId(9), AstIndex(1)).unwrap();
        scopes.insert(inner, IdentId(9), AstIndex(2)).unwrap();

        assert_eq!(scopes.lookup(inner, IdentId(9)), Some(AstIndex(2)));
    }
}

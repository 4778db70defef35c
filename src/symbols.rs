use rustc_hash::FxHashMap;

use crate::ir::ValueId;

/// Lexically nested name-to-slot bindings.
///
/// Layer zero is the global scope and always exists. Lookup walks from
/// the innermost layer outward; declaration is strictly local, so
/// shadowing an outer binding is allowed but redeclaring within one
/// layer is not.
///
/// The code generator pairs every `push_scope` with a `pop_scope` on
/// all exit paths through [`SymbolTable::scoped`].
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<FxHashMap<String, ValueId>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable {
            scopes: vec![FxHashMap::default()],
        }
    }
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Number of layers, global scope included.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the global scope");
        self.scopes.pop();
    }

    /// Resolves `name` against the innermost scope that binds it.
    pub fn try_lookup(&self, name: &str) -> Option<ValueId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Binds `name` in the innermost scope. Returns whether the binding
    /// was inserted; an existing local binding is left untouched.
    pub fn try_declare(&mut self, name: &str, slot: ValueId) -> bool {
        let scope = match self.scopes.last_mut() {
            Some(scope) => scope,
            None => unreachable!("the global scope always exists"),
        };
        if scope.contains_key(name) {
            return false;
        }
        scope.insert(name.to_string(), slot);
        true
    }

    /// Runs `body` inside a fresh scope layer, restoring the previous
    /// layering on every exit path, the error path included.
    pub fn scoped<T, E>(
        &mut self,
        body: impl FnOnce(&mut SymbolTable) -> Result<T, E>,
    ) -> Result<T, E> {
        self.push_scope();
        let result = body(self);
        self.pop_scope();
        result
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lookup_walks_outward() {
        let mut table = SymbolTable::new();
        assert!(table.try_declare("x", ValueId(0)));
        table.push_scope();
        assert_eq!(table.try_lookup("x"), Some(ValueId(0)));
        assert!(table.try_declare("y", ValueId(1)));
        assert_eq!(table.try_lookup("y"), Some(ValueId(1)));
        table.pop_scope();
        assert_eq!(table.try_lookup("y"), None);
    }

    #[test]
    fn shadowing_is_per_scope() {
        let mut table = SymbolTable::new();
        assert!(table.try_declare("x", ValueId(0)));
        // Redeclaration in the same scope is refused.
        assert!(!table.try_declare("x", ValueId(1)));
        assert_eq!(table.try_lookup("x"), Some(ValueId(0)));

        table.push_scope();
        assert!(table.try_declare("x", ValueId(2)));
        assert_eq!(table.try_lookup("x"), Some(ValueId(2)));
        table.pop_scope();
        assert_eq!(table.try_lookup("x"), Some(ValueId(0)));
    }

    #[test]
    fn scoped_restores_depth_on_error() {
        let mut table = SymbolTable::new();
        let result: Result<(), &str> = table.scoped(|table| {
            table.try_declare("tmp", ValueId(9));
            Err("lowering failed")
        });
        assert_eq!(result, Err("lowering failed"));
        assert_eq!(table.depth(), 1);
        assert_eq!(table.try_lookup("tmp"), None);
    }
}

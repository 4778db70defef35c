use crate::{
    ast::Prototype,
    ir::{Builder, ValueId},
    token::SourceLocation,
};

/// Per-module debug metadata: one compile unit, a stack of lexical
/// scopes, and the parameter records of every lowered function.
///
/// The metadata is carried alongside the IR (instructions hold their
/// own source locations); this type tracks the scope structure and
/// feeds the builder the location to stamp.
#[derive(Debug)]
pub struct DebugInfo {
    file_name: String,
    subprograms: Vec<Subprogram>,
    /// Indices into `subprograms`; empty means compile-unit level.
    lexical_blocks: Vec<usize>,
}

#[derive(Debug)]
pub struct Subprogram {
    pub name: String,
    pub line: u32,
    pub parameters: Vec<ParameterRecord>,
}

#[derive(Debug)]
pub struct ParameterRecord {
    pub name: String,
    pub index: u32,
    pub line: u32,
    pub slot: ValueId,
}

impl DebugInfo {
    /// Creates the compile unit for `module_name`. An anonymous module
    /// falls back to a fixed source-file name.
    pub fn new(module_name: &str) -> DebugInfo {
        let file_name = if module_name.is_empty() {
            "fib.ks".to_string()
        } else {
            format!("{module_name}.ks")
        };
        DebugInfo {
            file_name,
            subprograms: Vec::new(),
            lexical_blocks: Vec::new(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Opens a subprogram scope for `proto` and clears the builder's
    /// location so prologue instructions carry none.
    pub fn enter_function(&mut self, builder: &mut Builder, proto: &Prototype) {
        self.subprograms.push(Subprogram {
            name: proto.name.clone(),
            line: proto.location.line,
            parameters: Vec::new(),
        });
        self.lexical_blocks.push(self.subprograms.len() - 1);
        builder.clear_location();
    }

    /// Pops the innermost lexical scope. Paired with every
    /// [`DebugInfo::enter_function`], on the error path too.
    pub fn exit_scope(&mut self) {
        debug_assert!(!self.lexical_blocks.is_empty());
        self.lexical_blocks.pop();
    }

    /// Records a parameter variable of the current subprogram.
    pub fn declare_parameter(
        &mut self,
        slot: ValueId,
        name: &str,
        index: u32,
        location: SourceLocation,
    ) {
        let current = match self.lexical_blocks.last() {
            Some(&i) => i,
            None => unreachable!("declare_parameter outside a function scope"),
        };
        self.subprograms[current].parameters.push(ParameterRecord {
            name: name.to_string(),
            index,
            line: location.line,
            slot,
        });
    }

    /// Points the builder's pending location at `location` within the
    /// innermost lexical scope.
    pub fn emit_location(&self, builder: &mut Builder, location: SourceLocation) {
        builder.set_location(location);
    }

    /// Seals the metadata at module rotation: any scope still open is
    /// closed and no further locations attach to it.
    pub fn finalize(&mut self) {
        self.lexical_blocks.clear();
    }

    pub fn subprograms(&self) -> &[Subprogram] {
        &self.subprograms
    }

    /// Whether any subprogram scope is open.
    pub fn in_function(&self) -> bool {
        !self.lexical_blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Prototype;
    use crate::token::SourceLocation;
    use pretty_assertions::assert_eq;

    #[test]
    fn compile_unit_file_name() {
        assert_eq!(DebugInfo::new("mandel").file_name(), "mandel.ks");
        assert_eq!(DebugInfo::new("").file_name(), "fib.ks");
    }

    #[test]
    fn function_scopes_nest_and_record_parameters() {
        let mut debug = DebugInfo::new("m");
        let mut builder = Builder::new();

        let proto = Prototype::function(
            SourceLocation { line: 4, column: 1 },
            "f".into(),
            vec!["x".into()],
        );
        debug.enter_function(&mut builder, &proto);
        assert!(debug.in_function());

        debug.declare_parameter(ValueId(1), "x", 1, proto.location);
        debug.exit_scope();
        assert!(!debug.in_function());

        let sub = &debug.subprograms()[0];
        assert_eq!(sub.name, "f");
        assert_eq!(sub.line, 4);
        assert_eq!(sub.parameters.len(), 1);
        assert_eq!(sub.parameters[0].name, "x");
    }

    #[test]
    fn enter_function_clears_builder_location() {
        let mut debug = DebugInfo::new("m");
        let mut builder = Builder::new();
        debug.emit_location(&mut builder, SourceLocation { line: 2, column: 5 });

        let proto = Prototype::function(SourceLocation::start(), "f".into(), vec![]);
        debug.enter_function(&mut builder, &proto);
        // The prologue runs with no location; the first emit_location
        // inside the body restores one.
        debug.exit_scope();
    }
}

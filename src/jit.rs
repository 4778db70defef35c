use std::io::Write;

use thiserror::Error;

use crate::ir::{Function, InstKind, Module, Terminator};

/// The execution engine.
///
/// Modules rotated out of the code generator are added whole and owned
/// by the engine; name lookup searches them newest first, preferring a
/// definition over the bare declarations a fresh module carries for
/// earlier symbols. `putchard` and `printd` resolve as process
/// builtins without any declaration, the way a process-symbol search
/// generator would surface them.
#[derive(Debug, Default)]
pub struct Jit {
    modules: Vec<(ModuleHandle, Module)>,
    next_handle: u64,
}

/// Identifies an added module so it can be removed again; the
/// anonymous-expression modules are discarded through this after each
/// evaluation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModuleHandle(u64);

/// A resolved symbol: either a defined K function or a runtime
/// builtin. Resolution is positional, so adding or removing modules
/// invalidates previously looked-up symbols; resolve again after any
/// change.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Symbol {
    Function { module: usize, func: usize },
    Builtin(Builtin),
}

/// Process symbols the engine resolves without any `extern`
/// declaration: the two K runtime helpers plus the libm routines the
/// language's examples lean on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Builtin {
    Putchard,
    Printd,
    Sin,
    Cos,
    Sqrt,
    Exp,
    Log,
    Fabs,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum JitError {
    #[error("JIT error: unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("JIT error: call to undefined function '{0}'")]
    UndefinedFunction(String),
    #[error("JIT error: '{0}' called with the wrong number of arguments")]
    WrongArity(String),
}

type Result<T, E = JitError> = std::result::Result<T, E>;

impl Jit {
    pub fn new() -> Jit {
        Jit::default()
    }

    /// The layout the code generator stamps on modules meant for this
    /// engine.
    pub fn data_layout(&self) -> &'static str {
        "e-m:e-i64:64-f80:128-n8:16:32:64-S128"
    }

    /// Takes ownership of `module`; its definitions become resolvable.
    pub fn add_module(&mut self, module: Module) -> ModuleHandle {
        let handle = ModuleHandle(self.next_handle);
        self.next_handle += 1;
        self.modules.push((handle, module));
        handle
    }

    /// Discards a previously added module and every symbol it defined.
    pub fn remove_module(&mut self, handle: ModuleHandle) {
        self.modules.retain(|(h, _)| *h != handle);
    }

    /// Resolves `name`, newest module first, falling back to process
    /// builtins.
    pub fn lookup(&self, name: &str) -> Result<Symbol> {
        if let Some(symbol) = self.find_definition(name) {
            return Ok(symbol);
        }
        match builtin(name) {
            Some(b) => Ok(Symbol::Builtin(b)),
            None => Err(JitError::UnknownSymbol(name.to_string())),
        }
    }

    /// Invokes a resolved symbol.
    pub fn call(&self, symbol: Symbol, args: &[f64]) -> Result<f64> {
        match symbol {
            Symbol::Builtin(b) => {
                let [x] = args else {
                    return Err(JitError::WrongArity(builtin_name(b).to_string()));
                };
                Ok(call_builtin(b, *x))
            }
            Symbol::Function { module, func } => {
                let function = &self.modules[module].1.functions[func];
                if function.arity() != args.len() {
                    return Err(JitError::WrongArity(function.name.clone()));
                }
                self.execute(function, args)
            }
        }
    }

    /// Convenience for `lookup` + `call`.
    pub fn invoke(&self, name: &str, args: &[f64]) -> Result<f64> {
        let symbol = self.lookup(name)?;
        self.call(symbol, args)
    }

    fn find_definition(&self, name: &str) -> Option<Symbol> {
        for (module_ix, (_, module)) in self.modules.iter().enumerate().rev() {
            for (func_ix, function) in module.functions.iter().enumerate() {
                if function.name == name && !function.is_declaration() {
                    return Some(Symbol::Function {
                        module: module_ix,
                        func: func_ix,
                    });
                }
            }
        }
        None
    }

    /// Walks the CFG. Values live in one flat table per activation;
    /// alloca slots reuse their own table entry as the cell.
    fn execute(&self, function: &Function, args: &[f64]) -> Result<f64> {
        let mut values = vec![0.0f64; function.insts.len()];
        values[..args.len()].copy_from_slice(args);

        let mut block = match function.entry_block() {
            Some(entry) => entry,
            None => return Err(JitError::UndefinedFunction(function.name.clone())),
        };
        let mut prev_block = block;

        loop {
            let current = function.block(block);
            for &value in &current.insts {
                let result = match &function.inst(value).kind {
                    InstKind::Param(i) => values[*i as usize],
                    InstKind::ConstF64(v) => *v,
                    // The slot's own table entry is the cell; creating
                    // it (re-)initializes nothing.
                    InstKind::Alloca => values[value.0 as usize],
                    InstKind::Load { slot } => values[slot.0 as usize],
                    InstKind::Store { slot, value: v } => {
                        values[slot.0 as usize] = values[v.0 as usize];
                        values[v.0 as usize]
                    }
                    InstKind::FAdd { lhs, rhs } => {
                        values[lhs.0 as usize] + values[rhs.0 as usize]
                    }
                    InstKind::FSub { lhs, rhs } => {
                        values[lhs.0 as usize] - values[rhs.0 as usize]
                    }
                    InstKind::FMul { lhs, rhs } => {
                        values[lhs.0 as usize] * values[rhs.0 as usize]
                    }
                    InstKind::FDiv { lhs, rhs } => {
                        values[lhs.0 as usize] / values[rhs.0 as usize]
                    }
                    InstKind::FCmpUlt { lhs, rhs } => {
                        let (a, b) = (values[lhs.0 as usize], values[rhs.0 as usize]);
                        bool_value(a < b || a.is_nan() || b.is_nan())
                    }
                    InstKind::FCmpOne { lhs, rhs } => {
                        let (a, b) = (values[lhs.0 as usize], values[rhs.0 as usize]);
                        bool_value(a != b)
                    }
                    InstKind::UiToFp { value } => values[value.0 as usize],
                    InstKind::Call { callee, args } => {
                        let args: Vec<f64> =
                            args.iter().map(|a| values[a.0 as usize]).collect();
                        self.call_by_name(callee, &args)?
                    }
                    InstKind::Phi { incoming } => {
                        let from_pred = incoming
                            .iter()
                            .find(|(_, from)| *from == prev_block)
                            .map(|(v, _)| values[v.0 as usize]);
                        match from_pred {
                            Some(v) => v,
                            None => unreachable!("phi has an edge for every predecessor"),
                        }
                    }
                };
                values[value.0 as usize] = result;
            }

            match current.terminator {
                Some(Terminator::Br(target)) => {
                    prev_block = block;
                    block = target;
                }
                Some(Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                }) => {
                    prev_block = block;
                    block = if values[cond.0 as usize] != 0.0 {
                        then_block
                    } else {
                        else_block
                    };
                }
                Some(Terminator::Ret(value)) => return Ok(values[value.0 as usize]),
                None => unreachable!("verified functions have terminated blocks"),
            }
        }
    }

    /// Calls resolve by name at execution time, so a call lowered
    /// against a declaration finds the definition added in any module.
    fn call_by_name(&self, name: &str, args: &[f64]) -> Result<f64> {
        match self.find_definition(name) {
            Some(symbol) => self.call(symbol, args),
            None => match builtin(name) {
                Some(b) => self.call(Symbol::Builtin(b), args),
                None => Err(JitError::UndefinedFunction(name.to_string())),
            },
        }
    }
}

fn bool_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn builtin(name: &str) -> Option<Builtin> {
    match name {
        "putchard" => Some(Builtin::Putchard),
        "printd" => Some(Builtin::Printd),
        "sin" => Some(Builtin::Sin),
        "cos" => Some(Builtin::Cos),
        "sqrt" => Some(Builtin::Sqrt),
        "exp" => Some(Builtin::Exp),
        "log" => Some(Builtin::Log),
        "fabs" => Some(Builtin::Fabs),
        _ => None,
    }
}

fn builtin_name(b: Builtin) -> &'static str {
    match b {
        Builtin::Putchard => "putchard",
        Builtin::Printd => "printd",
        Builtin::Sin => "sin",
        Builtin::Cos => "cos",
        Builtin::Sqrt => "sqrt",
        Builtin::Exp => "exp",
        Builtin::Log => "log",
        Builtin::Fabs => "fabs",
    }
}

/// `putchard(x)` writes x's low byte to standard error and returns 0;
/// `printd(x)` writes x and a newline.
fn call_builtin(b: Builtin, x: f64) -> f64 {
    let mut err = std::io::stderr();
    match b {
        Builtin::Putchard => {
            let _ = write!(err, "{}", (x as u8) as char);
            let _ = err.flush();
            0.0
        }
        Builtin::Printd => {
            let _ = writeln!(err, "{x}");
            0.0
        }
        Builtin::Sin => x.sin(),
        Builtin::Cos => x.cos(),
        Builtin::Sqrt => x.sqrt(),
        Builtin::Exp => x.exp(),
        Builtin::Log => x.ln(),
        Builtin::Fabs => x.abs(),
    }
}

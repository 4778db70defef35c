//! A compact SSA intermediate representation.
//!
//! Functions hold an instruction arena indexed by [`ValueId`]; basic
//! blocks list the instructions scheduled in them plus one terminator.
//! Function parameters occupy the first arena slots so every operand is
//! uniformly a [`ValueId`]. Mutable source-level bindings are `alloca`
//! slots in the entry block, loaded and stored explicitly.

use crate::token::SourceLocation;

pub mod printer;
pub mod verify;

/// Index of an instruction (and thus of the value it produces) within
/// its function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Index of a basic block within its function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Index of a function within its module.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub enum InstKind {
    /// The n-th function parameter.
    Param(u32),
    ConstF64(f64),
    /// A stack slot for one mutable binding. Entry block only.
    Alloca,
    Load {
        slot: ValueId,
    },
    Store {
        slot: ValueId,
        value: ValueId,
    },
    FAdd {
        lhs: ValueId,
        rhs: ValueId,
    },
    FSub {
        lhs: ValueId,
        rhs: ValueId,
    },
    FMul {
        lhs: ValueId,
        rhs: ValueId,
    },
    FDiv {
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Unordered less-than; produces a boolean.
    FCmpUlt {
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Ordered not-equal; produces a boolean.
    FCmpOne {
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Boolean to 0.0/1.0.
    UiToFp {
        value: ValueId,
    },
    /// Callees are resolved by name at execution or link time, which is
    /// what lets a rotated module re-declare earlier definitions.
    Call {
        callee: String,
        args: Vec<ValueId>,
    },
    Phi {
        incoming: Vec<(ValueId, BlockId)>,
    },
}

impl InstKind {
    /// Whether the produced value is a boolean rather than an f64.
    pub fn is_boolean(&self) -> bool {
        matches!(self, InstKind::FCmpUlt { .. } | InstKind::FCmpOne { .. })
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match *self {
            InstKind::Param(_) | InstKind::ConstF64(_) | InstKind::Alloca => Vec::new(),
            InstKind::Load { slot } => vec![slot],
            InstKind::Store { slot, value } => vec![slot, value],
            InstKind::FAdd { lhs, rhs }
            | InstKind::FSub { lhs, rhs }
            | InstKind::FMul { lhs, rhs }
            | InstKind::FDiv { lhs, rhs }
            | InstKind::FCmpUlt { lhs, rhs }
            | InstKind::FCmpOne { lhs, rhs } => vec![lhs, rhs],
            InstKind::UiToFp { value } => vec![value],
            InstKind::Call { ref args, .. } => args.clone(),
            InstKind::Phi { ref incoming } => incoming.iter().map(|(v, _)| *v).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
    pub kind: InstKind,
    /// Value-name hint carried into the textual listing.
    pub name: String,
    /// Debug location active on the builder when the instruction was
    /// created.
    pub location: Option<SourceLocation>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret(ValueId),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<ValueId>,
    pub terminator: Option<Terminator>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub insts: Vec<Inst>,
    pub blocks: Vec<Block>,
    /// Source line of the definition, for the debug compile unit.
    pub line: Option<u32>,
}

impl Function {
    /// A body-less declaration. Parameters still occupy arena slots so
    /// a later definition pass can attach blocks directly.
    pub fn declaration(name: impl Into<String>, params: Vec<String>) -> Function {
        let insts = params
            .iter()
            .enumerate()
            .map(|(i, param)| Inst {
                kind: InstKind::Param(i as u32),
                name: param.clone(),
                location: None,
            })
            .collect();
        Function {
            name: name.into(),
            params,
            insts,
            blocks: Vec::new(),
            line: None,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// The value of the n-th parameter.
    pub fn param(&self, index: usize) -> ValueId {
        debug_assert!(index < self.params.len());
        ValueId(index as u32)
    }

    pub fn inst(&self, value: ValueId) -> &Inst {
        &self.insts[value.0 as usize]
    }

    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block.0 as usize]
    }

    pub fn block_mut(&mut self, block: BlockId) -> &mut Block {
        &mut self.blocks[block.0 as usize]
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(BlockId(0))
        }
    }

    /// Blocks that can branch to `target`.
    pub fn predecessors(&self, target: BlockId) -> Vec<BlockId> {
        let mut preds = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            let goes_to_target = match block.terminator {
                Some(Terminator::Br(b)) => b == target,
                Some(Terminator::CondBr {
                    then_block,
                    else_block,
                    ..
                }) => then_block == target || else_block == target,
                _ => false,
            };
            if goes_to_target {
                preds.push(BlockId(i as u32));
            }
        }
        preds
    }
}

/// One translation unit. The code generator keeps exactly one module
/// active and rotates it out whole.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Module {
    pub name: String,
    pub data_layout: String,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            data_layout: String::new(),
            functions: Vec::new(),
        }
    }

    pub fn get_function(&self, name: &str) -> Option<(FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn func(&self, func: FuncId) -> &Function {
        &self.functions[func.0 as usize]
    }

    pub fn func_mut(&mut self, func: FuncId) -> &mut Function {
        &mut self.functions[func.0 as usize]
    }

    pub fn add_function(&mut self, function: Function) -> FuncId {
        self.functions.push(function);
        FuncId((self.functions.len() - 1) as u32)
    }

    /// Erases a partially generated function after a failed lowering.
    pub fn remove_function(&mut self, name: &str) {
        self.functions.retain(|f| f.name != name);
    }
}

/// Instruction cursor. All create methods append at the insertion
/// point and stamp the pending debug location.
#[derive(Clone, Debug, Default)]
pub struct Builder {
    func: Option<FuncId>,
    block: Option<BlockId>,
    location: Option<SourceLocation>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Sets the current debug location; subsequent instructions carry
    /// it.
    pub fn set_location(&mut self, location: SourceLocation) {
        self.location = Some(location);
    }

    /// Clears the debug location (function prologues).
    pub fn clear_location(&mut self) {
        self.location = None;
    }

    pub fn position_at_end(&mut self, func: FuncId, block: BlockId) {
        self.func = Some(func);
        self.block = Some(block);
    }

    pub fn current_function(&self) -> Option<FuncId> {
        self.func
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.block
    }

    /// The block instructions are currently appended to. Unlike
    /// [`Builder::current_block`] this insists the builder is
    /// positioned.
    pub fn insert_block(&self) -> BlockId {
        self.expect_block()
    }

    /// Appends a fresh, unterminated block to `func`.
    pub fn create_block(&self, module: &mut Module, func: FuncId, name: &str) -> BlockId {
        let function = module.func_mut(func);
        let name = unique_block_name(function, name);
        function.blocks.push(Block {
            name,
            insts: Vec::new(),
            terminator: None,
        });
        BlockId((function.blocks.len() - 1) as u32)
    }

    pub fn const_f64(&self, module: &mut Module, value: f64) -> ValueId {
        self.push(module, InstKind::ConstF64(value), "")
    }

    pub fn load(&self, module: &mut Module, slot: ValueId, name: &str) -> ValueId {
        self.push(module, InstKind::Load { slot }, name)
    }

    pub fn store(&self, module: &mut Module, slot: ValueId, value: ValueId) -> ValueId {
        self.push(module, InstKind::Store { slot, value }, "")
    }

    pub fn fadd(&self, module: &mut Module, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        self.push(module, InstKind::FAdd { lhs, rhs }, name)
    }

    pub fn fsub(&self, module: &mut Module, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        self.push(module, InstKind::FSub { lhs, rhs }, name)
    }

    pub fn fmul(&self, module: &mut Module, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        self.push(module, InstKind::FMul { lhs, rhs }, name)
    }

    pub fn fdiv(&self, module: &mut Module, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        self.push(module, InstKind::FDiv { lhs, rhs }, name)
    }

    pub fn fcmp_ult(&self, module: &mut Module, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        self.push(module, InstKind::FCmpUlt { lhs, rhs }, name)
    }

    pub fn fcmp_one(&self, module: &mut Module, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        self.push(module, InstKind::FCmpOne { lhs, rhs }, name)
    }

    pub fn ui_to_fp(&self, module: &mut Module, value: ValueId, name: &str) -> ValueId {
        self.push(module, InstKind::UiToFp { value }, name)
    }

    pub fn call(
        &self,
        module: &mut Module,
        callee: impl Into<String>,
        args: Vec<ValueId>,
        name: &str,
    ) -> ValueId {
        self.push(
            module,
            InstKind::Call {
                callee: callee.into(),
                args,
            },
            name,
        )
    }

    pub fn phi(&self, module: &mut Module, incoming: Vec<(ValueId, BlockId)>, name: &str) -> ValueId {
        self.push(module, InstKind::Phi { incoming }, name)
    }

    /// Allocates a stack slot at the top of the current function's
    /// entry block, after any slots already there, so the whole group
    /// stays promotable.
    pub fn entry_alloca(&self, module: &mut Module, name: &str) -> ValueId {
        let func = self.expect_func();
        let function = module.func_mut(func);
        let value = ValueId(function.insts.len() as u32);
        function.insts.push(Inst {
            kind: InstKind::Alloca,
            name: name.to_string(),
            location: self.location,
        });

        let at = function.blocks[0]
            .insts
            .iter()
            .take_while(|v| matches!(function.insts[v.0 as usize].kind, InstKind::Alloca))
            .count();
        function.blocks[0].insts.insert(at, value);
        value
    }

    pub fn br(&self, module: &mut Module, target: BlockId) {
        self.terminate(module, Terminator::Br(target));
    }

    pub fn cond_br(
        &self,
        module: &mut Module,
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    ) {
        self.terminate(
            module,
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            },
        );
    }

    pub fn ret(&self, module: &mut Module, value: ValueId) {
        self.terminate(module, Terminator::Ret(value));
    }

    fn push(&self, module: &mut Module, kind: InstKind, name: &str) -> ValueId {
        let func = self.expect_func();
        let block = self.expect_block();
        let function = module.func_mut(func);
        let value = ValueId(function.insts.len() as u32);
        function.insts.push(Inst {
            kind,
            name: name.to_string(),
            location: self.location,
        });
        function.block_mut(block).insts.push(value);
        value
    }

    fn terminate(&self, module: &mut Module, terminator: Terminator) {
        let func = self.expect_func();
        let block = self.expect_block();
        module.func_mut(func).block_mut(block).terminator = Some(terminator);
    }

    fn expect_func(&self) -> FuncId {
        match self.func {
            Some(func) => func,
            None => unreachable!("builder is not positioned inside a function"),
        }
    }

    fn expect_block(&self) -> BlockId {
        match self.block {
            Some(block) => block,
            None => unreachable!("builder is not positioned inside a block"),
        }
    }
}

/// Blocks need distinct names for a readable listing; LLVM-style
/// numeric suffixes disambiguate repeats.
fn unique_block_name(function: &Function, base: &str) -> String {
    let taken = |candidate: &str| function.blocks.iter().any(|b| b.name == candidate);
    if !taken(base) {
        return base.to_string();
    }
    let mut i = 1;
    loop {
        let candidate = format!("{base}{i}");
        if !taken(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn build_simple_function() -> (Module, FuncId) {
        let mut module = Module::new("test");
        let func = module.add_function(Function::declaration("double", vec!["x".into()]));
        let mut builder = Builder::new();

        let entry = builder.create_block(&mut module, func, "entry");
        builder.position_at_end(func, entry);
        let x = module.func(func).param(0);
        let two = builder.const_f64(&mut module, 2.0);
        let product = builder.fmul(&mut module, x, two, "multmp");
        builder.ret(&mut module, product);

        (module, func)
    }

    #[test]
    fn declaration_vs_definition() {
        let module = {
            let mut m = Module::new("m");
            m.add_function(Function::declaration("sin", vec!["x".into()]));
            m
        };
        let (_, sin) = module.get_function("sin").unwrap();
        assert!(sin.is_declaration());
        assert_eq!(sin.arity(), 1);

        let (module, func) = build_simple_function();
        assert!(!module.func(func).is_declaration());
    }

    #[test]
    fn instructions_land_in_current_block() {
        let (module, func) = build_simple_function();
        let function = module.func(func);
        let entry = function.block(BlockId(0));
        assert_eq!(entry.name, "entry");
        // Param occupies arena slot 0; const and fmul follow.
        assert_eq!(entry.insts, vec![ValueId(1), ValueId(2)]);
        assert_eq!(entry.terminator, Some(Terminator::Ret(ValueId(2))));
    }

    #[test]
    fn entry_alloca_groups_at_block_top() {
        let mut module = Module::new("m");
        let func = module.add_function(Function::declaration("f", vec![]));
        let mut builder = Builder::new();
        let entry = builder.create_block(&mut module, func, "entry");
        builder.position_at_end(func, entry);

        let one = builder.const_f64(&mut module, 1.0);
        let slot_a = builder.entry_alloca(&mut module, "a");
        builder.store(&mut module, slot_a, one);
        let slot_b = builder.entry_alloca(&mut module, "b");

        let insts = &module.func(func).block(BlockId(0)).insts;
        assert_eq!(insts[0], slot_a);
        assert_eq!(insts[1], slot_b);
        // The non-alloca instructions keep their relative order below.
        assert_eq!(
            module.func(func).inst(insts[2]).kind,
            InstKind::ConstF64(1.0)
        );
    }

    #[test]
    fn block_names_are_unique() {
        let mut module = Module::new("m");
        let func = module.add_function(Function::declaration("f", vec![]));
        let builder = Builder::new();
        builder.create_block(&mut module, func, "entry");
        builder.create_block(&mut module, func, "then");
        builder.create_block(&mut module, func, "then");
        let names: Vec<_> = module
            .func(func)
            .blocks
            .iter()
            .map(|b| b.name.clone())
            .collect();
        assert_eq!(names, vec!["entry", "then", "then1"]);
    }

    #[test]
    fn predecessors_follow_terminators() {
        let mut module = Module::new("m");
        let func = module.add_function(Function::declaration("f", vec![]));
        let mut builder = Builder::new();
        let entry = builder.create_block(&mut module, func, "entry");
        let then_block = builder.create_block(&mut module, func, "then");
        let else_block = builder.create_block(&mut module, func, "else");
        let merge = builder.create_block(&mut module, func, "ifcont");

        builder.position_at_end(func, entry);
        let cond = builder.const_f64(&mut module, 1.0);
        let cond = builder.fcmp_one(&mut module, cond, cond, "ifcond");
        builder.cond_br(&mut module, cond, then_block, else_block);
        builder.position_at_end(func, then_block);
        builder.br(&mut module, merge);
        builder.position_at_end(func, else_block);
        builder.br(&mut module, merge);

        assert_eq!(
            module.func(func).predecessors(merge),
            vec![then_block, else_block]
        );
        assert_eq!(module.func(func).predecessors(entry), vec![]);
    }

    #[test]
    fn locations_stamp_instructions() {
        let mut module = Module::new("m");
        let func = module.add_function(Function::declaration("f", vec![]));
        let mut builder = Builder::new();
        let entry = builder.create_block(&mut module, func, "entry");
        builder.position_at_end(func, entry);

        let unlocated = builder.const_f64(&mut module, 0.0);
        let loc = crate::token::SourceLocation { line: 3, column: 9 };
        builder.set_location(loc);
        let located = builder.const_f64(&mut module, 1.0);

        let function = module.func(func);
        assert_eq!(function.inst(unlocated).location, None);
        assert_eq!(function.inst(located).location, Some(loc));
    }
}

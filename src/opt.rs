//! The pass pipeline run over a module before emission. Purely a
//! side-effect on the IR: constant folding, branch folding,
//! unreachable-block elimination, phi simplification and dead-code
//! elimination, in that order, per function.

use crate::ir::{BlockId, Function, InstKind, Module, Terminator, ValueId};

pub fn optimize_module(module: &mut Module) {
    for function in &mut module.functions {
        if function.is_declaration() {
            continue;
        }
        fold_constants(function);
        fold_branches(function);
        remove_unreachable_blocks(function);
        simplify_phis(function);
        eliminate_dead_code(function);
    }
}

fn const_value(function: &Function, value: ValueId) -> Option<f64> {
    match function.inst(value).kind {
        InstKind::ConstF64(v) => Some(v),
        _ => None,
    }
}

/// Rewrites arithmetic over constant operands into constants. Operands
/// always precede their uses in the arena, so one forward pass
/// converges.
fn fold_constants(function: &mut Function) {
    for i in 0..function.insts.len() {
        let folded = match function.insts[i].kind {
            InstKind::FAdd { lhs, rhs } => binary_consts(function, lhs, rhs).map(|(a, b)| a + b),
            InstKind::FSub { lhs, rhs } => binary_consts(function, lhs, rhs).map(|(a, b)| a - b),
            InstKind::FMul { lhs, rhs } => binary_consts(function, lhs, rhs).map(|(a, b)| a * b),
            InstKind::FDiv { lhs, rhs } => binary_consts(function, lhs, rhs).map(|(a, b)| a / b),
            _ => None,
        };
        if let Some(value) = folded {
            function.insts[i].kind = InstKind::ConstF64(value);
        }
    }
}

fn binary_consts(function: &Function, lhs: ValueId, rhs: ValueId) -> Option<(f64, f64)> {
    Some((const_value(function, lhs)?, const_value(function, rhs)?))
}

/// Turns conditional branches on constant comparisons into plain
/// branches.
fn fold_branches(function: &mut Function) {
    for b in 0..function.blocks.len() {
        let Some(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        }) = function.blocks[b].terminator
        else {
            continue;
        };

        let decided = match function.inst(cond).kind {
            InstKind::FCmpOne { lhs, rhs } => {
                binary_consts(function, lhs, rhs).map(|(a, b)| a != b)
            }
            InstKind::FCmpUlt { lhs, rhs } => binary_consts(function, lhs, rhs)
                .map(|(a, b)| a < b || a.is_nan() || b.is_nan()),
            _ => None,
        };

        if let Some(taken) = decided {
            let target = if taken { then_block } else { else_block };
            function.blocks[b].terminator = Some(Terminator::Br(target));
        }
    }
}

/// Drops blocks no path from the entry reaches, rewriting block ids
/// and trimming phi edges that arrived from dropped predecessors.
fn remove_unreachable_blocks(function: &mut Function) {
    let mut reachable = vec![false; function.blocks.len()];
    let mut worklist = vec![BlockId(0)];
    while let Some(block) = worklist.pop() {
        if std::mem::replace(&mut reachable[block.0 as usize], true) {
            continue;
        }
        match function.blocks[block.0 as usize].terminator {
            Some(Terminator::Br(t)) => worklist.push(t),
            Some(Terminator::CondBr {
                then_block,
                else_block,
                ..
            }) => {
                worklist.push(then_block);
                worklist.push(else_block);
            }
            _ => {}
        }
    }

    if reachable.iter().all(|r| *r) {
        return;
    }

    // Old index -> new index.
    let mut remap = vec![None; function.blocks.len()];
    let mut next = 0u32;
    for (i, live) in reachable.iter().enumerate() {
        if *live {
            remap[i] = Some(BlockId(next));
            next += 1;
        }
    }
    let remapped = |block: BlockId| match remap[block.0 as usize] {
        Some(new) => new,
        None => unreachable!("terminator of a live block targets a dead block"),
    };

    let mut keep = reachable.iter();
    function.blocks.retain(|_| *keep.next().unwrap_or(&false));

    for block in &mut function.blocks {
        block.terminator = match block.terminator {
            Some(Terminator::Br(t)) => Some(Terminator::Br(remapped(t))),
            Some(Terminator::CondBr {
                cond,
                then_block,
                else_block,
            }) => Some(Terminator::CondBr {
                cond,
                then_block: remapped(then_block),
                else_block: remapped(else_block),
            }),
            other => other,
        };
    }
    for inst in &mut function.insts {
        if let InstKind::Phi { incoming } = &mut inst.kind {
            incoming.retain(|(_, from)| remap[from.0 as usize].is_some());
            for (_, from) in incoming.iter_mut() {
                *from = remapped(*from);
            }
        }
    }
}

/// A phi left with a single incoming edge is the incoming value;
/// forward it to every use and unschedule the phi.
fn simplify_phis(function: &mut Function) {
    let mut forwarded: Vec<Option<ValueId>> = vec![None; function.insts.len()];
    for (i, inst) in function.insts.iter().enumerate() {
        if let InstKind::Phi { incoming } = &inst.kind {
            if let [(value, _)] = incoming.as_slice() {
                forwarded[i] = Some(*value);
            }
        }
    }
    if forwarded.iter().all(|f| f.is_none()) {
        return;
    }

    // Chains of forwarded phis resolve to their final value.
    let resolve = |mut value: ValueId| {
        while let Some(next) = forwarded[value.0 as usize] {
            value = next;
        }
        value
    };

    for inst in &mut function.insts {
        rewrite_operands(&mut inst.kind, &resolve);
    }
    for block in &mut function.blocks {
        block.terminator = match block.terminator {
            Some(Terminator::Ret(v)) => Some(Terminator::Ret(resolve(v))),
            Some(Terminator::CondBr {
                cond,
                then_block,
                else_block,
            }) => Some(Terminator::CondBr {
                cond: resolve(cond),
                then_block,
                else_block,
            }),
            other => other,
        };
        block
            .insts
            .retain(|v| forwarded[v.0 as usize].is_none());
    }
}

fn rewrite_operands(kind: &mut InstKind, resolve: impl Fn(ValueId) -> ValueId) {
    match kind {
        InstKind::Param(_) | InstKind::ConstF64(_) | InstKind::Alloca => {}
        InstKind::Load { slot } => *slot = resolve(*slot),
        InstKind::Store { slot, value } => {
            *slot = resolve(*slot);
            *value = resolve(*value);
        }
        InstKind::FAdd { lhs, rhs }
        | InstKind::FSub { lhs, rhs }
        | InstKind::FMul { lhs, rhs }
        | InstKind::FDiv { lhs, rhs }
        | InstKind::FCmpUlt { lhs, rhs }
        | InstKind::FCmpOne { lhs, rhs } => {
            *lhs = resolve(*lhs);
            *rhs = resolve(*rhs);
        }
        InstKind::UiToFp { value } => *value = resolve(*value),
        InstKind::Call { args, .. } => {
            for arg in args {
                *arg = resolve(*arg);
            }
        }
        InstKind::Phi { incoming } => {
            for (value, _) in incoming {
                *value = resolve(*value);
            }
        }
    }
}

/// Unschedules pure instructions nothing uses. Stores and calls are
/// side effects and always stay.
fn eliminate_dead_code(function: &mut Function) {
    let mut live = vec![false; function.insts.len()];
    let mut worklist: Vec<ValueId> = Vec::new();

    for block in &function.blocks {
        for &value in &block.insts {
            if matches!(
                function.inst(value).kind,
                InstKind::Store { .. } | InstKind::Call { .. }
            ) {
                worklist.push(value);
            }
        }
        match block.terminator {
            Some(Terminator::Ret(v)) => worklist.push(v),
            Some(Terminator::CondBr { cond, .. }) => worklist.push(cond),
            _ => {}
        }
    }

    while let Some(value) = worklist.pop() {
        if std::mem::replace(&mut live[value.0 as usize], true) {
            continue;
        }
        worklist.extend(function.inst(value).kind.operands());
    }

    for block in &mut function.blocks {
        block.insts.retain(|v| live[v.0 as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CodeGenerator;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn lower_module(src: &str) -> Module {
        let mut parser = Parser::new(Lexer::new(src.as_bytes()));
        parser.get_next_token();
        let mut codegen = CodeGenerator::new("");
        while !parser.current_token().is_eof() {
            let func = parser.parse_definition().expect("parse failed");
            codegen
                .function(&func, parser.operators_mut())
                .expect("codegen failed");
        }
        codegen.steal_module("")
    }

    #[test]
    fn constant_arithmetic_folds_to_ret_of_const() {
        let mut module = lower_module("def f() 2 + 3 * 4");
        optimize_module(&mut module);

        let (_, f) = module.get_function("f").unwrap();
        assert_eq!(f.blocks.len(), 1);
        let entry = &f.blocks[0];
        let Some(Terminator::Ret(ret)) = entry.terminator else {
            panic!("expected ret");
        };
        assert_eq!(f.inst(ret).kind, InstKind::ConstF64(14.0));
        // Everything but the returned constant is dead.
        assert_eq!(entry.insts.len(), 1);
    }

    #[test]
    fn constant_condition_collapses_branches() {
        let mut module = lower_module("def f() if 1 then 2 else 3");
        optimize_module(&mut module);

        let (_, f) = module.get_function("f").unwrap();
        // entry, then and ifcont survive; the else block is gone.
        assert!(f.blocks.iter().all(|b| b.name != "else"));
        let ret_block = f.blocks.last().unwrap();
        let Some(Terminator::Ret(ret)) = ret_block.terminator else {
            panic!("expected ret");
        };
        assert_eq!(f.inst(ret).kind, InstKind::ConstF64(2.0));
    }

    #[test]
    fn calls_survive_dce() {
        let mut module =
            lower_module("def g(x) x def f() var a = g(1) in 7");
        optimize_module(&mut module);

        let (_, f) = module.get_function("f").unwrap();
        let calls = f
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter(|v| matches!(f.inst(**v).kind, InstKind::Call { .. }))
            .count();
        assert_eq!(calls, 1);
    }

    #[test]
    fn optimization_is_idempotent() {
        let mut module = lower_module("def f(x) if x then 1 + 2 else 3 * 4");
        optimize_module(&mut module);
        let once = module.clone();
        optimize_module(&mut module);
        assert_eq!(module, once);
    }
}

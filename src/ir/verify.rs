//! Structural checks run on every function after lowering.

use thiserror::Error;

use crate::ir::{Function, InstKind, Terminator, ValueId};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("block '{block}' has no terminator")]
    MissingTerminator { block: String },
    #[error("instruction %{value} references out-of-range operand %{operand}")]
    BadOperand { value: u32, operand: u32 },
    #[error("instruction %{value} is scheduled in more than one block")]
    DoublyScheduled { value: u32 },
    #[error("memory access %{value} does not target an alloca slot")]
    NotASlot { value: u32 },
    #[error("phi %{value} has an incoming edge from non-predecessor '{block}'")]
    PhiFromNonPredecessor { value: u32, block: String },
    #[error("phi %{value} has duplicate incoming edges from '{block}'")]
    PhiDuplicateEdge { value: u32, block: String },
    #[error("conditional branch in '{block}' on non-boolean %{value}")]
    CondNotBoolean { value: u32, block: String },
}

/// Verifies one function. Declarations are trivially valid.
pub fn verify_function(function: &Function) -> Result<(), VerifyError> {
    if function.is_declaration() {
        return Ok(());
    }

    let mut scheduled = vec![false; function.insts.len()];
    for block in &function.blocks {
        match block.terminator {
            None => {
                return Err(VerifyError::MissingTerminator {
                    block: block.name.clone(),
                });
            }
            Some(Terminator::CondBr { cond, .. })
                if !function.inst(cond).kind.is_boolean() =>
            {
                return Err(VerifyError::CondNotBoolean {
                    value: cond.0,
                    block: block.name.clone(),
                });
            }
            Some(_) => {}
        }
        for &value in &block.insts {
            if scheduled[value.0 as usize] {
                return Err(VerifyError::DoublyScheduled { value: value.0 });
            }
            scheduled[value.0 as usize] = true;
        }
    }

    for (i, inst) in function.insts.iter().enumerate() {
        let value = ValueId(i as u32);
        for operand in inst.kind.operands() {
            if operand.0 as usize >= function.insts.len() {
                return Err(VerifyError::BadOperand {
                    value: value.0,
                    operand: operand.0,
                });
            }
        }

        match &inst.kind {
            InstKind::Load { slot } | InstKind::Store { slot, .. } => {
                if !matches!(function.inst(*slot).kind, InstKind::Alloca) {
                    return Err(VerifyError::NotASlot { value: slot.0 });
                }
            }
            InstKind::Phi { incoming } => {
                let home = function
                    .blocks
                    .iter()
                    .enumerate()
                    .find(|(_, b)| b.insts.contains(&value));
                let Some((home, _)) = home else { continue };
                let preds = function.predecessors(crate::ir::BlockId(home as u32));
                let mut seen = Vec::new();
                for (_, from) in incoming {
                    if !preds.contains(from) {
                        return Err(VerifyError::PhiFromNonPredecessor {
                            value: value.0,
                            block: function.block(*from).name.clone(),
                        });
                    }
                    if seen.contains(from) {
                        return Err(VerifyError::PhiDuplicateEdge {
                            value: value.0,
                            block: function.block(*from).name.clone(),
                        });
                    }
                    seen.push(*from);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Function, Module};

    #[test]
    fn accepts_well_formed_function() {
        let mut module = Module::new("m");
        let func = module.add_function(Function::declaration("f", vec!["x".into()]));
        let mut builder = Builder::new();
        let entry = builder.create_block(&mut module, func, "entry");
        builder.position_at_end(func, entry);
        let x = module.func(func).param(0);
        let one = builder.const_f64(&mut module, 1.0);
        let sum = builder.fadd(&mut module, x, one, "addtmp");
        builder.ret(&mut module, sum);

        assert_eq!(verify_function(module.func(func)), Ok(()));
    }

    #[test]
    fn rejects_unterminated_block() {
        let mut module = Module::new("m");
        let func = module.add_function(Function::declaration("f", vec![]));
        let mut builder = Builder::new();
        let entry = builder.create_block(&mut module, func, "entry");
        builder.position_at_end(func, entry);
        builder.const_f64(&mut module, 1.0);

        assert_eq!(
            verify_function(module.func(func)),
            Err(VerifyError::MissingTerminator {
                block: "entry".into()
            })
        );
    }

    #[test]
    fn rejects_store_to_non_slot() {
        let mut module = Module::new("m");
        let func = module.add_function(Function::declaration("f", vec![]));
        let mut builder = Builder::new();
        let entry = builder.create_block(&mut module, func, "entry");
        builder.position_at_end(func, entry);
        let one = builder.const_f64(&mut module, 1.0);
        builder.store(&mut module, one, one);
        builder.ret(&mut module, one);

        assert_eq!(
            verify_function(module.func(func)),
            Err(VerifyError::NotASlot { value: one.0 })
        );
    }
}

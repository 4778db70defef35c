//! Textual listing of a module, LLVM-flavored. This is what `--emit
//! asm` writes and what the optimizer demo dumps before and after its
//! pipeline.

use std::fmt;

use crate::ir::{Block, Function, InstKind, Module, Terminator, ValueId};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        if !self.data_layout.is_empty() {
            writeln!(f, "; DataLayout = '{}'", self.data_layout)?;
        }
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("f64 %{p}{i}"))
            .collect::<Vec<_>>()
            .join(", ");

        if self.is_declaration() {
            return writeln!(f, "declare f64 @{}({params})", self.name);
        }

        writeln!(f, "define f64 @{}({params}) {{", self.name)?;
        for block in &self.blocks {
            self.fmt_block(f, block)?;
        }
        writeln!(f, "}}")
    }
}

impl Function {
    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, block: &Block) -> fmt::Result {
        writeln!(f, "{}:", block.name)?;
        for &value in &block.insts {
            self.fmt_inst(f, value)?;
        }
        match block.terminator {
            Some(Terminator::Br(target)) => {
                writeln!(f, "  br label %{}", self.block(target).name)?;
            }
            Some(Terminator::CondBr {
                cond,
                then_block,
                else_block,
            }) => {
                writeln!(
                    f,
                    "  br {}, label %{}, label %{}",
                    self.value_name(cond),
                    self.block(then_block).name,
                    self.block(else_block).name
                )?;
            }
            Some(Terminator::Ret(value)) => {
                writeln!(f, "  ret {}", self.value_name(value))?;
            }
            None => writeln!(f, "  <unterminated>")?,
        }
        Ok(())
    }

    fn fmt_inst(&self, f: &mut fmt::Formatter<'_>, value: ValueId) -> fmt::Result {
        let lhs = self.value_name(value);
        let loc = match self.inst(value).location {
            Some(loc) => format!("  ; {loc:?}"),
            None => String::new(),
        };
        match &self.inst(value).kind {
            InstKind::Param(_) => Ok(()),
            InstKind::ConstF64(v) => writeln!(f, "  {lhs} = const {v}{loc}"),
            InstKind::Alloca => writeln!(f, "  {lhs} = alloca f64{loc}"),
            InstKind::Load { slot } => {
                writeln!(f, "  {lhs} = load {}{loc}", self.value_name(*slot))
            }
            InstKind::Store { slot, value } => writeln!(
                f,
                "  store {}, {}{loc}",
                self.value_name(*value),
                self.value_name(*slot)
            ),
            InstKind::FAdd { lhs: a, rhs: b } => self.fmt_binary(f, &lhs, "fadd", *a, *b, &loc),
            InstKind::FSub { lhs: a, rhs: b } => self.fmt_binary(f, &lhs, "fsub", *a, *b, &loc),
            InstKind::FMul { lhs: a, rhs: b } => self.fmt_binary(f, &lhs, "fmul", *a, *b, &loc),
            InstKind::FDiv { lhs: a, rhs: b } => self.fmt_binary(f, &lhs, "fdiv", *a, *b, &loc),
            InstKind::FCmpUlt { lhs: a, rhs: b } => {
                self.fmt_binary(f, &lhs, "fcmp ult", *a, *b, &loc)
            }
            InstKind::FCmpOne { lhs: a, rhs: b } => {
                self.fmt_binary(f, &lhs, "fcmp one", *a, *b, &loc)
            }
            InstKind::UiToFp { value } => {
                writeln!(f, "  {lhs} = uitofp {}{loc}", self.value_name(*value))
            }
            InstKind::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|a| self.value_name(*a))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "  {lhs} = call @{callee}({args}){loc}")
            }
            InstKind::Phi { incoming } => {
                let incoming = incoming
                    .iter()
                    .map(|(v, b)| format!("[{}, %{}]", self.value_name(*v), self.block(*b).name))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "  {lhs} = phi {incoming}{loc}")
            }
        }
    }

    fn fmt_binary(
        &self,
        f: &mut fmt::Formatter<'_>,
        lhs: &str,
        mnemonic: &str,
        a: ValueId,
        b: ValueId,
        loc: &str,
    ) -> fmt::Result {
        writeln!(
            f,
            "  {lhs} = {mnemonic} {}, {}{loc}",
            self.value_name(a),
            self.value_name(b)
        )
    }

    /// `%<hint><id>` when the instruction carries a name hint, plain
    /// `%<id>` otherwise. The id suffix keeps names unique.
    fn value_name(&self, value: ValueId) -> String {
        let inst = self.inst(value);
        if inst.name.is_empty() {
            format!("%{}", value.0)
        } else {
            format!("%{}{}", inst.name, value.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{Builder, Function, Module};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn listing_shape() {
        let mut module = Module::new("demo");
        module.add_function(Function::declaration("sin", vec!["x".into()]));

        let func = module.add_function(Function::declaration("double", vec!["x".into()]));
        let mut builder = Builder::new();
        let entry = builder.create_block(&mut module, func, "entry");
        builder.position_at_end(func, entry);
        let x = module.func(func).param(0);
        let two = builder.const_f64(&mut module, 2.0);
        let product = builder.fmul(&mut module, x, two, "multmp");
        builder.ret(&mut module, product);

        assert_eq!(
            module.to_string(),
            indoc! {"
                ; ModuleID = 'demo'

                declare f64 @sin(f64 %x0)

                define f64 @double(f64 %x0) {
                entry:
                  %1 = const 2
                  %multmp2 = fmul %x0, %1
                  ret %multmp2
                }
            "}
        );
    }
}

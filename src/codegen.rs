use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    ast::{self, Expr, ExprKind, Prototype},
    debug::DebugInfo,
    ir::{self, verify::VerifyError, Builder, FuncId, ValueId},
    parser::OperatorTable,
    symbols::SymbolTable,
};

type Result<T, E = CodeGenerationError> = std::result::Result<T, E>;

/// Errors produced while lowering an AST to IR. As with parse errors,
/// the rendered text is the contract.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CodeGenerationError {
    #[error("Code generation error: Unknown variable {0}")]
    UnknownVariable(String),
    #[error("Code generation error: Unknown unary operator {0}")]
    UnknownUnaryOperator(String),
    #[error("Code generation error: binary operator {0} not found!")]
    BinaryOperatorNotFound(String),
    #[error("Code generation error: Unknown function referenced: {0}")]
    UnknownFunction(String),
    #[error("Code generation error: Incorrect # arguments passed")]
    IncorrectArguments,
    #[error("Code generation error: destination of '=' must be a variable")]
    AssignmentDestination,
    #[error("Code generation error: redefined variable '{0}' in var block")]
    RedefinedVariable(String),
    #[error("Code generation error: Could not create function {0}")]
    CouldNotCreateFunction(String),
    #[error("Code generation error: invalid function {name}: {source}")]
    InvalidFunction {
        name: String,
        source: VerifyError,
    },
}

/// Lowers the AST to SSA IR, one module at a time.
///
/// Owns the active module, the instruction builder, the prototype
/// table used to re-declare symbols into rotated modules, the scope
/// stack and the debug metadata; it is the single writer of all of
/// them. The parser's operator table is only ever touched through the
/// `&mut OperatorTable` handed into [`CodeGenerator::function`], and
/// any registration is rolled back if the definition fails to lower.
pub struct CodeGenerator {
    module: ir::Module,
    builder: Builder,
    function_protos: FxHashMap<String, Prototype>,
    symbols: SymbolTable,
    debug: DebugInfo,
    data_layout: String,
}

impl CodeGenerator {
    pub fn new(data_layout: impl Into<String>) -> CodeGenerator {
        let data_layout = data_layout.into();
        let mut module = ir::Module::new("");
        module.data_layout = data_layout.clone();
        CodeGenerator {
            module,
            builder: Builder::new(),
            function_protos: FxHashMap::default(),
            symbols: SymbolTable::new(),
            debug: DebugInfo::new(""),
            data_layout,
        }
    }

    pub fn module(&self) -> &ir::Module {
        &self.module
    }

    pub fn debug_info(&self) -> &DebugInfo {
        &self.debug
    }

    pub fn function_protos(&self) -> &FxHashMap<String, Prototype> {
        &self.function_protos
    }

    /// Scope-stack depth; 1 means only the global scope is active.
    pub fn scope_depth(&self) -> usize {
        self.symbols.depth()
    }

    /// Hands the active module to the caller and installs a fresh one
    /// named `next_name`. Prototypes, global symbols and the caller's
    /// operator table all survive rotation; pending debug metadata is
    /// finalized first.
    pub fn steal_module(&mut self, next_name: impl Into<String>) -> ir::Module {
        self.debug.finalize();
        let next_name = next_name.into();
        let mut fresh = ir::Module::new(next_name.clone());
        fresh.data_layout = self.data_layout.clone();
        self.debug = DebugInfo::new(&next_name);
        self.builder = Builder::new();
        std::mem::replace(&mut self.module, fresh)
    }

    /// Records `proto` for later re-materialization. Re-registering a
    /// name overwrites the previous prototype.
    pub fn register_extern(&mut self, proto: Prototype) {
        self.function_protos.insert(proto.name.clone(), proto);
    }

    /// Declares `proto` in the active module.
    pub fn prototype(&mut self, proto: &Prototype) -> FuncId {
        let mut function = ir::Function::declaration(proto.name.clone(), proto.args.clone());
        function.line = Some(proto.location.line);
        self.module.add_function(function)
    }

    /// Resolves `name` to a function in the active module, lowering the
    /// recorded prototype on demand; `err` shapes the failure when the
    /// name is unknown on both paths.
    pub fn get_function(
        &mut self,
        name: &str,
        err: fn(String) -> CodeGenerationError,
    ) -> Result<FuncId> {
        if let Some((id, _)) = self.module.get_function(name) {
            return Ok(id);
        }
        if let Some(proto) = self.function_protos.get(name) {
            let proto = proto.clone();
            return Ok(self.prototype(&proto));
        }
        Err(err(name.to_string()))
    }

    /// Lowers a function definition.
    ///
    /// On failure every side effect is compensated: the partial
    /// function is erased from the module, an operator registration is
    /// reverted (reinstating a displaced binding), and the scope and
    /// debug stacks are restored by their scoped helpers.
    pub fn function(
        &mut self,
        func_ast: &ast::Function,
        operators: &mut OperatorTable,
    ) -> Result<FuncId> {
        let proto = &func_ast.proto;
        self.register_extern(proto.clone());
        let displaced = operators.register_operator(proto);

        match self.lower_function_body(func_ast) {
            Ok(id) => Ok(id),
            Err(e) => {
                operators.remove_operator(proto, displaced);
                self.module.remove_function(&proto.name);
                Err(e)
            }
        }
    }

    fn lower_function_body(&mut self, func_ast: &ast::Function) -> Result<FuncId> {
        let proto = &func_ast.proto;
        let func_id = self.get_function(&proto.name, CodeGenerationError::CouldNotCreateFunction)?;

        // A stale declaration (different arity) or an earlier in-module
        // definition is replaced wholesale before the rebuild.
        let existing = self.module.func(func_id);
        if !existing.is_declaration() || existing.params != proto.args {
            let mut decl = ir::Function::declaration(proto.name.clone(), proto.args.clone());
            decl.line = Some(proto.location.line);
            *self.module.func_mut(func_id) = decl;
        }

        self.debug.enter_function(&mut self.builder, proto);
        let entry = self.builder.create_block(&mut self.module, func_id, "entry");
        self.builder.position_at_end(func_id, entry);

        let result = self.scoped(|this| {
            // Prologue: one slot per argument, mem2reg-shaped.
            for (index, arg_name) in proto.args.iter().enumerate() {
                let slot = this.builder.entry_alloca(&mut this.module, arg_name);
                let param = this.module.func(func_id).param(index);
                this.builder.store(&mut this.module, slot, param);
                this.symbols.try_declare(arg_name, slot);
                this.debug
                    .declare_parameter(slot, arg_name, (index + 1) as u32, proto.location);
            }

            let body = this.expr(&func_ast.body)?;
            this.builder.ret(&mut this.module, body);
            Ok(())
        });
        self.debug.exit_scope();
        result?;

        ir::verify::verify_function(self.module.func(func_id)).map_err(|source| {
            CodeGenerationError::InvalidFunction {
                name: proto.name.clone(),
                source,
            }
        })?;

        Ok(func_id)
    }

    /// Lowers one expression to the value it produces.
    pub fn expr(&mut self, expr: &Expr) -> Result<ValueId> {
        self.debug.emit_location(&mut self.builder, expr.location);

        match &expr.kind {
            ExprKind::Number(value) => Ok(self.builder.const_f64(&mut self.module, *value)),
            ExprKind::Variable(name) => self.variable(name),
            ExprKind::Unary { op, operand } => self.unary(*op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            ExprKind::Call { callee, args } => self.call(callee, args),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.conditional(cond, then_branch, else_branch),
            ExprKind::For {
                var_name,
                start,
                end,
                step,
                body,
            } => self.for_loop(var_name, start, end, step.as_deref(), body),
            ExprKind::Var { declarations, body } => self.var_block(declarations, body),
        }
    }

    fn variable(&mut self, name: &str) -> Result<ValueId> {
        let slot = self
            .symbols
            .try_lookup(name)
            .ok_or_else(|| CodeGenerationError::UnknownVariable(name.to_string()))?;
        Ok(self.builder.load(&mut self.module, slot, name))
    }

    fn unary(&mut self, op: u8, operand: &Expr) -> Result<ValueId> {
        let operand = self.expr(operand)?;
        let callee = format!("unary{}", op as char);
        self.get_function(&callee, CodeGenerationError::UnknownUnaryOperator)?;
        Ok(self
            .builder
            .call(&mut self.module, callee, vec![operand], "unop"))
    }

    fn binary(&mut self, op: u8, lhs: &Expr, rhs: &Expr) -> Result<ValueId> {
        // Assignment does not evaluate its destination.
        if op == b'=' {
            let ExprKind::Variable(name) = &lhs.kind else {
                return Err(CodeGenerationError::AssignmentDestination);
            };
            let value = self.expr(rhs)?;
            let slot = self
                .symbols
                .try_lookup(name)
                .ok_or_else(|| CodeGenerationError::UnknownVariable(name.clone()))?;
            self.builder.store(&mut self.module, slot, value);
            return Ok(value);
        }

        let l = self.expr(lhs)?;
        let r = self.expr(rhs)?;

        match op {
            b'+' => Ok(self.builder.fadd(&mut self.module, l, r, "addtmp")),
            b'-' => Ok(self.builder.fsub(&mut self.module, l, r, "subtmp")),
            b'*' => Ok(self.builder.fmul(&mut self.module, l, r, "multmp")),
            b'/' => Ok(self.builder.fdiv(&mut self.module, l, r, "divtmp")),
            b'<' => {
                let cmp = self.builder.fcmp_ult(&mut self.module, l, r, "cmptmp");
                Ok(self.builder.ui_to_fp(&mut self.module, cmp, "booltmp"))
            }
            _ => {
                let callee = format!("binary{}", op as char);
                self.get_function(&callee, CodeGenerationError::BinaryOperatorNotFound)?;
                Ok(self
                    .builder
                    .call(&mut self.module, callee, vec![l, r], "binop"))
            }
        }
    }

    fn call(&mut self, callee: &str, args: &[Expr]) -> Result<ValueId> {
        let func = self.get_function(callee, CodeGenerationError::UnknownFunction)?;
        if self.module.func(func).arity() != args.len() {
            return Err(CodeGenerationError::IncorrectArguments);
        }

        // Arguments evaluate strictly left to right.
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.expr(arg)?);
        }
        Ok(self
            .builder
            .call(&mut self.module, callee, values, "calltmp"))
    }

    fn conditional(&mut self, cond: &Expr, then_branch: &Expr, else_branch: &Expr) -> Result<ValueId> {
        let func = self.current_function();

        let cond = self.expr(cond)?;
        let zero = self.builder.const_f64(&mut self.module, 0.0);
        let cond = self.builder.fcmp_one(&mut self.module, cond, zero, "ifcond");

        let then_block = self.builder.create_block(&mut self.module, func, "then");
        let else_block = self.builder.create_block(&mut self.module, func, "else");
        let merge_block = self.builder.create_block(&mut self.module, func, "ifcont");
        self.builder
            .cond_br(&mut self.module, cond, then_block, else_block);

        self.builder.position_at_end(func, then_block);
        let then_value = self.expr(then_branch)?;
        self.builder.br(&mut self.module, merge_block);
        // Lowering the branch may have moved the insertion point into a
        // block of its own; the phi edge must come from wherever the
        // branch actually ended.
        let then_end = self.builder.insert_block();

        self.builder.position_at_end(func, else_block);
        let else_value = self.expr(else_branch)?;
        self.builder.br(&mut self.module, merge_block);
        let else_end = self.builder.insert_block();

        self.builder.position_at_end(func, merge_block);
        Ok(self.builder.phi(
            &mut self.module,
            vec![(then_value, then_end), (else_value, else_end)],
            "iftmp",
        ))
    }

    fn for_loop(
        &mut self,
        var_name: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
    ) -> Result<ValueId> {
        let func = self.current_function();

        let slot = self.builder.entry_alloca(&mut self.module, var_name);
        let start_value = self.expr(start)?;
        self.builder.store(&mut self.module, slot, start_value);

        let loop_block = self.builder.create_block(&mut self.module, func, "loop");
        self.builder.br(&mut self.module, loop_block);
        self.builder.position_at_end(func, loop_block);

        let after_block = self.scoped(|this| {
            this.symbols.try_declare(var_name, slot);

            // The body value is discarded; the loop always runs it at
            // least once before the end condition is checked.
            this.expr(body)?;

            let step_value = match step {
                Some(step) => this.expr(step)?,
                None => this.builder.const_f64(&mut this.module, 1.0),
            };
            let current = this.builder.load(&mut this.module, slot, var_name);
            let next = this
                .builder
                .fadd(&mut this.module, current, step_value, "nextvar");
            this.builder.store(&mut this.module, slot, next);

            let end_value = this.expr(end)?;
            let zero = this.builder.const_f64(&mut this.module, 0.0);
            let end_cond = this
                .builder
                .fcmp_one(&mut this.module, end_value, zero, "loopcond");

            let after_block = this
                .builder
                .create_block(&mut this.module, func, "afterloop");
            this.builder
                .cond_br(&mut this.module, end_cond, loop_block, after_block);
            Ok(after_block)
        })?;

        self.builder.position_at_end(func, after_block);
        Ok(self.builder.const_f64(&mut self.module, 0.0))
    }

    fn var_block(&mut self, declarations: &[ast::VarDeclaration], body: &Expr) -> Result<ValueId> {
        self.scoped(|this| {
            for decl in declarations {
                // The initializer runs before the name becomes visible,
                // so `var a = a in ...` refers to an outer `a`.
                let init = this.expr(&decl.init)?;
                let slot = this.builder.entry_alloca(&mut this.module, &decl.name);
                this.builder.store(&mut this.module, slot, init);
                if !this.symbols.try_declare(&decl.name, slot) {
                    return Err(CodeGenerationError::RedefinedVariable(decl.name.clone()));
                }
            }
            this.expr(body)
        })
    }

    /// Runs `body` inside a fresh symbol scope, popping it on every
    /// exit path.
    fn scoped<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.symbols.push_scope();
        let result = body(self);
        self.symbols.pop_scope();
        result
    }

    fn current_function(&self) -> FuncId {
        match self.builder.current_function() {
            Some(func) => func,
            None => unreachable!("expression lowering runs inside a function"),
        }
    }
}

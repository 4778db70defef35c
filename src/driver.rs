use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::{
    codegen::{CodeGenerationError, CodeGenerator},
    ir,
    jit::{Jit, JitError},
    objcode::{ObjCodeError, ObjCodeWriter},
    opt::optimize_module,
    parser::{ParseError, Parser},
    token::{Keyword, Token},
};

/// Driver-level failures. Parse and code-generation errors never
/// surface here (the loop recovers from them in place); what escapes
/// is fatal to the session.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    CodeGen(#[from] CodeGenerationError),
    #[error(transparent)]
    Jit(#[from] JitError),
    #[error(transparent)]
    ObjCode(#[from] ObjCodeError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// What a session does with the IR it produces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Emit {
    /// Rotate a module per construct into the JIT and evaluate
    /// top-level expressions immediately.
    Jit,
    /// Accumulate one module for the object writer.
    Object,
    /// Accumulate one module for the textual listing.
    Assembly,
}

/// One compilation session: the top-level construct loop of the
/// original REPLs, shared by the binary and the end-to-end tests.
///
/// All diagnostics go to the `report` writer (standard error in the
/// binary, a buffer in tests); the interactive prompt does too.
pub struct Session {
    codegen: CodeGenerator,
    jit: Jit,
    emit: Emit,
    optimize: bool,
    verbose: bool,
    module_name: String,
}

impl Session {
    pub fn new(emit: Emit, optimize: bool, verbose: bool, module_name: impl Into<String>) -> Session {
        let jit = Jit::new();
        let data_layout = match emit {
            Emit::Jit => jit.data_layout().to_string(),
            Emit::Object | Emit::Assembly => ObjCodeWriter::host().data_layout(),
        };
        let module_name = module_name.into();
        let mut codegen = CodeGenerator::new(data_layout);
        codegen.steal_module(module_name.clone());
        Session {
            codegen,
            jit,
            emit,
            optimize,
            verbose,
            module_name,
        }
    }

    /// top ::= definition | external | expression | ';'
    ///
    /// Runs until end of input. A parse or code-generation error is
    /// printed, one token is discarded, and the loop resumes.
    pub fn run<R: BufRead>(
        &mut self,
        parser: &mut Parser<R>,
        report: &mut impl Write,
        interactive: bool,
    ) -> Result<()> {
        if interactive {
            write!(report, "ready> ")?;
            report.flush()?;
        }
        parser.get_next_token();

        loop {
            if interactive {
                write!(report, "ready> ")?;
                report.flush()?;
            }
            match parser.current_token().clone() {
                Token::Eof => return Ok(()),
                Token::Keyword(Keyword::Def) => self.handle_definition(parser, report)?,
                Token::Keyword(Keyword::Extern) => self.handle_extern(parser, report)?,
                // Top-level semicolons separate constructs.
                Token::Char(b';') => {
                    parser.get_next_token();
                }
                _ => self.handle_top_level_expression(parser, report)?,
            }
        }
    }

    /// Drains the session: the pending module, optimized when `-O` was
    /// given. In JIT mode with `-O` the listing is dumped before and
    /// after the pipeline, which is the optimizer demo.
    pub fn finish(&mut self, report: &mut impl Write) -> Result<ir::Module> {
        let mut module = self.codegen.steal_module(self.module_name.clone());
        if self.optimize {
            if self.emit == Emit::Jit {
                writeln!(report, "------\nBEFORE\n------")?;
                write!(report, "{module}")?;
                optimize_module(&mut module);
                writeln!(report, "-----\nAFTER\n-----")?;
                write!(report, "{module}")?;
            } else {
                optimize_module(&mut module);
            }
        }
        Ok(module)
    }

    fn handle_definition<R: BufRead>(
        &mut self,
        parser: &mut Parser<R>,
        report: &mut impl Write,
    ) -> Result<()> {
        let func = match parser.parse_definition() {
            Ok(func) => func,
            Err(e) => return self.recover(parser, report, &e),
        };
        match self.codegen.function(&func, parser.operators_mut()) {
            Ok(_) => {
                if self.verbose {
                    writeln!(report, "Parsed a function definition")?;
                }
                if self.emit == Emit::Jit {
                    let module = self.codegen.steal_module(self.module_name.clone());
                    self.jit.add_module(module);
                }
                Ok(())
            }
            Err(e) => self.recover(parser, report, &e),
        }
    }

    fn handle_extern<R: BufRead>(
        &mut self,
        parser: &mut Parser<R>,
        report: &mut impl Write,
    ) -> Result<()> {
        match parser.parse_extern() {
            Ok(proto) => {
                // Re-declaring an already-present name would shadow it
                // in the module listing; the prototype table alone
                // carries repeats.
                if self.codegen.module().get_function(&proto.name).is_none() {
                    self.codegen.prototype(&proto);
                }
                self.codegen.register_extern(proto);
                if self.verbose {
                    writeln!(report, "Parsed an extern")?;
                }
                Ok(())
            }
            Err(e) => self.recover(parser, report, &e),
        }
    }

    fn handle_top_level_expression<R: BufRead>(
        &mut self,
        parser: &mut Parser<R>,
        report: &mut impl Write,
    ) -> Result<()> {
        let func = match parser.parse_top_level_expr() {
            Ok(func) => func,
            Err(e) => return self.recover(parser, report, &e),
        };
        match self.codegen.function(&func, parser.operators_mut()) {
            Ok(_) => {
                if self.verbose {
                    writeln!(report, "Parsed a top-level expr")?;
                }
                if self.emit == Emit::Jit {
                    let module = self.codegen.steal_module(self.module_name.clone());
                    let handle = self.jit.add_module(module);

                    let symbol = self.jit.lookup(parser.anonymous_name())?;
                    let result = self.jit.call(symbol, &[])?;
                    writeln!(report, "Evaluated to {result}")?;

                    // The anonymous function is gone; its module with
                    // it.
                    self.jit.remove_module(handle);
                }
                Ok(())
            }
            Err(e) => self.recover(parser, report, &e),
        }
    }

    /// Prints the diagnostic and discards one token so the loop can
    /// resynchronize.
    fn recover<R: BufRead>(
        &mut self,
        parser: &mut Parser<R>,
        report: &mut impl Write,
        error: &dyn std::error::Error,
    ) -> Result<()> {
        writeln!(report, "{error}")?;
        parser.get_next_token();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use pretty_assertions::assert_eq;

    fn run_session(emit: Emit, src: &str) -> (String, Session) {
        let mut parser = Parser::new(Lexer::new(src.as_bytes()));
        let mut session = Session::new(emit, false, false, "test");
        let mut report = Vec::new();
        session
            .run(&mut parser, &mut report, false)
            .expect("session failed");
        (String::from_utf8(report).unwrap(), session)
    }

    fn run_jit(src: &str) -> String {
        run_session(Emit::Jit, src).0
    }

    #[test]
    fn evaluates_top_level_expressions() {
        let out = run_jit("def f(x) x + 1; f(41);");
        assert_eq!(out, "Evaluated to 42\n");
    }

    #[test]
    fn semicolons_are_skipped() {
        let out = run_jit(";;; 1 + 1 ;;;");
        assert_eq!(out, "Evaluated to 2\n");
    }

    #[test]
    fn parse_error_recovers_and_continues() {
        let out = run_jit("def f( 3; 2 + 2;");
        assert!(out.contains("Parse error:"), "got: {out}");
        assert!(out.contains("Evaluated to 4"), "got: {out}");
    }

    #[test]
    fn codegen_error_recovers_and_continues() {
        let out = run_jit("unknown(1); 5;");
        assert!(
            out.contains("Code generation error: Unknown function referenced: unknown"),
            "got: {out}"
        );
        assert!(out.contains("Evaluated to 5"), "got: {out}");
    }

    #[test]
    fn interactive_prompt_goes_to_report() {
        let mut parser = Parser::new(Lexer::new("1;".as_bytes()));
        let mut session = Session::new(Emit::Jit, false, false, "");
        let mut report = Vec::new();
        session.run(&mut parser, &mut report, true).unwrap();
        let out = String::from_utf8(report).unwrap();
        assert!(out.starts_with("ready> "), "got: {out}");
        assert!(out.contains("Evaluated to 1"), "got: {out}");
    }

    #[test]
    fn object_mode_accumulates_one_module() {
        let (_, mut session) = run_session(Emit::Object, "def f(x) x def g(x) f(x) + 1");
        let module = session.finish(&mut Vec::new()).unwrap();
        assert!(module.get_function("f").is_some());
        assert!(module.get_function("g").is_some());
        assert_eq!(module.name, "test");
    }

    #[test]
    fn verbose_reports_constructs() {
        let mut parser = Parser::new(Lexer::new("def f(x) x extern sin(x)".as_bytes()));
        let mut session = Session::new(Emit::Object, false, true, "m");
        let mut report = Vec::new();
        session.run(&mut parser, &mut report, false).unwrap();
        let out = String::from_utf8(report).unwrap();
        assert_eq!(out, "Parsed a function definition\nParsed an extern\n");
    }
}

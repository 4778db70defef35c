// toplevel   ::= definition | external | expression | ';'
// definition ::= 'def' prototype expression
// external   ::= 'extern' prototype
// prototype  ::= IDENT '(' IDENT* ')'
//              | 'unary' OP '(' IDENT ')'
//              | 'binary' OP NUMBER? '(' IDENT IDENT ')'
// expression ::= unary (BINOP unary)*
// unary      ::= primary | OP unary
// primary    ::= number | identexpr | paren | ifexpr | forexpr | varexpr
// identexpr  ::= IDENT | IDENT '(' (expression (',' expression)*)? ')'
// paren      ::= '(' expression ')'
// ifexpr     ::= 'if' expression 'then' expression 'else' expression
// forexpr    ::= 'for' IDENT '=' expr ',' expr (',' expr)? 'in' expr
// varexpr    ::= 'var' decl (',' decl)* 'in' expression
// decl       ::= IDENT ('=' expression)?

use crate::token::SourceLocation;

/// One K expression. The tree is built by the parser and only read
/// afterwards; child expressions are uniquely owned.
#[derive(Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: SourceLocation,
}

impl Expr {
    pub fn new(location: SourceLocation, kind: ExprKind) -> Expr {
        Expr { kind, location }
    }

    /// The `0.0` literal used for omitted initializers.
    pub fn zero(location: SourceLocation) -> Expr {
        Expr::new(location, ExprKind::Number(0.0))
    }
}

#[derive(Debug, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Variable(String),
    Unary {
        op: u8,
        operand: Box<Expr>,
    },
    Binary {
        op: u8,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    For {
        var_name: String,
        start: Box<Expr>,
        end: Box<Expr>,
        step: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    Var {
        declarations: Vec<VarDeclaration>,
        body: Box<Expr>,
    },
}

/// One `name = init` entry of a `var` block.
#[derive(Debug, PartialEq)]
pub struct VarDeclaration {
    pub name: String,
    pub init: Expr,
    pub location: SourceLocation,
}

/// How a prototype may be invoked.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PrototypeKind {
    Function,
    /// `unary OP`, exactly one argument.
    UnaryOp(u8),
    /// `binary OP prec`, exactly two arguments.
    BinaryOp(u8, i32),
}

/// A function's name and argument names; for operator definitions also
/// its spelling and precedence. Carries no body.
#[derive(Clone, Debug, PartialEq)]
pub struct Prototype {
    pub name: String,
    pub args: Vec<String>,
    pub kind: PrototypeKind,
    pub location: SourceLocation,
}

impl Prototype {
    pub fn function(location: SourceLocation, name: String, args: Vec<String>) -> Prototype {
        Prototype {
            name,
            args,
            kind: PrototypeKind::Function,
            location,
        }
    }

}

/// A function definition: prototype plus body expression.
#[derive(Debug, PartialEq)]
pub struct Function {
    pub proto: Prototype,
    pub body: Expr,
}

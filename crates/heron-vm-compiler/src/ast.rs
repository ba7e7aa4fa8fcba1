//! Syntax tree consumed by the compiler
//!
//! Trees come from an upstream parser and scope resolver, or from JSON via
//! serde. Every name reference carries its resolved storage: `slot` is set
//! when the variable lives in a frame slot and unset for name lookup.

use serde::{Deserialize, Serialize};

/// A top-level script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Source file name used in diagnostics
    pub source_name: String,
    /// Original source text, kept in the unit when present
    #[serde(default)]
    pub source: Option<String>,
    /// Script body; its `params` are ignored
    pub body: FunctionNode,
}

/// A function (or script) body with its declarations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionNode {
    /// Declared name, if any
    #[serde(default)]
    pub name: Option<String>,
    /// Parameter names
    #[serde(default)]
    pub params: Vec<String>,
    /// `var`-declared names, excluding parameters
    #[serde(default)]
    pub vars: Vec<String>,
    /// Body statements
    #[serde(default)]
    pub body: Vec<Stmt>,
    /// Variables must live in a heap activation object
    #[serde(default)]
    pub needs_activation: bool,
    /// Line of the function keyword
    #[serde(default)]
    pub line: u32,
}

/// A resolved identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ident {
    /// Source name
    pub name: String,
    /// Frame slot ordinal when the variable is slot-backed
    #[serde(default)]
    pub slot: Option<u16>,
}

impl Ident {
    /// An identifier resolved by name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: None,
        }
    }
}

/// A statement with its source line (0 when unknown)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// Source line
    #[serde(default)]
    pub line: u32,
    /// Statement kind
    pub kind: StmtKind,
}

/// Statement kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `expr;`
    Expr(Expr),
    /// `var a = 1, b;`
    Var(Vec<VarDecl>),
    /// `return expr;`
    Return(Option<Expr>),
    /// `if (test) then else otherwise`
    If {
        /// Condition
        test: Expr,
        /// Taken branch
        then: Box<Stmt>,
        /// Else branch
        otherwise: Option<Box<Stmt>>,
    },
    /// `while (test) body`
    While {
        /// Condition
        test: Expr,
        /// Loop body
        body: Box<Stmt>,
    },
    /// `do body while (test)`
    DoWhile {
        /// Loop body
        body: Box<Stmt>,
        /// Condition
        test: Expr,
    },
    /// `for (init; test; update) body`
    For {
        /// Initializer
        init: Option<ForInit>,
        /// Condition; absent means always true
        test: Option<Expr>,
        /// Update expression
        update: Option<Expr>,
        /// Loop body
        body: Box<Stmt>,
    },
    /// `for (target in object) body`
    ForIn {
        /// Assignment target for each key
        target: ForInTarget,
        /// Enumerated object
        object: Expr,
        /// Loop body
        body: Box<Stmt>,
    },
    /// `switch (discriminant) { cases }`
    Switch {
        /// Value compared against each case
        discriminant: Expr,
        /// Cases in source order
        cases: Vec<SwitchCase>,
    },
    /// `label: body`
    Labeled {
        /// Label name
        label: String,
        /// Labeled statement
        body: Box<Stmt>,
    },
    /// `break label;`
    Break(Option<String>),
    /// `continue label;`
    Continue(Option<String>),
    /// `throw expr;`
    Throw(Expr),
    /// `try { block } catch (param) { .. } finally { .. }`
    Try {
        /// Protected block
        block: Vec<Stmt>,
        /// Catch clause
        handler: Option<CatchClause>,
        /// Finally block
        finalizer: Option<Vec<Stmt>>,
    },
    /// `with (object) body`
    With {
        /// Object pushed on the scope chain
        object: Expr,
        /// Body
        body: Box<Stmt>,
    },
    /// `{ ... }`
    Block(Vec<Stmt>),
    /// Function declaration (hoisted to the start of its unit)
    Function(Box<FunctionNode>),
    /// `;`
    Empty,
}

/// One declarator of a `var` statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    /// Declared variable
    pub name: Ident,
    /// Initializer
    #[serde(default)]
    pub init: Option<Expr>,
}

/// Initializer clause of a `for` statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInit {
    /// `for (var i = 0; ...)`
    Var(Vec<VarDecl>),
    /// `for (i = 0; ...)`
    Expr(Expr),
}

/// Left-hand side of a `for-in` statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInTarget {
    /// `for (var k in o)`
    Var(Ident),
    /// `for (o.k in p)` and friends
    Expr(Expr),
}

/// A `case`/`default` clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Case value; `None` for `default`
    pub test: Option<Expr>,
    /// Statements up to the next clause
    pub body: Vec<Stmt>,
}

/// A `catch` clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// Variable receiving the exception
    pub param: Ident,
    /// Handler body
    pub body: Vec<Stmt>,
}

/// Object literal property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Property name
    pub key: String,
    /// Value
    pub value: Expr,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Plus,
    /// `!x`
    Not,
    /// `~x`
    BitNot,
    /// `typeof x`
    TypeOf,
    /// `void x`
    Void,
    /// `delete x`
    Delete,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in`
    In,
    /// `instanceof`
    InstanceOf,
}

/// Short-circuit operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
}

/// `++` or `--`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOp {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
    /// `undefined`
    Undefined,
    /// `this`
    This,
    /// `/pattern/flags`
    RegExp {
        /// Pattern source
        pattern: String,
        /// Flags
        flags: String,
    },
    /// Variable reference
    Name(Ident),
    /// `[a, b]`
    Array(Vec<Expr>),
    /// `{k: v}`
    Object(Vec<Property>),
    /// Function expression
    Function(Box<FunctionNode>),
    /// Unary operator
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        argument: Box<Expr>,
    },
    /// `++x`, `x--`, ...
    Update {
        /// Operator
        op: UpdateOp,
        /// Prefix form
        prefix: bool,
        /// Updated reference
        target: Box<Expr>,
    },
    /// Binary operator
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// `&&` / `||`
    Logical {
        /// Operator
        op: LogicalOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// `test ? consequent : alternate`
    Conditional {
        /// Condition
        test: Box<Expr>,
        /// Value when true
        consequent: Box<Expr>,
        /// Value when false
        alternate: Box<Expr>,
    },
    /// `target = value` or `target op= value`
    Assign {
        /// Compound operator, `None` for plain assignment
        op: Option<BinaryOp>,
        /// Assigned reference
        target: Box<Expr>,
        /// Assigned value
        value: Box<Expr>,
    },
    /// `object.property`
    Member {
        /// Base object
        object: Box<Expr>,
        /// Property name
        property: String,
    },
    /// `object[index]`
    Index {
        /// Base object
        object: Box<Expr>,
        /// Key expression
        index: Box<Expr>,
    },
    /// `callee(args)`
    Call {
        /// Called expression
        callee: Box<Expr>,
        /// Arguments
        args: Vec<Expr>,
    },
    /// `new callee(args)`
    New {
        /// Constructor expression
        callee: Box<Expr>,
        /// Arguments
        args: Vec<Expr>,
    },
    /// `a, b, c`
    Sequence(Vec<Expr>),
}

impl Expr {
    /// Numeric literal
    pub fn num(n: f64) -> Self {
        Expr::Number(n)
    }

    /// String literal
    pub fn str(s: impl Into<String>) -> Self {
        Expr::String(s.into())
    }

    /// Unresolved name reference
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(Ident::new(name))
    }

    /// Binary expression
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Plain assignment
    pub fn assign(target: Expr, value: Expr) -> Self {
        Expr::Assign {
            op: None,
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// Postfix or prefix update
    pub fn update(op: UpdateOp, prefix: bool, target: Expr) -> Self {
        Expr::Update {
            op,
            prefix,
            target: Box::new(target),
        }
    }

    /// `object.property`
    pub fn member(object: Expr, property: impl Into<String>) -> Self {
        Expr::Member {
            object: Box::new(object),
            property: property.into(),
        }
    }

    /// `object[index]`
    pub fn index(object: Expr, index: Expr) -> Self {
        Expr::Index {
            object: Box::new(object),
            index: Box::new(index),
        }
    }

    /// Call expression
    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    /// Unary expression
    pub fn unary(op: UnaryOp, argument: Expr) -> Self {
        Expr::Unary {
            op,
            argument: Box::new(argument),
        }
    }
}

impl Stmt {
    /// A statement without line information
    pub fn new(kind: StmtKind) -> Self {
        Self { line: 0, kind }
    }

    /// Attach a source line
    pub fn at(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// Expression statement
    pub fn expr(expr: Expr) -> Self {
        Self::new(StmtKind::Expr(expr))
    }

    /// `var name = init;`
    pub fn var(name: impl Into<String>, init: Option<Expr>) -> Self {
        Self::new(StmtKind::Var(vec![VarDecl {
            name: Ident::new(name),
            init,
        }]))
    }

    /// `return expr;`
    pub fn ret(expr: Option<Expr>) -> Self {
        Self::new(StmtKind::Return(expr))
    }

    /// `throw expr;`
    pub fn throw(expr: Expr) -> Self {
        Self::new(StmtKind::Throw(expr))
    }

    /// `{ body }`
    pub fn block(body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Block(body))
    }

    /// `while (test) body`
    pub fn while_loop(test: Expr, body: Stmt) -> Self {
        Self::new(StmtKind::While {
            test,
            body: Box::new(body),
        })
    }

    /// `if (test) then else otherwise`
    pub fn if_else(test: Expr, then: Stmt, otherwise: Option<Stmt>) -> Self {
        Self::new(StmtKind::If {
            test,
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        })
    }

    /// `try { block } catch (param) { handler } finally { finalizer }`
    pub fn try_stmt(
        block: Vec<Stmt>,
        handler: Option<(&str, Vec<Stmt>)>,
        finalizer: Option<Vec<Stmt>>,
    ) -> Self {
        Self::new(StmtKind::Try {
            block,
            handler: handler.map(|(param, body)| CatchClause {
                param: Ident::new(param),
                body,
            }),
            finalizer,
        })
    }

    /// Function declaration
    pub fn function(node: FunctionNode) -> Self {
        Self::new(StmtKind::Function(Box::new(node)))
    }
}

impl FunctionNode {
    /// A named function with parameters and body; declarations are
    /// filled in by the resolver
    pub fn new(name: Option<&str>, params: &[&str], body: Vec<Stmt>) -> Self {
        Self {
            name: name.map(str::to_string),
            params: params.iter().map(|p| p.to_string()).collect(),
            body,
            ..Self::default()
        }
    }
}

impl Script {
    /// A script from its top-level statements
    pub fn new(source_name: impl Into<String>, body: Vec<Stmt>) -> Self {
        Self {
            source_name: source_name.into(),
            source: None,
            body: FunctionNode::new(None, &[], body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_from_json() {
        let json = r#"{
            "source_name": "t.js",
            "body": {
                "body": [
                    {"line": 1, "kind": {"Var": [{"name": {"name": "x"}, "init": {"Number": 1.0}}]}},
                    {"line": 2, "kind": {"Return": {"Name": {"name": "x", "slot": 0}}}}
                ]
            }
        }"#;
        let script: Script = serde_json::from_str(json).unwrap();
        assert_eq!(script.body.body.len(), 2);
        assert_eq!(script.body.body[1].line, 2);
        assert_eq!(
            script.body.body[1].kind,
            StmtKind::Return(Some(Expr::Name(Ident {
                name: "x".into(),
                slot: Some(0)
            })))
        );
    }
}

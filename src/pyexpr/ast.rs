//! Syntax tree for the Python fragments produced by [`super::parse_module`].

use std::collections::VecDeque;

/// A parsed source fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    Return(Option<Expr>),
    Delete(Vec<Expr>),
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Import(Vec<String>),
    ImportFrom {
        module: String,
        names: Vec<String>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    FunctionDef {
        name: String,
        args: Arguments,
        body: Vec<Stmt>,
        decorators: Vec<Expr>,
        returns: Option<Expr>,
        is_async: bool,
    },
    ClassDef {
        name: String,
        bases: Vec<Expr>,
        keywords: Vec<Keyword>,
        body: Vec<Stmt>,
        decorators: Vec<Expr>,
    },
    /// `elifs` stay flat here; the walk visits each one as the nested `if`
    /// it stands for.
    If {
        test: Expr,
        body: Vec<Stmt>,
        elifs: Vec<ElifClause>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        is_async: bool,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
        is_async: bool,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Pass,
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElifClause {
    pub test: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context: Expr,
    pub binding: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

/// Parameters of a `def` or `lambda`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub posonly: Vec<Arg>,
    pub args: Vec<Arg>,
    pub vararg: Option<Arg>,
    pub kwonly: Vec<Arg>,
    /// One entry per keyword-only parameter, `None` when it has no default.
    pub kw_defaults: Vec<Option<Expr>>,
    pub kwarg: Option<Arg>,
    /// Defaults of the trailing positional parameters.
    pub defaults: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: String,
    pub annotation: Option<Expr>,
}

/// One `for ... in ... if ...` clause of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Constant),
    /// f-string; its interpolations are not parsed.
    FormattedString(String),
    Name(String),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Call(Call),
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Starred(Box<Expr>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    /// `None` keys are `**mapping` unpacking entries.
    Dict(Vec<(Option<Expr>, Expr)>),
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// `name := value`
    NamedExpr {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Lambda {
        args: Box<Arguments>,
        body: Box<Expr>,
    },
    Await(Box<Expr>),
    Yield(Option<Box<Expr>>),
    YieldFrom(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    pub keywords: Vec<Keyword>,
}

impl Call {
    /// Name of the called function or method: `f(...)` and `obj.f(...)` both
    /// yield `f`.
    pub fn callee_name(&self) -> Option<&str> {
        match self.func.as_ref() {
            Expr::Name(name) => Some(name),
            Expr::Attribute { attr, .. } => Some(attr),
            _ => None,
        }
    }
}

/// A `name=value` argument; `arg` is `None` for `**mapping`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    MatMul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// Every node kind that occupies its own level in the walk.
#[derive(Clone, Copy)]
enum Node<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
    Keyword(&'a Keyword),
    WithItem(&'a WithItem),
    Handler(&'a ExceptHandler),
    Arguments(&'a Arguments),
    Arg(&'a Arg),
    Comprehension(&'a Comprehension),
    /// The remaining `elif` clauses of an `if`, plus its final `else`.
    Elif(&'a [ElifClause], &'a [Stmt]),
}

impl Module {
    /// Every call expression in the tree, breadth-first with children in
    /// field order, the order Python's `ast.walk` yields them.
    pub fn calls(&self) -> Vec<&Call> {
        let mut calls = Vec::new();
        let mut queue: VecDeque<Node<'_>> = self.body.iter().map(Node::Stmt).collect();

        while let Some(node) = queue.pop_front() {
            if let Node::Expr(Expr::Call(call)) = node {
                calls.push(call);
            }
            push_children(node, &mut queue);
        }

        calls
    }
}

fn push_children<'a>(node: Node<'a>, queue: &mut VecDeque<Node<'a>>) {
    match node {
        Node::Stmt(stmt) => push_stmt_children(stmt, queue),
        Node::Expr(expr) => push_expr_children(expr, queue),
        Node::Keyword(keyword) => queue.push_back(Node::Expr(&keyword.value)),
        Node::WithItem(item) => {
            queue.push_back(Node::Expr(&item.context));
            push_exprs(item.binding.iter(), queue);
        }
        Node::Handler(handler) => {
            push_exprs(handler.kind.iter(), queue);
            push_block(&handler.body, queue);
        }
        Node::Arguments(args) => {
            queue.extend(args.posonly.iter().map(Node::Arg));
            queue.extend(args.args.iter().map(Node::Arg));
            queue.extend(args.vararg.iter().map(Node::Arg));
            queue.extend(args.kwonly.iter().map(Node::Arg));
            push_exprs(args.kw_defaults.iter().flatten(), queue);
            queue.extend(args.kwarg.iter().map(Node::Arg));
            push_exprs(args.defaults.iter(), queue);
        }
        Node::Arg(arg) => push_exprs(arg.annotation.iter(), queue),
        Node::Comprehension(clause) => {
            queue.push_back(Node::Expr(&clause.target));
            queue.push_back(Node::Expr(&clause.iter));
            push_exprs(clause.ifs.iter(), queue);
        }
        Node::Elif(clauses, orelse) => {
            if let Some((first, rest)) = clauses.split_first() {
                queue.push_back(Node::Expr(&first.test));
                push_block(&first.body, queue);
                push_orelse(rest, orelse, queue);
            }
        }
    }
}

fn push_exprs<'a>(exprs: impl Iterator<Item = &'a Expr>, queue: &mut VecDeque<Node<'a>>) {
    queue.extend(exprs.map(Node::Expr));
}

fn push_block<'a>(block: &'a [Stmt], queue: &mut VecDeque<Node<'a>>) {
    queue.extend(block.iter().map(Node::Stmt));
}

/// The `orelse` of an `if`: the next `elif` as a single nested node, or the
/// `else` block.
fn push_orelse<'a>(elifs: &'a [ElifClause], orelse: &'a [Stmt], queue: &mut VecDeque<Node<'a>>) {
    if elifs.is_empty() {
        push_block(orelse, queue);
    } else {
        queue.push_back(Node::Elif(elifs, orelse));
    }
}

fn push_stmt_children<'a>(stmt: &'a Stmt, queue: &mut VecDeque<Node<'a>>) {
    match stmt {
        Stmt::Expr(expr) => queue.push_back(Node::Expr(expr)),
        Stmt::Assign { targets, value } => {
            push_exprs(targets.iter(), queue);
            queue.push_back(Node::Expr(value));
        }
        Stmt::AugAssign { target, value, .. } => {
            queue.push_back(Node::Expr(target));
            queue.push_back(Node::Expr(value));
        }
        Stmt::AnnAssign {
            target,
            annotation,
            value,
        } => {
            queue.push_back(Node::Expr(target));
            queue.push_back(Node::Expr(annotation));
            push_exprs(value.iter(), queue);
        }
        Stmt::Return(value) => push_exprs(value.iter(), queue),
        Stmt::Delete(targets) => push_exprs(targets.iter(), queue),
        Stmt::Raise { exc, cause } => {
            push_exprs(exc.iter(), queue);
            push_exprs(cause.iter(), queue);
        }
        Stmt::Assert { test, msg } => {
            queue.push_back(Node::Expr(test));
            push_exprs(msg.iter(), queue);
        }
        Stmt::FunctionDef {
            args,
            body,
            decorators,
            returns,
            ..
        } => {
            queue.push_back(Node::Arguments(args));
            push_block(body, queue);
            push_exprs(decorators.iter(), queue);
            push_exprs(returns.iter(), queue);
        }
        Stmt::ClassDef {
            bases,
            keywords,
            body,
            decorators,
            ..
        } => {
            push_exprs(bases.iter(), queue);
            queue.extend(keywords.iter().map(Node::Keyword));
            push_block(body, queue);
            push_exprs(decorators.iter(), queue);
        }
        Stmt::If {
            test,
            body,
            elifs,
            orelse,
        } => {
            queue.push_back(Node::Expr(test));
            push_block(body, queue);
            push_orelse(elifs, orelse, queue);
        }
        Stmt::While { test, body, orelse } => {
            queue.push_back(Node::Expr(test));
            push_block(body, queue);
            push_block(orelse, queue);
        }
        Stmt::For {
            target,
            iter,
            body,
            orelse,
            ..
        } => {
            queue.push_back(Node::Expr(target));
            queue.push_back(Node::Expr(iter));
            push_block(body, queue);
            push_block(orelse, queue);
        }
        Stmt::With { items, body, .. } => {
            queue.extend(items.iter().map(Node::WithItem));
            push_block(body, queue);
        }
        Stmt::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            push_block(body, queue);
            queue.extend(handlers.iter().map(Node::Handler));
            push_block(orelse, queue);
            push_block(finalbody, queue);
        }
        Stmt::Import(_)
        | Stmt::ImportFrom { .. }
        | Stmt::Global(_)
        | Stmt::Nonlocal(_)
        | Stmt::Pass
        | Stmt::Break
        | Stmt::Continue => {}
    }
}

fn push_expr_children<'a>(expr: &'a Expr, queue: &mut VecDeque<Node<'a>>) {
    match expr {
        Expr::Constant(_) | Expr::FormattedString(_) | Expr::Name(_) => {}
        Expr::Attribute { value, .. } => queue.push_back(Node::Expr(value)),
        Expr::Call(call) => {
            queue.push_back(Node::Expr(&call.func));
            push_exprs(call.args.iter(), queue);
            queue.extend(call.keywords.iter().map(Node::Keyword));
        }
        Expr::Subscript { value, index } => {
            queue.push_back(Node::Expr(value));
            queue.push_back(Node::Expr(index));
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                queue.push_back(Node::Expr(part));
            }
        }
        Expr::Starred(inner) | Expr::Await(inner) | Expr::YieldFrom(inner) => {
            queue.push_back(Node::Expr(inner))
        }
        Expr::Yield(value) => push_exprs(value.iter().map(|v| v.as_ref()), queue),
        Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
            push_exprs(items.iter(), queue)
        }
        Expr::Dict(entries) => {
            push_exprs(entries.iter().filter_map(|(key, _)| key.as_ref()), queue);
            push_exprs(entries.iter().map(|(_, value)| value), queue);
        }
        Expr::ListComp { elt, generators }
        | Expr::SetComp { elt, generators }
        | Expr::GeneratorExp { elt, generators } => {
            queue.push_back(Node::Expr(elt));
            queue.extend(generators.iter().map(Node::Comprehension));
        }
        Expr::DictComp {
            key,
            value,
            generators,
        } => {
            queue.push_back(Node::Expr(key));
            queue.push_back(Node::Expr(value));
            queue.extend(generators.iter().map(Node::Comprehension));
        }
        Expr::UnaryOp { operand, .. } => queue.push_back(Node::Expr(operand)),
        Expr::BinOp { left, right, .. } => {
            queue.push_back(Node::Expr(left));
            queue.push_back(Node::Expr(right));
        }
        Expr::BoolOp { values, .. } => push_exprs(values.iter(), queue),
        Expr::Compare {
            left, comparators, ..
        } => {
            queue.push_back(Node::Expr(left));
            push_exprs(comparators.iter(), queue);
        }
        Expr::IfExp { test, body, orelse } => {
            queue.push_back(Node::Expr(test));
            queue.push_back(Node::Expr(body));
            queue.push_back(Node::Expr(orelse));
        }
        Expr::NamedExpr { target, value } => {
            queue.push_back(Node::Expr(target));
            queue.push_back(Node::Expr(value));
        }
        Expr::Lambda { args, body } => {
            queue.push_back(Node::Arguments(args));
            queue.push_back(Node::Expr(body));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            func: Box::new(Expr::Name(name.to_string())),
            args,
            keywords: Vec::new(),
        })
    }

    fn names(module: &Module) -> Vec<&str> {
        module.calls().iter().filter_map(|c| c.callee_name()).collect()
    }

    #[test]
    fn test_calls_are_breadth_first() {
        // print(outer(inner())) ; later()
        let module = Module {
            body: vec![
                Stmt::Expr(call("print", vec![call("outer", vec![call("inner", vec![])])])),
                Stmt::Expr(call("later", vec![])),
            ],
        };
        assert_eq!(names(&module), vec!["print", "later", "outer", "inner"]);
    }

    #[test]
    fn test_keyword_values_sit_one_level_below_arguments() {
        // f(a(deep()), k=shallow())
        let module = Module {
            body: vec![Stmt::Expr(Expr::Call(Call {
                func: Box::new(Expr::Name("f".to_string())),
                args: vec![call("a", vec![call("deep", vec![])])],
                keywords: vec![Keyword {
                    arg: Some("k".to_string()),
                    value: call("shallow", vec![]),
                }],
            }))],
        };
        assert_eq!(names(&module), vec!["f", "a", "deep", "shallow"]);
    }

    #[test]
    fn test_dict_keys_before_values() {
        // {k1(): v1(), k2(): v2()}
        let module = Module {
            body: vec![Stmt::Expr(Expr::Dict(vec![
                (Some(call("k1", vec![])), call("v1", vec![])),
                (Some(call("k2", vec![])), call("v2", vec![])),
            ]))],
        };
        assert_eq!(names(&module), vec!["k1", "k2", "v1", "v2"]);
    }

    #[test]
    fn test_elif_is_walked_as_nested_if() {
        // if a(): b()
        // elif c(): d()
        // else: e()
        let module = Module {
            body: vec![Stmt::If {
                test: call("a", vec![]),
                body: vec![Stmt::Expr(call("b", vec![]))],
                elifs: vec![ElifClause {
                    test: call("c", vec![]),
                    body: vec![Stmt::Expr(call("d", vec![]))],
                }],
                orelse: vec![Stmt::Expr(call("e", vec![]))],
            }],
        };
        assert_eq!(names(&module), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_callee_name_for_method() {
        let call = Call {
            func: Box::new(Expr::Attribute {
                value: Box::new(Expr::Name("tools".to_string())),
                attr: "update_ui".to_string(),
            }),
            args: Vec::new(),
            keywords: Vec::new(),
        };
        assert_eq!(call.callee_name(), Some("update_ui"));
    }
}

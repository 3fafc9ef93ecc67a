use super::ast::*;
use super::lexer::{Tok, Token};
use super::ParseError;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Recursion limit: nested expressions and indented blocks.
const MAX_NESTING: usize = 40;

/// Limit on the depth of the finished tree, which left-leaning chains such as
/// `a + b + c` or `f()()()` grow without recursing.
const MAX_DEPTH: usize = 2000;

const AUG_ASSIGN: &[(&str, BinOp)] = &[
    ("+=", BinOp::Add),
    ("-=", BinOp::Sub),
    ("*=", BinOp::Mul),
    ("@=", BinOp::MatMul),
    ("/=", BinOp::Div),
    ("//=", BinOp::FloorDiv),
    ("%=", BinOp::Mod),
    ("**=", BinOp::Pow),
    ("<<=", BinOp::LShift),
    (">>=", BinOp::RShift),
    ("|=", BinOp::BitOr),
    ("^=", BinOp::BitXor),
    ("&=", BinOp::BitAnd),
];

type PResult<T> = Result<T, ParseError>;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current recursion depth.
    nesting: usize,
    /// Deepest tree level reached by the chain being parsed.
    deepest: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            deepest: 0,
        }
    }

    pub fn parse_module(mut self) -> PResult<Module> {
        let mut body = Vec::new();
        while !self.at(&Tok::EndOfFile) {
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(Module { body })
    }

    // ---- depth tracking ----

    /// Runs `parse` one recursion level deeper.
    fn nested<T>(&mut self, parse: fn(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error("too many nested expressions or blocks"));
        }
        self.nesting += 1;
        self.deepest = self.deepest.max(self.nesting);
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    /// Runs a left-leaning chain parser, measuring its depth from the
    /// current level.
    fn chain(&mut self, parse: fn(&mut Self) -> PResult<Expr>) -> PResult<Expr> {
        let outer = std::mem::replace(&mut self.deepest, self.nesting);
        let result = parse(self);
        self.deepest = self.deepest.max(outer);
        result
    }

    /// Accounts for one more link wrapping the chain parsed so far.
    fn lengthen(&mut self) -> PResult<()> {
        self.deepest += 1;
        if self.deepest > MAX_DEPTH {
            return Err(self.error("expression too deeply nested"));
        }
        Ok(())
    }

    // ---- statements ----

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        if self.at(&Tok::Indent) {
            return Err(self.error("unexpected indent"));
        }
        if self.at_op("@") {
            return Ok(vec![self.decorated()?]);
        }
        match self.keyword() {
            Some("if") => Ok(vec![self.if_statement()?]),
            Some("for") => Ok(vec![self.for_statement(false)?]),
            Some("while") => Ok(vec![self.while_statement()?]),
            Some("with") => Ok(vec![self.with_statement(false)?]),
            Some("try") => Ok(vec![self.try_statement()?]),
            Some("def") => Ok(vec![self.function_def(Vec::new(), false)?]),
            Some("class") => Ok(vec![self.class_def(Vec::new())?]),
            Some("async") => Ok(vec![self.async_statement()?]),
            _ => self.simple_statements(),
        }
    }

    fn simple_statements(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.small_statement()?];
        while self.eat_op(";") {
            if self.at(&Tok::Newline) || self.at(&Tok::EndOfFile) {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        self.expect_line_end()?;
        Ok(stmts)
    }

    fn small_statement(&mut self) -> PResult<Stmt> {
        match self.keyword() {
            Some("pass") => {
                self.advance();
                Ok(Stmt::Pass)
            }
            Some("break") => {
                self.advance();
                Ok(Stmt::Break)
            }
            Some("continue") => {
                self.advance();
                Ok(Stmt::Continue)
            }
            Some("return") => {
                self.advance();
                if self.at_statement_end() {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.testlist_star()?)))
                }
            }
            Some("del") => {
                self.advance();
                let mut targets = vec![self.bit_or()?];
                while self.eat_op(",") {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.bit_or()?);
                }
                Ok(Stmt::Delete(targets))
            }
            Some("raise") => {
                self.advance();
                if self.at_statement_end() {
                    return Ok(Stmt::Raise {
                        exc: None,
                        cause: None,
                    });
                }
                let exc = self.test()?;
                let cause = if self.eat_keyword("from") {
                    Some(self.test()?)
                } else {
                    None
                };
                Ok(Stmt::Raise {
                    exc: Some(exc),
                    cause,
                })
            }
            Some("assert") => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                Ok(Stmt::Assert { test, msg })
            }
            Some("global") => {
                self.advance();
                Ok(Stmt::Global(self.name_list()?))
            }
            Some("nonlocal") => {
                self.advance();
                Ok(Stmt::Nonlocal(self.name_list()?))
            }
            Some("import") => self.import_statement(),
            Some("from") => self.from_import_statement(),
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let first = self.yield_or_testlist()?;

        if self.eat_op(":") {
            let annotation = self.test()?;
            let value = if self.eat_op("=") {
                Some(self.yield_or_testlist()?)
            } else {
                None
            };
            return Ok(Stmt::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        for (op, bin_op) in AUG_ASSIGN {
            if self.eat_op(op) {
                let value = self.yield_or_testlist()?;
                return Ok(Stmt::AugAssign {
                    target: first,
                    op: *bin_op,
                    value,
                });
            }
        }

        if !self.at_op("=") {
            return Ok(Stmt::Expr(first));
        }

        let mut targets = vec![first];
        let mut value = None;
        while self.eat_op("=") {
            if let Some(previous) = value.replace(self.yield_or_testlist()?) {
                targets.push(previous);
            }
        }
        match value {
            Some(value) => Ok(Stmt::Assign { targets, value }),
            None => Err(self.error("expected expression after '='")),
        }
    }

    fn import_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let mut names = vec![self.dotted_name()?];
        if self.eat_keyword("as") {
            self.name()?;
        }
        while self.eat_op(",") {
            names.push(self.dotted_name()?);
            if self.eat_keyword("as") {
                self.name()?;
            }
        }
        Ok(Stmt::Import(names))
    }

    fn from_import_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let mut module = String::new();
        while self.at_op(".") || self.at_op("...") {
            if let Tok::Op(dots) = self.advance().tok {
                module.push_str(dots);
            }
        }
        if !self.at_keyword("import") {
            module.push_str(&self.dotted_name()?);
        }
        self.expect_keyword("import")?;

        let mut names = Vec::new();
        if self.eat_op("*") {
            names.push("*".to_string());
        } else {
            let parenthesized = self.eat_op("(");
            loop {
                names.push(self.name()?);
                if self.eat_keyword("as") {
                    self.name()?;
                }
                if !self.eat_op(",") {
                    break;
                }
                if parenthesized && self.at_op(")") {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(")")?;
            }
        }
        Ok(Stmt::ImportFrom { module, names })
    }

    fn decorated(&mut self) -> PResult<Stmt> {
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(self.named_test()?);
            if !self.eat(&Tok::Newline) {
                return Err(self.error("expected newline after decorator"));
            }
        }
        match self.keyword() {
            Some("def") => self.function_def(decorators, false),
            Some("class") => self.class_def(decorators),
            Some("async") if self.peek_is_keyword(1, "def") => {
                self.advance();
                self.function_def(decorators, true)
            }
            _ => Err(self.error("expected 'def' or 'class' after decorators")),
        }
    }

    fn async_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        match self.keyword() {
            Some("def") => self.function_def(Vec::new(), true),
            Some("for") => self.for_statement(true),
            Some("with") => self.with_statement(true),
            _ => Err(self.error("invalid syntax after 'async'")),
        }
    }

    fn function_def(&mut self, decorators: Vec<Expr>, is_async: bool) -> PResult<Stmt> {
        self.advance();
        let name = self.name()?;
        self.expect_op("(")?;
        let args = self.parameters(")", true)?;
        self.expect_op(")")?;
        let returns = if self.eat_op("->") {
            Some(self.test()?)
        } else {
            None
        };
        let body = self.block()?;
        Ok(Stmt::FunctionDef {
            name,
            args,
            body,
            decorators,
            returns,
            is_async,
        })
    }

    fn class_def(&mut self, decorators: Vec<Expr>) -> PResult<Stmt> {
        self.advance();
        let name = self.name()?;
        let (bases, keywords) = if self.eat_op("(") {
            self.arguments()?
        } else {
            (Vec::new(), Vec::new())
        };
        let body = self.block()?;
        Ok(Stmt::ClassDef {
            name,
            bases,
            keywords,
            body,
            decorators,
        })
    }

    /// Parameters of a `def` (closed by `)`) or a `lambda` (closed by `:`).
    /// The closing token is left in place.
    fn parameters(&mut self, close: &str, annotated: bool) -> PResult<Arguments> {
        let mut args = Arguments::default();
        let mut keyword_only = false;

        while !self.at_op(close) {
            if self.eat_op("/") {
                if keyword_only || !args.posonly.is_empty() || args.args.is_empty() {
                    return Err(self.error("invalid '/' in parameter list"));
                }
                args.posonly = std::mem::take(&mut args.args);
            } else if self.eat_op("**") {
                args.kwarg = Some(self.parameter(annotated)?);
                self.eat_op(",");
                if !self.at_op(close) {
                    return Err(self.error("parameters cannot follow '**' parameter"));
                }
                break;
            } else if self.eat_op("*") {
                if keyword_only {
                    return Err(self.error("'*' parameter may appear only once"));
                }
                keyword_only = true;
                if !self.at_op(",") && !self.at_op(close) {
                    args.vararg = Some(self.parameter(annotated)?);
                }
            } else {
                let param = self.parameter(annotated)?;
                let default = if self.eat_op("=") {
                    Some(self.test()?)
                } else {
                    None
                };
                if keyword_only {
                    args.kwonly.push(param);
                    args.kw_defaults.push(default);
                } else {
                    match default {
                        Some(default) => args.defaults.push(default),
                        None if !args.defaults.is_empty() => {
                            return Err(self.error("non-default parameter follows default parameter"))
                        }
                        None => {}
                    }
                    args.args.push(param);
                }
            }

            if !self.eat_op(",") {
                break;
            }
        }
        Ok(args)
    }

    fn parameter(&mut self, annotated: bool) -> PResult<Arg> {
        let name = self.name()?;
        let annotation = if annotated && self.eat_op(":") {
            Some(self.test()?)
        } else {
            None
        };
        Ok(Arg { name, annotation })
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let test = self.named_test()?;
        let body = self.block()?;
        let mut elifs = Vec::new();
        while self.eat_keyword("elif") {
            let test = self.named_test()?;
            let body = self.block()?;
            elifs.push(ElifClause { test, body });
        }
        let orelse = self.else_block()?;
        Ok(Stmt::If {
            test,
            body,
            elifs,
            orelse,
        })
    }

    fn for_statement(&mut self, is_async: bool) -> PResult<Stmt> {
        self.advance();
        let target = self.target_list()?;
        self.expect_keyword("in")?;
        let iter = self.testlist_star()?;
        let body = self.block()?;
        let orelse = self.else_block()?;
        Ok(Stmt::For {
            target,
            iter,
            body,
            orelse,
            is_async,
        })
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let test = self.named_test()?;
        let body = self.block()?;
        let orelse = self.else_block()?;
        Ok(Stmt::While { test, body, orelse })
    }

    fn with_statement(&mut self, is_async: bool) -> PResult<Stmt> {
        self.advance();
        let mut items = Vec::new();
        loop {
            let context = self.test()?;
            let binding = if self.eat_keyword("as") {
                Some(self.bit_or()?)
            } else {
                None
            };
            items.push(WithItem { context, binding });
            if !self.eat_op(",") {
                break;
            }
        }
        let body = self.block()?;
        Ok(Stmt::With {
            items,
            body,
            is_async,
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let body = self.block()?;

        let mut handlers = Vec::new();
        while self.eat_keyword("except") {
            let mut kind = None;
            let mut name = None;
            if !self.at_op(":") {
                kind = Some(self.test()?);
                if self.eat_keyword("as") {
                    name = Some(self.name()?);
                }
            }
            let body = self.block()?;
            handlers.push(ExceptHandler { kind, name, body });
        }

        let orelse = if !handlers.is_empty() {
            self.else_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_keyword("finally") {
            self.block()?
        } else {
            Vec::new()
        };

        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn else_block(&mut self) -> PResult<Vec<Stmt>> {
        if self.eat_keyword("else") {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> PResult<Vec<Stmt>> {
        if !self.eat(&Tok::Newline) {
            return self.simple_statements();
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::EndOfFile) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(body)
    }

    // ---- expressions ----

    fn yield_or_testlist(&mut self) -> PResult<Expr> {
        if self.at_keyword("yield") {
            self.yield_expr()
        } else {
            self.testlist_star()
        }
    }

    fn yield_expr(&mut self) -> PResult<Expr> {
        self.advance();
        if self.eat_keyword("from") {
            return Ok(Expr::YieldFrom(Box::new(self.test()?)));
        }
        if self.at_statement_end() || self.at_op(")") || self.at_op("=") {
            return Ok(Expr::Yield(None));
        }
        Ok(Expr::Yield(Some(Box::new(self.testlist_star()?))))
    }

    /// Comma separated expressions, collapsed to a tuple when a comma is present.
    fn testlist_star(&mut self) -> PResult<Expr> {
        let first = self.star_or_test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_statement_end() || self.at_op("=") || self.at_op(")") || self.at_op(":") {
                break;
            }
            items.push(self.star_or_test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn star_or_test(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.nested(Self::bit_or)?)));
        }
        self.test()
    }

    fn star_or_named_test(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.nested(Self::bit_or)?)));
        }
        self.named_test()
    }

    fn target_list(&mut self) -> PResult<Expr> {
        let first = self.star_or_bit_or()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_keyword("in") {
                break;
            }
            items.push(self.star_or_bit_or()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn star_or_bit_or(&mut self) -> PResult<Expr> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.nested(Self::bit_or)?)));
        }
        self.bit_or()
    }

    fn named_test(&mut self) -> PResult<Expr> {
        let expr = self.test()?;
        if !self.at_op(":=") {
            return Ok(expr);
        }
        if !matches!(expr, Expr::Name(_)) {
            return Err(self.error("cannot use assignment expressions with this target"));
        }
        self.advance();
        let value = self.test()?;
        Ok(Expr::NamedExpr {
            target: Box::new(expr),
            value: Box::new(value),
        })
    }

    fn test(&mut self) -> PResult<Expr> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> PResult<Expr> {
        if self.eat_keyword("lambda") {
            let args = self.parameters(":", false)?;
            self.expect_op(":")?;
            let body = self.test()?;
            return Ok(Expr::Lambda {
                args: Box::new(args),
                body: Box::new(body),
            });
        }
        let body = self.or_test()?;
        if !self.eat_keyword("if") {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_keyword("else")?;
        let orelse = self.test()?;
        Ok(Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn or_test(&mut self) -> PResult<Expr> {
        self.bool_chain("or", BoolOp::Or, Self::and_test)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        self.bool_chain("and", BoolOp::And, Self::not_test)
    }

    fn bool_chain(
        &mut self,
        keyword: &str,
        op: BoolOp,
        operand: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let first = operand(self)?;
        if !self.at_keyword(keyword) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword(keyword) {
            values.push(operand(self)?);
        }
        Ok(Expr::BoolOp { op, values })
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.bit_or()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_operator() {
            ops.push(op);
            comparators.push(self.bit_or()?);
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
                comparators,
            })
        }
    }

    fn comparison_operator(&mut self) -> Option<CmpOp> {
        let op = match self.peek().tok {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") => CmpOp::NotEq,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::LtE,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::GtE,
            _ => match self.keyword() {
                Some("in") => CmpOp::In,
                Some("is") => CmpOp::Is,
                Some("not") if self.peek_is_keyword(1, "in") => CmpOp::NotIn,
                _ => return None,
            },
        };
        self.advance();
        match op {
            CmpOp::Is if self.eat_keyword("not") => Some(CmpOp::IsNot),
            CmpOp::NotIn => {
                self.advance();
                Some(op)
            }
            _ => Some(op),
        }
    }

    fn bit_or(&mut self) -> PResult<Expr> {
        self.chain(|p| p.binary_chain(&[("|", BinOp::BitOr)], Self::bit_xor))
    }

    fn bit_xor(&mut self) -> PResult<Expr> {
        self.chain(|p| p.binary_chain(&[("^", BinOp::BitXor)], Self::bit_and))
    }

    fn bit_and(&mut self) -> PResult<Expr> {
        self.chain(|p| p.binary_chain(&[("&", BinOp::BitAnd)], Self::shift))
    }

    fn shift(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            p.binary_chain(&[("<<", BinOp::LShift), (">>", BinOp::RShift)], Self::arith)
        })
    }

    fn arith(&mut self) -> PResult<Expr> {
        self.chain(|p| p.binary_chain(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term))
    }

    fn term(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            p.binary_chain(
                &[
                    ("*", BinOp::Mul),
                    ("/", BinOp::Div),
                    ("//", BinOp::FloorDiv),
                    ("%", BinOp::Mod),
                    ("@", BinOp::MatMul),
                ],
                Self::factor,
            )
        })
    }

    fn binary_chain(
        &mut self,
        operators: &[(&str, BinOp)],
        operand: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut left = operand(self)?;
        'outer: loop {
            for (symbol, op) in operators {
                if self.eat_op(symbol) {
                    let right = operand(self)?;
                    self.lengthen()?;
                    left = Expr::BinOp {
                        left: Box::new(left),
                        op: *op,
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek().tok {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            Tok::Op("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let operand = self.nested(Self::factor)?;
                Ok(Expr::UnaryOp {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.power(),
        }
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = if self.eat_keyword("await") {
            Expr::Await(Box::new(self.primary()?))
        } else {
            self.primary()?
        };
        if self.eat_op("**") {
            let exponent = self.nested(Self::factor)?;
            return Ok(Expr::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> PResult<Expr> {
        self.chain(Self::trailers)
    }

    /// An atom followed by any number of `.name`, `(...)` and `[...]`.
    fn trailers(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op(".") {
                let attr = self.name()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else if self.eat_op("(") {
                let (args, keywords) = self.arguments()?;
                expr = Expr::Call(Call {
                    func: Box::new(expr),
                    args,
                    keywords,
                });
            } else if self.eat_op("[") {
                let index = self.subscript_list()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
            self.lengthen()?;
        }
    }

    /// Parses an argument list after `(`, consuming the closing `)`.
    fn arguments(&mut self) -> PResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();

        while !self.eat_op(")") {
            if self.eat_op("**") {
                keywords.push(Keyword {
                    arg: None,
                    value: self.test()?,
                });
            } else if self.eat_op("*") {
                args.push(Expr::Starred(Box::new(self.test()?)));
            } else if self.is_keyword_argument() {
                let name = self.name()?;
                self.expect_op("=")?;
                if keywords.iter().any(|kw| kw.arg.as_deref() == Some(name.as_str())) {
                    return Err(self.error(&format!("keyword argument repeated: {}", name)));
                }
                keywords.push(Keyword {
                    arg: Some(name),
                    value: self.test()?,
                });
            } else {
                if !keywords.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.named_test()?;
                if self.at_comprehension() {
                    let generators = self.comprehension_clauses()?;
                    args.push(Expr::GeneratorExp {
                        elt: Box::new(arg),
                        generators,
                    });
                } else {
                    args.push(arg);
                }
            }

            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }

        Ok((args, keywords))
    }

    fn is_keyword_argument(&self) -> bool {
        matches!(&self.peek().tok, Tok::Name(n) if !is_keyword(n))
            && matches!(self.peek_at(1), Tok::Op("="))
    }

    fn subscript_list(&mut self) -> PResult<Expr> {
        let first = self.subscript()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.subscript()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let lower = if self.at_op(":") {
            None
        } else {
            let expr = self.named_test()?;
            if !self.at_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":")?;

        let upper = if self.at_op(":") || self.at_op("]") || self.at_op(",") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !(self.at_op("]") || self.at_op(",")) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn atom(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        match token.tok {
            Tok::Int(value) => {
                self.advance();
                Ok(Expr::Constant(Constant::Int(value)))
            }
            Tok::Float(value) => {
                self.advance();
                Ok(Expr::Constant(Constant::Float(value)))
            }
            Tok::Imaginary(value) => {
                self.advance();
                Ok(Expr::Constant(Constant::Complex(value)))
            }
            Tok::Str(_) | Tok::Bytes(_) | Tok::FString(_) => self.strings(),
            Tok::Op("...") => {
                self.advance();
                Ok(Expr::Constant(Constant::Ellipsis))
            }
            Tok::Op("(") => {
                self.advance();
                self.parenthesized()
            }
            Tok::Op("[") => {
                self.advance();
                self.list()
            }
            Tok::Op("{") => {
                self.advance();
                self.dict_or_set()
            }
            Tok::Name(name) => {
                let constant = match name.as_str() {
                    "None" => Some(Constant::None),
                    "True" => Some(Constant::Bool(true)),
                    "False" => Some(Constant::Bool(false)),
                    _ => None,
                };
                if let Some(constant) = constant {
                    self.advance();
                    return Ok(Expr::Constant(constant));
                }
                if is_keyword(&name) {
                    return Err(self.error(&format!("unexpected keyword '{}'", name)));
                }
                self.advance();
                Ok(Expr::Name(name))
            }
            Tok::Newline | Tok::EndOfFile => Err(self.error("unexpected end of input")),
            Tok::Indent => Err(self.error("unexpected indent")),
            Tok::Dedent => Err(self.error("unexpected dedent")),
            Tok::Op(op) => Err(self.error(&format!("unexpected '{}'", op))),
        }
    }

    /// Adjacent string literals concatenate into one constant.
    fn strings(&mut self) -> PResult<Expr> {
        let mut text = String::new();
        let mut bytes: Option<Vec<u8>> = None;
        let mut formatted = false;
        let mut saw_text = false;

        loop {
            match self.peek().tok.clone() {
                Tok::Str(s) => {
                    text.push_str(&s);
                    saw_text = true;
                }
                Tok::FString(s) => {
                    text.push_str(&s);
                    saw_text = true;
                    formatted = true;
                }
                Tok::Bytes(b) => bytes.get_or_insert_with(Vec::new).extend(b),
                _ => break,
            }
            if saw_text && bytes.is_some() {
                return Err(self.error("cannot mix bytes and nonbytes literals"));
            }
            self.advance();
        }

        Ok(match bytes {
            Some(b) => Expr::Constant(Constant::Bytes(b)),
            None if formatted => Expr::FormattedString(text),
            None => Expr::Constant(Constant::Str(text)),
        })
    }

    /// Contents of `( ... )` after the opening parenthesis.
    fn parenthesized(&mut self) -> PResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        if self.at_keyword("yield") {
            let expr = self.yield_expr()?;
            self.expect_op(")")?;
            return Ok(expr);
        }
        let first = self.star_or_named_test()?;
        if self.at_comprehension() {
            let generators = self.comprehension_clauses()?;
            self.expect_op(")")?;
            return Ok(Expr::GeneratorExp {
                elt: Box::new(first),
                generators,
            });
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        self.expect_op(",")?;
        let mut items = vec![first];
        items.extend(self.sequence_items(")")?);
        Ok(Expr::Tuple(items))
    }

    /// Contents of `[ ... ]` after the opening bracket.
    fn list(&mut self) -> PResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_or_named_test()?;
        if self.at_comprehension() {
            let generators = self.comprehension_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut items = vec![first];
        if !self.eat_op("]") {
            self.expect_op(",")?;
            items.extend(self.sequence_items("]")?);
        }
        Ok(Expr::List(items))
    }

    /// Comma separated items up to and including `close`.
    fn sequence_items(&mut self, close: &str) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat_op(close) {
            items.push(self.star_or_named_test()?);
            if self.at_comprehension() {
                return Err(self.error("comprehension must be the only element"));
            }
            if !self.eat_op(",") {
                self.expect_op(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn dict_or_set(&mut self) -> PResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }

        if self.at_op("**") {
            return self.dict_entries(Vec::new());
        }

        let first = self.star_or_named_test()?;
        if self.eat_op(":") {
            let value = self.test()?;
            if self.at_comprehension() {
                let generators = self.comprehension_clauses()?;
                self.expect_op("}")?;
                return Ok(Expr::DictComp {
                    key: Box::new(first),
                    value: Box::new(value),
                    generators,
                });
            }
            let entries = vec![(Some(first), value)];
            if self.eat_op("}") {
                return Ok(Expr::Dict(entries));
            }
            self.expect_op(",")?;
            return self.dict_entries(entries);
        }

        if self.at_comprehension() {
            let generators = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::SetComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut items = vec![first];
        if !self.eat_op("}") {
            self.expect_op(",")?;
            items.extend(self.sequence_items("}")?);
        }
        Ok(Expr::Set(items))
    }

    fn dict_entries(&mut self, mut entries: Vec<(Option<Expr>, Expr)>) -> PResult<Expr> {
        while !self.eat_op("}") {
            if self.eat_op("**") {
                entries.push((None, self.nested(Self::bit_or)?));
            } else {
                let key = self.test()?;
                self.expect_op(":")?;
                entries.push((Some(key), self.test()?));
            }
            if self.at_comprehension() {
                return Err(self.error("comprehension must be the only element"));
            }
            if !self.eat_op(",") {
                self.expect_op("}")?;
                break;
            }
        }
        Ok(Expr::Dict(entries))
    }

    fn at_comprehension(&self) -> bool {
        self.at_keyword("for") || (self.at_keyword("async") && self.peek_is_keyword(1, "for"))
    }

    /// The `for ... in ... if ...` clauses following a comprehension element.
    fn comprehension_clauses(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.at_comprehension() {
            let is_async = self.eat_keyword("async");
            self.expect_keyword("for")?;
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_keyword("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                ifs,
                is_async,
            });
        }
        Ok(generators)
    }

    // ---- token helpers ----

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + offset).min(last)].tok
    }

    fn peek_is_keyword(&self, offset: usize, kw: &str) -> bool {
        matches!(self.peek_at(offset), Tok::Name(name) if name == kw)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, tok: &Tok) -> bool {
        &self.peek().tok == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(&self.peek().tok, Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", op)))
        }
    }

    /// The current token when it is a reserved word.
    fn keyword(&self) -> Option<&'static str> {
        match &self.peek().tok {
            Tok::Name(n) => KEYWORDS.iter().copied().find(|kw| *kw == n.as_str()),
            _ => None,
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        self.keyword() == Some(kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", kw)))
        }
    }

    fn name(&mut self) -> PResult<String> {
        match &self.peek().tok {
            Tok::Name(n) if !is_keyword(n) => {
                let name = n.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn name_list(&mut self) -> PResult<Vec<String>> {
        let mut names = vec![self.name()?];
        while self.eat_op(",") {
            names.push(self.name()?);
        }
        Ok(names)
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.name()?);
        }
        Ok(name)
    }

    fn at_statement_end(&self) -> bool {
        self.at(&Tok::Newline) || self.at(&Tok::EndOfFile) || self.at_op(";")
    }

    fn expect_line_end(&mut self) -> PResult<()> {
        if self.eat(&Tok::Newline) || self.at(&Tok::EndOfFile) || self.at(&Tok::Dedent) {
            Ok(())
        } else {
            Err(self.error("invalid syntax"))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let token = self.peek();
        ParseError::new(token.line, token.column, message)
    }
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

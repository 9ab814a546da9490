//! Recursive descent parser from tokens to the AST in [`crate::expressions`].
//!
//! Constructs outside the supported subset (classes, imports, generators, ...) are
//! rejected here with a `SyntaxError` naming the construct, so later phases only ever
//! see code they can compile.

use num_bigint::BigInt;

use crate::{
    exception_private::ExcType,
    exception_public::{CodeLoc, CodeRange, StackFrame, TetherException},
    expressions::{
        CallArgs, Comprehension, ExceptHandler, Expr, ExprLoc, FunctionDef, Identifier, Literal, Node, Param,
        ScopeInfo, Target, Try,
    },
    fstring::{ConversionFlag, FStringPart, ParsedFormatSpec},
    intern::{InternerBuilder, LAMBDA_STRING_ID, StringId},
    lexer::{Keyword, Op, Tok, Token, tokenize, tokenize_at, unescape},
    operators::{CmpOperator, Operator, UnaryOperator},
};

/// A syntax error with the location it was detected at.
#[derive(Debug, Clone)]
pub(crate) struct ParseError {
    msg: String,
    position: CodeRange,
}

impl ParseError {
    pub(crate) fn syntax(msg: impl Into<String>, position: CodeRange) -> Self {
        Self {
            msg: msg.into(),
            position,
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    pub fn position(&self) -> CodeRange {
        self.position
    }

    pub fn into_exception(self, filename: &str, source: &str) -> TetherException {
        TetherException::new_full(
            ExcType::SyntaxError,
            Some(self.msg),
            vec![StackFrame::new(self.position, filename, None, source)],
        )
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Parses a module into its statements.
pub(crate) fn parse(source: &str, interner: &mut InternerBuilder) -> ParseResult<Vec<Node>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens, interner);
    let mut body = Vec::new();
    while !parser.at(&Tok::EndOfFile) {
        parser.statement(&mut body)?;
    }
    Ok(body)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    prev_end: CodeLoc,
    interner: &'a mut InternerBuilder,
    /// Loops enclosing the current statement within the current function.
    loop_depth: usize,
    function_depth: usize,
    /// Depth of the expression tree being built at the current position.
    depth: usize,
}

/// Deepest expression tree the parser builds; later passes recurse over it.
const MAX_EXPR_DEPTH: usize = 200;

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, interner: &'a mut InternerBuilder) -> Self {
        Self {
            tokens,
            pos: 0,
            prev_end: CodeLoc::new(1, 1),
            interner,
            loop_depth: 0,
            function_depth: 0,
            depth: 0,
        }
    }

    // token helpers

    fn token(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn peek(&self) -> &Tok {
        &self.token(0).tok
    }

    fn start(&self) -> CodeLoc {
        self.token(0).range.start()
    }

    fn here(&self) -> CodeRange {
        self.token(0).range
    }

    fn range_from(&self, start: CodeLoc) -> CodeRange {
        CodeRange::new(start, self.prev_end)
    }

    fn advance(&mut self) -> Token {
        let token = self.token(0).clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        self.prev_end = token.range.end();
        token
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: Op) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), Tok::Keyword(k) if *k == kw)
    }

    fn eat_op(&mut self, op: Op) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: Op) -> ParseResult<CodeRange> {
        if self.at_op(op) {
            Ok(self.advance().range)
        } else {
            Err(self.error_expected(&format!("'{op}'")))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> ParseResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error_expected(&format!("'{kw}'")))
        }
    }

    fn expect_name(&mut self) -> ParseResult<(StringId, CodeRange)> {
        match self.peek() {
            Tok::Name(name) => {
                let name = name.clone();
                let range = self.advance().range;
                Ok((self.interner.intern(&name), range))
            }
            _ => Err(self.error_expected("a name")),
        }
    }

    fn expect_newline(&mut self) -> ParseResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::EndOfFile => Ok(()),
            _ => Err(self.invalid_syntax()),
        }
    }

    fn invalid_syntax(&self) -> ParseError {
        match self.peek() {
            Tok::Indent => ParseError::syntax("unexpected indent", self.here()),
            Tok::EndOfFile => ParseError::syntax("unexpected EOF while parsing", self.here()),
            _ => ParseError::syntax("invalid syntax", self.here()),
        }
    }

    fn error_expected(&self, what: &str) -> ParseError {
        if matches!(self.peek(), Tok::EndOfFile) {
            return ParseError::syntax("unexpected EOF while parsing", self.here());
        }
        ParseError::syntax(
            format!("invalid syntax: expected {what}, found {}", self.peek().describe()),
            self.here(),
        )
    }

    /// Counts one more level of expression nesting.
    fn descend(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_EXPR_DEPTH {
            return Err(ParseError::syntax("expression is nested too deeply", self.here()));
        }
        Ok(())
    }

    fn not_supported(&self, what: &str) -> ParseError {
        ParseError::syntax(format!("{what} are not supported"), self.here())
    }

    // statements

    /// Parses one statement; a line of `;` separated simple statements adds several.
    fn statement(&mut self, out: &mut Vec<Node>) -> ParseResult<()> {
        let node = match self.peek() {
            Tok::Keyword(Keyword::If) => self.if_statement()?,
            Tok::Keyword(Keyword::While) => self.while_statement()?,
            Tok::Keyword(Keyword::For) => self.for_statement()?,
            Tok::Keyword(Keyword::Def) => self.function_def()?,
            Tok::Keyword(Keyword::Try) => self.try_statement()?,
            Tok::Keyword(Keyword::Class) => return Err(self.not_supported("class definitions")),
            Tok::Keyword(Keyword::With) => return Err(self.not_supported("'with' statements")),
            Tok::Keyword(Keyword::Async) => return Err(self.not_supported("async functions and statements")),
            Tok::Op(Op::At) => return Err(self.not_supported("decorators")),
            Tok::Indent => return Err(self.invalid_syntax()),
            _ => return self.simple_statements(out),
        };
        out.push(node);
        Ok(())
    }

    fn simple_statements(&mut self, out: &mut Vec<Node>) -> ParseResult<()> {
        loop {
            let node = self.simple_statement()?;
            out.push(node);
            if !self.eat_op(Op::Semicolon) {
                break;
            }
            if matches!(self.peek(), Tok::Newline | Tok::EndOfFile) {
                break;
            }
        }
        self.expect_newline()
    }

    fn simple_statement(&mut self) -> ParseResult<Node> {
        let start = self.start();
        match self.peek().clone() {
            Tok::Keyword(Keyword::Pass) => {
                self.advance();
                Ok(Node::Pass)
            }
            Tok::Keyword(kw @ (Keyword::Break | Keyword::Continue)) => {
                let range = self.advance().range;
                if self.loop_depth == 0 {
                    return Err(ParseError::syntax(format!("'{kw}' outside loop"), range));
                }
                Ok(if kw == Keyword::Break {
                    Node::Break(range)
                } else {
                    Node::Continue(range)
                })
            }
            Tok::Keyword(Keyword::Return) => {
                let range = self.advance().range;
                if self.function_depth == 0 {
                    return Err(ParseError::syntax("'return' outside function", range));
                }
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.testlist()?)
                };
                Ok(Node::Return(value, self.range_from(start)))
            }
            Tok::Keyword(Keyword::Raise) => {
                self.advance();
                let exc = if self.at_statement_end() { None } else { Some(self.test()?) };
                if self.at_kw(Keyword::From) {
                    return Err(self.not_supported("'raise ... from' clauses"));
                }
                Ok(Node::Raise(exc, self.range_from(start)))
            }
            Tok::Keyword(kw @ (Keyword::Global | Keyword::Nonlocal)) => {
                self.advance();
                let mut names = vec![self.expect_name()?.0];
                while self.eat_op(Op::Comma) {
                    names.push(self.expect_name()?.0);
                }
                let range = self.range_from(start);
                if kw == Keyword::Global {
                    Ok(Node::Global(names, range))
                } else {
                    if self.function_depth == 0 {
                        return Err(ParseError::syntax(
                            "nonlocal declaration not allowed at module level",
                            range,
                        ));
                    }
                    Ok(Node::Nonlocal(names, range))
                }
            }
            Tok::Keyword(Keyword::Assert) => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(Op::Comma) { Some(self.test()?) } else { None };
                Ok(Node::Assert { test, msg })
            }
            Tok::Keyword(Keyword::Import | Keyword::From) => Err(self.not_supported("import statements")),
            Tok::Keyword(Keyword::Del) => Err(self.not_supported("'del' statements")),
            Tok::Keyword(Keyword::Yield) => Err(self.not_supported("generators")),
            _ => self.expression_statement(),
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::EndOfFile | Tok::Op(Op::Semicolon))
    }

    fn expression_statement(&mut self) -> ParseResult<Node> {
        let first = self.testlist()?;
        if self.at_op(Op::Assign) {
            let mut exprs = vec![first];
            while self.eat_op(Op::Assign) {
                exprs.push(self.testlist()?);
            }
            let value = exprs.pop().expect("at least two expressions");
            let targets = exprs.into_iter().map(to_target).collect::<ParseResult<_>>()?;
            return Ok(Node::Assign { targets, value });
        }
        if let Some(op) = self.augmented_operator() {
            let op_range = self.advance().range;
            let target = to_target(first)?;
            if matches!(target, Target::Tuple(..)) {
                return Err(ParseError::syntax(
                    "'tuple' is an illegal expression for augmented assignment",
                    op_range,
                ));
            }
            let value = self.testlist()?;
            return Ok(Node::OpAssign { target, op, value });
        }
        if self.eat_op(Op::Colon) {
            // annotated assignment, the annotation is ignored
            let target = to_target(first)?;
            if matches!(target, Target::Tuple(..)) {
                return Err(ParseError::syntax("only single target can be annotated", target.position()));
            }
            self.test()?;
            if self.eat_op(Op::Assign) {
                let value = self.testlist()?;
                return Ok(Node::Assign {
                    targets: vec![target],
                    value,
                });
            }
            return Ok(Node::Pass);
        }
        if self.at_op(Op::Walrus) {
            return Err(self.not_supported("assignment expressions"));
        }
        Ok(Node::Expr(first))
    }

    fn augmented_operator(&self) -> Option<Operator> {
        let Tok::Op(op) = self.peek() else { return None };
        Some(match op {
            Op::PlusEq => Operator::Add,
            Op::MinusEq => Operator::Sub,
            Op::StarEq => Operator::Mult,
            Op::SlashEq => Operator::Div,
            Op::DoubleSlashEq => Operator::FloorDiv,
            Op::PercentEq => Operator::Mod,
            Op::DoubleStarEq => Operator::Pow,
            Op::AmperEq => Operator::BitAnd,
            Op::PipeEq => Operator::BitOr,
            Op::CaretEq => Operator::BitXor,
            Op::LShiftEq => Operator::LShift,
            Op::RShiftEq => Operator::RShift,
            _ => return None,
        })
    }

    /// `: NEWLINE INDENT stmt+ DEDENT`, or simple statements on the same line.
    fn block(&mut self) -> ParseResult<Vec<Node>> {
        self.expect_op(Op::Colon)?;
        let mut body = Vec::new();
        if matches!(self.peek(), Tok::Newline) {
            self.advance();
            if !matches!(self.peek(), Tok::Indent) {
                return Err(ParseError::syntax("expected an indented block", self.here()));
            }
            self.advance();
            while !matches!(self.peek(), Tok::Dedent | Tok::EndOfFile) {
                self.statement(&mut body)?;
            }
            if matches!(self.peek(), Tok::Dedent) {
                self.advance();
            }
        } else {
            self.simple_statements(&mut body)?;
        }
        Ok(body)
    }

    fn loop_block(&mut self) -> ParseResult<Vec<Node>> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    fn if_statement(&mut self) -> ParseResult<Node> {
        // `if` or `elif`
        self.advance();
        let test = self.namedexpr_test()?;
        let body = self.block()?;
        let or_else = if self.at_kw(Keyword::Elif) {
            vec![self.if_statement()?]
        } else if self.eat_kw(Keyword::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Node::If { test, body, or_else })
    }

    fn while_statement(&mut self) -> ParseResult<Node> {
        self.advance();
        let test = self.namedexpr_test()?;
        let body = self.loop_block()?;
        let or_else = if self.eat_kw(Keyword::Else) { self.block()? } else { Vec::new() };
        Ok(Node::While { test, body, or_else })
    }

    fn for_statement(&mut self) -> ParseResult<Node> {
        self.advance();
        let target = self.target_list()?;
        self.expect_kw(Keyword::In)?;
        let iter = self.testlist()?;
        let body = self.loop_block()?;
        let or_else = if self.eat_kw(Keyword::Else) { self.block()? } else { Vec::new() };
        Ok(Node::For {
            target,
            iter,
            body,
            or_else,
        })
    }

    /// The targets of a `for` loop or comprehension, stopping before `in`.
    fn target_list(&mut self) -> ParseResult<Target> {
        let start = self.start();
        let first = self.bit_or()?;
        if !self.at_op(Op::Comma) {
            return to_target(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_kw(Keyword::In) {
                break;
            }
            items.push(self.bit_or()?);
        }
        let position = self.range_from(start);
        to_target(ExprLoc::new(position, Expr::Tuple(items)))
    }

    fn try_statement(&mut self) -> ParseResult<Node> {
        let start = self.start();
        self.advance();
        let body = self.block()?;
        let mut handlers: Vec<ExceptHandler> = Vec::new();
        while self.at_kw(Keyword::Except) {
            let handler_start = self.start();
            if handlers.last().is_some_and(|h| h.exc_type.is_none()) {
                return Err(ParseError::syntax("default 'except:' must be last", self.here()));
            }
            self.advance();
            if self.at_op(Op::Star) {
                return Err(self.not_supported("exception groups"));
            }
            let (exc_type, name) = if self.at_op(Op::Colon) {
                (None, None)
            } else {
                let exc_type = self.test()?;
                let name = if self.eat_kw(Keyword::As) {
                    let (name, range) = self.expect_name()?;
                    Some(Identifier::new(name, range))
                } else {
                    None
                };
                (Some(exc_type), name)
            };
            let position = self.range_from(handler_start);
            let handler_body = self.block()?;
            handlers.push(ExceptHandler {
                exc_type,
                name,
                body: handler_body,
                position,
            });
        }
        let or_else = if !handlers.is_empty() && self.eat_kw(Keyword::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        let finally = if self.eat_kw(Keyword::Finally) { self.block()? } else { Vec::new() };
        if handlers.is_empty() && finally.is_empty() {
            return Err(ParseError::syntax("expected 'except' or 'finally' block", self.here()));
        }
        Ok(Node::Try(Box::new(Try {
            body,
            handlers,
            or_else,
            finally,
            position: self.range_from(start),
        })))
    }

    fn function_def(&mut self) -> ParseResult<Node> {
        let start = self.start();
        self.advance();
        let (name, name_range) = self.expect_name()?;
        self.expect_op(Op::LParen)?;
        let params = self.parameters(Op::RParen)?;
        self.expect_op(Op::RParen)?;
        if self.eat_op(Op::Arrow) {
            self.test()?;
        }
        let position = self.range_from(start);
        let body = self.function_body(|parser| parser.block())?;
        Ok(Node::FunctionDef(Box::new(FunctionDef {
            name: Identifier::new(name, name_range),
            params,
            body,
            position,
            is_lambda: false,
            scope: ScopeInfo::default(),
        })))
    }

    /// Runs `parse` with loop state reset, as loops don't extend into nested functions.
    fn function_body<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let saved_loops = std::mem::take(&mut self.loop_depth);
        self.function_depth += 1;
        let result = parse(self);
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        result
    }

    /// Parameters up to (not including) `end`; annotations are accepted and ignored.
    fn parameters(&mut self, end: Op) -> ParseResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        while !self.at_op(end) {
            if self.at_op(Op::Star) || self.at_op(Op::DoubleStar) || self.at_op(Op::Slash) {
                return Err(self.not_supported("'*', '**' and '/' parameters"));
            }
            let (name, range) = self.expect_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(ParseError::syntax(
                    format!("duplicate argument '{}' in function definition", self.interner.get_str(name)),
                    range,
                ));
            }
            if end == Op::RParen && self.eat_op(Op::Colon) {
                self.test()?;
            }
            let default = if self.eat_op(Op::Assign) { Some(self.test()?) } else { None };
            if default.is_none() && params.last().is_some_and(|p| p.default.is_some()) {
                return Err(ParseError::syntax(
                    "parameter without a default follows parameter with a default",
                    range,
                ));
            }
            params.push(Param { name, default });
            if !self.eat_op(Op::Comma) {
                break;
            }
        }
        Ok(params)
    }

    // expressions

    /// `test (',' test)* [',']`, a tuple when there is a comma.
    fn testlist(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let first = self.test()?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_expression_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(items)))
    }

    fn at_expression_end(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Newline
                | Tok::EndOfFile
                | Tok::Op(
                    Op::Assign
                        | Op::Semicolon
                        | Op::RParen
                        | Op::RBracket
                        | Op::RBrace
                        | Op::Colon
                        | Op::PlusEq
                        | Op::MinusEq
                        | Op::StarEq
                        | Op::SlashEq
                        | Op::DoubleSlashEq
                        | Op::PercentEq
                        | Op::DoubleStarEq
                        | Op::AmperEq
                        | Op::PipeEq
                        | Op::CaretEq
                        | Op::LShiftEq
                        | Op::RShiftEq
                )
        )
    }

    fn namedexpr_test(&mut self) -> ParseResult<ExprLoc> {
        let expr = self.test()?;
        if self.at_op(Op::Walrus) {
            return Err(self.not_supported("assignment expressions"));
        }
        Ok(expr)
    }

    /// A full expression: conditional expressions and lambdas.
    fn test(&mut self) -> ParseResult<ExprLoc> {
        self.descend()?;
        let expr = self.conditional();
        self.depth -= 1;
        expr
    }

    fn conditional(&mut self) -> ParseResult<ExprLoc> {
        if self.at_kw(Keyword::Lambda) {
            return self.lambda();
        }
        let start = self.start();
        let body = self.or_test()?;
        if !self.eat_kw(Keyword::If) {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_kw(Keyword::Else)?;
        let orelse = self.test()?;
        Ok(ExprLoc::new(
            self.range_from(start),
            Expr::IfElse {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
        ))
    }

    fn lambda(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        self.advance();
        let params = self.parameters(Op::Colon)?;
        self.expect_op(Op::Colon)?;
        let body = self.function_body(Self::test)?;
        let position = self.range_from(start);
        let body_position = body.position;
        Ok(ExprLoc::new(
            position,
            Expr::Lambda(Box::new(FunctionDef {
                name: Identifier::new(LAMBDA_STRING_ID, position),
                params,
                body: vec![Node::Return(Some(body), body_position)],
                position,
                is_lambda: true,
                scope: ScopeInfo::default(),
            })),
        ))
    }

    fn or_test(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let depth = self.depth;
        let mut left = self.and_test()?;
        while self.eat_kw(Keyword::Or) {
            self.descend()?;
            let right = self.and_test()?;
            left = ExprLoc::new(self.range_from(start), Expr::Or(Box::new(left), Box::new(right)));
        }
        self.depth = depth;
        Ok(left)
    }

    fn and_test(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let depth = self.depth;
        let mut left = self.not_test()?;
        while self.eat_kw(Keyword::And) {
            self.descend()?;
            let right = self.not_test()?;
            left = ExprLoc::new(self.range_from(start), Expr::And(Box::new(left), Box::new(right)));
        }
        self.depth = depth;
        Ok(left)
    }

    fn not_test(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        if self.eat_kw(Keyword::Not) {
            self.descend()?;
            let operand = self.not_test()?;
            self.depth -= 1;
            return Ok(ExprLoc::new(self.range_from(start), Expr::Not(Box::new(operand))));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let left = self.bit_or()?;
        let mut ops = Vec::new();
        while let Some(op) = self.comparison_operator() {
            let right = self.bit_or()?;
            ops.push((op, right));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(ExprLoc::new(
            self.range_from(start),
            Expr::CmpOp {
                left: Box::new(left),
                ops,
            },
        ))
    }

    /// Consumes a comparison operator, including `not in` and `is not`.
    fn comparison_operator(&mut self) -> Option<CmpOperator> {
        let op = match self.peek() {
            Tok::Op(Op::EqEq) => CmpOperator::Eq,
            Tok::Op(Op::NotEq) => CmpOperator::NotEq,
            Tok::Op(Op::Lt) => CmpOperator::Lt,
            Tok::Op(Op::LtE) => CmpOperator::LtE,
            Tok::Op(Op::Gt) => CmpOperator::Gt,
            Tok::Op(Op::GtE) => CmpOperator::GtE,
            Tok::Keyword(Keyword::In) => CmpOperator::In,
            Tok::Keyword(Keyword::Is) => {
                self.advance();
                return Some(if self.eat_kw(Keyword::Not) {
                    CmpOperator::IsNot
                } else {
                    CmpOperator::Is
                });
            }
            Tok::Keyword(Keyword::Not) if matches!(self.token(1).tok, Tok::Keyword(Keyword::In)) => {
                self.advance();
                self.advance();
                return Some(CmpOperator::NotIn);
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn binary_level(
        &mut self,
        operand: fn(&mut Self) -> ParseResult<ExprLoc>,
        operator: fn(&Tok) -> Option<Operator>,
    ) -> ParseResult<ExprLoc> {
        let start = self.start();
        let depth = self.depth;
        let mut left = operand(self)?;
        while let Some(op) = operator(self.peek()) {
            self.advance();
            self.descend()?;
            let right = operand(self)?;
            left = ExprLoc::new(
                self.range_from(start),
                Expr::Op {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
            );
        }
        self.depth = depth;
        Ok(left)
    }

    fn bit_or(&mut self) -> ParseResult<ExprLoc> {
        self.binary_level(Self::bit_xor, |tok| {
            matches!(tok, Tok::Op(Op::Pipe)).then_some(Operator::BitOr)
        })
    }

    fn bit_xor(&mut self) -> ParseResult<ExprLoc> {
        self.binary_level(Self::bit_and, |tok| {
            matches!(tok, Tok::Op(Op::Caret)).then_some(Operator::BitXor)
        })
    }

    fn bit_and(&mut self) -> ParseResult<ExprLoc> {
        self.binary_level(Self::shift, |tok| {
            matches!(tok, Tok::Op(Op::Amper)).then_some(Operator::BitAnd)
        })
    }

    fn shift(&mut self) -> ParseResult<ExprLoc> {
        self.binary_level(Self::arith, |tok| match tok {
            Tok::Op(Op::LShift) => Some(Operator::LShift),
            Tok::Op(Op::RShift) => Some(Operator::RShift),
            _ => None,
        })
    }

    fn arith(&mut self) -> ParseResult<ExprLoc> {
        self.binary_level(Self::term, |tok| match tok {
            Tok::Op(Op::Plus) => Some(Operator::Add),
            Tok::Op(Op::Minus) => Some(Operator::Sub),
            _ => None,
        })
    }

    fn term(&mut self) -> ParseResult<ExprLoc> {
        if self.at_op(Op::At) {
            return Err(self.not_supported("matrix multiplication operators"));
        }
        self.binary_level(Self::factor, |tok| match tok {
            Tok::Op(Op::Star) => Some(Operator::Mult),
            Tok::Op(Op::Slash) => Some(Operator::Div),
            Tok::Op(Op::DoubleSlash) => Some(Operator::FloorDiv),
            Tok::Op(Op::Percent) => Some(Operator::Mod),
            _ => None,
        })
    }

    fn factor(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let op = match self.peek() {
            Tok::Op(Op::Minus) => UnaryOperator::Neg,
            Tok::Op(Op::Plus) => UnaryOperator::Pos,
            Tok::Op(Op::Tilde) => UnaryOperator::Invert,
            _ => return self.power(),
        };
        self.advance();
        self.descend()?;
        let operand = self.factor()?;
        self.depth -= 1;
        let position = self.range_from(start);
        // fold negative numeric literals so `-9223372036854775808` stays an i64
        if op == UnaryOperator::Neg
            && let Expr::Literal(literal) = &operand.expr
        {
            let folded = match literal {
                Literal::Int(i) => Some(match i.checked_neg() {
                    Some(neg) => Literal::Int(neg),
                    None => Literal::LongInt(-BigInt::from(*i)),
                }),
                Literal::LongInt(big) => Some(match i64::try_from(-big) {
                    Ok(i) => Literal::Int(i),
                    Err(_) => Literal::LongInt(-big),
                }),
                Literal::Float(f) => Some(Literal::Float(-f)),
                _ => None,
            };
            if let Some(literal) = folded {
                return Ok(ExprLoc::new(position, Expr::Literal(literal)));
            }
        }
        Ok(ExprLoc::new(
            position,
            Expr::Unary {
                op,
                operand: Box::new(operand),
            },
        ))
    }

    fn power(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let base = self.await_primary()?;
        if !self.eat_op(Op::DoubleStar) {
            return Ok(base);
        }
        // right associative, and binds tighter than a unary operator on its left only
        self.descend()?;
        let exponent = self.factor()?;
        self.depth -= 1;
        Ok(ExprLoc::new(
            self.range_from(start),
            Expr::Op {
                left: Box::new(base),
                op: Operator::Pow,
                right: Box::new(exponent),
            },
        ))
    }

    fn await_primary(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        if self.eat_kw(Keyword::Await) {
            let value = self.primary()?;
            return Ok(ExprLoc::new(self.range_from(start), Expr::Await(Box::new(value))));
        }
        self.primary()
    }

    /// An atom followed by calls, subscripts and attribute accesses.
    fn primary(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let depth = self.depth;
        let mut expr = self.atom()?;
        loop {
            if matches!(self.peek(), Tok::Op(Op::LParen | Op::LBracket | Op::Dot)) {
                self.descend()?;
            }
            if self.eat_op(Op::LParen) {
                let args = self.call_args()?;
                expr = ExprLoc::new(
                    self.range_from(start),
                    Expr::Call {
                        callable: Box::new(expr),
                        args,
                    },
                );
            } else if self.eat_op(Op::LBracket) {
                let index = self.subscript()?;
                self.expect_op(Op::RBracket)?;
                expr = ExprLoc::new(
                    self.range_from(start),
                    Expr::Subscript {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                );
            } else if self.eat_op(Op::Dot) {
                let (attr, _) = self.expect_name()?;
                if self.eat_op(Op::LParen) {
                    let args = self.call_args()?;
                    expr = ExprLoc::new(
                        self.range_from(start),
                        Expr::AttrCall {
                            object: Box::new(expr),
                            attr,
                            args,
                        },
                    );
                } else {
                    expr = ExprLoc::new(
                        self.range_from(start),
                        Expr::Attr {
                            object: Box::new(expr),
                            attr,
                        },
                    );
                }
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    /// Arguments after `(`, consuming the closing `)`.
    fn call_args(&mut self) -> ParseResult<CallArgs> {
        let mut args = CallArgs::default();
        loop {
            if self.eat_op(Op::RParen) {
                return Ok(args);
            }
            if self.at_op(Op::Star) || self.at_op(Op::DoubleStar) {
                return Err(self.not_supported("'*' and '**' argument unpacking"));
            }
            let is_keyword = matches!(self.peek(), Tok::Name(_)) && matches!(self.token(1).tok, Tok::Op(Op::Assign));
            if is_keyword {
                let (name, range) = self.expect_name()?;
                self.advance();
                if args.kwargs.iter().any(|(existing, _)| *existing == name) {
                    return Err(ParseError::syntax(
                        format!("keyword argument repeated: {}", self.interner.get_str(name)),
                        range,
                    ));
                }
                let value = self.test()?;
                args.kwargs.push((name, value));
            } else {
                let start = self.start();
                let mut value = self.test()?;
                if self.at_kw(Keyword::For) {
                    // a generator expression argument is evaluated eagerly as a list
                    let generators = self.comprehension_clauses()?;
                    value = ExprLoc::new(
                        self.range_from(start),
                        Expr::ListComp {
                            elt: Box::new(value),
                            generators,
                        },
                    );
                }
                if !args.kwargs.is_empty() {
                    return Err(ParseError::syntax(
                        "positional argument follows keyword argument",
                        value.position,
                    ));
                }
                args.args.push(value);
            }
            if !self.eat_op(Op::Comma) {
                self.expect_op(Op::RParen)?;
                return Ok(args);
            }
        }
    }

    /// The contents of `[...]` after an object: an index, a slice or a tuple of indexes.
    fn subscript(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let first = self.slice_item()?;
        if !self.at_op(Op::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBracket) {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(items)))
    }

    fn slice_item(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let lower = if self.at_op(Op::Colon) { None } else { Some(self.test()?) };
        if !self.eat_op(Op::Colon) {
            return lower.ok_or_else(|| self.invalid_syntax());
        }
        let bound_end = |p: &Self| matches!(p.peek(), Tok::Op(Op::Colon | Op::RBracket | Op::Comma));
        let upper = if bound_end(self) { None } else { Some(self.test()?) };
        let step = if self.eat_op(Op::Colon) && !bound_end(self) {
            Some(self.test()?)
        } else {
            None
        };
        Ok(ExprLoc::new(
            self.range_from(start),
            Expr::Slice {
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
                step: step.map(Box::new),
            },
        ))
    }

    /// One or more `for target in iter [if cond]*` clauses.
    fn comprehension_clauses(&mut self) -> ParseResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw(Keyword::For) {
            let target = self.target_list()?;
            self.expect_kw(Keyword::In)?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Keyword::If) {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        if self.at_kw(Keyword::Async) {
            return Err(self.not_supported("asynchronous comprehensions"));
        }
        Ok(generators)
    }

    fn atom(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let tok = self.peek().clone();
        let expr = match tok {
            Tok::Name(name) => {
                let range = self.advance().range;
                let name_id = self.interner.intern(&name);
                Expr::Name(Identifier::new(name_id, range))
            }
            Tok::Int(i) => {
                self.advance();
                Expr::Literal(Literal::Int(i))
            }
            Tok::LongInt(big) => {
                self.advance();
                Expr::Literal(Literal::LongInt(big))
            }
            Tok::Float(f) => {
                self.advance();
                Expr::Literal(Literal::Float(f))
            }
            Tok::Str(_) | Tok::FString { .. } => return self.strings(),
            Tok::Keyword(Keyword::None) => {
                self.advance();
                Expr::Literal(Literal::None)
            }
            Tok::Keyword(Keyword::True) => {
                self.advance();
                Expr::Literal(Literal::Bool(true))
            }
            Tok::Keyword(Keyword::False) => {
                self.advance();
                Expr::Literal(Literal::Bool(false))
            }
            Tok::Keyword(Keyword::Yield) => return Err(self.not_supported("generators")),
            Tok::Op(Op::LParen) => return self.parenthesized(),
            Tok::Op(Op::LBracket) => return self.list_display(),
            Tok::Op(Op::LBrace) => return self.dict_display(),
            Tok::Op(Op::Dot) if matches!(self.token(1).tok, Tok::Op(Op::Dot)) => {
                return Err(self.not_supported("ellipsis literals"));
            }
            _ => return Err(self.invalid_syntax()),
        };
        Ok(ExprLoc::new(self.range_from(start), expr))
    }

    fn parenthesized(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        self.advance();
        if self.eat_op(Op::RParen) {
            return Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(Vec::new())));
        }
        if self.at_kw(Keyword::Yield) {
            return Err(self.not_supported("generators"));
        }
        let first = self.test()?;
        if self.at_kw(Keyword::For) {
            let generators = self.comprehension_clauses()?;
            self.expect_op(Op::RParen)?;
            return Ok(ExprLoc::new(
                self.range_from(start),
                Expr::ListComp {
                    elt: Box::new(first),
                    generators,
                },
            ));
        }
        if self.at_op(Op::Walrus) {
            return Err(self.not_supported("assignment expressions"));
        }
        if self.eat_op(Op::RParen) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RParen) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(Op::RParen)?;
        Ok(ExprLoc::new(self.range_from(start), Expr::Tuple(items)))
    }

    fn list_display(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        self.advance();
        if self.eat_op(Op::RBracket) {
            return Ok(ExprLoc::new(self.range_from(start), Expr::List(Vec::new())));
        }
        if self.at_op(Op::Star) {
            return Err(self.not_supported("'*' unpacking in list displays"));
        }
        let first = self.test()?;
        if self.at_kw(Keyword::For) {
            let generators = self.comprehension_clauses()?;
            self.expect_op(Op::RBracket)?;
            return Ok(ExprLoc::new(
                self.range_from(start),
                Expr::ListComp {
                    elt: Box::new(first),
                    generators,
                },
            ));
        }
        let mut items = vec![first];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBracket) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(Op::RBracket)?;
        Ok(ExprLoc::new(self.range_from(start), Expr::List(items)))
    }

    fn dict_display(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        self.advance();
        if self.eat_op(Op::RBrace) {
            return Ok(ExprLoc::new(self.range_from(start), Expr::Dict(Vec::new())));
        }
        if self.at_op(Op::DoubleStar) {
            return Err(self.not_supported("'**' unpacking in dict displays"));
        }
        let key = self.test()?;
        if !self.eat_op(Op::Colon) {
            return Err(ParseError::syntax("sets are not supported", self.range_from(start)));
        }
        let value = self.test()?;
        if self.at_kw(Keyword::For) {
            let generators = self.comprehension_clauses()?;
            self.expect_op(Op::RBrace)?;
            return Ok(ExprLoc::new(
                self.range_from(start),
                Expr::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    generators,
                },
            ));
        }
        let mut pairs = vec![(key, value)];
        while self.eat_op(Op::Comma) {
            if self.at_op(Op::RBrace) {
                break;
            }
            let key = self.test()?;
            self.expect_op(Op::Colon)?;
            let value = self.test()?;
            pairs.push((key, value));
        }
        self.expect_op(Op::RBrace)?;
        Ok(ExprLoc::new(self.range_from(start), Expr::Dict(pairs)))
    }

    /// Adjacent string literals concatenate; any f-string makes the result an f-string.
    fn strings(&mut self) -> ParseResult<ExprLoc> {
        let start = self.start();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut is_fstring = false;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    literal.push_str(&s);
                }
                Tok::FString {
                    content,
                    raw,
                    content_start,
                } => {
                    self.advance();
                    is_fstring = true;
                    self.fstring_parts(&content, raw, content_start, &mut literal, &mut parts)?;
                }
                _ => break,
            }
        }
        let position = self.range_from(start);
        if !is_fstring {
            return Ok(ExprLoc::new(position, Expr::Literal(Literal::Str(self.interner.intern(&literal)))));
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(self.interner.intern(&literal)));
        }
        Ok(ExprLoc::new(position, Expr::FString(parts)))
    }

    /// Splits the raw text of an f-string into literal text and replacement fields.
    ///
    /// Literal text accumulates in `literal` so it merges with neighbouring literals.
    fn fstring_parts(
        &mut self,
        content: &str,
        raw: bool,
        content_start: CodeLoc,
        literal: &mut String,
        parts: &mut Vec<FStringPart>,
    ) -> ParseResult<()> {
        let chars: Vec<char> = content.chars().collect();
        let loc_at = |idx: usize| loc_in(&chars, content_start, idx);
        let error_at = |msg: &str, idx: usize| ParseError::syntax(msg, CodeRange::new(loc_at(idx), loc_at(idx + 1)));
        let mut pending = String::new();
        let flush = |pending: &mut String, literal: &mut String, idx: usize| -> ParseResult<()> {
            let text = if raw {
                std::mem::take(pending)
            } else {
                unescape(&std::mem::take(pending)).map_err(|msg| error_at(&msg, idx))?
            };
            literal.push_str(&text);
            Ok(())
        };

        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    pending.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    pending.push('}');
                    i += 2;
                }
                '}' => return Err(error_at("f-string: single '}' is not allowed", i)),
                '{' => {
                    flush(&mut pending, literal, i)?;
                    if !literal.is_empty() {
                        parts.push(FStringPart::Literal(self.interner.intern(literal)));
                        literal.clear();
                    }
                    i = self.replacement_field(&chars, i, content_start, parts)?;
                }
                '\\' if !raw && i + 1 < chars.len() => {
                    pending.push('\\');
                    pending.push(chars[i + 1]);
                    i += 2;
                }
                c => {
                    pending.push(c);
                    i += 1;
                }
            }
        }
        flush(&mut pending, literal, chars.len())
    }

    /// Parses `{expr[!conv][:spec]}` starting at the `{` at `open`; returns the index after `}`.
    fn replacement_field(
        &mut self,
        chars: &[char],
        open: usize,
        content_start: CodeLoc,
        parts: &mut Vec<FStringPart>,
    ) -> ParseResult<usize> {
        let error_at = |msg: &str, idx: usize| {
            ParseError::syntax(
                msg,
                CodeRange::new(loc_in(chars, content_start, idx), loc_in(chars, content_start, idx + 1)),
            )
        };
        let expr_start = open + 1;
        let mut i = expr_start;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        // scan to the end of the expression
        while i < chars.len() {
            let c = chars[i];
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
            } else {
                match c {
                    '\'' | '"' => quote = Some(c),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' => depth = depth.saturating_sub(1),
                    '}' if depth > 0 => depth -= 1,
                    '}' => break,
                    '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => break,
                    ':' if depth == 0 => break,
                    _ => {}
                }
            }
            i += 1;
        }
        if i >= chars.len() {
            return Err(error_at("f-string: expecting '}'", open));
        }
        let expr_text: String = chars[expr_start..i].iter().collect();
        if expr_text.trim().is_empty() {
            return Err(error_at("f-string: valid expression required before '}'", i));
        }
        let tokens = tokenize_at(&expr_text, loc_in(chars, content_start, expr_start))?;
        let mut sub_parser = Parser::new(tokens, &mut *self.interner);
        sub_parser.function_depth = self.function_depth;
        sub_parser.depth = self.depth;
        let expr = sub_parser.testlist()?;
        if !matches!(sub_parser.peek(), Tok::Newline | Tok::EndOfFile) {
            return Err(sub_parser.invalid_syntax());
        }

        let mut conversion = ConversionFlag::None;
        if chars[i] == '!' {
            conversion = match chars.get(i + 1) {
                Some('s') => ConversionFlag::Str,
                Some('r' | 'a') => ConversionFlag::Repr,
                _ => return Err(error_at("f-string: invalid conversion character: expected 's', 'r', or 'a'", i)),
            };
            i += 2;
            if !matches!(chars.get(i), Some(':' | '}')) {
                return Err(error_at("f-string: expecting '}'", i));
            }
        }

        let mut format_spec = None;
        if chars[i] == ':' {
            let spec_start = i + 1;
            let mut j = spec_start;
            while j < chars.len() && chars[j] != '}' {
                if chars[j] == '{' {
                    return Err(error_at("nested replacement fields in format specs are not supported", j));
                }
                j += 1;
            }
            if j >= chars.len() {
                return Err(error_at("f-string: expecting '}'", open));
            }
            let spec_text: String = chars[spec_start..j].iter().collect();
            if !spec_text.is_empty() {
                let spec: ParsedFormatSpec = spec_text
                    .parse()
                    .map_err(|_| error_at(&format!("Invalid format specifier '{spec_text}'"), spec_start))?;
                format_spec = Some(spec);
            }
            i = j;
        }

        parts.push(FStringPart::Interpolation {
            expr: Box::new(expr),
            conversion,
            format_spec,
        });
        // skip the closing brace
        Ok(i + 1)
    }
}

/// Source location of `chars[idx]`, given where `chars` starts.
fn loc_in(chars: &[char], start: CodeLoc, idx: usize) -> CodeLoc {
    let mut loc = start;
    for c in chars.iter().take(idx) {
        if *c == '\n' {
            loc.line += 1;
            loc.column = 1;
        } else {
            loc.column += 1;
        }
    }
    loc
}

/// Converts an expression on the left of `=` (or after `for`) into an assignment target.
fn to_target(expr: ExprLoc) -> ParseResult<Target> {
    let position = expr.position;
    match expr.expr {
        Expr::Name(ident) => Ok(Target::Name(ident)),
        Expr::Tuple(items) | Expr::List(items) => {
            let targets = items.into_iter().map(to_target).collect::<ParseResult<_>>()?;
            Ok(Target::Tuple(targets, position))
        }
        Expr::Subscript { object, index } => Ok(Target::Subscript {
            object: *object,
            index: *index,
            position,
        }),
        Expr::Attr { object, attr } => Ok(Target::Attr {
            object: *object,
            attr,
            position,
        }),
        Expr::Literal(_) | Expr::FString(_) => Err(ParseError::syntax("cannot assign to literal", position)),
        Expr::Call { .. } | Expr::AttrCall { .. } => {
            Err(ParseError::syntax("cannot assign to function call", position))
        }
        Expr::Lambda(_) => Err(ParseError::syntax("cannot assign to lambda", position)),
        _ => Err(ParseError::syntax("cannot assign to expression", position)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> (Vec<Node>, InternerBuilder) {
        let mut interner = InternerBuilder::new();
        let nodes = parse(source, &mut interner).unwrap();
        (nodes, interner)
    }

    fn parse_err(source: &str) -> ParseError {
        let mut interner = InternerBuilder::new();
        parse(source, &mut interner).unwrap_err()
    }

    #[test]
    fn precedence() {
        let (nodes, _) = parse_ok("1 + 2 * 3 ** -2");
        let [Node::Expr(expr)] = nodes.as_slice() else { panic!("expected one expression") };
        let Expr::Op { op: Operator::Add, right, .. } = &expr.expr else { panic!("expected +") };
        let Expr::Op { op: Operator::Mult, right, .. } = &right.expr else { panic!("expected *") };
        let Expr::Op { op: Operator::Pow, right, .. } = &right.expr else { panic!("expected **") };
        assert!(matches!(right.expr, Expr::Literal(Literal::Int(-2))));
    }

    #[test]
    fn chained_assignment_and_unpacking() {
        let (nodes, _) = parse_ok("a = b, c = 1, 2");
        let [Node::Assign { targets, value }] = nodes.as_slice() else { panic!("expected assignment") };
        assert!(matches!(targets.as_slice(), [Target::Name(_), Target::Tuple(items, _)] if items.len() == 2));
        assert!(matches!(&value.expr, Expr::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn comparison_chain() {
        let (nodes, _) = parse_ok("a < b is not c not in d");
        let [Node::Expr(expr)] = nodes.as_slice() else { panic!("expected one expression") };
        let Expr::CmpOp { ops, .. } = &expr.expr else { panic!("expected comparison") };
        let ops: Vec<CmpOperator> = ops.iter().map(|(op, _)| *op).collect();
        assert_eq!(ops, vec![CmpOperator::Lt, CmpOperator::IsNot, CmpOperator::NotIn]);
    }

    #[test]
    fn fstring_parts() {
        let (nodes, interner) = parse_ok("f'a{{{x!r:>4}}} {y}' 'z'");
        let [Node::Expr(expr)] = nodes.as_slice() else { panic!("expected one expression") };
        let Expr::FString(parts) = &expr.expr else { panic!("expected f-string") };
        assert_eq!(parts.len(), 5);
        let FStringPart::Literal(id) = parts[0] else { panic!("expected literal") };
        assert_eq!(interner.get_str(id), "a{");
        let FStringPart::Interpolation {
            conversion, format_spec, ..
        } = &parts[1]
        else {
            panic!("expected interpolation")
        };
        assert_eq!(*conversion, ConversionFlag::Repr);
        assert_eq!(format_spec.as_ref().and_then(|s| s.align), Some('>'));
        let FStringPart::Literal(id) = parts[4] else { panic!("expected literal") };
        assert_eq!(interner.get_str(id), "z");
    }

    #[test]
    fn elif_nests_in_or_else() {
        let (nodes, _) = parse_ok("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n");
        let [Node::If { or_else, .. }] = nodes.as_slice() else { panic!("expected if") };
        assert!(matches!(or_else.as_slice(), [Node::If { or_else, .. }] if or_else.len() == 1));
    }

    #[test]
    fn error_locations() {
        let err = parse_err("x = 1\ndef 1():\n    pass");
        assert_eq!(err.position().start(), CodeLoc::new(2, 5));
        assert_eq!(err.message(), "invalid syntax: expected a name, found number");

        let err = parse_err("if x:\n");
        assert_eq!(err.message(), "expected an indented block");
    }

    #[test]
    fn unsupported_constructs() {
        assert_eq!(parse_err("class A:\n    pass").message(), "class definitions are not supported");
        assert_eq!(parse_err("import os").message(), "import statements are not supported");
        assert_eq!(parse_err("x = {1, 2}").message(), "sets are not supported");
        assert_eq!(parse_err("break").message(), "'break' outside loop");
        assert_eq!(parse_err("return 1").message(), "'return' outside function");
        assert_eq!(parse_err("1 = x").message(), "cannot assign to literal");
        assert_eq!(
            parse_err("def f(a=1, b):\n    pass").message(),
            "parameter without a default follows parameter with a default"
        );
        assert_eq!(parse_err("f(a=1, 2)").message(), "positional argument follows keyword argument");
    }

    #[test]
    fn nesting_limits() {
        let parens = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(parse_err(&parens).message(), "too many nested parentheses");

        let chain = format!("1{}", "+1".repeat(200_000));
        assert_eq!(parse_err(&chain).message(), "expression is nested too deeply");
        assert_eq!(parse_err(&format!("{}1", "-".repeat(5000))).message(), "expression is nested too deeply");
        assert_eq!(parse_err(&format!("{}x", "not ".repeat(5000))).message(), "expression is nested too deeply");
        assert_eq!(parse_err(&format!("x{}", "[0]".repeat(5000))).message(), "expression is nested too deeply");
        assert_eq!(parse_err(&format!("2{}", "**2".repeat(5000))).message(), "expression is nested too deeply");

        let mut blocks = String::new();
        for level in 0..150 {
            blocks.push_str(&" ".repeat(level));
            blocks.push_str("if x:\n");
        }
        blocks.push_str(&" ".repeat(150));
        blocks.push_str("pass\n");
        assert_eq!(parse_err(&blocks).message(), "too many levels of indentation");

        // reasonable nesting still parses
        parse_ok(&format!("{}1{}", "(".repeat(50), ")".repeat(50)));
        parse_ok(&format!("1{}", "+1".repeat(150)));
        parse_ok(&format!("x{}", "[0]".repeat(150)));
    }

    #[test]
    fn syntax_error_exception_has_preview() {
        let source = "x = 1\ndef 1():\n    pass";
        let exc = parse_err(source).into_exception("bad.py", source);
        assert_eq!(exc.exc_type(), ExcType::SyntaxError);
        assert_eq!(exc.traceback()[0].preview_line.as_deref(), Some("def 1():"));
        assert_eq!(exc.traceback()[0].start, CodeLoc::new(2, 5));
    }
}

use crate::{
    lexer::{LexError, Lexer, Token, TokenKind},
    Assignment, Block, Expression, Foreach, Function, Identifier, Literal, Operator, Position,
    Program, Statement,
};
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, PartialEq, PartialOrd, Copy, Clone)]
pub enum Precedence {
    Lowest,
    Assign,
    Equals,
    LessThanGreaterThan,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

impl Precedence {
    pub fn of_token(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Assign => Self::Assign,
            TokenKind::Equal | TokenKind::NotEqual => Self::Equals,
            TokenKind::LessThan | TokenKind::GreaterThan => Self::LessThanGreaterThan,
            TokenKind::Plus | TokenKind::Minus => Self::Sum,
            TokenKind::Slash | TokenKind::Asterisk => Self::Product,
            TokenKind::LeftParentheses => Self::Call,
            TokenKind::LeftBracket => Self::Index,
            _ => Self::Lowest,
        }
    }
}

type PrefixParseFn<'a> = fn(&mut Parser<'a>) -> Option<Expression>;
type InfixParseFn<'a> = fn(&mut Parser<'a>, Expression) -> Option<Expression>;

/// Pratt parser over a token stream. Only the current and the lookahead
/// token are held; diagnostics accumulate in `errors` and parsing resumes at
/// the next statement boundary.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peek: Token,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    pub fn new(mut lexer: Lexer<'a>) -> Self {
        let current = lexer.next_token();
        let peek = lexer.next_token();
        Self {
            lexer,
            current,
            peek,
            errors: Vec::new(),
        }
    }

    pub fn from_source(input: &'a str) -> Self {
        Self::new(Lexer::new(input))
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn lexer_errors(&self) -> &[LexError] {
        self.lexer.errors()
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();
        while !self.current_is(TokenKind::EndOfFile) {
            match self.parse_statement() {
                Some(statement) => program.statements.push(statement),
                None => self.synchronize(),
            }
            self.next_token();
        }
        program
    }

    fn parse_statement(&mut self) -> Option<Statement> {
        match self.current.kind {
            TokenKind::Return => self.parse_return_statement(),
            TokenKind::Load => self.parse_load_statement(),
            TokenKind::Export => self.parse_export_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_return_statement(&mut self) -> Option<Statement> {
        if self.peek_is(TokenKind::Semicolon)
            || self.peek_is(TokenKind::RightBrace)
            || self.peek_is(TokenKind::EndOfFile)
        {
            self.skip_semicolon();
            return Some(Statement::Return(None));
        }
        self.next_token();
        let value = self.parse_expression(Precedence::Lowest)?;
        self.skip_semicolon();
        Some(Statement::Return(Some(value)))
    }

    fn parse_load_statement(&mut self) -> Option<Statement> {
        let position = self.position();
        self.expect_peek(TokenKind::LeftParentheses)?;
        self.expect_peek(TokenKind::String)?;
        let path = self.current.literal.clone();
        self.expect_peek(TokenKind::RightParentheses)?;
        self.skip_semicolon();
        Some(Statement::Load(path, position))
    }

    fn parse_export_statement(&mut self) -> Option<Statement> {
        self.expect_peek(TokenKind::LeftParentheses)?;
        self.expect_peek(TokenKind::Identifier)?;
        let name = self.current_identifier();
        self.expect_peek(TokenKind::Comma)?;
        self.expect_peek(TokenKind::String)?;
        let destination = self.current.literal.clone();
        self.expect_peek(TokenKind::RightParentheses)?;
        self.skip_semicolon();
        Some(Statement::Export(name, destination))
    }

    fn parse_expression_statement(&mut self) -> Option<Statement> {
        let expression = self.parse_expression(Precedence::Lowest)?;
        self.skip_semicolon();
        Some(match expression {
            Expression::Assign(assignment) => Statement::Assignment(assignment),
            expression => Statement::Expression(expression),
        })
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        let prefix = match Self::prefix_parse_fn(self.current.kind) {
            Some(prefix) => prefix,
            None => {
                let message = format!("no prefix parse function for {} found", self.current.kind);
                self.error(message);
                return None;
            }
        };
        let mut expression = prefix(self)?;

        while !self.peek_is(TokenKind::Semicolon) && precedence < self.peek_precedence() {
            let infix = match Self::infix_parse_fn(self.peek.kind) {
                Some(infix) => infix,
                None => return Some(expression),
            };
            self.next_token();
            expression = infix(self, expression)?;
        }
        Some(expression)
    }

    fn prefix_parse_fn(kind: TokenKind) -> Option<PrefixParseFn<'a>> {
        let handler: PrefixParseFn<'a> = match kind {
            TokenKind::Identifier => Self::parse_identifier,
            TokenKind::Integer => Self::parse_integer_literal,
            TokenKind::Float => Self::parse_float_literal,
            TokenKind::String => Self::parse_string_literal,
            TokenKind::True | TokenKind::False => Self::parse_boolean_literal,
            TokenKind::Null => Self::parse_null_literal,
            TokenKind::Bang | TokenKind::Minus => Self::parse_prefix_expression,
            TokenKind::LeftParentheses => Self::parse_grouped_expression,
            TokenKind::LeftBracket => Self::parse_array_literal,
            TokenKind::If => Self::parse_if_expression,
            TokenKind::Function => Self::parse_function_literal,
            TokenKind::For => Self::parse_for_expression,
            _ => return None,
        };
        Some(handler)
    }

    fn infix_parse_fn(kind: TokenKind) -> Option<InfixParseFn<'a>> {
        let handler: InfixParseFn<'a> = match kind {
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Slash
            | TokenKind::Asterisk
            | TokenKind::Equal
            | TokenKind::NotEqual
            | TokenKind::LessThan
            | TokenKind::GreaterThan => Self::parse_infix_expression,
            TokenKind::Assign => Self::parse_assign_expression,
            TokenKind::LeftParentheses => Self::parse_call_expression,
            TokenKind::LeftBracket => Self::parse_index_expression,
            _ => return None,
        };
        Some(handler)
    }

    fn parse_identifier(&mut self) -> Option<Expression> {
        Some(Expression::Identifier(self.current_identifier()))
    }

    fn parse_integer_literal(&mut self) -> Option<Expression> {
        match self.current.literal.parse::<i64>() {
            Ok(value) => Some(Expression::Literal(Literal::Integer(value))),
            Err(_) => {
                let message = format!("could not parse {:?} as integer", self.current.literal);
                self.error(message);
                None
            }
        }
    }

    fn parse_float_literal(&mut self) -> Option<Expression> {
        match self.current.literal.parse::<f64>() {
            Ok(value) => Some(Expression::Literal(Literal::Float(value))),
            Err(_) => {
                let message = format!("could not parse {:?} as float", self.current.literal);
                self.error(message);
                None
            }
        }
    }

    fn parse_string_literal(&mut self) -> Option<Expression> {
        Some(Expression::Literal(Literal::String(self.current.literal.clone())))
    }

    fn parse_boolean_literal(&mut self) -> Option<Expression> {
        Some(Expression::Literal(Literal::Boolean(self.current_is(TokenKind::True))))
    }

    fn parse_null_literal(&mut self) -> Option<Expression> {
        Some(Expression::Literal(Literal::Null))
    }

    fn parse_prefix_expression(&mut self) -> Option<Expression> {
        let operator = match self.current.kind {
            TokenKind::Bang => Operator::Not,
            _ => Operator::Negate,
        };
        self.next_token();
        let operand = self.parse_expression(Precedence::Prefix)?;
        Some(Expression::Prefix(operator, Box::new(operand)))
    }

    fn parse_infix_expression(&mut self, left: Expression) -> Option<Expression> {
        let operator = match self.current.kind {
            TokenKind::Plus => Operator::Add,
            TokenKind::Minus => Operator::Subtract,
            TokenKind::Asterisk => Operator::Multiply,
            TokenKind::Slash => Operator::Divide,
            TokenKind::Equal => Operator::Equal,
            TokenKind::NotEqual => Operator::NotEqual,
            TokenKind::LessThan => Operator::LessThan,
            _ => Operator::GreaterThan,
        };
        let precedence = Precedence::of_token(self.current.kind);
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Some(Expression::Infix(Box::new(left), operator, Box::new(right)))
    }

    fn parse_assign_expression(&mut self, target: Expression) -> Option<Expression> {
        let target = match target {
            Expression::Identifier(identifier) => identifier,
            other => {
                self.error(format!("expected assign token to be IDENT, got {} instead", other));
                return None;
            }
        };
        self.next_token();
        let value = match self.parse_expression(Precedence::Lowest)? {
            Expression::Function(function) if function.name.is_none() => {
                Expression::Function(Function {
                    name: Some(target.name.clone()),
                    ..function
                })
            }
            value => value,
        };
        Some(Expression::Assign(Assignment {
            target,
            operator: Operator::Assign,
            value: Box::new(value),
        }))
    }

    fn parse_grouped_expression(&mut self) -> Option<Expression> {
        self.next_token();
        let expression = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RightParentheses)?;
        Some(expression)
    }

    fn parse_array_literal(&mut self) -> Option<Expression> {
        let elements = self.parse_expression_list(TokenKind::RightBracket)?;
        Some(Expression::Array(elements))
    }

    fn parse_index_expression(&mut self, collection: Expression) -> Option<Expression> {
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RightBracket)?;
        Some(Expression::Index(Box::new(collection), Box::new(index)))
    }

    fn parse_call_expression(&mut self, callee: Expression) -> Option<Expression> {
        let arguments = self.parse_expression_list(TokenKind::RightParentheses)?;
        Some(Expression::Call(Box::new(callee), arguments))
    }

    fn parse_if_expression(&mut self) -> Option<Expression> {
        self.expect_peek(TokenKind::LeftParentheses)?;
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RightParentheses)?;
        self.expect_peek(TokenKind::LeftBrace)?;
        let consequence = self.parse_block()?;

        let mut alternative = None;
        if self.peek_is(TokenKind::Else) {
            self.next_token();
            self.expect_peek(TokenKind::LeftBrace)?;
            alternative = Some(self.parse_block()?);
        }

        Some(Expression::If(Box::new(condition), consequence, alternative))
    }

    fn parse_for_expression(&mut self) -> Option<Expression> {
        self.expect_peek(TokenKind::LeftParentheses)?;
        self.next_token();

        if self.current_is(TokenKind::Identifier)
            && (self.peek_is(TokenKind::In) || self.peek_is(TokenKind::Comma))
        {
            return self.parse_foreach();
        }

        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RightParentheses)?;
        self.expect_peek(TokenKind::LeftBrace)?;
        let body = self.parse_block()?;
        Some(Expression::For(Box::new(condition), body))
    }

    fn parse_foreach(&mut self) -> Option<Expression> {
        let mut index = None;
        let mut item = self.current_identifier();
        if self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.expect_peek(TokenKind::Identifier)?;
            index = Some(item);
            item = self.current_identifier();
        }
        self.expect_peek(TokenKind::In)?;
        self.next_token();
        let iterable = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::RightParentheses)?;
        self.expect_peek(TokenKind::LeftBrace)?;
        let body = self.parse_block()?;
        Some(Expression::Foreach(Foreach {
            index,
            item,
            iterable: Box::new(iterable),
            body,
        }))
    }

    fn parse_function_literal(&mut self) -> Option<Expression> {
        self.expect_peek(TokenKind::LeftParentheses)?;
        let parameters = self.parse_function_parameters()?;
        self.expect_peek(TokenKind::LeftBrace)?;
        let body = self.parse_block()?;
        Some(Expression::Function(Function {
            name: None,
            parameters,
            body,
        }))
    }

    fn parse_function_parameters(&mut self) -> Option<Vec<Identifier>> {
        let mut parameters = Vec::new();
        if self.peek_is(TokenKind::RightParentheses) {
            self.next_token();
            return Some(parameters);
        }

        self.expect_peek(TokenKind::Identifier)?;
        parameters.push(self.current_identifier());
        while self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.expect_peek(TokenKind::Identifier)?;
            parameters.push(self.current_identifier());
        }

        self.expect_peek(TokenKind::RightParentheses)?;
        Some(parameters)
    }

    /// Parses statements up to the closing brace. Expects the current token
    /// to be the opening brace and leaves the closing one as current.
    fn parse_block(&mut self) -> Option<Block> {
        let mut statements = Vec::new();
        self.next_token();
        while !self.current_is(TokenKind::RightBrace) {
            if self.current_is(TokenKind::EndOfFile) {
                self.error(format!(
                    "expected next token to be {}, got {} instead",
                    TokenKind::RightBrace,
                    TokenKind::EndOfFile
                ));
                return None;
            }
            match self.parse_statement() {
                Some(statement) => statements.push(statement),
                None => {
                    self.synchronize();
                    if self.current_is(TokenKind::RightBrace)
                        || self.current_is(TokenKind::EndOfFile)
                    {
                        continue;
                    }
                }
            }
            self.next_token();
        }
        Some(Block(statements))
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expression>> {
        let mut list = Vec::new();
        if self.peek_is(end) {
            self.next_token();
            return Some(list);
        }

        self.next_token();
        list.push(self.parse_expression(Precedence::Lowest)?);
        while self.peek_is(TokenKind::Comma) {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }

        self.expect_peek(end)?;
        Some(list)
    }

    /// Skips the remainder of a malformed statement so the next one can be
    /// parsed. Stops before a closing brace so enclosing blocks still close.
    fn synchronize(&mut self) {
        if self.current_is(TokenKind::Semicolon)
            || self.current_is(TokenKind::RightBrace)
            || self.current_is(TokenKind::EndOfFile)
        {
            return;
        }
        while !self.peek_is(TokenKind::Semicolon)
            && !self.peek_is(TokenKind::RightBrace)
            && !self.peek_is(TokenKind::EndOfFile)
        {
            self.next_token();
        }
        self.skip_semicolon();
    }

    fn next_token(&mut self) {
        let next = self.lexer.next_token();
        self.current = std::mem::replace(&mut self.peek, next);
    }

    fn skip_semicolon(&mut self) {
        if self.peek_is(TokenKind::Semicolon) {
            self.next_token();
        }
    }

    fn current_is(&self, kind: TokenKind) -> bool {
        self.current.is(kind)
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek.is(kind)
    }

    fn peek_precedence(&self) -> Precedence {
        Precedence::of_token(self.peek.kind)
    }

    fn expect_peek(&mut self, kind: TokenKind) -> Option<()> {
        if self.peek_is(kind) {
            self.next_token();
            return Some(());
        }
        let message = format!(
            "expected next token to be {}, got {} instead",
            kind, self.peek.kind
        );
        self.errors.push(ParseError {
            message,
            line: self.peek.line,
            column: self.peek.column,
        });
        None
    }

    fn position(&self) -> Position {
        Position {
            line: self.current.line,
            column: self.current.column,
        }
    }

    fn current_identifier(&self) -> Identifier {
        Identifier::new(self.current.literal.clone(), self.position())
    }

    fn error(&mut self, message: String) {
        let Position { line, column } = self.position();
        self.errors.push(ParseError {
            message,
            line,
            column,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};

    fn parse(input: &str) -> Result<Program> {
        let mut parser = Parser::from_source(input);
        let program = parser.parse_program();
        if !parser.errors().is_empty() {
            let messages: Vec<String> = parser.errors().iter().map(|e| e.to_string()).collect();
            bail!("parser errors: {}", messages.join("; "));
        }
        Ok(program)
    }

    fn single_expression(input: &str) -> Result<Expression> {
        let mut program = parse(input)?;
        assert_eq!(program.statements.len(), 1, "input: {}", input);
        match program.statements.remove(0) {
            Statement::Expression(expression) => Ok(expression),
            other => bail!("expected an expression statement, got {:?}", other),
        }
    }

    fn ident(name: &str) -> Expression {
        Expression::Identifier(Identifier::new(name, Position::default()))
    }

    fn int(value: i64) -> Expression {
        Expression::Literal(Literal::Integer(value))
    }

    // Positions are irrelevant to structural comparisons.
    fn strip(expression: Expression) -> Expression {
        match expression {
            Expression::Identifier(identifier) => ident(&identifier.name),
            Expression::Infix(left, operator, right) => Expression::Infix(
                Box::new(strip(*left)),
                operator,
                Box::new(strip(*right)),
            ),
            Expression::Prefix(operator, operand) => {
                Expression::Prefix(operator, Box::new(strip(*operand)))
            }
            Expression::Index(collection, index) => {
                Expression::Index(Box::new(strip(*collection)), Box::new(strip(*index)))
            }
            other => other,
        }
    }

    #[test]
    fn test_return_statements() -> Result<()> {
        let program = parse("return 5;\nreturn 10;\nreturn;\n")?;
        assert_eq!(program.statements.len(), 3);
        assert_eq!(program.statements[0], Statement::Return(Some(int(5))));
        assert_eq!(program.statements[2], Statement::Return(None));
        Ok(())
    }

    #[test]
    fn test_literal_expressions() -> Result<()> {
        let tests = [
            ("foobar;", ident("foobar")),
            ("5;", int(5)),
            ("2.5", Expression::Literal(Literal::Float(2.5))),
            ("\"hello world\";", Expression::Literal(Literal::String("hello world".into()))),
            ("true", Expression::Literal(Literal::Boolean(true))),
            ("null", Expression::Literal(Literal::Null)),
        ];
        for (input, expected) in tests {
            assert_eq!(strip(single_expression(input)?), expected, "input: {}", input);
        }
        Ok(())
    }

    #[test]
    fn test_prefix_expressions() -> Result<()> {
        let tests = [("!5;", Operator::Not, 5), ("-15;", Operator::Negate, 15)];
        for (input, operator, value) in tests {
            assert_eq!(
                single_expression(input)?,
                Expression::Prefix(operator, Box::new(int(value)))
            );
        }
        Ok(())
    }

    #[test]
    fn test_infix_expressions() -> Result<()> {
        let tests = [
            ("5 + 5;", Operator::Add),
            ("5 - 5;", Operator::Subtract),
            ("5 * 5;", Operator::Multiply),
            ("5 / 5;", Operator::Divide),
            ("5 > 5;", Operator::GreaterThan),
            ("5 < 5;", Operator::LessThan),
            ("5 == 5;", Operator::Equal),
            ("5 != 5;", Operator::NotEqual),
        ];
        for (input, operator) in tests {
            assert_eq!(
                single_expression(input)?,
                Expression::Infix(Box::new(int(5)), operator, Box::new(int(5)))
            );
        }
        Ok(())
    }

    #[test]
    fn test_operator_precedence() -> Result<()> {
        let tests = [
            ("-a * b", "((-a) * b)"),
            ("!-a", "(!(-a))"),
            ("a + b + c", "((a + b) + c)"),
            ("a + b - c", "((a + b) - c)"),
            ("a * b / c", "((a * b) / c)"),
            ("a + b * c", "(a + (b * c))"),
            ("a + b * c + d / e - f", "(((a + (b * c)) + (d / e)) - f)"),
            ("3 + 4; -5 * 5", "(3 + 4); ((-5) * 5)"),
            ("5 < 4 != 3 > 4", "((5 < 4) != (3 > 4))"),
            ("3 + 4 * 5 == 3 * 1 + 4 * 5", "((3 + (4 * 5)) == ((3 * 1) + (4 * 5)))"),
            ("3 > 5 == false", "((3 > 5) == false)"),
            ("1 + (2 + 3) + 4", "((1 + (2 + 3)) + 4)"),
            ("-(5 + 5)", "(-(5 + 5))"),
            ("!(true == true)", "(!(true == true))"),
            ("a + add(b * c) + d", "((a + add((b * c))) + d)"),
            (
                "add(a, b, 1, 2 * 3, 4 + 5, add(6, 7 * 8))",
                "add(a, b, 1, (2 * 3), (4 + 5), add(6, (7 * 8)))",
            ),
            ("add(a + b + c * d / f + g)", "add((((a + b) + ((c * d) / f)) + g))"),
            ("a * [1, 2, 3, 4][b * c] * d", "((a * ([1, 2, 3, 4][(b * c)])) * d)"),
            ("add(a * b[2], b[1], 2 * [1, 2][1])", "add((a * (b[2])), (b[1]), (2 * ([1, 2][1])))"),
            ("x = y = 1 + 2", "x = (y = (1 + 2))"),
        ];
        for (input, expected) in tests {
            assert_eq!(parse(input)?.to_string(), expected, "input: {}", input);
        }
        Ok(())
    }

    #[test]
    fn test_assignment_statement() -> Result<()> {
        let program = parse("x = 5;")?;
        match &program.statements[0] {
            Statement::Assignment(assignment) => {
                assert_eq!(assignment.target.name, "x");
                assert_eq!(assignment.operator, Operator::Assign);
                assert_eq!(*assignment.value, int(5));
            }
            other => bail!("expected an assignment, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn assignment_names_function_literals() -> Result<()> {
        let program = parse("fib = function(n) { fib(n - 1) }")?;
        match &program.statements[0] {
            Statement::Assignment(assignment) => match assignment.value.as_ref() {
                Expression::Function(function) => {
                    assert_eq!(function.name.as_deref(), Some("fib"))
                }
                other => bail!("expected a function literal, got {:?}", other),
            },
            other => bail!("expected an assignment, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_if_expression() -> Result<()> {
        match single_expression("if (x < y) { x } else { y; z }")? {
            Expression::If(condition, consequence, alternative) => {
                assert_eq!(condition.to_string(), "(x < y)");
                assert_eq!(consequence.0.len(), 1);
                assert_eq!(alternative.map(|block| block.0.len()), Some(2));
            }
            other => bail!("expected an if expression, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_function_parameters() -> Result<()> {
        let tests = [
            ("function() {};", vec![]),
            ("function(x) {};", vec!["x"]),
            ("function(x, y, z) { x + y; };", vec!["x", "y", "z"]),
        ];
        for (input, expected) in tests {
            match single_expression(input)? {
                Expression::Function(function) => {
                    let names: Vec<&str> =
                        function.parameters.iter().map(|p| p.name.as_str()).collect();
                    assert_eq!(names, expected);
                }
                other => bail!("expected a function literal, got {:?}", other),
            }
        }
        Ok(())
    }

    #[test]
    fn test_loops() -> Result<()> {
        match single_expression("for(x<y) { x=x+1; }")? {
            Expression::For(condition, body) => {
                assert_eq!(condition.to_string(), "(x < y)");
                assert_eq!(body.0.len(), 1);
            }
            other => bail!("expected a for loop, got {:?}", other),
        }

        match single_expression("for (i, item in [1, 2]) { item }")? {
            Expression::Foreach(foreach) => {
                assert_eq!(foreach.index.map(|i| i.name), Some("i".to_string()));
                assert_eq!(foreach.item.name, "item");
                assert_eq!(foreach.iterable.to_string(), "[1, 2]");
            }
            other => bail!("expected a foreach loop, got {:?}", other),
        }

        assert_eq!(parse("for (x in xs) {}")?.to_string(), "for (x in xs) {}");
        Ok(())
    }

    #[test]
    fn test_load_and_export() -> Result<()> {
        let program = parse("load('lib.vy'); audio = 1; export(audio, \"out.wav\")")?;
        assert_eq!(program.to_string(), "load(\"lib.vy\"); audio = 1; export(audio, \"out.wav\")");
        Ok(())
    }

    #[test]
    fn rendering_reparses_to_the_same_tree() -> Result<()> {
        let input = "adder = function(a) { function(b) { return a + b } }; \
                     total = 0; for (i, x in [1, 2.5, 'three']) { total = total + i }; \
                     if (!done) { x[0] } else { null }";
        let program = parse(input)?;
        let rendered = program.to_string();
        assert_eq!(parse(&rendered)?.to_string(), rendered);
        Ok(())
    }

    #[test]
    fn collects_errors_and_keeps_going() -> Result<()> {
        let mut parser = Parser::from_source("x = ; y = (1 + 2; z = 3; )");
        let program = parser.parse_program();
        let messages: Vec<&str> = parser.errors().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "no prefix parse function for ; found",
                "expected next token to be ), got ; instead",
                "no prefix parse function for ) found",
            ]
        );
        assert_eq!(program.to_string(), "z = 3");
        Ok(())
    }

    #[test]
    fn reports_structural_mismatches() -> Result<()> {
        let tests = [
            ("if (x { 1 }", "expected next token to be ), got { instead"),
            ("function(x y) {}", "expected next token to be ), got IDENTIFIER instead"),
            ("99999999999999999999", "could not parse \"99999999999999999999\" as integer"),
            ("1 + 2 = 3", "expected assign token to be IDENT, got (1 + 2) instead"),
            ("{ 1 }", "no prefix parse function for { found"),
            ("if (x) { 1", "expected next token to be }, got EOF instead"),
        ];
        for (input, expected) in tests {
            let mut parser = Parser::from_source(input);
            parser.parse_program();
            assert_eq!(
                parser.errors().first().map(|e| e.message.as_str()),
                Some(expected),
                "input: {}",
                input
            );
        }
        Ok(())
    }

    #[test]
    fn error_positions_point_at_the_offending_token() -> Result<()> {
        let mut parser = Parser::from_source("a = 1;\nb = )");
        parser.parse_program();
        assert_eq!(parser.errors()[0].to_string(), "2:5: no prefix parse function for ) found");
        Ok(())
    }
}

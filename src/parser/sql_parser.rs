//! Recursive-descent parser from token stream to statement list.

use crate::error::{EngineError, ErrorKind, SourceLocation};
use crate::parser::ast::{
    BinaryOp, ColumnDefault, ColumnPosition, CommonTableExpr, ComparisonOp, CursorProbe, Expr,
    FetchPosition, FunctionParameter, InList, InsertSource, JoinType, NullsPosition, OrderItem,
    QueryExpr, SelectBody, SelectItem, SelectQuery, SetOperator, ShowObjectType, SortDirection,
    Statement, TableExpr, UnaryOp, VariableAssignment, WindowSpec,
};
use crate::parser::lexer::{tokenize, Symbol, Token, TokenKind};
use crate::value::Ternary;

pub fn parse(src: &str) -> Result<Vec<Statement>, EngineError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_statements_until(&[])
}

/// Parses a single expression, for the `calc` subcommand.
pub fn parse_expression(src: &str) -> Result<Expr, EngineError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if !parser.at_eof() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn location(&self) -> SourceLocation {
        self.peek().loc
    }

    fn unexpected(&self, expected: &str) -> EngineError {
        let found = match &self.peek().kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Identifier(s) => format!("'{s}'"),
            TokenKind::StringLiteral(_) => "string literal".to_string(),
            other => format!("{other:?}"),
        };
        EngineError::new(
            ErrorKind::Syntax,
            format!("expected {expected}, found {found}"),
        )
        .with_location(self.location())
    }

    fn peek_keyword(&self, word: &str) -> bool {
        self.peek().keyword() == word
    }

    fn peek_keyword_at(&self, offset: usize, word: &str) -> bool {
        self.peek_at(offset).keyword() == word
    }

    fn match_keyword(&mut self, word: &str) -> bool {
        if self.peek_keyword(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), EngineError> {
        if self.match_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(word))
        }
    }

    fn peek_symbol(&self, symbol: Symbol) -> bool {
        self.peek().kind == TokenKind::Symbol(symbol)
    }

    fn match_symbol(&mut self, symbol: Symbol) -> bool {
        if self.peek_symbol(symbol) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: Symbol, name: &str) -> Result<(), EngineError> {
        if self.match_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(name))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, EngineError> {
        match &self.peek().kind {
            TokenKind::Identifier(s) | TokenKind::QuotedIdentifier(s) => {
                let name = s.clone();
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_variable(&mut self) -> Result<String, EngineError> {
        match &self.peek().kind {
            TokenKind::Variable(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("variable")),
        }
    }

    fn end_of_statement(&mut self) -> Result<(), EngineError> {
        if self.match_symbol(Symbol::Semicolon) || self.at_eof() {
            Ok(())
        } else {
            Err(self.unexpected("';'"))
        }
    }

    /// Parses statements until EOF or until the next statement would begin
    /// with one of `stop` keywords (block terminators stay unconsumed).
    fn parse_statements_until(&mut self, stop: &[&str]) -> Result<Vec<Statement>, EngineError> {
        let mut statements = Vec::new();
        loop {
            while self.match_symbol(Symbol::Semicolon) {}
            if self.at_eof() {
                return Ok(statements);
            }
            let keyword = self.peek().keyword();
            if stop.contains(&keyword.as_str()) {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, EngineError> {
        let keyword = self.peek().keyword();
        match keyword.as_str() {
            "SELECT" | "WITH" => {
                let query = self.parse_select_query()?;
                self.end_of_statement()?;
                Ok(Statement::SelectQuery(query))
            }
            "INSERT" => self.parse_insert(),
            "UPDATE" => self.parse_update(),
            "DELETE" => self.parse_delete(),
            "CREATE" => self.parse_create_table(),
            "ALTER" => self.parse_alter_table(),
            "VAR" => {
                self.bump();
                let assignments = self.parse_variable_assignments()?;
                self.end_of_statement()?;
                Ok(Statement::VariableDeclaration(assignments))
            }
            "DECLARE" => self.parse_declare(),
            "DISPOSE" => self.parse_dispose(),
            "OPEN" => {
                self.bump();
                let name = self.expect_identifier()?;
                self.end_of_statement()?;
                Ok(Statement::OpenCursor(name))
            }
            "CLOSE" => {
                self.bump();
                let name = self.expect_identifier()?;
                self.end_of_statement()?;
                Ok(Statement::CloseCursor(name))
            }
            "FETCH" => self.parse_fetch(),
            "IF" => self.parse_if(),
            "WHILE" => self.parse_while(),
            "CONTINUE" => {
                self.bump();
                self.end_of_statement()?;
                Ok(Statement::Continue)
            }
            "BREAK" => {
                self.bump();
                self.end_of_statement()?;
                Ok(Statement::Break)
            }
            "EXIT" => {
                self.bump();
                let code = match self.peek().kind {
                    TokenKind::IntegerLiteral(i) => {
                        self.bump();
                        Some(i)
                    }
                    _ => None,
                };
                self.end_of_statement()?;
                Ok(Statement::Exit(code))
            }
            "RETURN" => {
                self.bump();
                let expr = if self.peek_symbol(Symbol::Semicolon) || self.at_eof() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.end_of_statement()?;
                Ok(Statement::Return(expr))
            }
            "COMMIT" => {
                self.bump();
                self.end_of_statement()?;
                Ok(Statement::Commit)
            }
            "ROLLBACK" => {
                self.bump();
                self.end_of_statement()?;
                Ok(Statement::Rollback)
            }
            "SOURCE" => {
                self.bump();
                let path = self.parse_expr()?;
                self.end_of_statement()?;
                Ok(Statement::Source(path))
            }
            "EXECUTE" => {
                self.bump();
                let format = self.parse_expr()?;
                let args = if self.match_keyword("USING") {
                    self.parse_expr_list()?
                } else {
                    Vec::new()
                };
                self.end_of_statement()?;
                Ok(Statement::Execute { format, args })
            }
            "TRIGGER" => {
                self.bump();
                self.expect_keyword("ERROR")?;
                let code = match self.peek().kind {
                    TokenKind::IntegerLiteral(i) => {
                        self.bump();
                        Some(i)
                    }
                    _ => None,
                };
                let message = if self.peek_symbol(Symbol::Semicolon) || self.at_eof() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.end_of_statement()?;
                Ok(Statement::TriggerError { code, message })
            }
            "PRINT" => {
                self.bump();
                let expr = self.parse_expr()?;
                self.end_of_statement()?;
                Ok(Statement::Print(expr))
            }
            "PRINTF" => {
                self.bump();
                let format = self.parse_expr()?;
                let args = if self.match_keyword("USING") {
                    self.parse_expr_list()?
                } else {
                    Vec::new()
                };
                self.end_of_statement()?;
                Ok(Statement::Printf { format, args })
            }
            "ECHO" => {
                self.bump();
                let expr = self.parse_expr()?;
                self.end_of_statement()?;
                Ok(Statement::Echo(expr))
            }
            "SET" => self.parse_set(),
            "ADD" => {
                self.bump();
                let loc = self.location();
                let value = self.parse_expr()?;
                self.expect_keyword("TO")?;
                let flag = self.expect_flag()?;
                self.end_of_statement()?;
                Ok(Statement::AddFlagElement { value, flag, loc })
            }
            "REMOVE" => {
                self.bump();
                let loc = self.location();
                let value = self.parse_expr()?;
                self.expect_keyword("FROM")?;
                let flag = self.expect_flag()?;
                self.end_of_statement()?;
                Ok(Statement::RemoveFlagElement { value, flag, loc })
            }
            "SHOW" => self.parse_show(),
            "SETENV" => {
                self.bump();
                let name = self.expect_env_name()?;
                self.expect_keyword("TO")?;
                let value = self.parse_expr()?;
                self.end_of_statement()?;
                Ok(Statement::SetEnvVar { name, value })
            }
            "UNSETENV" => {
                self.bump();
                let name = self.expect_env_name()?;
                self.end_of_statement()?;
                Ok(Statement::UnsetEnvVar(name))
            }
            "CHDIR" => {
                self.bump();
                let path = self.parse_expr()?;
                self.end_of_statement()?;
                Ok(Statement::Chdir(path))
            }
            "PWD" => {
                self.bump();
                self.end_of_statement()?;
                Ok(Statement::Pwd)
            }
            "RELOAD" => {
                self.bump();
                self.expect_keyword("CONFIG")?;
                self.end_of_statement()?;
                Ok(Statement::Reload)
            }
            _ => {
                if let TokenKind::Variable(name) = &self.peek().kind {
                    let name = name.clone();
                    let loc = self.location();
                    self.bump();
                    self.expect_symbol(Symbol::Assign, "':='")?;
                    let expr = self.parse_expr()?;
                    self.end_of_statement()?;
                    return Ok(Statement::VariableSubstitution { name, expr, loc });
                }
                if self.peek_symbol(Symbol::LeftParen) {
                    let query = self.parse_select_query()?;
                    self.end_of_statement()?;
                    return Ok(Statement::SelectQuery(query));
                }
                Err(self.unexpected("statement"))
            }
        }
    }

    fn expect_flag(&mut self) -> Result<String, EngineError> {
        match &self.peek().kind {
            TokenKind::Flag(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("flag name")),
        }
    }

    fn expect_env_name(&mut self) -> Result<String, EngineError> {
        match &self.peek().kind {
            TokenKind::EnvVar(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            TokenKind::Identifier(name) | TokenKind::QuotedIdentifier(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("environment variable name")),
        }
    }

    fn parse_set(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        let loc = self.location();
        match &self.peek().kind {
            TokenKind::Flag(name) => {
                let name = name.clone();
                self.bump();
                self.expect_keyword("TO")?;
                let value = self.parse_expr()?;
                self.end_of_statement()?;
                Ok(Statement::SetFlag { name, value, loc })
            }
            TokenKind::Variable(name) => {
                let name = name.clone();
                self.bump();
                if !self.match_symbol(Symbol::Assign) {
                    self.expect_symbol(Symbol::Equal, "'='")?;
                }
                let expr = self.parse_expr()?;
                self.end_of_statement()?;
                Ok(Statement::VariableSubstitution { name, expr, loc })
            }
            _ => Err(self.unexpected("flag or variable")),
        }
    }

    fn parse_show(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        if let TokenKind::Flag(name) = &self.peek().kind {
            let name = name.clone();
            self.bump();
            self.end_of_statement()?;
            return Ok(Statement::ShowFlag(name));
        }
        let keyword = self.peek().keyword();
        let statement = match keyword.as_str() {
            "TABLES" => {
                self.bump();
                Statement::ShowObjects(ShowObjectType::Tables)
            }
            "VIEWS" => {
                self.bump();
                Statement::ShowObjects(ShowObjectType::Views)
            }
            "CURSORS" => {
                self.bump();
                Statement::ShowObjects(ShowObjectType::Cursors)
            }
            "FUNCTIONS" => {
                self.bump();
                Statement::ShowObjects(ShowObjectType::Functions)
            }
            "FLAGS" => {
                self.bump();
                Statement::ShowObjects(ShowObjectType::Flags)
            }
            "ENV" => {
                self.bump();
                Statement::ShowObjects(ShowObjectType::Env)
            }
            "RUNINFO" => {
                self.bump();
                Statement::ShowObjects(ShowObjectType::RuntimeInfo)
            }
            "FIELDS" => {
                self.bump();
                self.expect_keyword("FROM")?;
                let table = self.parse_table_expr()?;
                Statement::ShowFields(table)
            }
            _ => return Err(self.unexpected("object type")),
        };
        self.end_of_statement()?;
        Ok(statement)
    }

    fn parse_variable_assignments(&mut self) -> Result<Vec<VariableAssignment>, EngineError> {
        let mut assignments = Vec::new();
        loop {
            let name = self.expect_variable()?;
            let expr = if self.match_symbol(Symbol::Assign) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            assignments.push(VariableAssignment { name, expr });
            if !self.match_symbol(Symbol::Comma) {
                return Ok(assignments);
            }
        }
    }

    fn parse_declare(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        if matches!(self.peek().kind, TokenKind::Variable(_)) {
            let assignments = self.parse_variable_assignments()?;
            self.end_of_statement()?;
            return Ok(Statement::VariableDeclaration(assignments));
        }
        let name = self.expect_identifier()?;
        let keyword = self.peek().keyword();
        match keyword.as_str() {
            "CURSOR" => {
                self.bump();
                self.expect_keyword("FOR")?;
                let query = self.parse_select_query()?;
                self.end_of_statement()?;
                Ok(Statement::CursorDeclaration { name, query })
            }
            "VIEW" => {
                self.bump();
                let mut columns = Vec::new();
                if self.match_symbol(Symbol::LeftParen) {
                    loop {
                        columns.push(self.expect_identifier()?);
                        if !self.match_symbol(Symbol::Comma) {
                            break;
                        }
                    }
                    self.expect_symbol(Symbol::RightParen, "')'")?;
                }
                let query = if self.match_keyword("AS") {
                    Some(self.parse_select_query()?)
                } else {
                    None
                };
                if columns.is_empty() && query.is_none() {
                    return Err(self.unexpected("column list or AS query"));
                }
                self.end_of_statement()?;
                Ok(Statement::ViewDeclaration {
                    name,
                    columns,
                    query,
                })
            }
            "FUNCTION" => {
                self.bump();
                let parameters = self.parse_function_parameters()?;
                self.expect_keyword("AS")?;
                self.expect_keyword("BEGIN")?;
                let body = self.parse_statements_until(&["END"])?;
                self.expect_keyword("END")?;
                self.end_of_statement()?;
                Ok(Statement::FunctionDeclaration {
                    name,
                    parameters,
                    body,
                })
            }
            "AGGREGATE" => {
                self.bump();
                self.expect_symbol(Symbol::LeftParen, "'('")?;
                let cursor = self.expect_identifier()?;
                let mut parameters = Vec::new();
                while self.match_symbol(Symbol::Comma) {
                    parameters.push(self.parse_function_parameter()?);
                }
                self.expect_symbol(Symbol::RightParen, "')'")?;
                self.expect_keyword("AS")?;
                self.expect_keyword("BEGIN")?;
                let body = self.parse_statements_until(&["END"])?;
                self.expect_keyword("END")?;
                self.end_of_statement()?;
                Ok(Statement::AggregateDeclaration {
                    name,
                    cursor,
                    parameters,
                    body,
                })
            }
            _ => Err(self.unexpected("CURSOR, VIEW, FUNCTION or AGGREGATE")),
        }
    }

    fn parse_function_parameters(&mut self) -> Result<Vec<FunctionParameter>, EngineError> {
        self.expect_symbol(Symbol::LeftParen, "'('")?;
        let mut parameters = Vec::new();
        if !self.peek_symbol(Symbol::RightParen) {
            loop {
                parameters.push(self.parse_function_parameter()?);
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        self.expect_symbol(Symbol::RightParen, "')'")?;
        Ok(parameters)
    }

    fn parse_function_parameter(&mut self) -> Result<FunctionParameter, EngineError> {
        let name = self.expect_variable()?;
        let default = if self.match_keyword("DEFAULT") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(FunctionParameter { name, default })
    }

    fn parse_dispose(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        let statement = match self.peek().keyword().as_str() {
            "CURSOR" => {
                self.bump();
                Statement::DisposeCursor(self.expect_identifier()?)
            }
            "FUNCTION" => {
                self.bump();
                Statement::DisposeFunction(self.expect_identifier()?)
            }
            "VIEW" => {
                self.bump();
                Statement::DisposeView(self.expect_identifier()?)
            }
            _ => Statement::DisposeVariable(self.expect_variable()?),
        };
        self.end_of_statement()?;
        Ok(statement)
    }

    fn parse_fetch(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        let loc = self.location();
        let keyword = self.peek().keyword();
        let (position, number) = match keyword.as_str() {
            "NEXT" => {
                self.bump();
                (FetchPosition::Next, None)
            }
            "PRIOR" => {
                self.bump();
                (FetchPosition::Prior, None)
            }
            "FIRST" => {
                self.bump();
                (FetchPosition::First, None)
            }
            "LAST" => {
                self.bump();
                (FetchPosition::Last, None)
            }
            "ABSOLUTE" => {
                self.bump();
                (FetchPosition::Absolute, Some(self.parse_expr()?))
            }
            "RELATIVE" => {
                self.bump();
                (FetchPosition::Relative, Some(self.parse_expr()?))
            }
            _ => (FetchPosition::Next, None),
        };
        let cursor = self.expect_identifier()?;
        self.expect_keyword("INTO")?;
        let mut variables = Vec::new();
        loop {
            variables.push(self.expect_variable()?);
            if !self.match_symbol(Symbol::Comma) {
                break;
            }
        }
        self.end_of_statement()?;
        Ok(Statement::Fetch {
            cursor,
            position,
            number,
            variables,
            loc,
        })
    }

    fn parse_if(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        let mut branches = Vec::new();
        let condition = self.parse_expr()?;
        self.expect_keyword("THEN")?;
        let block = self.parse_statements_until(&["ELSEIF", "ELSE", "END"])?;
        branches.push((condition, block));
        let mut else_block = Vec::new();
        loop {
            if self.match_keyword("ELSEIF") {
                let condition = self.parse_expr()?;
                self.expect_keyword("THEN")?;
                let block = self.parse_statements_until(&["ELSEIF", "ELSE", "END"])?;
                branches.push((condition, block));
            } else if self.match_keyword("ELSE") {
                else_block = self.parse_statements_until(&["END"])?;
            } else {
                break;
            }
        }
        self.expect_keyword("END")?;
        self.expect_keyword("IF")?;
        self.end_of_statement()?;
        Ok(Statement::If {
            branches,
            else_block,
        })
    }

    fn parse_while(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        let loc = self.location();
        // WHILE @a, @b IN cursor DO ... / WHILE condition DO ...
        let cursor_form = matches!(self.peek().kind, TokenKind::Variable(_))
            && (self.peek_at(1).kind == TokenKind::Symbol(Symbol::Comma)
                || (self.peek_keyword_at(1, "IN")
                    && matches!(
                        self.peek_at(2).kind,
                        TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
                    )));
        if cursor_form {
            let mut variables = Vec::new();
            loop {
                variables.push(self.expect_variable()?);
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
            self.expect_keyword("IN")?;
            let cursor = self.expect_identifier()?;
            self.expect_keyword("DO")?;
            let body = self.parse_statements_until(&["END"])?;
            self.expect_keyword("END")?;
            self.expect_keyword("WHILE")?;
            self.end_of_statement()?;
            return Ok(Statement::WhileInCursor {
                variables,
                cursor,
                body,
                loc,
            });
        }
        let condition = self.parse_expr()?;
        self.expect_keyword("DO")?;
        let body = self.parse_statements_until(&["END"])?;
        self.expect_keyword("END")?;
        self.expect_keyword("WHILE")?;
        self.end_of_statement()?;
        Ok(Statement::While { condition, body })
    }

    fn parse_insert(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        self.expect_keyword("INTO")?;
        let table = self.parse_table_primary()?;
        let mut columns = Vec::new();
        if self.peek_symbol(Symbol::LeftParen) && !self.peek_keyword_at(1, "SELECT") {
            self.bump();
            loop {
                columns.push(self.expect_identifier()?);
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
            self.expect_symbol(Symbol::RightParen, "')'")?;
        }
        let source = if self.match_keyword("VALUES") {
            let mut rows = Vec::new();
            loop {
                self.expect_symbol(Symbol::LeftParen, "'('")?;
                let row = self.parse_expr_list()?;
                self.expect_symbol(Symbol::RightParen, "')'")?;
                rows.push(row);
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
            InsertSource::Values(rows)
        } else {
            InsertSource::Query(self.parse_select_query()?)
        };
        self.end_of_statement()?;
        Ok(Statement::Insert {
            table,
            columns,
            source,
        })
    }

    fn parse_update(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        let table = self.parse_table_primary()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let field = self.parse_field_reference()?;
            self.expect_symbol(Symbol::Equal, "'='")?;
            let value = self.parse_expr()?;
            assignments.push((field, value));
            if !self.match_symbol(Symbol::Comma) {
                break;
            }
        }
        let where_clause = if self.match_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.end_of_statement()?;
        Ok(Statement::Update {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        self.match_keyword("FROM");
        let table = self.parse_table_primary()?;
        let where_clause = if self.match_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.end_of_statement()?;
        Ok(Statement::Delete {
            table,
            where_clause,
        })
    }

    fn parse_create_table(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        self.expect_keyword("TABLE")?;
        let loc = self.location();
        let table = self.parse_table_name()?;
        let mut columns = Vec::new();
        if self.peek_symbol(Symbol::LeftParen) && !self.peek_keyword_at(1, "SELECT") {
            self.bump();
            loop {
                columns.push(self.expect_identifier()?);
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
            self.expect_symbol(Symbol::RightParen, "')'")?;
        }
        let query = if self.match_keyword("AS") {
            Some(self.parse_select_query()?)
        } else if columns.is_empty() {
            Some(self.parse_select_query()?)
        } else {
            None
        };
        self.end_of_statement()?;
        Ok(Statement::CreateTable {
            table,
            columns,
            query,
            loc,
        })
    }

    fn parse_alter_table(&mut self) -> Result<Statement, EngineError> {
        self.bump();
        self.expect_keyword("TABLE")?;
        let table = self.parse_table_primary()?;
        let keyword = self.peek().keyword();
        match keyword.as_str() {
            "ADD" => {
                self.bump();
                let mut columns = Vec::new();
                if self.match_symbol(Symbol::LeftParen) {
                    loop {
                        columns.push(self.parse_column_default()?);
                        if !self.match_symbol(Symbol::Comma) {
                            break;
                        }
                    }
                    self.expect_symbol(Symbol::RightParen, "')'")?;
                } else {
                    columns.push(self.parse_column_default()?);
                }
                let (position, reference) = match self.peek().keyword().as_str() {
                    "FIRST" => {
                        self.bump();
                        (ColumnPosition::First, None)
                    }
                    "LAST" => {
                        self.bump();
                        (ColumnPosition::Last, None)
                    }
                    "AFTER" => {
                        self.bump();
                        (ColumnPosition::After, Some(self.parse_field_reference()?))
                    }
                    "BEFORE" => {
                        self.bump();
                        (ColumnPosition::Before, Some(self.parse_field_reference()?))
                    }
                    _ => (ColumnPosition::Last, None),
                };
                self.end_of_statement()?;
                Ok(Statement::AddColumns {
                    table,
                    columns,
                    position,
                    reference,
                })
            }
            "DROP" => {
                self.bump();
                let mut columns = Vec::new();
                if self.match_symbol(Symbol::LeftParen) {
                    loop {
                        columns.push(self.parse_field_reference()?);
                        if !self.match_symbol(Symbol::Comma) {
                            break;
                        }
                    }
                    self.expect_symbol(Symbol::RightParen, "')'")?;
                } else {
                    columns.push(self.parse_field_reference()?);
                }
                self.end_of_statement()?;
                Ok(Statement::DropColumns { table, columns })
            }
            "RENAME" => {
                self.bump();
                let old = self.parse_field_reference()?;
                self.expect_keyword("TO")?;
                let new = self.expect_identifier()?;
                self.end_of_statement()?;
                Ok(Statement::RenameColumn { table, old, new })
            }
            _ => Err(self.unexpected("ADD, DROP or RENAME")),
        }
    }

    fn parse_column_default(&mut self) -> Result<ColumnDefault, EngineError> {
        let column = self.expect_identifier()?;
        let default = if self.match_keyword("DEFAULT") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(ColumnDefault { column, default })
    }

    fn parse_field_reference(&mut self) -> Result<Expr, EngineError> {
        let loc = self.location();
        let first = self.expect_identifier()?;
        if self.match_symbol(Symbol::Dot) {
            let column = self.expect_identifier()?;
            Ok(Expr::FieldReference {
                view: Some(first),
                column,
                loc,
            })
        } else {
            Ok(Expr::FieldReference {
                view: None,
                column: first,
                loc,
            })
        }
    }

    // ---- queries ----

    fn parse_select_query(&mut self) -> Result<SelectQuery, EngineError> {
        let mut with = Vec::new();
        if self.match_keyword("WITH") {
            loop {
                let name = self.expect_identifier()?;
                let mut columns = Vec::new();
                if self.match_symbol(Symbol::LeftParen) {
                    loop {
                        columns.push(self.expect_identifier()?);
                        if !self.match_symbol(Symbol::Comma) {
                            break;
                        }
                    }
                    self.expect_symbol(Symbol::RightParen, "')'")?;
                }
                self.expect_keyword("AS")?;
                self.expect_symbol(Symbol::LeftParen, "'('")?;
                let query = self.parse_select_query()?;
                self.expect_symbol(Symbol::RightParen, "')'")?;
                with.push(CommonTableExpr {
                    name,
                    columns,
                    query,
                });
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
        }
        let body = self.parse_query_expr()?;
        let order_by = if self.match_keyword("ORDER") {
            self.expect_keyword("BY")?;
            self.parse_order_items()?
        } else {
            Vec::new()
        };
        let mut limit = None;
        let mut offset = None;
        loop {
            if self.match_keyword("LIMIT") {
                limit = Some(self.parse_expr()?);
            } else if self.match_keyword("OFFSET") {
                offset = Some(self.parse_expr()?);
            } else {
                break;
            }
        }
        Ok(SelectQuery {
            with,
            body,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_query_expr(&mut self) -> Result<QueryExpr, EngineError> {
        let mut left = self.parse_query_term()?;
        loop {
            let op = match self.peek().keyword().as_str() {
                "UNION" => SetOperator::Union,
                "INTERSECT" => SetOperator::Intersect,
                "EXCEPT" => SetOperator::Except,
                _ => return Ok(left),
            };
            self.bump();
            let all = self.match_keyword("ALL");
            let right = self.parse_query_term()?;
            left = QueryExpr::SetOperation {
                op,
                all,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_query_term(&mut self) -> Result<QueryExpr, EngineError> {
        if self.peek_symbol(Symbol::LeftParen)
            && (self.peek_keyword_at(1, "SELECT") || self.peek_keyword_at(1, "WITH")) {
            self.bump();
            let inner = self.parse_select_query()?;
            self.expect_symbol(Symbol::RightParen, "')'")?;
            // Nested ordering clauses apply within the parentheses only
            // when the outer query has none; fold the simple case.
            if inner.with.is_empty()
                && inner.order_by.is_empty()
                && inner.limit.is_none()
                && inner.offset.is_none()
            {
                return Ok(inner.body);
            }
            return Ok(QueryExpr::Select(SelectBody {
                distinct: false,
                items: vec![SelectItem {
                    expr: Expr::Wildcard { view: None },
                    alias: None,
                }],
                from: vec![TableExpr::Subquery {
                    query: Box::new(inner),
                    alias: None,
                    lateral: false,
                }],
                where_clause: None,
                group_by: Vec::new(),
                having: None,
            }));
        }
        self.expect_keyword("SELECT")?;
        let distinct = self.match_keyword("DISTINCT");
        self.match_keyword("ALL");
        let mut items = Vec::new();
        loop {
            items.push(self.parse_select_item()?);
            if !self.match_symbol(Symbol::Comma) {
                break;
            }
        }
        let from = if self.match_keyword("FROM") {
            let mut from = Vec::new();
            loop {
                from.push(self.parse_table_expr()?);
                if !self.match_symbol(Symbol::Comma) {
                    break;
                }
            }
            from
        } else {
            Vec::new()
        };
        let where_clause = if self.match_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let group_by = if self.match_keyword("GROUP") {
            self.expect_keyword("BY")?;
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        let having = if self.match_keyword("HAVING") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(QueryExpr::Select(SelectBody {
            distinct,
            items,
            from,
            where_clause,
            group_by,
            having,
        }))
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, EngineError> {
        if self.peek_symbol(Symbol::Asterisk) {
            self.bump();
            return Ok(SelectItem {
                expr: Expr::Wildcard { view: None },
                alias: None,
            });
        }
        // table.* expansion
        if matches!(
            self.peek().kind,
            TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
        ) && self.peek_at(1).kind == TokenKind::Symbol(Symbol::Dot)
            && self.peek_at(2).kind == TokenKind::Symbol(Symbol::Asterisk)
        {
            let view = self.expect_identifier()?;
            self.bump();
            self.bump();
            return Ok(SelectItem {
                expr: Expr::Wildcard { view: Some(view) },
                alias: None,
            });
        }
        let expr = self.parse_expr()?;
        let alias = if self.match_keyword("AS") {
            Some(self.expect_identifier()?)
        } else {
            match &self.peek().kind {
                TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
                    if !self.peek_is_clause_keyword() =>
                {
                    Some(self.expect_identifier()?)
                }
                _ => None,
            }
        };
        Ok(SelectItem { expr, alias })
    }

    fn peek_is_clause_keyword(&self) -> bool {
        matches!(
            self.peek().keyword().as_str(),
            "FROM"
                | "WHERE"
                | "GROUP"
                | "HAVING"
                | "ORDER"
                | "LIMIT"
                | "OFFSET"
                | "UNION"
                | "INTERSECT"
                | "EXCEPT"
                | "AS"
                | "ON"
                | "USING"
                | "JOIN"
                | "INNER"
                | "LEFT"
                | "RIGHT"
                | "FULL"
                | "CROSS"
                | "NATURAL"
                | "WHEN"
                | "THEN"
                | "ELSE"
                | "ELSEIF"
                | "END"
                | "DO"
                | "INTO"
                | "SET"
                | "AND"
                | "OR"
                | "NOT"
        )
    }

    fn parse_order_items(&mut self) -> Result<Vec<OrderItem>, EngineError> {
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let direction = if self.match_keyword("DESC") {
                SortDirection::Descending
            } else {
                self.match_keyword("ASC");
                SortDirection::Ascending
            };
            let nulls = if self.match_keyword("NULLS") {
                if self.match_keyword("FIRST") {
                    NullsPosition::First
                } else {
                    self.expect_keyword("LAST")?;
                    NullsPosition::Last
                }
            } else {
                NullsPosition::Default
            };
            items.push(OrderItem {
                expr,
                direction,
                nulls,
            });
            if !self.match_symbol(Symbol::Comma) {
                return Ok(items);
            }
        }
    }

    fn parse_table_name(&mut self) -> Result<String, EngineError> {
        match &self.peek().kind {
            TokenKind::StringLiteral(s) | TokenKind::QuotedIdentifier(s) => {
                let name = s.clone();
                self.bump();
                Ok(name)
            }
            TokenKind::Identifier(_) => {
                // File names may contain dots: users.csv parses as three
                // tokens and is rejoined here.
                let mut name = self.expect_identifier()?;
                while self.peek_symbol(Symbol::Dot) {
                    match &self.peek_at(1).kind {
                        TokenKind::Identifier(part) => {
                            let part = part.clone();
                            self.bump();
                            self.bump();
                            name.push('.');
                            name.push_str(&part);
                        }
                        _ => break,
                    }
                }
                Ok(name)
            }
            _ => Err(self.unexpected("table name")),
        }
    }

    fn parse_table_expr(&mut self) -> Result<TableExpr, EngineError> {
        let mut left = self.parse_table_primary()?;
        loop {
            let natural = self.peek_keyword("NATURAL");
            let offset = usize::from(natural);
            let join_keyword = self.peek_at(offset).keyword();
            let (join_type, skip) = match join_keyword.as_str() {
                "JOIN" => (JoinType::Inner, 1),
                "INNER" => (JoinType::Inner, 2),
                "LEFT" => (
                    JoinType::Left,
                    if self.peek_keyword_at(offset + 1, "OUTER") {
                        3
                    } else {
                        2
                    },
                ),
                "RIGHT" => (
                    JoinType::Right,
                    if self.peek_keyword_at(offset + 1, "OUTER") {
                        3
                    } else {
                        2
                    },
                ),
                "FULL" => (
                    JoinType::Full,
                    if self.peek_keyword_at(offset + 1, "OUTER") {
                        3
                    } else {
                        2
                    },
                ),
                "CROSS" => (JoinType::Cross, 2),
                _ => return Ok(left),
            };
            if skip > 1 && !self.peek_keyword_at(offset + skip - 1, "JOIN") {
                return Ok(left);
            }
            for _ in 0..offset + skip {
                self.bump();
            }
            let right = self.parse_table_primary()?;
            let mut condition = None;
            let mut using = Vec::new();
            if !natural && join_type != JoinType::Cross {
                if self.match_keyword("ON") {
                    condition = Some(self.parse_expr()?);
                } else if self.match_keyword("USING") {
                    self.expect_symbol(Symbol::LeftParen, "'('")?;
                    loop {
                        using.push(self.expect_identifier()?);
                        if !self.match_symbol(Symbol::Comma) {
                            break;
                        }
                    }
                    self.expect_symbol(Symbol::RightParen, "')'")?;
                }
            }
            left = TableExpr::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                natural,
                condition,
                using,
            };
        }
    }

    fn parse_table_primary(&mut self) -> Result<TableExpr, EngineError> {
        let loc = self.location();
        if self.match_keyword("LATERAL") {
            self.expect_symbol(Symbol::LeftParen, "'('")?;
            let query = self.parse_select_query()?;
            self.expect_symbol(Symbol::RightParen, "')'")?;
            let alias = self.parse_table_alias()?;
            return Ok(TableExpr::Subquery {
                query: Box::new(query),
                alias,
                lateral: true,
            });
        }
        if self.peek_keyword("DUAL") {
            self.bump();
            return Ok(TableExpr::Dual);
        }
        if self.peek_keyword("STDIN") {
            self.bump();
            let alias = self.parse_table_alias()?;
            return Ok(TableExpr::Stdin { alias });
        }
        if self.peek_symbol(Symbol::LeftParen) {
            self.bump();
            if self.match_keyword("VALUES") {
                let mut rows = Vec::new();
                loop {
                    self.expect_symbol(Symbol::LeftParen, "'('")?;
                    rows.push(self.parse_expr_list()?);
                    self.expect_symbol(Symbol::RightParen, "')'")?;
                    if !self.match_symbol(Symbol::Comma) {
                        break;
                    }
                }
                self.expect_symbol(Symbol::RightParen, "')'")?;
                let alias = self.parse_table_alias()?;
                return Ok(TableExpr::Values { rows, alias });
            }
            let query = self.parse_select_query()?;
            self.expect_symbol(Symbol::RightParen, "')'")?;
            let alias = self.parse_table_alias()?;
            return Ok(TableExpr::Subquery {
                query: Box::new(query),
                alias,
                lateral: false,
            });
        }
        let name = self.parse_table_name()?;
        let alias = self.parse_table_alias()?;
        Ok(TableExpr::Table { name, alias, loc })
    }

    fn parse_table_alias(&mut self) -> Result<Option<String>, EngineError> {
        if self.match_keyword("AS") {
            return Ok(Some(self.expect_identifier()?));
        }
        match &self.peek().kind {
            TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_)
                if !self.peek_is_clause_keyword() && !self.peek_is_join_keyword() =>
            {
                Ok(Some(self.expect_identifier()?))
            }
            _ => Ok(None),
        }
    }

    fn peek_is_join_keyword(&self) -> bool {
        matches!(
            self.peek().keyword().as_str(),
            "JOIN" | "INNER" | "LEFT" | "RIGHT" | "FULL" | "CROSS" | "NATURAL" | "LATERAL"
                | "DUAL" | "STDIN" | "VALUES" | "WHILE" | "IF"
        )
    }

    // ---- expressions ----

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, EngineError> {
        let mut list = Vec::new();
        loop {
            list.push(self.parse_expr()?);
            if !self.match_symbol(Symbol::Comma) {
                return Ok(list);
            }
        }
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, EngineError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_and()?;
        while self.match_keyword("OR") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_not()?;
        while self.match_keyword("AND") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, EngineError> {
        if self.match_keyword("NOT") {
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, EngineError> {
        let left = self.parse_concat()?;
        let negated = if self.peek_keyword("NOT")
            && matches!(
                self.peek_at(1).keyword().as_str(),
                "LIKE" | "BETWEEN" | "IN"
            ) {
            self.bump();
            true
        } else {
            false
        };
        match self.peek().keyword().as_str() {
            "LIKE" => {
                self.bump();
                let pattern = self.parse_concat()?;
                return Ok(Expr::Like {
                    negated,
                    expr: Box::new(left),
                    pattern: Box::new(pattern),
                });
            }
            "BETWEEN" => {
                self.bump();
                let low = self.parse_concat()?;
                self.expect_keyword("AND")?;
                let high = self.parse_concat()?;
                return Ok(Expr::Between {
                    negated,
                    expr: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                });
            }
            "IN" => {
                self.bump();
                self.expect_symbol(Symbol::LeftParen, "'('")?;
                let list = if self.peek_keyword("SELECT") || self.peek_keyword("WITH") {
                    let query = self.parse_select_query()?;
                    InList::Subquery(Box::new(query))
                } else {
                    InList::Values(self.parse_expr_list()?)
                };
                self.expect_symbol(Symbol::RightParen, "')'")?;
                return Ok(Expr::In {
                    negated,
                    expr: Box::new(left),
                    list,
                });
            }
            "IS" => {
                self.bump();
                let negated = self.match_keyword("NOT");
                let value = self.parse_concat()?;
                return Ok(Expr::Is {
                    negated,
                    expr: Box::new(left),
                    value: Box::new(value),
                });
            }
            _ => {}
        }
        let op = match &self.peek().kind {
            TokenKind::Symbol(Symbol::Equal) => ComparisonOp::Equal,
            TokenKind::Symbol(Symbol::NotEqual) => ComparisonOp::NotEqual,
            TokenKind::Symbol(Symbol::Less) => ComparisonOp::Less,
            TokenKind::Symbol(Symbol::LessOrEqual) => ComparisonOp::LessOrEqual,
            TokenKind::Symbol(Symbol::Greater) => ComparisonOp::Greater,
            TokenKind::Symbol(Symbol::GreaterOrEqual) => ComparisonOp::GreaterOrEqual,
            TokenKind::Symbol(Symbol::Identical) => ComparisonOp::Identical,
            _ => return Ok(left),
        };
        self.bump();
        let right = self.parse_concat()?;
        Ok(Expr::Comparison {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_concat(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_additive()?;
        while self.match_symbol(Symbol::Concat) {
            let right = self.parse_additive()?;
            left = Expr::Binary {
                left: Box::new(left),
                op: BinaryOp::Concat,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.match_symbol(Symbol::Plus) {
                BinaryOp::Add
            } else if self.match_symbol(Symbol::Minus) {
                BinaryOp::Subtract
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.match_symbol(Symbol::Asterisk) {
                BinaryOp::Multiply
            } else if self.match_symbol(Symbol::Slash) {
                BinaryOp::Divide
            } else if self.match_symbol(Symbol::Percent) {
                BinaryOp::Modulo
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, EngineError> {
        if self.match_symbol(Symbol::Minus) {
            let expr = self.parse_unary()?;
            // Fold a negated literal immediately.
            return Ok(match expr {
                Expr::Integer(i) => Expr::Integer(-i),
                Expr::Float(f) => Expr::Float(-f),
                other => Expr::Unary {
                    op: UnaryOp::Minus,
                    expr: Box::new(other),
                },
            });
        }
        if self.match_symbol(Symbol::Plus) {
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Plus,
                expr: Box::new(expr),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EngineError> {
        let loc = self.location();
        match self.peek().kind.clone() {
            TokenKind::IntegerLiteral(i) => {
                self.bump();
                Ok(Expr::Integer(i))
            }
            TokenKind::FloatLiteral(f) => {
                self.bump();
                Ok(Expr::Float(f))
            }
            TokenKind::StringLiteral(s) => {
                self.bump();
                Ok(Expr::String(s))
            }
            TokenKind::Variable(name) => {
                self.bump();
                if self.match_symbol(Symbol::Assign) {
                    let expr = self.parse_expr()?;
                    Ok(Expr::VariableSubstitution {
                        name,
                        expr: Box::new(expr),
                        loc,
                    })
                } else {
                    Ok(Expr::Variable { name, loc })
                }
            }
            TokenKind::EnvVar(name) => {
                self.bump();
                Ok(Expr::EnvVar { name })
            }
            TokenKind::RuntimeInfo(name) => {
                self.bump();
                Ok(Expr::RuntimeInfo { name, loc })
            }
            TokenKind::Flag(name) => {
                self.bump();
                Ok(Expr::Flag { name, loc })
            }
            TokenKind::Symbol(Symbol::LeftParen) => {
                if self.peek_keyword_at(1, "SELECT") || self.peek_keyword_at(1, "WITH") {
                    self.bump();
                    let query = self.parse_select_query()?;
                    self.expect_symbol(Symbol::RightParen, "')'")?;
                    return Ok(Expr::Subquery(Box::new(query)));
                }
                self.bump();
                let expr = self.parse_expr()?;
                self.expect_symbol(Symbol::RightParen, "')'")?;
                Ok(Expr::Parens(Box::new(expr)))
            }
            TokenKind::Identifier(_) | TokenKind::QuotedIdentifier(_) => {
                let keyword = self.peek().keyword();
                match keyword.as_str() {
                    "NULL" => {
                        self.bump();
                        return Ok(Expr::Null);
                    }
                    "TRUE" => {
                        self.bump();
                        return Ok(Expr::Boolean(true));
                    }
                    "FALSE" => {
                        self.bump();
                        return Ok(Expr::Boolean(false));
                    }
                    "UNKNOWN" => {
                        self.bump();
                        return Ok(Expr::Ternary(Ternary::Unknown));
                    }
                    "CASE" => return self.parse_case(),
                    "EXISTS" => {
                        self.bump();
                        self.expect_symbol(Symbol::LeftParen, "'('")?;
                        let query = self.parse_select_query()?;
                        self.expect_symbol(Symbol::RightParen, "')'")?;
                        return Ok(Expr::Exists(Box::new(query)));
                    }
                    "CURSOR" => return self.parse_cursor_status(),
                    _ => {}
                }
                let name = self.expect_identifier()?;
                if self.peek_symbol(Symbol::LeftParen) {
                    return self.parse_function_call(name, loc);
                }
                if self.match_symbol(Symbol::Dot) {
                    let column = self.expect_identifier()?;
                    return Ok(Expr::FieldReference {
                        view: Some(name),
                        column,
                        loc,
                    });
                }
                Ok(Expr::FieldReference {
                    view: None,
                    column: name,
                    loc,
                })
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_function_call(
        &mut self,
        name: String,
        loc: SourceLocation,
    ) -> Result<Expr, EngineError> {
        self.expect_symbol(Symbol::LeftParen, "'('")?;
        let mut distinct = false;
        let mut wildcard = false;
        let mut args = Vec::new();
        if self.peek_symbol(Symbol::Asterisk) {
            self.bump();
            wildcard = true;
        } else if !self.peek_symbol(Symbol::RightParen) {
            distinct = self.match_keyword("DISTINCT");
            args = self.parse_expr_list()?;
        }
        self.expect_symbol(Symbol::RightParen, "')'")?;
        let over = if self.match_keyword("OVER") {
            self.expect_symbol(Symbol::LeftParen, "'('")?;
            let partition_by = if self.match_keyword("PARTITION") {
                self.expect_keyword("BY")?;
                self.parse_expr_list()?
            } else {
                Vec::new()
            };
            let order_by = if self.match_keyword("ORDER") {
                self.expect_keyword("BY")?;
                self.parse_order_items()?
            } else {
                Vec::new()
            };
            self.expect_symbol(Symbol::RightParen, "')'")?;
            Some(WindowSpec {
                partition_by,
                order_by,
            })
        } else {
            None
        };
        Ok(Expr::Function {
            name,
            args,
            distinct,
            wildcard,
            over,
            loc,
        })
    }

    fn parse_case(&mut self) -> Result<Expr, EngineError> {
        self.bump();
        let subject = if self.peek_keyword("WHEN") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let mut branches = Vec::new();
        while self.match_keyword("WHEN") {
            let condition = self.parse_expr()?;
            self.expect_keyword("THEN")?;
            let result = self.parse_expr()?;
            branches.push((condition, result));
        }
        if branches.is_empty() {
            return Err(self.unexpected("WHEN"));
        }
        let else_expr = if self.match_keyword("ELSE") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_keyword("END")?;
        Ok(Expr::Case {
            subject,
            branches,
            else_expr,
        })
    }

    fn parse_cursor_status(&mut self) -> Result<Expr, EngineError> {
        let loc = self.location();
        self.bump();
        let cursor = self.expect_identifier()?;
        let probe = match self.peek().keyword().as_str() {
            "IS" => {
                self.bump();
                let negated = self.match_keyword("NOT");
                if self.match_keyword("OPEN") {
                    CursorProbe::IsOpen { negated }
                } else {
                    self.expect_keyword("IN")?;
                    self.expect_keyword("RANGE")?;
                    CursorProbe::IsInRange { negated }
                }
            }
            "COUNT" => {
                self.bump();
                CursorProbe::Count
            }
            "ROW" => {
                self.bump();
                self.expect_keyword("NUMBER")?;
                CursorProbe::RowNumber
            }
            _ => return Err(self.unexpected("IS, COUNT or ROW NUMBER")),
        };
        Ok(Expr::CursorStatus { cursor, probe, loc })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> Statement {
        let mut statements = parse(src).expect("statement should parse");
        assert_eq!(statements.len(), 1, "expected one statement");
        statements.remove(0)
    }

    #[test]
    fn parses_simple_select() {
        let Statement::SelectQuery(query) = parse_one("SELECT id, name FROM users;") else {
            panic!("expected select");
        };
        let QueryExpr::Select(body) = &query.body else {
            panic!("expected plain select body");
        };
        assert_eq!(body.items.len(), 2);
        assert_eq!(body.from.len(), 1);
    }

    #[test]
    fn parses_where_group_having_order_limit() {
        let Statement::SelectQuery(query) = parse_one(
            "SELECT city, COUNT(*) AS c FROM users WHERE age > 20 \
             GROUP BY city HAVING COUNT(*) > 1 ORDER BY c DESC NULLS LAST LIMIT 5 OFFSET 2;",
        ) else {
            panic!("expected select");
        };
        let QueryExpr::Select(body) = &query.body else {
            panic!("expected body");
        };
        assert!(body.where_clause.is_some());
        assert_eq!(body.group_by.len(), 1);
        assert!(body.having.is_some());
        assert_eq!(query.order_by.len(), 1);
        assert_eq!(query.order_by[0].direction, SortDirection::Descending);
        assert_eq!(query.order_by[0].nulls, NullsPosition::Last);
        assert!(query.limit.is_some() && query.offset.is_some());
    }

    #[test]
    fn parses_joins() {
        let Statement::SelectQuery(query) =
            parse_one("SELECT 1 FROM a LEFT OUTER JOIN b ON a.id = b.id NATURAL JOIN c;")
        else {
            panic!("expected select");
        };
        let QueryExpr::Select(body) = &query.body else {
            panic!("expected body");
        };
        let TableExpr::Join { natural, left, .. } = &body.from[0] else {
            panic!("expected join tree");
        };
        assert!(*natural);
        assert!(matches!(
            **left,
            TableExpr::Join {
                join_type: JoinType::Left,
                ..
            }
        ));
    }

    #[test]
    fn parses_set_operations() {
        let Statement::SelectQuery(query) =
            parse_one("SELECT 1 UNION ALL SELECT 2 EXCEPT SELECT 3;")
        else {
            panic!("expected select");
        };
        let QueryExpr::SetOperation { op, all, .. } = &query.body else {
            panic!("expected set operation");
        };
        assert_eq!(*op, SetOperator::Except);
        assert!(!*all);
    }

    #[test]
    fn parses_variable_statements() {
        let Statement::VariableDeclaration(assignments) = parse_one("VAR @id := 0, @name;") else {
            panic!("expected declaration");
        };
        assert_eq!(assignments.len(), 2);
        assert!(assignments[0].expr.is_some());
        assert!(assignments[1].expr.is_none());

        let Statement::VariableSubstitution { name, .. } = parse_one("@id := @id + 1;") else {
            panic!("expected substitution");
        };
        assert_eq!(name, "id");
    }

    #[test]
    fn parses_cursor_lifecycle() {
        let stmts = parse(
            "DECLARE cur CURSOR FOR SELECT id FROM users; \
             OPEN cur; FETCH NEXT cur INTO @a; CLOSE cur; DISPOSE CURSOR cur;",
        )
        .unwrap();
        assert_eq!(stmts.len(), 5);
        assert!(matches!(stmts[1], Statement::OpenCursor(_)));
        assert!(matches!(
            stmts[2],
            Statement::Fetch {
                position: FetchPosition::Next,
                ..
            }
        ));
    }

    #[test]
    fn parses_control_flow() {
        let Statement::If {
            branches,
            else_block,
        } = parse_one(
            "IF @a = 1 THEN PRINT 'one'; ELSEIF @a = 2 THEN PRINT 'two'; ELSE PRINT 'more'; END IF;",
        )
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(else_block.len(), 1);

        let Statement::While { body, .. } =
            parse_one("WHILE @i < 10 DO @i := @i + 1; END WHILE;")
        else {
            panic!("expected while");
        };
        assert_eq!(body.len(), 1);

        let Statement::WhileInCursor {
            variables, cursor, ..
        } = parse_one("WHILE @a, @b IN cur DO PRINT @a; END WHILE;")
        else {
            panic!("expected while-in-cursor");
        };
        assert_eq!(variables, vec!["a", "b"]);
        assert_eq!(cursor, "cur");
    }

    #[test]
    fn parses_function_declaration() {
        let Statement::FunctionDeclaration {
            name,
            parameters,
            body,
        } = parse_one("DECLARE add2 FUNCTION (@x, @y DEFAULT 1) AS BEGIN RETURN @x + @y; END;")
        else {
            panic!("expected function declaration");
        };
        assert_eq!(name, "add2");
        assert_eq!(parameters.len(), 2);
        assert!(parameters[1].default.is_some());
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn parses_dml() {
        assert!(matches!(
            parse_one("INSERT INTO users (id, name) VALUES (1, 'Louis'), (2, 'Sean');"),
            Statement::Insert { .. }
        ));
        assert!(matches!(
            parse_one("UPDATE users SET name = 'Mildred' WHERE id = 2;"),
            Statement::Update { .. }
        ));
        assert!(matches!(
            parse_one("DELETE FROM users WHERE id = 2;"),
            Statement::Delete { .. }
        ));
        let Statement::CreateTable { table, columns, .. } =
            parse_one("CREATE TABLE t.csv (a, b);")
        else {
            panic!("expected create");
        };
        assert_eq!(table, "t.csv");
        assert_eq!(columns, vec!["a", "b"]);
    }

    #[test]
    fn parses_case_and_predicates() {
        let Statement::SelectQuery(_) = parse_one(
            "SELECT CASE WHEN a BETWEEN 1 AND 3 THEN 'low' ELSE 'high' END, \
                    b LIKE 'a%', c IN (1, 2), d IS NULL FROM t;",
        ) else {
            panic!("expected select");
        };
    }

    #[test]
    fn parses_window_function() {
        let Statement::SelectQuery(query) =
            parse_one("SELECT ROW_NUMBER() OVER (PARTITION BY dept ORDER BY salary DESC) FROM e;")
        else {
            panic!("expected select");
        };
        let QueryExpr::Select(body) = &query.body else {
            panic!("expected body");
        };
        let Expr::Function { over: Some(spec), .. } = &body.items[0].expr else {
            panic!("expected windowed function");
        };
        assert_eq!(spec.partition_by.len(), 1);
        assert_eq!(spec.order_by.len(), 1);
    }

    #[test]
    fn parses_flag_statements() {
        assert!(matches!(
            parse_one("SET @@WAIT_TIMEOUT TO 15;"),
            Statement::SetFlag { .. }
        ));
        assert!(matches!(
            parse_one("ADD '%Y/%m/%d' TO @@DATETIME_FORMAT;"),
            Statement::AddFlagElement { .. }
        ));
        assert!(matches!(parse_one("SHOW @@REPOSITORY;"), Statement::ShowFlag(_)));
        assert!(matches!(
            parse_one("SHOW TABLES;"),
            Statement::ShowObjects(ShowObjectType::Tables)
        ));
    }

    #[test]
    fn reports_error_position() {
        let err = parse("SELECT FROM;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.location.is_some());
    }

    #[test]
    fn parses_with_clause() {
        let Statement::SelectQuery(query) =
            parse_one("WITH t (n) AS (SELECT 1) SELECT n FROM t;")
        else {
            panic!("expected select");
        };
        assert_eq!(query.with.len(), 1);
        assert_eq!(query.with[0].columns, vec!["n"]);
    }
}

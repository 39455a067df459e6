//! Recursive descent parser for the SQL-like MATCH surface
//!
//! Supports: SELECT, FROM (vertex tables, derived tables, @variables,
//! table functions), MATCH paths, WHERE, ORDER BY and SET @variable.

use crate::ast::*;
use crate::lexer::{tokenize_strict, Token};
use docgraph_core::{Direction, Error, PropertyName, Result, SortOrder};

/// Parse a script of one or more `;`-separated statements
pub fn parse_script(input: &str) -> Result<Script> {
    let mut parser = Parser::new(tokenize_strict(input)?);
    parser.parse_script()
}

/// Parse a single SELECT query block
pub fn parse_query(input: &str) -> Result<SelectQueryBlock> {
    let mut parser = Parser::new(tokenize_strict(input)?);
    let block = parser.parse_select()?;
    parser.consume(&Token::Semicolon);
    parser.expect_end()?;
    Ok(block)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn consume(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<()> {
        if self.consume(&token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?} {}", token, context)))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.error("unexpected trailing input")),
        }
    }

    fn error(&self, message: &str) -> Error {
        match self.peek() {
            Some(token) => Error::QueryParse(format!("{}, found {:?}", message, token)),
            None => Error::QueryParse(format!("{}, found end of input", message)),
        }
    }

    fn parse_identifier(&mut self, context: &str) -> Result<String> {
        match self.peek() {
            Some(Token::Identifier(name)) | Some(Token::EscapedIdentifier(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(&format!("expected identifier {}", context))),
        }
    }

    fn at_identifier(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Identifier(_)) | Some(Token::EscapedIdentifier(_))
        )
    }

    fn parse_script(&mut self) -> Result<Script> {
        let mut statements = Vec::new();

        while self.peek().is_some() {
            statements.push(self.parse_statement()?);
            if !self.consume(&Token::Semicolon) {
                break;
            }
        }
        self.expect_end()?;

        if statements.is_empty() {
            return Err(Error::QueryParse("empty script".to_string()));
        }
        Ok(Script { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        if self.consume(&Token::Set) {
            let name = match self.advance() {
                Some(Token::Variable(name)) => name,
                _ => return Err(self.error("expected @variable after SET")),
            };
            self.expect(Token::Equals, "after SET variable")?;
            self.expect(Token::LParen, "before SET sub-query")?;
            let query = self.parse_select()?;
            self.expect(Token::RParen, "after SET sub-query")?;
            return Ok(Statement::SetVariable { name, query });
        }

        Ok(Statement::Select(self.parse_select()?))
    }

    fn parse_select(&mut self) -> Result<SelectQueryBlock> {
        self.expect(Token::Select, "at start of query")?;
        let mut block = SelectQueryBlock {
            select: self.parse_select_list()?,
            ..Default::default()
        };

        if self.consume(&Token::From) {
            loop {
                block.from.push(self.parse_table_reference()?);
                if !self.consume(&Token::Comma) {
                    break;
                }
            }
        }

        if self.consume(&Token::Match) {
            let mut clause = MatchClause::default();
            loop {
                clause.paths.push(self.parse_path()?);
                if !self.consume(&Token::Comma) {
                    break;
                }
            }
            block.match_clause = Some(clause);
        }

        if self.consume(&Token::Where) {
            block.where_clause = Some(self.parse_or()?);
        }

        if self.consume(&Token::Order) {
            self.expect(Token::By, "after ORDER")?;
            loop {
                let expr = self.parse_scalar()?;
                let order = if self.consume(&Token::Desc) {
                    SortOrder::Descending
                } else {
                    self.consume(&Token::Asc);
                    SortOrder::Ascending
                };
                block.order_by.push(OrderByElement { expr, order });
                if !self.consume(&Token::Comma) {
                    break;
                }
            }
        }

        Ok(block)
    }

    fn parse_select_list(&mut self) -> Result<Vec<SelectElement>> {
        if self.consume(&Token::Star) {
            return Ok(vec![SelectElement::Star]);
        }

        let mut items = Vec::new();
        loop {
            let expr = self.parse_scalar()?;
            let alias = if self.consume(&Token::As) {
                Some(self.parse_identifier("after AS")?)
            } else {
                None
            };
            items.push(SelectElement::Scalar { expr, alias });
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_table_alias(&mut self, required: bool) -> Result<Option<String>> {
        if self.consume(&Token::As) {
            return Ok(Some(self.parse_identifier("after AS")?));
        }
        if self.at_identifier() {
            return Ok(Some(self.parse_identifier("as table alias")?));
        }
        if required {
            Err(self.error("expected table alias"))
        } else {
            Ok(None)
        }
    }

    fn parse_table_reference(&mut self) -> Result<TableReference> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let query = self.parse_select()?;
                self.expect(Token::RParen, "after derived table")?;
                let alias = self.parse_table_alias(true)?.unwrap_or_default();
                Ok(TableReference::Derived {
                    query: Box::new(query),
                    alias,
                })
            }
            Some(Token::Variable(name)) => {
                let name = name.clone();
                self.pos += 1;
                let alias = self.parse_table_alias(true)?.unwrap_or_default();
                Ok(TableReference::Variable { name, alias })
            }
            _ => {
                let name = self.parse_identifier("in FROM clause")?;
                if self.consume(&Token::LParen) {
                    let args = self.parse_arguments()?;
                    let alias = self.parse_table_alias(true)?.unwrap_or_default();
                    return Ok(TableReference::Function {
                        function: TableFunction { name, args },
                        alias,
                    });
                }
                let alias = self.parse_table_alias(false)?.unwrap_or_else(|| name.clone());
                Ok(TableReference::Named { table: name, alias })
            }
        }
    }

    /// Arguments after an opening parenthesis, up to and including `)`
    fn parse_arguments(&mut self) -> Result<Vec<ScalarExpr>> {
        let mut args = Vec::new();
        if self.consume(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_scalar()?);
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "after arguments")?;
        Ok(args)
    }

    fn parse_path(&mut self) -> Result<MatchPath> {
        let mut steps = Vec::new();
        let mut current = self.parse_identifier("as MATCH node")?;

        let tail = loop {
            if !matches!(self.peek(), Some(Token::Minus) | Some(Token::ArrowLeftDash)) {
                break Some(current);
            }
            let edge = self.parse_edge()?;
            steps.push(PathStep {
                node: current,
                edge,
            });
            if self.at_identifier() {
                current = self.parse_identifier("as MATCH node")?;
            } else {
                break None;
            }
        };

        let is_reversed = !steps.is_empty()
            && steps
                .iter()
                .all(|step| step.edge.direction == Direction::Incoming);
        if is_reversed {
            for step in &mut steps {
                step.edge.direction = Direction::Outgoing;
            }
        }

        Ok(MatchPath {
            steps,
            tail,
            is_reversed,
        })
    }

    fn parse_edge(&mut self) -> Result<EdgePattern> {
        let incoming = match self.advance() {
            Some(Token::Minus) => false,
            Some(Token::ArrowLeftDash) => true,
            _ => return Err(self.error("expected edge")),
        };
        self.expect(Token::LBracket, "to open edge")?;

        let mut edge = EdgePattern::new(self.parse_identifier("as edge label")?);
        if self.consume(&Token::As) {
            edge.alias = Some(self.parse_identifier("as edge alias")?);
        }
        if self.consume(&Token::Star) {
            edge.min_length = self.parse_hop_count()?;
            self.expect(Token::DoubleDot, "in hop range")?;
            edge.max_length = self.parse_hop_count()?;
            if edge.min_length > edge.max_length {
                return Err(Error::QueryParse(format!(
                    "hop range {}..{} is empty",
                    edge.min_length, edge.max_length
                )));
            }
        }
        if self.consume(&Token::LBrace) {
            loop {
                let name = self.parse_identifier("as edge attribute")?;
                self.expect(Token::Colon, "after edge attribute")?;
                let value = self.parse_literal()?;
                edge.attribute_values.push((name, value));
                if !self.consume(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RBrace, "after edge attributes")?;
        }
        self.expect(Token::RBracket, "to close edge")?;

        edge.direction = if incoming {
            self.expect(Token::Minus, "after incoming edge")?;
            Direction::Incoming
        } else if self.consume(&Token::DashArrowRight) {
            Direction::Outgoing
        } else {
            self.expect(Token::Minus, "after edge")?;
            Direction::Both
        };
        Ok(edge)
    }

    fn parse_hop_count(&mut self) -> Result<u32> {
        match self.advance() {
            Some(Token::Integer(n)) if n >= 0 => u32::try_from(n)
                .map_err(|_| Error::QueryParse(format!("hop count {} out of range", n))),
            _ => Err(self.error("expected hop count")),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        let negative = self.consume(&Token::Minus);
        let literal = match self.advance() {
            Some(Token::Integer(i)) => Literal::Integer(if negative { -i } else { i }),
            Some(Token::Float(v)) => Literal::Float(if negative { -v } else { v }),
            Some(Token::StringSingle(s)) | Some(Token::StringDouble(s)) if !negative => {
                Literal::String(s)
            }
            Some(Token::True) if !negative => Literal::Boolean(true),
            Some(Token::False) if !negative => Literal::Boolean(false),
            Some(Token::Null) if !negative => Literal::Null,
            _ => return Err(self.error("expected literal")),
        };
        Ok(literal)
    }

    fn parse_or(&mut self) -> Result<BooleanExpr> {
        let mut left = self.parse_and()?;
        while self.consume(&Token::Or) {
            let right = self.parse_and()?;
            left = BooleanExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<BooleanExpr> {
        let mut left = self.parse_not()?;
        while self.consume(&Token::And) {
            let right = self.parse_not()?;
            left = BooleanExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<BooleanExpr> {
        if self.consume(&Token::Not) {
            return Ok(BooleanExpr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<BooleanExpr> {
        // A parenthesis opens either a nested boolean expression or a scalar.
        if self.check(&Token::LParen) && self.peek_at(1) != Some(&Token::Select) {
            let start = self.pos;
            self.pos += 1;
            if let Ok(inner) = self.parse_or() {
                if self.consume(&Token::RParen) && !self.at_scalar_operator() {
                    return Ok(inner);
                }
            }
            self.pos = start;
        }

        let left = self.parse_scalar()?;
        if self.consume(&Token::Is) {
            let negated = self.consume(&Token::Not);
            self.expect(Token::Null, "after IS")?;
            return Ok(BooleanExpr::IsNull {
                expr: left,
                negated,
            });
        }

        let op = match self.peek() {
            Some(Token::Equals) => ComparisonOp::Eq,
            Some(Token::NotEquals) | Some(Token::NotEquals2) => ComparisonOp::NotEq,
            Some(Token::LessThan) => ComparisonOp::Lt,
            Some(Token::LessEquals) => ComparisonOp::Le,
            Some(Token::GreaterThan) => ComparisonOp::Gt,
            Some(Token::GreaterEquals) => ComparisonOp::Ge,
            _ => return Err(self.error("expected comparison operator")),
        };
        self.pos += 1;
        let right = self.parse_scalar()?;
        Ok(BooleanExpr::Comparison { left, op, right })
    }

    fn at_scalar_operator(&self) -> bool {
        match self.peek() {
            Some(token) => {
                token.is_comparison()
                    || matches!(
                        token,
                        Token::Is
                            | Token::Plus
                            | Token::Minus
                            | Token::Star
                            | Token::Slash
                            | Token::Percent
                    )
            }
            None => false,
        }
    }

    fn parse_scalar(&mut self) -> Result<ScalarExpr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithmeticOp::Add,
                Some(Token::Minus) => ArithmeticOp::Subtract,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = ScalarExpr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<ScalarExpr> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithmeticOp::Multiply,
                Some(Token::Slash) => ArithmeticOp::Divide,
                Some(Token::Percent) => ArithmeticOp::Modulo,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_primary()?;
            left = ScalarExpr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<ScalarExpr> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = if self.check(&Token::Select) {
                    ScalarExpr::Subquery(Box::new(self.parse_select()?))
                } else {
                    self.parse_scalar()?
                };
                self.expect(Token::RParen, "after parenthesized expression")?;
                Ok(expr)
            }
            Some(Token::Identifier(_)) | Some(Token::EscapedIdentifier(_)) => {
                let name = self.parse_identifier("in expression")?;
                if self.consume(&Token::LParen) {
                    let args = self.parse_arguments()?;
                    return Ok(ScalarExpr::FunctionCall { name, args });
                }
                if self.consume(&Token::Dot) {
                    let column = if self.consume(&Token::Star) {
                        PropertyName::All
                    } else {
                        PropertyName::Named(self.parse_identifier("after '.'")?)
                    };
                    return Ok(ScalarExpr::Column(ColumnRef {
                        table: Some(name),
                        column,
                    }));
                }
                Ok(ScalarExpr::Column(ColumnRef {
                    table: None,
                    column: PropertyName::Named(name),
                }))
            }
            Some(token) if token.is_literal() || *token == Token::Minus => {
                Ok(ScalarExpr::Literal(self.parse_literal()?))
            }
            _ => Err(self.error("expected expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_match() {
        let block = parse_query(
            "SELECT b.name FROM node a, node b MATCH a-[knows]->b WHERE a.name = 'marko'",
        )
        .unwrap();

        assert_eq!(block.from.len(), 2);
        assert_eq!(block.from[0].alias(), "a");
        let paths = &block.match_clause.as_ref().unwrap().paths;
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].steps.len(), 1);
        assert_eq!(paths[0].steps[0].node, "a");
        assert_eq!(paths[0].steps[0].edge.label, "knows");
        assert_eq!(paths[0].tail.as_deref(), Some("b"));
        assert!(!paths[0].is_reversed);
        assert_eq!(
            block.where_clause.unwrap().to_string(),
            "a.name = 'marko'"
        );
    }

    #[test]
    fn test_parse_dangling_and_path_edges() {
        let block =
            parse_query("SELECT a.id FROM node a, node b MATCH a-[knows AS k]->, a-[road*1..3 {kind: 'x'}]->b")
                .unwrap();

        let paths = &block.match_clause.unwrap().paths;
        assert_eq!(paths[0].tail, None);
        assert_eq!(paths[0].steps[0].edge.alias.as_deref(), Some("k"));
        let road = &paths[1].steps[0].edge;
        assert_eq!((road.min_length, road.max_length), (1, 3));
        assert!(!road.is_single_hop());
        assert_eq!(road.attribute_values.len(), 1);
    }

    #[test]
    fn test_parse_reversed_path() {
        let block = parse_query("SELECT a.id FROM node a, node b MATCH a<-[created]-b").unwrap();
        let path = &block.match_clause.unwrap().paths[0];
        assert!(path.is_reversed);
        assert_eq!(path.steps[0].edge.direction, Direction::Outgoing);

        let block =
            parse_query("SELECT a.id FROM node a, node b, node c MATCH a<-[x]-b-[y]->c").unwrap();
        let path = &block.match_clause.unwrap().paths[0];
        assert!(!path.is_reversed);
        assert_eq!(path.steps[0].edge.direction, Direction::Incoming);
    }

    #[test]
    fn test_parse_boolean_precedence() {
        let block = parse_query(
            "SELECT a.id FROM node a WHERE (a.x + 1) * 2 > 3 AND (a.y = 1 OR NOT a.z IS NULL)",
        )
        .unwrap();

        match block.where_clause.unwrap() {
            BooleanExpr::And(left, right) => {
                assert!(matches!(*left, BooleanExpr::Comparison { .. }));
                assert!(matches!(*right, BooleanExpr::Or(..)));
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_parse_table_references() {
        let block = parse_query(
            "SELECT v.name FROM node a, (SELECT a.id FROM node a) AS d, @people p, out_v(a._edge, 'name') AS v",
        )
        .unwrap();

        assert!(matches!(block.from[1], TableReference::Derived { .. }));
        assert!(matches!(&block.from[2], TableReference::Variable { name, alias } if name == "people" && alias == "p"));
        match &block.from[3] {
            TableReference::Function { function, alias } => {
                assert_eq!(function.name, "out_v");
                assert_eq!(function.args.len(), 2);
                assert_eq!(alias, "v");
            }
            other => panic!("unexpected table reference {:?}", other),
        }
    }

    #[test]
    fn test_parse_script_with_set() {
        let script =
            parse_script("SET @p = (SELECT a.id FROM node a); SELECT x.id FROM @p AS x;").unwrap();
        assert_eq!(script.statements.len(), 2);
        assert!(matches!(script.statements[0], Statement::SetVariable { .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_query("SELECT FROM node a"),
            Err(Error::QueryParse(_))
        ));
        assert!(parse_query("SELECT a.id FROM node a MATCH a-[knows->b").is_err());
        assert!(parse_query("SELECT a.id FROM node a WHERE a.x").is_err());
        assert!(parse_script("").is_err());
    }
}

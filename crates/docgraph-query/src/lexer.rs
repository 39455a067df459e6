//! Query lexer using logos

use docgraph_core::{Error, Result};
use logos::Logos;
use thiserror::Error as ThisError;

/// Error raised by the lexer on an unrecognised character
#[derive(ThisError, Debug, Clone, Default, PartialEq)]
pub enum LexError {
    #[default]
    #[error("unrecognised input")]
    InvalidToken,
}

/// Query tokens
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(error = LexError)]
pub enum Token {
    // Keywords
    #[token("SELECT", ignore(ascii_case))]
    Select,

    #[token("FROM", ignore(ascii_case))]
    From,

    #[token("MATCH", ignore(ascii_case))]
    Match,

    #[token("WHERE", ignore(ascii_case))]
    Where,

    #[token("ORDER", ignore(ascii_case))]
    Order,

    #[token("BY", ignore(ascii_case))]
    By,

    #[token("ASC", ignore(ascii_case))]
    Asc,

    #[token("DESC", ignore(ascii_case))]
    Desc,

    #[token("AS", ignore(ascii_case))]
    As,

    #[token("SET", ignore(ascii_case))]
    Set,

    // Boolean keywords
    #[token("AND", ignore(ascii_case))]
    And,

    #[token("OR", ignore(ascii_case))]
    Or,

    #[token("NOT", ignore(ascii_case))]
    Not,

    #[token("IS", ignore(ascii_case))]
    Is,

    #[token("TRUE", ignore(ascii_case))]
    True,

    #[token("FALSE", ignore(ascii_case))]
    False,

    #[token("NULL", ignore(ascii_case))]
    Null,

    // Symbols
    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(":")]
    Colon,

    #[token(";")]
    Semicolon,

    #[token(",")]
    Comma,

    #[token(".")]
    Dot,

    #[token("..")]
    DoubleDot,

    #[token("=")]
    Equals,

    #[token("<>")]
    NotEquals,

    #[token("!=")]
    NotEquals2,

    #[token("<")]
    LessThan,

    #[token("<=")]
    LessEquals,

    #[token(">")]
    GreaterThan,

    #[token(">=")]
    GreaterEquals,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    // Edge arrows
    #[token("->")]
    DashArrowRight,

    #[token("<-")]
    ArrowLeftDash,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        Some(s[1..s.len()-1].to_string())
    })]
    StringDouble(String),

    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| {
        let s = lex.slice();
        Some(s[1..s.len()-1].replace("\\'", "'"))
    })]
    StringSingle(String),

    // Identifiers
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"`[^`]+`", |lex| {
        let s = lex.slice();
        s[1..s.len()-1].to_string()
    })]
    EscapedIdentifier(String),

    // Temporary table variable
    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Variable(String),

    // Comment (skip)
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[regex(r"/\*([^*]|\*[^/])*\*/", logos::skip)]
    BlockComment,
}

impl Token {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Token::Select
                | Token::From
                | Token::Match
                | Token::Where
                | Token::Order
                | Token::By
                | Token::Asc
                | Token::Desc
                | Token::As
                | Token::Set
                | Token::And
                | Token::Or
                | Token::Not
                | Token::Is
                | Token::True
                | Token::False
                | Token::Null
        )
    }

    /// Check if this token is a literal
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Token::Integer(_)
                | Token::Float(_)
                | Token::StringDouble(_)
                | Token::StringSingle(_)
                | Token::True
                | Token::False
                | Token::Null
        )
    }

    /// Check if this token is a comparison operator
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Token::Equals
                | Token::NotEquals
                | Token::NotEquals2
                | Token::LessThan
                | Token::LessEquals
                | Token::GreaterThan
                | Token::GreaterEquals
        )
    }
}

/// Tokenize a query string, silently dropping unrecognised input
pub fn tokenize(input: &str) -> Vec<Token> {
    Token::lexer(input).filter_map(|r| r.ok()).collect()
}

/// Tokenize a query string, failing on the first unrecognised character
pub fn tokenize_strict(input: &str) -> Result<Vec<Token>> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push(token),
            Err(err) => {
                return Err(Error::QueryParse(format!(
                    "{} at offset {}: {:?}",
                    err,
                    lexer.span().start,
                    lexer.slice()
                )));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_query() {
        let tokens = tokenize("SELECT b.name FROM node a, node b MATCH a-[knows]->b");

        assert!(tokens.contains(&Token::Select));
        assert!(tokens.contains(&Token::From));
        assert!(tokens.contains(&Token::Match));
        assert!(tokens.contains(&Token::LBracket));
        assert!(tokens.contains(&Token::DashArrowRight));
    }

    #[test]
    fn test_identifiers() {
        let tokens = tokenize("a._reverse_edge");

        assert_eq!(
            tokens,
            vec![
                Token::Identifier("a".to_string()),
                Token::Dot,
                Token::Identifier("_reverse_edge".to_string()),
            ]
        );
    }

    #[test]
    fn test_literals() {
        let tokens = tokenize("WHERE a.age = 30 AND a.height = 1.75");

        assert!(tokens.iter().any(|t| matches!(t, Token::Integer(30))));
        assert!(tokens.iter().any(|t| matches!(t, Token::Float(f) if (*f - 1.75).abs() < 0.001)));
    }

    #[test]
    fn test_strings() {
        let tokens = tokenize(r#"WHERE a.name = "Alice" OR a.name = 'Bob'"#);

        assert!(tokens
            .iter()
            .any(|t| matches!(t, Token::StringDouble(s) if s == "Alice")));
        assert!(tokens
            .iter()
            .any(|t| matches!(t, Token::StringSingle(s) if s == "Bob")));
    }

    #[test]
    fn test_edge_arrows() {
        let tokens = tokenize("a<-[created]-b");
        assert_eq!(tokens[1], Token::ArrowLeftDash);
        assert_eq!(tokens[4], Token::Minus);

        let tokens = tokenize("a-[e*1..3]->b");
        assert!(tokens.contains(&Token::Star));
        assert!(tokens.contains(&Token::DoubleDot));
        assert!(tokens.contains(&Token::Integer(3)));
    }

    #[test]
    fn test_variables() {
        let tokens = tokenize("SET @people = (SELECT a.id FROM node a)");

        assert!(tokens
            .iter()
            .any(|t| matches!(t, Token::Variable(s) if s == "people")));
    }

    #[test]
    fn test_case_insensitive_keywords() {
        let tokens1 = tokenize("select FROM");
        let tokens2 = tokenize("SELECT from");

        assert!(tokens1.contains(&Token::Select));
        assert!(tokens1.contains(&Token::From));
        assert!(tokens2.contains(&Token::Select));
        assert!(tokens2.contains(&Token::From));
    }

    #[test]
    fn test_strict_rejects_unknown_characters() {
        assert!(tokenize_strict("SELECT a.name FROM node a").is_ok());
        let err = tokenize_strict("SELECT a.name # 1").unwrap_err();
        assert!(matches!(err, Error::QueryParse(_)));
    }
}

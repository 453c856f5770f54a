//! Lexer for the schema grammar.

use logos::Logos;

use crate::reporting::LexerMessage;
use crate::source::{FileId, Range};

/// Schema tokens. Scalar keywords are matched case-insensitively by the
/// parser, so they lex as plain names here.
#[derive(Clone, Debug, PartialEq, Logos)]
pub enum Token<'source> {
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name(&'source str),
    #[regex(r"[0-9]+")]
    Number(&'source str),

    #[token("?")]
    Question,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("[")]
    OpenBracket,
    #[token("]")]
    CloseBracket,
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,

    #[error]
    #[regex(r"[ \t\r\n]+", logos::skip)]
    #[regex(r"--[^\n]*", logos::skip)]
    Error,
}

impl<'source> Token<'source> {
    /// How the token reads in a diagnostic.
    pub fn description(&self) -> String {
        match self {
            Token::Name(name) => format!("{}", name),
            Token::Number(digits) => format!("{}", digits),
            Token::Question => "?".to_owned(),
            Token::Semicolon => ";".to_owned(),
            Token::Colon => ":".to_owned(),
            Token::OpenBracket => "[".to_owned(),
            Token::CloseBracket => "]".to_owned(),
            Token::OpenBrace => "{".to_owned(),
            Token::CloseBrace => "}".to_owned(),
            Token::OpenParen => "(".to_owned(),
            Token::CloseParen => ")".to_owned(),
            Token::Error => "<error>".to_owned(),
        }
    }
}

/// Tokenise a schema source string.
pub fn tokens(
    file_id: FileId,
    source: &str,
) -> impl Iterator<Item = Result<(Token<'_>, Range), LexerMessage>> {
    Token::lexer(source)
        .spanned()
        .map(move |(token, range)| match token {
            Token::Error => Err(LexerMessage::UnexpectedCharacter {
                file_id,
                range: range.into(),
            }),
            token => Ok((token, range.into())),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_skipped() {
        let source = "u8 -- trailing comment\n [ 12 ]";
        let tokens: Vec<_> = tokens(0, source).map(|token| token.unwrap().0).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Name("u8"),
                Token::OpenBracket,
                Token::Number("12"),
                Token::CloseBracket,
            ]
        );
    }

    #[test]
    fn stray_characters_are_reported() {
        assert!(tokens(0, "u8 @").any(|token| token.is_err()));
    }
}

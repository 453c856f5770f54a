//! Diagnostic messages for the schema and expression text parsers.
//!
//! These can be converted to [`Diagnostic`]s in order to present them to the
//! user.
//!
//! [`Diagnostic`]: codespan_reporting::diagnostic::Diagnostic

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::source::{FileId, Range};

/// Global diagnostic messages.
#[derive(Debug, Clone)]
pub enum Message {
    Lexer(LexerMessage),
    Parse(ParseMessage),
    Schema(SchemaMessage),
}

impl From<LexerMessage> for Message {
    fn from(message: LexerMessage) -> Message {
        Message::Lexer(message)
    }
}

impl From<ParseMessage> for Message {
    fn from(message: ParseMessage) -> Message {
        Message::Parse(message)
    }
}

impl From<SchemaMessage> for Message {
    fn from(message: SchemaMessage) -> Message {
        Message::Schema(message)
    }
}

impl Message {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            Message::Lexer(message) => message.to_diagnostic(),
            Message::Parse(message) => message.to_diagnostic(),
            Message::Schema(message) => message.to_diagnostic(),
        }
    }
}

/// Messages produced while tokenising source text.
#[derive(Debug, Clone)]
pub enum LexerMessage {
    UnexpectedCharacter { file_id: FileId, range: Range },
}

impl LexerMessage {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            LexerMessage::UnexpectedCharacter { file_id, range } => Diagnostic::error()
                .with_message("unexpected character")
                .with_labels(vec![Label::primary(*file_id, *range)]),
        }
    }
}

/// Messages produced while parsing source text.
#[derive(Debug, Clone)]
pub enum ParseMessage {
    UnexpectedToken {
        file_id: FileId,
        range: Range,
        found: String,
        expected: &'static str,
    },
    UnexpectedEof {
        file_id: FileId,
        range: Range,
        expected: &'static str,
    },
    ExtraToken {
        file_id: FileId,
        range: Range,
        found: String,
    },
}

impl ParseMessage {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            ParseMessage::UnexpectedToken {
                file_id,
                range,
                found,
                expected,
            } => Diagnostic::error()
                .with_message(format!("unexpected token `{}`", found))
                .with_labels(vec![Label::primary(*file_id, *range)
                    .with_message(format!("expected {}", expected))]),
            ParseMessage::UnexpectedEof {
                file_id,
                range,
                expected,
            } => Diagnostic::error()
                .with_message("unexpected end of input")
                .with_labels(vec![Label::primary(*file_id, *range)
                    .with_message(format!("expected {}", expected))]),
            ParseMessage::ExtraToken {
                file_id,
                range,
                found,
            } => Diagnostic::error()
                .with_message(format!("extra token `{}` after the end of the term", found))
                .with_labels(vec![Label::primary(*file_id, *range)]),
        }
    }
}

/// Messages produced while checking the well-formedness of a schema.
#[derive(Debug, Clone)]
pub enum SchemaMessage {
    UnknownUserType {
        file_id: FileId,
        range: Range,
        name: String,
    },
    ZeroVectorDimension {
        file_id: FileId,
        range: Range,
    },
    DuplicateField {
        file_id: FileId,
        range: Range,
        name: String,
    },
    NumberOutOfRange {
        file_id: FileId,
        range: Range,
    },
}

impl SchemaMessage {
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            SchemaMessage::UnknownUserType {
                file_id,
                range,
                name,
            } => Diagnostic::error()
                .with_message(format!("unknown type name `{}`", name))
                .with_labels(vec![Label::primary(*file_id, *range)
                    .with_message("not a scalar and not a registered user type")]),
            SchemaMessage::ZeroVectorDimension { file_id, range } => Diagnostic::error()
                .with_message("vector dimension must be greater than zero")
                .with_labels(vec![Label::primary(*file_id, *range)]),
            SchemaMessage::DuplicateField {
                file_id,
                range,
                name,
            } => Diagnostic::error()
                .with_message(format!("duplicate record field `{}`", name))
                .with_labels(vec![Label::primary(*file_id, *range)]),
            SchemaMessage::NumberOutOfRange { file_id, range } => Diagnostic::error()
                .with_message("numeric literal out of range")
                .with_labels(vec![Label::primary(*file_id, *range)]),
        }
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not an O65 object file")]
    BadMagic,
    #[error("unexpected end of file while reading object stream")]
    UnexpectedEof,
    #[error("unterminated null-terminated string in object stream")]
    UnterminatedString,
    #[error("string in object stream is not valid UTF-8")]
    InvalidString,
    #[error("invalid custom header length: {0}")]
    BadHeaderLength(u8),
    #[error("invalid relocation entry: {0:#04x}")]
    BadRelocEntry(u8),
}

pub mod o65;

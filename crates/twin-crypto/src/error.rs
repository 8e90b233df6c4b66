#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("digest has {actual} hex characters, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("digest contains a character that is not lower-case hex: {0:?}")]
    InvalidCharacter(char),
}

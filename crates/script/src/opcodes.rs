//! Opcode definitions for the script verifier.

use std::fmt;

/// Prefix shared by every opcode token.
pub const OPCODE_PREFIX: &str = "OP_";

/// All script opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Duplicate the top stack element.
    Dup,
    /// Replace the top element with the last 20 bytes of its keccak-256 hash.
    Hash160,
    /// Pop two elements and fail unless they are equal.
    EqualVerify,
    /// Pop a public key and a signature and push the verification outcome.
    CheckSig,
}

impl Opcode {
    /// Parse a token as an opcode.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "OP_DUP" => Some(Opcode::Dup),
            "OP_HASH160" => Some(Opcode::Hash160),
            "OP_EQUALVERIFY" => Some(Opcode::EqualVerify),
            "OP_CHECKSIG" => Some(Opcode::CheckSig),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Dup => "OP_DUP",
            Opcode::Hash160 => "OP_HASH160",
            Opcode::EqualVerify => "OP_EQUALVERIFY",
            Opcode::CheckSig => "OP_CHECKSIG",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lexed locking-script token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Op(Opcode),
    /// A literal operand, pushed verbatim.
    Push(&'a str),
    /// An `OP_`-prefixed token that names no known opcode.
    Unknown(&'a str),
}

impl<'a> Token<'a> {
    pub fn parse(token: &'a str) -> Self {
        match Opcode::from_token(token) {
            Some(op) => Token::Op(op),
            None if token.starts_with(OPCODE_PREFIX) => Token::Unknown(token),
            None => Token::Push(token),
        }
    }
}

/// Split a script into its space-separated tokens.
pub fn tokenize(script: &str) -> impl Iterator<Item = &str> {
    script.split(' ').filter(|t| !t.is_empty())
}

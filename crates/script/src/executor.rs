//! Script execution loop.

use crate::opcodes::{tokenize, Opcode, Token};
use plasma_core::{keccak256, PublicKey, Signature};
use thiserror::Error;

/// Literal left on the stack by a successful signature check.
pub const TRUE: &str = "TRUE";
/// Literal left on the stack by a failed signature check.
pub const FALSE: &str = "FALSE";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("stack underflow while executing {0}")]
    StackUnderflow(Opcode),

    #[error("{opcode} expects a hex operand, got {operand:?}")]
    InvalidHex { opcode: Opcode, operand: String },

    #[error("the OP_EQUALVERIFY operation detects invalid values")]
    EqualVerifyFailed,

    #[error("unknown opcode {0} in locking script")]
    UnknownOpcode(String),

    #[error("verifying the script has resulted in FALSE (final stack size {size}, top {top:?})")]
    FalseResult { size: usize, top: Option<String> },
}

impl ScriptError {
    /// True for errors that indicate a malformed locking script rather than a bad spend.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ScriptError::UnknownOpcode(_))
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;

/// The script machine state.
pub struct ScriptVm<'m> {
    stack: Vec<String>,
    /// Digest that OP_CHECKSIG verifies signatures against.
    message: &'m [u8; 32],
}

impl<'m> ScriptVm<'m> {
    pub fn new(message: &'m [u8; 32]) -> Self {
        Self {
            stack: Vec::new(),
            message,
        }
    }

    /// Current stack, bottom first.
    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    /// Push every token of an unlocking script verbatim.
    pub fn push_unlocking(&mut self, script: &str) {
        self.stack.extend(tokenize(script).map(str::to_owned));
    }

    /// Interpret a locking script against the current stack.
    pub fn run_locking(&mut self, script: &str) -> Result<()> {
        for token in tokenize(script) {
            match Token::parse(token) {
                Token::Op(op) => self.step(op)?,
                Token::Push(literal) => self.stack.push(literal.to_owned()),
                Token::Unknown(name) => return Err(ScriptError::UnknownOpcode(name.to_owned())),
            }
        }
        Ok(())
    }

    /// Succeeds iff exactly one element remains and it is `TRUE`.
    pub fn finish(mut self) -> Result<()> {
        let size = self.stack.len();
        let top = self.stack.pop();
        match top.as_deref() {
            Some(TRUE) if size == 1 => Ok(()),
            _ => Err(ScriptError::FalseResult { size, top }),
        }
    }

    fn pop(&mut self, op: Opcode) -> Result<String> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow(op))
    }

    /// Execute a single opcode.
    fn step(&mut self, op: Opcode) -> Result<()> {
        tracing::trace!(opcode = %op, depth = self.stack.len(), "script step");
        match op {
            Opcode::Dup => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or(ScriptError::StackUnderflow(op))?;
                self.stack.push(top);
            }

            Opcode::Hash160 => {
                let elem = self.pop(op)?;
                let bytes = hex::decode(&elem).map_err(|_| ScriptError::InvalidHex {
                    opcode: op,
                    operand: elem.clone(),
                })?;
                let hash = keccak256(&bytes);
                self.stack.push(hex::encode(&hash[12..]));
            }

            Opcode::EqualVerify => {
                let elem1 = self.pop(op)?;
                let elem2 = self.pop(op)?;
                if elem1 != elem2 {
                    return Err(ScriptError::EqualVerifyFailed);
                }
            }

            Opcode::CheckSig => {
                let public_key = self.pop(op)?;
                let signature = self.pop(op)?;
                let valid = self.check_signature(&signature, &public_key);
                let result = if valid { TRUE } else { FALSE };
                self.stack.push(result.to_owned());
            }
        }
        Ok(())
    }

    fn check_signature(&self, signature: &str, public_key: &str) -> bool {
        let (Ok(signature), Ok(public_key)) =
            (Signature::from_base64(signature), PublicKey::from_hex(public_key))
        else {
            return false;
        };
        public_key.verify(self.message, &signature).is_ok()
    }
}

/// Evaluate `locking` against `unlocking` for a spend authorizing `message`.
pub fn verify_script(unlocking: &str, locking: &str, message: &[u8; 32]) -> Result<()> {
    let mut vm = ScriptVm::new(message);
    vm.push_unlocking(unlocking);
    vm.run_locking(locking)?;
    vm.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plasma_core::{Address, Input, KeyPair, OutPoint, Output, OutputIndex, TransactionHash};

    struct Spend {
        unlocking: String,
        locking: String,
        message: [u8; 32],
    }

    fn valid_spend() -> (KeyPair, OutPoint, Spend) {
        let kp = KeyPair::generate();
        let outpoint = OutPoint::new(TransactionHash::digest(b"funding"), OutputIndex::FIRST);
        let input = Input::spend(outpoint, &kp);
        let spend = Spend {
            unlocking: input.unlocking_script().unwrap(),
            locking: Output::new(100, kp.address()).locking_script(),
            message: outpoint.signing_message(),
        };
        (kp, outpoint, spend)
    }

    fn flip_hex_char(s: &str, at: usize) -> String {
        let mut chars: Vec<char> = s.chars().collect();
        chars[at] = if chars[at] == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn test_valid_spend_verifies() {
        let (_, _, spend) = valid_spend();
        assert_eq!(verify_script(&spend.unlocking, &spend.locking, &spend.message), Ok(()));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let (kp, outpoint, spend) = valid_spend();
        let mut sig = kp.sign_digest(&outpoint.signing_message());
        sig.0[10] ^= 0x01;
        let unlocking = format!("{} {}", sig.to_base64(), kp.public_key.to_hex());

        let err = verify_script(&unlocking, &spend.locking, &spend.message).unwrap_err();
        assert_eq!(
            err,
            ScriptError::FalseResult {
                size: 1,
                top: Some(FALSE.to_string())
            }
        );
    }

    #[test]
    fn test_tampered_public_key_fails() {
        let (kp, outpoint, spend) = valid_spend();
        let sig = kp.sign_digest(&outpoint.signing_message());
        // flip a byte inside the x coordinate
        let tampered = flip_hex_char(&kp.public_key.to_hex(), 20);
        let unlocking = format!("{} {}", sig.to_base64(), tampered);

        let result = verify_script(&unlocking, &spend.locking, &spend.message);
        assert_eq!(result, Err(ScriptError::EqualVerifyFailed));
    }

    #[test]
    fn test_wrong_address_fails() {
        let (kp, _, spend) = valid_spend();
        let other = Output::new(100, Address::from_bytes([7u8; 20])).locking_script();
        assert_eq!(
            verify_script(&spend.unlocking, &other, &spend.message),
            Err(ScriptError::EqualVerifyFailed)
        );

        let address_hex = kp.address().raw_hex();
        let tweaked = spend
            .locking
            .replace(&address_hex, &flip_hex_char(&address_hex, 0));
        assert!(verify_script(&spend.unlocking, &tweaked, &spend.message).is_err());
    }

    #[test]
    fn test_replay_against_other_outpoint_fails() {
        let (_, _, spend) = valid_spend();
        let other = OutPoint::new(TransactionHash::digest(b"other"), OutputIndex::FIRST);
        assert!(matches!(
            verify_script(&spend.unlocking, &spend.locking, &other.signing_message()),
            Err(ScriptError::FalseResult { .. })
        ));
    }

    #[test]
    fn test_garbage_signature_pushes_false() {
        let (kp, _, spend) = valid_spend();
        let unlocking = format!("xxx {}", kp.public_key.to_hex());
        let mut vm = ScriptVm::new(&spend.message);
        vm.push_unlocking(&unlocking);
        vm.run_locking(&spend.locking).unwrap();
        assert_eq!(vm.stack(), &[FALSE.to_string()]);
        assert!(vm.finish().is_err());
    }

    #[test]
    fn test_extra_stack_elements_fail() {
        let (_, _, spend) = valid_spend();
        let unlocking = format!("extra {}", spend.unlocking);
        assert_eq!(
            verify_script(&unlocking, &spend.locking, &spend.message),
            Err(ScriptError::FalseResult {
                size: 2,
                top: Some(TRUE.to_string())
            })
        );
    }

    #[test]
    fn test_empty_unlocking_underflows() {
        let (_, _, spend) = valid_spend();
        assert_eq!(
            verify_script("", &spend.locking, &spend.message),
            Err(ScriptError::StackUnderflow(Opcode::Dup))
        );
    }

    #[test]
    fn test_non_hex_public_key() {
        let (_, _, spend) = valid_spend();
        assert!(matches!(
            verify_script("sig not-hex", &spend.locking, &spend.message),
            Err(ScriptError::InvalidHex {
                opcode: Opcode::Hash160,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_opcode_is_invariant_violation() {
        let (_, _, spend) = valid_spend();
        let err = verify_script(&spend.unlocking, "OP_DUP OP_RETURN", &spend.message).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_unlocking_opcodes_are_pushed_verbatim() {
        let message = [0u8; 32];
        let mut vm = ScriptVm::new(&message);
        vm.push_unlocking("OP_DUP TRUE");
        assert_eq!(vm.stack(), &["OP_DUP".to_string(), TRUE.to_string()]);
    }
}

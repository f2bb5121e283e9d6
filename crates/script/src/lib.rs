//! Stack-based script verifier for the plasma child chain.
//!
//! Outputs are locked with a pay-to-address script and spent by pushing a
//! signature and public key:
//!
//! ```text
//! unlocking: <signature-base64> <public-key-hex>
//! locking:   OP_DUP OP_HASH160 <address-hex> OP_EQUALVERIFY OP_CHECKSIG
//! ```
//!
//! The verifier is pure: it never touches chain state.

pub mod executor;
pub mod opcodes;

pub use executor::{verify_script, ScriptError, ScriptVm, FALSE, TRUE};
pub use opcodes::{Opcode, Token};

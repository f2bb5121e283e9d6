//! The UTXO data model: outputs, inputs and transactions.

use crate::crypto::{Address, KeyPair, PublicKey, Signature};
use crate::hash::{keccak256, TransactionHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum number of inputs a transaction may carry.
pub const MAX_INPUTS: usize = 2;
/// Maximum number of outputs a transaction may carry.
pub const MAX_OUTPUTS: usize = 2;

/// Errors that can occur while constructing a transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("too many inputs (maximum {MAX_INPUTS}, got {0})")]
    TooManyInputs(usize),
    #[error("too many outputs (maximum {MAX_OUTPUTS}, got {0})")]
    TooManyOutputs(usize),
}

/// Position of an output within its transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputIndex(pub u8);

impl OutputIndex {
    pub const FIRST: Self = Self(0);
    pub const SECOND: Self = Self(1);
    /// Sentinel paired with [`TransactionHash::GENERATION`].
    pub const GENERATION: Self = Self(u8::MAX);

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Two hex characters, as concatenated into the spend message.
    pub fn to_hex(&self) -> String {
        format!("{:02x}", self.0)
    }
}

impl TryFrom<u64> for OutputIndex {
    type Error = std::num::TryFromIntError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        u8::try_from(value).map(OutputIndex)
    }
}

impl fmt::Debug for OutputIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputIndex({})", self.0)
    }
}

impl fmt::Display for OutputIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an output of a prior transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub transaction_hash: TransactionHash,
    pub output_index: OutputIndex,
}

impl OutPoint {
    pub fn new(transaction_hash: TransactionHash, output_index: OutputIndex) -> Self {
        Self {
            transaction_hash,
            output_index,
        }
    }

    /// The generation outpoint, referenced by inputs with no prior output.
    pub fn generation() -> Self {
        Self::new(TransactionHash::GENERATION, OutputIndex::GENERATION)
    }

    /// The digest a spender signs: keccak-256 over the bytes of
    /// `hex(transaction_hash) || hex(output_index)`.
    pub fn signing_message(&self) -> [u8; 32] {
        let mut message = Vec::with_capacity(33);
        message.extend_from_slice(self.transaction_hash.as_bytes());
        message.push(self.output_index.0);
        keccak256(&message)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.transaction_hash.as_bytes());
        buf.push(self.output_index.0);
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutPoint({}:{})", self.transaction_hash, self.output_index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_hash, self.output_index)
    }
}

/// An output: value locked to a recipient address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub amount: u64,
    pub address: Address,
    /// Set once the root chain reports an exit for this output. Never reset.
    #[serde(default)]
    exit_started: bool,
}

impl Output {
    pub fn new(amount: u64, address: Address) -> Self {
        Self {
            amount,
            address,
            exit_started: false,
        }
    }

    /// The pay-to-address script guarding this output.
    pub fn locking_script(&self) -> String {
        format!(
            "OP_DUP OP_HASH160 {} OP_EQUALVERIFY OP_CHECKSIG",
            self.address.raw_hex()
        )
    }

    pub fn exit_started(&self) -> bool {
        self.exit_started
    }

    pub fn mark_as_exit_started(&mut self) {
        self.exit_started = true;
    }

    /// Amount as 16 hex characters (a big-endian u64).
    pub fn amount_hex(&self) -> String {
        format!("{:016x}", self.amount)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.amount.to_be_bytes());
        buf.extend_from_slice(self.address.as_bytes());
    }
}

/// Opaque data carried by a generation input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoinbaseData(pub Vec<u8>);

impl CoinbaseData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for CoinbaseData {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    /// Spends a prior output; the signature and public key form the unlocking script.
    Spending {
        outpoint: OutPoint,
        signature: Signature,
        public_key: PublicKey,
    },
    /// Mints value with no prior reference (deposits).
    Generation { coinbase_data: CoinbaseData },
}

impl Input {
    /// Build a signed input spending `outpoint` with `keypair`.
    pub fn spend(outpoint: OutPoint, keypair: &KeyPair) -> Self {
        Input::Spending {
            outpoint,
            signature: keypair.sign_digest(&outpoint.signing_message()),
            public_key: keypair.public_key,
        }
    }

    pub fn generation(coinbase_data: impl Into<CoinbaseData>) -> Self {
        Input::Generation {
            coinbase_data: coinbase_data.into(),
        }
    }

    /// The referenced output, if this input spends one.
    pub fn outpoint(&self) -> Option<&OutPoint> {
        match self {
            Input::Spending { outpoint, .. } => Some(outpoint),
            Input::Generation { .. } => None,
        }
    }

    pub fn is_generation(&self) -> bool {
        matches!(self, Input::Generation { .. })
    }

    /// `<signature-base64> <public-key-hex>` for spending inputs.
    pub fn unlocking_script(&self) -> Option<String> {
        match self {
            Input::Spending {
                signature,
                public_key,
                ..
            } => Some(format!("{} {}", signature.to_base64(), public_key.to_hex())),
            Input::Generation { .. } => None,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            // Witness data is not part of the transaction hash.
            Input::Spending { outpoint, .. } => outpoint.encode_into(buf),
            Input::Generation { coinbase_data } => {
                OutPoint::generation().encode_into(buf);
                buf.extend_from_slice(&(coinbase_data.0.len() as u32).to_be_bytes());
                buf.extend_from_slice(coinbase_data.as_bytes());
            }
        }
    }
}

#[derive(Deserialize)]
struct TransactionParts {
    inputs: Vec<Input>,
    outputs: Vec<Output>,
}

impl TryFrom<TransactionParts> for Transaction {
    type Error = TransactionError;

    fn try_from(parts: TransactionParts) -> Result<Self, Self::Error> {
        Transaction::new(parts.inputs, parts.outputs)
    }
}

/// A child-chain transaction: up to two inputs and up to two outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TransactionParts")]
pub struct Transaction {
    inputs: Vec<Input>,
    outputs: Vec<Output>,
}

impl Transaction {
    /// Create a transaction, enforcing the two-in/two-out bound.
    pub fn new(inputs: Vec<Input>, outputs: Vec<Output>) -> Result<Self, TransactionError> {
        if inputs.len() > MAX_INPUTS {
            return Err(TransactionError::TooManyInputs(inputs.len()));
        }
        if outputs.len() > MAX_OUTPUTS {
            return Err(TransactionError::TooManyOutputs(outputs.len()));
        }
        Ok(Self { inputs, outputs })
    }

    /// Create a generation transaction minting `output`.
    pub fn generation(coinbase_data: impl Into<CoinbaseData>, output: Output) -> Self {
        Self {
            inputs: vec![Input::generation(coinbase_data)],
            outputs: vec![output],
        }
    }

    /// The canonical encoding: inputs then outputs, in order.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.inputs.len() * 33 + self.outputs.len() * 28);
        for input in &self.inputs {
            input.encode_into(&mut buf);
        }
        for output in &self.outputs {
            output.encode_into(&mut buf);
        }
        buf
    }

    /// Hash of the canonical encoding. Computed on demand.
    pub fn hash(&self) -> TransactionHash {
        TransactionHash::digest(&self.encode())
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&self, index: OutputIndex) -> Option<&Output> {
        self.outputs.get(index.as_usize())
    }

    /// Set the exit flag on one output. Returns false if the index is out of range.
    pub fn mark_output_exit_started(&mut self, index: OutputIndex) -> bool {
        match self.outputs.get_mut(index.as_usize()) {
            Some(output) => {
                output.mark_as_exit_started();
                true
            }
            None => false,
        }
    }

    /// Outputs referenced by spending inputs.
    pub fn spent_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().filter_map(Input::outpoint)
    }

    /// Outpoints created by this transaction.
    pub fn created_outpoints(&self) -> impl Iterator<Item = (OutPoint, &Output)> {
        let hash = self.hash();
        self.outputs
            .iter()
            .enumerate()
            .map(move |(i, output)| (OutPoint::new(hash, OutputIndex(i as u8)), output))
    }

    /// True if every input is a generation input.
    pub fn is_generation(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(Input::is_generation)
    }

    /// Sum of output amounts, or None on overflow.
    pub fn total_output_amount(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
    }
}

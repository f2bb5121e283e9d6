//! Transaction admission checks.
//!
//! Verifies a transaction against a chain snapshot: referenced outputs must exist and be
//! unspent, every unlocking script must satisfy its output's locking script, and no
//! referenced output may be locked by an exit.

use crate::chain::ChainSnapshot;
use plasma_core::{Input, OutPoint, Transaction};
use plasma_script::verify_script;
use std::collections::HashSet;
use std::fmt;

/// Outcome of verifying a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Success,
    Failure(String),
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationResult::Success)
    }

    /// The failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            VerificationResult::Success => None,
            VerificationResult::Failure(reason) => Some(reason),
        }
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Success => f.write_str("success"),
            VerificationResult::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

fn not_found(outpoint: &OutPoint) -> VerificationResult {
    VerificationResult::Failure(format!(
        "the output is not found. tx_hash {} oindex {}",
        outpoint.transaction_hash.to_hex(),
        outpoint.output_index
    ))
}

/// Stateless verifier; all state is read from the snapshot passed to [`verify`].
///
/// [`verify`]: TransactionVerificationService::verify
#[derive(Debug, Default, Clone, Copy)]
pub struct TransactionVerificationService;

impl TransactionVerificationService {
    /// Create a new verification service.
    pub fn new() -> Self {
        Self
    }

    /// Verify `tx` against `snapshot`, stopping at the first failure.
    pub fn verify(&self, snapshot: &ChainSnapshot<'_>, tx: &Transaction) -> VerificationResult {
        if tx.inputs().is_empty() {
            return VerificationResult::Failure("the transaction has no inputs".into());
        }
        // Generation inputs are minted by deposits only and never go through admission.
        if tx.inputs().iter().any(Input::is_generation) {
            return VerificationResult::Failure(
                "generation inputs are only created by deposits".into(),
            );
        }

        let mut seen = HashSet::new();
        for outpoint in tx.spent_outpoints() {
            if !seen.insert(*outpoint) {
                return VerificationResult::Failure(format!(
                    "the transaction spends {outpoint} more than once"
                ));
            }
        }

        // Referenced outputs must exist and be unspent.
        let mut referenced = Vec::with_capacity(tx.input_count());
        for input in tx.inputs() {
            let Some(outpoint) = input.outpoint() else {
                continue;
            };
            match snapshot.find(outpoint) {
                Some(output) => referenced.push((input, outpoint, output)),
                None => return not_found(outpoint),
            }
        }

        for (input, outpoint, output) in &referenced {
            let locking = output.locking_script();
            if let Err(result) = Self::verify_input_script(input, outpoint, &locking) {
                return result;
            }
        }

        for (_, outpoint, _) in &referenced {
            // Re-read in case the flag changed since the first lookup.
            let locked = snapshot
                .find(outpoint)
                .map_or(false, |output| output.exit_started());
            if locked {
                return VerificationResult::Failure(format!(
                    "the output is in exit procedure. tx_hash {} oindex {}",
                    outpoint.transaction_hash.to_hex(),
                    outpoint.output_index
                ));
            }
        }

        let input_total = referenced
            .iter()
            .try_fold(0u64, |acc, (_, _, output)| acc.checked_add(output.amount));
        match (input_total, tx.total_output_amount()) {
            (Some(inputs), Some(outputs)) if outputs <= inputs => VerificationResult::Success,
            (Some(inputs), Some(outputs)) => VerificationResult::Failure(format!(
                "outputs total {outputs} exceeds inputs total {inputs}"
            )),
            _ => VerificationResult::Failure("amount overflow".into()),
        }
    }

    fn verify_input_script(
        input: &Input,
        outpoint: &OutPoint,
        locking: &str,
    ) -> std::result::Result<(), VerificationResult> {
        let Some(unlocking) = input.unlocking_script() else {
            return Ok(());
        };
        verify_script(&unlocking, locking, &outpoint.signing_message()).map_err(|err| {
            if err.is_invariant_violation() {
                tracing::error!(%outpoint, locking, error = %err, "malformed locking script");
            }
            VerificationResult::Failure(err.to_string())
        })
    }
}

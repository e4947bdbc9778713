//! Transaction verification
//!
//! Decides whether a finalized transaction pays a given intent. Checks run
//! cheapest and most decisive first, so the caller always gets the most
//! specific reason:
//! 1. Transaction exists at finalized commitment
//! 2. Execution succeeded
//! 3. A native transfer is present (only the first one is inspected)
//! 4. Transfer goes to the treasury
//! 5. Amount matches within tolerance
//! 6. The intent's reference is among the account keys

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use solgate_ledger::{LedgerReader, LedgerTransaction};

use crate::error::{PaymentError, PaymentResult};

/// What an intent expects to see on chain
#[derive(Debug, Clone, Copy)]
pub struct ExpectedPayment<'a> {
    pub reference: &'a str,
    pub lamports: u64,
    pub recipient: &'a str,
}

/// A transfer that satisfied an intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedTransfer {
    pub signature: String,
    pub slot: u64,
    pub source: String,
    pub destination: String,
    pub lamports: u64,
}

/// Transaction verifier
pub struct TransactionVerifier {
    ledger: Arc<dyn LedgerReader>,
    /// Accepted absolute difference between expected and actual amount
    tolerance_lamports: u64,
}

impl TransactionVerifier {
    pub fn new(ledger: Arc<dyn LedgerReader>, tolerance_lamports: u64) -> Self {
        Self {
            ledger,
            tolerance_lamports,
        }
    }

    /// Fetch `signature` and check it against `expected`
    pub async fn verify(
        &self,
        signature: &str,
        expected: &ExpectedPayment<'_>,
    ) -> PaymentResult<VerifiedTransfer> {
        let tx = self
            .ledger
            .fetch_transaction(signature)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(signature.to_string()))?;

        self.check(&tx, expected)
    }

    /// Check an already fetched transaction
    pub fn check(
        &self,
        tx: &LedgerTransaction,
        expected: &ExpectedPayment<'_>,
    ) -> PaymentResult<VerifiedTransfer> {
        if let Some(err) = &tx.error {
            return Err(PaymentError::TransactionFailed(err.clone()));
        }

        let transfer = tx.first_transfer().ok_or(PaymentError::NoTransferFound)?;

        if !transfer.destination.eq_ignore_ascii_case(expected.recipient) {
            return Err(PaymentError::InvalidRecipient {
                expected: expected.recipient.to_string(),
                actual: transfer.destination.clone(),
            });
        }

        if transfer.lamports.abs_diff(expected.lamports) > self.tolerance_lamports {
            return Err(PaymentError::InvalidAmount {
                expected: expected.lamports,
                actual: transfer.lamports,
            });
        }

        if !tx.has_account(expected.reference) {
            return Err(PaymentError::ReferenceNotFound);
        }

        debug!(
            "Verified {}: {} lamports {} -> {} (slot {}, memos {:?})",
            tx.signature,
            transfer.lamports,
            transfer.source,
            transfer.destination,
            tx.slot,
            tx.memos()
        );

        Ok(VerifiedTransfer {
            signature: tx.signature.clone(),
            slot: tx.slot,
            source: transfer.source.clone(),
            destination: transfer.destination.clone(),
            lamports: transfer.lamports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{payment_tx, signature, wallet};
    use crate::DEFAULT_AMOUNT_TOLERANCE_LAMPORTS;
    use solgate_ledger::{sol_to_lamports, MemoryLedger, ParsedInstruction};

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        verifier: TransactionVerifier,
        treasury: String,
        reference: String,
        payer: String,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let verifier = TransactionVerifier::new(ledger.clone(), DEFAULT_AMOUNT_TOLERANCE_LAMPORTS);
        Fixture {
            ledger,
            verifier,
            treasury: wallet(200),
            reference: wallet(100),
            payer: wallet(1),
        }
    }

    impl Fixture {
        fn expected(&self) -> ExpectedPayment<'_> {
            ExpectedPayment {
                reference: &self.reference,
                lamports: 500_000_000,
                recipient: &self.treasury,
            }
        }
    }

    #[tokio::test]
    async fn test_matching_transaction_verifies() {
        let f = fixture();
        let sig = signature(1);
        f.ledger
            .insert(payment_tx(&sig, &f.payer, &f.treasury, 500_000_000, Some(&f.reference)));

        let verified = f.verifier.verify(&sig, &f.expected()).await.unwrap();
        assert_eq!(verified.signature, sig);
        assert_eq!(verified.lamports, 500_000_000);
        assert_eq!(verified.source, f.payer);
    }

    #[tokio::test]
    async fn test_unknown_signature_is_not_found() {
        let f = fixture();
        let result = f.verifier.verify(&signature(9), &f.expected()).await;
        assert!(matches!(result, Err(PaymentError::TransactionNotFound(_))));
    }

    #[test]
    fn test_failed_execution_rejected_before_anything_else() {
        let f = fixture();
        // Wrong recipient too, but the execution failure wins
        let mut tx = payment_tx(&signature(1), &f.payer, &f.payer, 1, None);
        tx.error = Some("InsufficientFundsForRent".into());

        assert!(matches!(
            f.verifier.check(&tx, &f.expected()),
            Err(PaymentError::TransactionFailed(_))
        ));
    }

    #[test]
    fn test_no_transfer() {
        let f = fixture();
        let mut tx = payment_tx(&signature(1), &f.payer, &f.treasury, 500_000_000, Some(&f.reference));
        tx.instructions = vec![ParsedInstruction::Memo {
            text: "hello".into(),
        }];

        assert!(matches!(
            f.verifier.check(&tx, &f.expected()),
            Err(PaymentError::NoTransferFound)
        ));
    }

    #[test]
    fn test_wrong_recipient() {
        let f = fixture();
        let other = wallet(201);
        let tx = payment_tx(&signature(1), &f.payer, &other, 500_000_000, Some(&f.reference));

        match f.verifier.check(&tx, &f.expected()) {
            Err(PaymentError::InvalidRecipient { expected, actual }) => {
                assert_eq!(expected, f.treasury);
                assert_eq!(actual, other);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_recipient_comparison_ignores_case() {
        let f = fixture();
        let shouted = f.treasury.to_uppercase();
        let tx = payment_tx(&signature(1), &f.payer, &shouted, 500_000_000, Some(&f.reference));

        assert!(f.verifier.check(&tx, &f.expected()).is_ok());
    }

    #[test]
    fn test_amount_within_tolerance_accepted() {
        let f = fixture();
        let actual = sol_to_lamports(0.5005).unwrap();
        let tx = payment_tx(&signature(1), &f.payer, &f.treasury, actual, Some(&f.reference));

        assert!(f.verifier.check(&tx, &f.expected()).is_ok());

        // The tolerance bound itself is accepted
        let tx = payment_tx(&signature(2), &f.payer, &f.treasury, 499_000_000, Some(&f.reference));
        assert!(f.verifier.check(&tx, &f.expected()).is_ok());
    }

    #[test]
    fn test_amount_outside_tolerance_rejected() {
        let f = fixture();
        let tx = payment_tx(&signature(1), &f.payer, &f.treasury, 400_000_000, Some(&f.reference));

        match f.verifier.check(&tx, &f.expected()) {
            Err(PaymentError::InvalidAmount { expected, actual }) => {
                assert_eq!(expected, 500_000_000);
                assert_eq!(actual, 400_000_000);
            }
            other => panic!("unexpected: {:?}", other),
        }

        let tx = payment_tx(&signature(2), &f.payer, &f.treasury, 501_000_001, Some(&f.reference));
        assert!(matches!(
            f.verifier.check(&tx, &f.expected()),
            Err(PaymentError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_missing_reference_rejected_even_when_payment_is_right() {
        let f = fixture();
        let tx = payment_tx(&signature(1), &f.payer, &f.treasury, 500_000_000, None);

        assert!(matches!(
            f.verifier.check(&tx, &f.expected()),
            Err(PaymentError::ReferenceNotFound)
        ));
    }

    #[test]
    fn test_only_first_transfer_is_inspected() {
        let f = fixture();
        let mut tx = payment_tx(&signature(1), &f.payer, &f.treasury, 500_000_000, Some(&f.reference));
        // A leading transfer elsewhere hides the treasury payment
        tx.instructions.insert(
            0,
            ParsedInstruction::SystemTransfer(solgate_ledger::Transfer {
                source: f.payer.clone(),
                destination: wallet(7),
                lamports: 5000,
            }),
        );

        assert!(matches!(
            f.verifier.check(&tx, &f.expected()),
            Err(PaymentError::InvalidRecipient { .. })
        ));
    }
}

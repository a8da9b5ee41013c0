//! Map raw ledger rejections onto retryable error classes.
//!
//! The RPC only reports text: preflight failures read like
//! `custom program error: 0x1774`, and confirmed failures carry
//! `{"InstructionError":[1,{"Custom":6004}]}`.

use crate::address::Pubkey;
use crate::error::WalletError;

/// Wallet program error: supplied nonce is not `transaction_nonce + 1`.
pub const ERROR_INVALID_NONCE: u32 = 6004;
/// Wallet program error: timestamp outside the accepted window.
pub const ERROR_STALE_TIMESTAMP: u32 = 6005;

/// What the rejected request was trying to do.
#[derive(Debug, Clone, Copy)]
pub struct RejectionContext<'a> {
    pub instruction: &'a str,
    pub wallet: &'a Pubkey,
    pub nonce: Option<u64>,
    pub guardian_id: Option<u64>,
}

/// Extract a custom program error code from RPC error text.
pub fn custom_error_code(reason: &str) -> Option<u32> {
    if let Some(pos) = reason.find("custom program error: 0x") {
        let digits: String = reason[pos + "custom program error: 0x".len()..]
            .chars()
            .take_while(char::is_ascii_hexdigit)
            .collect();
        return u32::from_str_radix(&digits, 16).ok();
    }
    if let Some(pos) = reason.find("\"Custom\":") {
        let digits: String = reason[pos + "\"Custom\":".len()..]
            .trim_start()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        return digits.parse().ok();
    }
    None
}

/// Reclassify `LedgerRejected` / `TransactionFailed` using `context`.
///
/// Nonce and timestamp rejections become `StaleAuthorization`; a guardian
/// account that already exists becomes `AllocationConflict`. Everything else
/// passes through.
pub fn classify_rejection(err: WalletError, context: &RejectionContext<'_>) -> WalletError {
    let reason = match &err {
        WalletError::LedgerRejected { reason, .. } | WalletError::TransactionFailed { reason, .. } => {
            reason.clone()
        }
        _ => return err,
    };

    match custom_error_code(&reason) {
        Some(ERROR_INVALID_NONCE) => {
            return WalletError::StaleAuthorization {
                wallet: context.wallet.to_string(),
                supplied_nonce: context.nonce.unwrap_or_default(),
                reason: "nonce already consumed".to_string(),
            };
        }
        Some(ERROR_STALE_TIMESTAMP) => {
            return WalletError::StaleAuthorization {
                wallet: context.wallet.to_string(),
                supplied_nonce: context.nonce.unwrap_or_default(),
                reason: "timestamp rejected".to_string(),
            };
        }
        _ => {}
    }

    if let Some(guardian_id) = context.guardian_id {
        // System program AccountAlreadyInUse surfaces as `Custom: 0` once confirmed.
        if reason.contains("already in use") || custom_error_code(&reason) == Some(0) {
            return WalletError::AllocationConflict {
                wallet: context.wallet.to_string(),
                guardian_id,
            };
        }
    }

    match err {
        WalletError::LedgerRejected { reason, .. } => WalletError::LedgerRejected {
            instruction: context.instruction.to_string(),
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(reason: &str) -> WalletError {
        WalletError::LedgerRejected {
            instruction: "unknown".to_string(),
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_custom_error_code_formats() {
        assert_eq!(
            custom_error_code("Error processing Instruction 1: custom program error: 0x1774"),
            Some(6004)
        );
        assert_eq!(
            custom_error_code(r#"{"InstructionError":[1,{"Custom":6005}]}"#),
            Some(6005)
        );
        assert_eq!(custom_error_code("blockhash not found"), None);
    }

    #[test]
    fn test_nonce_rejection_is_stale() {
        let wallet = Pubkey::new_from_array([1; 32]);
        let ctx = RejectionContext {
            instruction: "execute_transfer",
            wallet: &wallet,
            nonce: Some(4),
            guardian_id: None,
        };
        let err = classify_rejection(rejected("custom program error: 0x1774"), &ctx);
        assert!(matches!(
            err,
            WalletError::StaleAuthorization {
                supplied_nonce: 4,
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_existing_account_is_conflict() {
        let wallet = Pubkey::new_from_array([1; 32]);
        let ctx = RejectionContext {
            instruction: "add_guardian",
            wallet: &wallet,
            nonce: None,
            guardian_id: Some(3),
        };
        let err = classify_rejection(
            rejected("Allocate: account Address { .. } already in use"),
            &ctx,
        );
        assert!(matches!(
            err,
            WalletError::AllocationConflict { guardian_id: 3, .. }
        ));

        let confirmed = classify_rejection(
            WalletError::TransactionFailed {
                signature: "sig".to_string(),
                reason: r#"{"InstructionError":[0,{"Custom":0}]}"#.to_string(),
            },
            &ctx,
        );
        assert!(matches!(confirmed, WalletError::AllocationConflict { .. }));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let wallet = Pubkey::new_from_array([1; 32]);
        let ctx = RejectionContext {
            instruction: "add_guardian",
            wallet: &wallet,
            nonce: None,
            guardian_id: None,
        };
        match classify_rejection(rejected("insufficient funds"), &ctx) {
            WalletError::LedgerRejected { instruction, .. } => {
                assert_eq!(instruction, "add_guardian");
            }
            other => panic!("unexpected {other:?}"),
        }

        let network = classify_rejection(WalletError::Network("reset".to_string()), &ctx);
        assert!(matches!(network, WalletError::Network(_)));
    }
}

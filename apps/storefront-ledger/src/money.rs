//! Pure balance arithmetic shared by the wallet and purchase flows.

use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};

/// Outcome of charging a price against a wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitCharge {
    pub paid_from_wallet: Decimal,
    pub due: Decimal,
}

impl SplitCharge {
    /// Wallet pays as much as it can; the rest is due from a receipt.
    pub fn compute(balance: Decimal, price: Decimal) -> Self {
        let paid_from_wallet = balance.max(Decimal::ZERO).min(price);
        Self {
            paid_from_wallet,
            due: price - paid_from_wallet,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.due.is_zero()
    }
}

pub fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// New balance after a debit, refusing to go below zero.
pub fn apply_debit(account_id: i64, balance: Decimal, amount: Decimal) -> Result<Decimal> {
    ensure_positive(amount)?;
    if amount > balance {
        return Err(LedgerError::InsufficientFunds {
            account_id,
            balance,
            requested: amount,
        });
    }
    Ok(balance - amount)
}

pub fn apply_credit(balance: Decimal, amount: Decimal) -> Result<Decimal> {
    ensure_positive(amount)?;
    Ok(balance + amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn split_charge_partial_wallet() {
        let split = SplitCharge::compute(dec!(50000), dec!(120000));
        assert_eq!(split.paid_from_wallet, dec!(50000));
        assert_eq!(split.due, dec!(70000));
        assert!(!split.is_settled());
    }

    #[test]
    fn split_charge_covered_by_wallet() {
        let split = SplitCharge::compute(dec!(200000), dec!(120000));
        assert_eq!(split.paid_from_wallet, dec!(120000));
        assert!(split.is_settled());
    }

    #[test]
    fn split_charge_empty_wallet() {
        let split = SplitCharge::compute(Decimal::ZERO, dec!(120000));
        assert_eq!(split.paid_from_wallet, Decimal::ZERO);
        assert_eq!(split.due, dec!(120000));
    }

    #[test]
    fn debit_refuses_overdraft() {
        let err = apply_debit(5, dec!(100), dec!(100.01)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { account_id: 5, .. }
        ));
        assert_eq!(apply_debit(5, dec!(100), dec!(100)).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        assert!(apply_credit(dec!(10), Decimal::ZERO).is_err());
        assert!(apply_debit(1, dec!(10), dec!(-1)).is_err());
    }
}

//! Transaction selection for the next mined block.
//!
//! Indices address the mempool snapshot they were taken from and are
//! meaningless against any other snapshot.

use tessera_types::Amount;

use crate::mempool::PendingTransaction;

/// Block capacity for user-selected transactions.
pub const MAX_SELECTED: usize = 3;

/// Result of a [`TransactionSelection::toggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Selected,
    Deselected,
    /// Selection was full; nothing changed.
    Ignored,
}

/// Ordered set of at most [`MAX_SELECTED`] mempool indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSelection {
    indices: Vec<usize>,
}

impl TransactionSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deselect `index` if selected, otherwise select it if there is room.
    pub fn toggle(&mut self, index: usize) -> Toggle {
        if let Some(pos) = self.indices.iter().position(|&i| i == index) {
            self.indices.remove(pos);
            Toggle::Deselected
        } else if self.indices.len() < MAX_SELECTED {
            self.indices.push(index);
            Toggle::Selected
        } else {
            Toggle::Ignored
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
    }

    /// Sum of fees of the selected entries. Indices past the end of
    /// `transactions` contribute nothing.
    pub fn total_fees(&self, transactions: &[PendingTransaction]) -> Amount {
        self.indices
            .iter()
            .filter_map(|&i| transactions.get(i))
            .map(|tx| tx.fee)
            .sum()
    }

    /// `block_reward + Σ fee` over the selection.
    pub fn total_reward(&self, block_reward: Amount, transactions: &[PendingTransaction]) -> Amount {
        block_reward + self.total_fees(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::WalletAddress;

    fn tx(fee: f64) -> PendingTransaction {
        PendingTransaction {
            sender: WalletAddress::new("alice"),
            recipient: WalletAddress::new("bob"),
            amount: Amount::from_units(1),
            fee: Amount::from_f64(fee).unwrap(),
            timestamp: None,
            kind: None,
            signature: None,
        }
    }

    #[test]
    fn toggle_adds_then_removes() {
        let mut sel = TransactionSelection::new();
        assert_eq!(sel.toggle(4), Toggle::Selected);
        assert!(sel.contains(4));
        assert_eq!(sel.toggle(4), Toggle::Deselected);
        assert!(sel.is_empty());
    }

    #[test]
    fn fourth_toggle_is_a_silent_noop() {
        let mut sel = TransactionSelection::new();
        for i in 0..3 {
            sel.toggle(i);
        }
        assert_eq!(sel.toggle(7), Toggle::Ignored);
        assert_eq!(sel.indices(), &[0, 1, 2]);
    }

    #[test]
    fn deselect_works_when_full() {
        let mut sel = TransactionSelection::new();
        for i in 0..3 {
            sel.toggle(i);
        }
        assert_eq!(sel.toggle(1), Toggle::Deselected);
        assert_eq!(sel.indices(), &[0, 2]);
    }

    #[test]
    fn total_reward_adds_selected_fees() {
        let pool = vec![tx(0.5), tx(2.0), tx(1.0)];
        let mut sel = TransactionSelection::new();
        sel.toggle(0);
        sel.toggle(2);
        let total = sel.total_reward(Amount::from_units(10), &pool);
        assert_eq!(total.to_string(), "11.5");
    }

    #[test]
    fn stale_indices_contribute_nothing() {
        let pool = vec![tx(0.5)];
        let mut sel = TransactionSelection::new();
        sel.toggle(0);
        sel.toggle(5);
        assert_eq!(sel.total_fees(&pool).to_string(), "0.5");
    }
}

pub mod commission;
pub mod escrow;

pub use commission::{compute_split, CommissionSplit, DEFAULT_COMMISSION_RATE_BPS};
pub use escrow::{
    EscrowStatus, EscrowTransaction, HistoryAction, HistoryEntry, NewEscrowTransaction,
    PayoutAccount,
};

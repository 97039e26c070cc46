pub mod auto_release;
pub mod escrow;
pub mod payouts;

pub use auto_release::{run_auto_release, spawn_auto_release};
pub use escrow::{
    AutoReleaseReport, Caller, CreateEscrowRequest, EscrowError, EscrowPolicy, EscrowTracker,
};
pub use payouts::PayoutAccountService;

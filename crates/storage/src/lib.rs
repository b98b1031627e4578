mod error;
mod memory;
mod record;
mod traits;

pub mod conformance;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use record::{
    AssetKind, AssetRecord, BomItemRecord, OrderRecord, OrderStatus, PaymentEventKind,
    PaymentEventRecord, PaymentProvider, PaymentTransactionRecord, ReviewDecision, ReviewRecord,
    ReviewStatus, SolutionRecord, SolutionStatus, TransactionStatus,
};
pub use traits::MarketStorage;

pub mod ledger;
pub mod net;
pub mod node;
pub mod pool;
pub mod storage;
pub mod types;

pub use heed;

pub mod amount;
pub mod config;
pub mod coordinator;
pub mod model;
pub mod net;
pub mod protocol;
pub mod storage;
pub mod topology;
pub mod worker;

pub use amount::Amount;
pub use config::ClusterConfig;
pub use coordinator::Coordinator;
pub use model::{Account, AccountId, Operation, TxId};
pub use worker::{Participant, WorkerNode};

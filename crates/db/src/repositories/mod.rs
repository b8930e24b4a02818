mod barrier_repository;
mod children_repository;
mod document_repository;
mod interrupt_repository;
mod lock_repository;
mod node_execution_repository;
mod waiter_repository;

pub use barrier_repository::BarrierRepository;
pub use children_repository::ChildrenRepository;
pub use document_repository::DocumentRepository;
pub use interrupt_repository::InterruptRepository;
pub use lock_repository::{AdvisoryLock, LockRepository};
pub use node_execution_repository::NodeExecutionRepository;
pub use waiter_repository::WaiterRepository;

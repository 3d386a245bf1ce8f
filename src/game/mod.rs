pub mod lifecycle;
pub mod scheduler;
pub mod worker;

pub use lifecycle::GuessService;
pub use scheduler::ResolutionScheduler;
pub use worker::ResolutionWorker;

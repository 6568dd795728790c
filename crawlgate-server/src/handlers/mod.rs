pub mod health;
pub mod queue_handlers;
pub mod semaphore_handlers;

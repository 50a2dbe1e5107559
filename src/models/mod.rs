pub mod health;
pub mod message;
pub mod outcome;
pub mod queue;
pub mod retry;

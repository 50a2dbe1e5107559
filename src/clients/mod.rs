pub mod email;
pub mod health;
pub mod rbmq;

mod common;
mod queue_test;

pub mod catalog;
pub mod dispatcher;
pub mod lifecycle;
pub mod orchestrator;
pub mod queue;
pub mod warmup;

pub mod orchestrator;
pub mod serializer;
pub mod statement;
pub mod writer;

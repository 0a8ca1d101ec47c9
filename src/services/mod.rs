pub mod admission;
pub mod handoff;
pub mod staging;
pub mod upload_pipeline;
pub mod worker;

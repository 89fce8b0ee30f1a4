pub mod composition;
pub mod jobs;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod queue;
pub mod relay;
pub mod render;
pub mod scoring;
pub mod site_analysis;
pub mod storage;
pub mod worker;

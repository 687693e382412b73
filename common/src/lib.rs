//! Shared types and utilities for the Harmony dispatch core

pub mod error;
pub mod models;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export commonly used types for convenience
pub use models::{
    DataOperation, DataSource, Job, JobStatus, RequestContext, ServiceConfig, ServiceType,
    WorkItem, WorkItemStatus, WorkItemUpdate, WorkflowStep,
};

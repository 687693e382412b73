//! Core data models module

pub mod context;
pub mod job;
pub mod operation;
pub mod service;
pub mod work_item;
pub mod workflow;

// Re-export commonly used types
pub use context::RequestContext;
pub use job::{Job, JobLink, JobStatus};
pub use operation::{DataOperation, DataSource, DimensionSubset, Granule, ShapeRef, TemporalRange};
pub use service::{
    ServiceCapabilities, ServiceCollection, ServiceConfig, ServiceStep, ServiceType,
    SubsettingCapabilities,
};
pub use work_item::{WorkItem, WorkItemStatus, WorkItemUpdate, WorkResponse};
pub use workflow::WorkflowStep;

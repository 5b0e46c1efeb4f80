pub mod aggregator;
pub mod audit;
pub mod drug_class;
pub mod router;

pub use aggregator::{merge_bundles, BundleAggregator, Dialect, LogicalQuery, UpstreamSource};
pub use audit::{AuditContext, AuditEvent, AuditLevel, AuditSink, RecordingAuditSink, TracingAuditSink};
pub use drug_class::DrugClassAnnotator;
pub use router::FhirRouter;

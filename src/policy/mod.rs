//! 请求期访问策略

pub mod anomaly;
pub mod dispatch;
pub mod fingerprint;
pub mod gates;
mod headers;
pub mod pipeline;
pub mod risk;

pub use anomaly::{Anomaly, AnomalyDetector, AnomalyKind, Severity};
pub use dispatch::{AccessDispatcher, AccessRequest, AccessState, DispatchOutcome};
pub use fingerprint::{
    BrowserFamily, FingerprintExtractor, ModernSignals, Platform, VisitorFingerprint,
};
pub use gates::{Denial, GateChain, GateContext, GateDecision, GateKind, mock_node_payload};
pub use headers::HeaderSource;
pub use pipeline::{PipelineOutcome, PolicyPipeline, VisitorRequest};
pub use risk::{Classification, RiskAssessment, RiskScorer, UaCategory, categorize};

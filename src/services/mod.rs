//! 管线的外部协作方：响应头探测、代理转发、告警投递

pub mod forwarder;
pub mod notifier;
pub mod probe;

pub use forwarder::{ForwardedResponse, Forwarder, HttpForwarder};
pub use notifier::{AlertNotifier, NoopNotifier, RiskAlertEvent, WebhookNotifier};
pub use probe::{HeaderProbe, HeaderSet, PROPAGATED_HEADERS, merge_headers};

//! Switchyard core: the request context, dynamic values, trigger bindings and
//! error taxonomy shared by every layer of the execution pipeline.

pub mod context;
pub mod error;
pub mod traits;
pub mod trigger;
pub mod types;

pub use context::{DeadlineScope, RequestContext};
pub use error::{HandlerResult, Outcome, PipelineError};
pub use traits::{ConfigProvider, EventLogger, LogFields, MapConfigProvider, TracingLogger};
pub use trigger::{TriggerBinding, TriggerKind};
pub use types::{meta_keys, Metadata, Payload, Value};

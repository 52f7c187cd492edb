//! Service exposure and call pipeline.
//!
//! 1. **Descriptors** (`descriptor`): targets, method signatures, registration records
//! 2. **Table** (`table`): immutable service-name lookup built at bind time
//! 3. **Routing** (`router`): envelope decode, lookup and parameter binding
//! 4. **Invocation** (`invoke`): terminal Tower service executing a resolved call
//! 5. **Middleware** (`middleware`): metrics and tracing around invocation
//! 6. **Built-ins** (`builtin`): services every node exposes

pub mod builtin;
pub mod descriptor;
pub mod invoke;
pub mod middleware;
pub mod router;
pub mod table;

use tower::ServiceBuilder;

pub use builtin::{config_service, ServerContext, CONFIG_SERVICE};
pub use descriptor::{
    CallContext, MethodSignature, MethodTable, ServiceDescriptor, ServiceTarget, DEFAULT_REGISTRY,
};
pub use invoke::Invoker;
pub use middleware::{MetricsLayer, MetricsService};
pub use router::{Rejection, ResolvedRequest, RpcRouter};
pub use table::{ServiceTable, ServiceTableBuilder};

/// The invocation stack executed by dispatcher tasks.
pub type CallPipeline = MetricsService<Invoker>;

/// Builds the invocation pipeline: metrics outermost, invoker innermost.
#[must_use]
pub fn build_call_pipeline() -> CallPipeline {
    ServiceBuilder::new().layer(MetricsLayer).service(Invoker)
}

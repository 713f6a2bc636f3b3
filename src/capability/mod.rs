//! 能力层：注册表、物化器、参数 Schema 与文档裁剪

pub mod docstring;
pub mod materializer;
pub mod registry;
pub mod schema;

#[cfg(test)]
pub(crate) mod testing;

pub use materializer::{
    CapabilityDescriptor, CapabilityOutcome, InvocationContext, MaterializedCapability,
    Materializer, ParamDescriptor, ERROR_PREFIX,
};
pub use registry::{
    handler_fn, CapabilityCall, CapabilityHandler, CapabilityType, HandlerOutput, MethodSpec, ParamSpec,
    ParamType, Registry, SideChannel, TypeSpec,
};
pub use schema::{tool_call_schema_json, Bearing};

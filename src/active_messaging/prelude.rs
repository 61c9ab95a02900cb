pub use crate::active_messaging::{
    callback_data, AmContext, AmHandler, AmListener, AmRequest, AmRuntime, AmRuntimeBuilder,
    AmSummary, Buffer, CallbackData, HandlerId, HandlerStats, RequestState,
};
pub use crate::fabric::{Backend, CommId, Communicator, Fabric, LocalFabric, ThreadFabric};
pub use crate::FatalPolicy;

pub use std::sync::Arc;

//! Active messages: small records shipped to a remote rank and executed there
//! by a registered [AmHandler].
//!
//! An [AmRequest] carries one or more packed records, each one a handler id
//! followed by the length prefixed, handler specific payload. Requests are handed to the
//! [AmRuntime] with [enqueue][AmRuntime::enqueue]; nothing is transferred until
//! the runtime is progressed with [advance][AmRuntime::advance] (or one of the
//! blocking calls built on it). On the receiving side the [AmListener] of the
//! communicator picks the message up and the runtime executes each record with
//! the handler registered under its id.
//!
//! # Example
//! ```ignore
//! use amreplay::active_messaging::prelude::*;
//!
//! struct Hello;
//! impl AmHandler for Hello {
//!     fn name(&self) -> &str {
//!         "hello"
//!     }
//!     fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
//!         let msg: String = buffer.get()?;
//!         tracing::info!("rank {} says {msg}", ctx.source());
//!         Ok(())
//!     }
//! }
//!
//! let mut rt = AmRuntimeBuilder::new().build();
//! let hello = rt.attach(Arc::new(Hello));
//! let world = rt.world();
//! rt.start_listen(&world);
//! let mut req = AmRequest::new(0, world.clone());
//! req.pack(hello, &"hi".to_string())?;
//! rt.enqueue(req);
//! rt.fence(&world)?;
//! ```

use crate::event::{Event, UserEventId};
use crate::fabric::Communicator;
use crate::replay::CallbackManager;

use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

pub(crate) mod buffer;
pub use buffer::Buffer;

pub(crate) mod request;
pub use request::{AmRequest, RequestState};

pub(crate) mod listener;
pub use listener::AmListener;

pub(crate) mod fence;

pub(crate) mod runtime;
pub use runtime::{AmRuntime, AmRuntimeBuilder, AmSummary, HandlerStats};

pub mod prelude;

/// Caller owned data shared with handler bodies and callbacks, never inspected
/// by the runtime.
pub type CallbackData = Arc<Mutex<Box<dyn Any + Send>>>;

/// Wrap a value so it can be installed with [AmRuntime::set_cbdata].
pub fn callback_data<T: Any + Send>(data: T) -> CallbackData {
    Arc::new(Mutex::new(Box::new(data)))
}

/// Identity of an attached handler, the index of the handler in attach order.
#[derive(
    serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct HandlerId(pub(crate) u32);

impl HandlerId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "am#{}", self.0)
    }
}

/// Unpack and execute logic for one family of active messages.
///
/// `execute` is called once per inbound record, with `buffer` holding just the
/// payload its sender packed. A failing record does not affect the records
/// packed after it.
pub trait AmHandler: Send + Sync {
    /// Unique name of the handler, attaching a second handler with the same
    /// name returns the id of the first one.
    fn name(&self) -> &str;

    fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()>;
}

/// What a handler body can see and do while it executes.
pub struct AmContext<'a> {
    source: usize,
    comm: &'a Communicator,
    cbdata: Option<&'a CallbackData>,
    cbmanager: Option<&'a Arc<CallbackManager>>,
    pub(crate) replies: Vec<AmRequest>,
}

impl<'a> AmContext<'a> {
    pub(crate) fn new(
        source: usize,
        comm: &'a Communicator,
        cbdata: Option<&'a CallbackData>,
        cbmanager: Option<&'a Arc<CallbackManager>>,
    ) -> AmContext<'a> {
        AmContext {
            source,
            comm,
            cbdata,
            cbmanager,
            replies: Vec::new(),
        }
    }

    /// rank (within [comm][AmContext::comm]) that sent the record
    pub fn source(&self) -> usize {
        self.source
    }

    pub fn comm(&self) -> &Communicator {
        self.comm
    }

    pub fn cbdata(&self) -> Option<CallbackData> {
        self.cbdata.cloned()
    }

    pub fn cbmanager(&self) -> Option<Arc<CallbackManager>> {
        self.cbmanager.cloned()
    }

    /// Dispatch `event` to the user callbacks registered for `user_event` on
    /// the runtime's callback manager, with the runtime's callback data.
    /// Returns false when either slot is empty.
    pub fn notify_user(&self, user_event: UserEventId, event: &Event) -> bool {
        match (self.cbmanager, self.cbdata) {
            (Some(cbmanager), Some(cbdata)) => {
                let mut data = cbdata.lock();
                cbmanager.notify_user(user_event, event, &mut **data);
                true
            }
            _ => {
                tracing::debug!(user_event, "notify_user without callback manager or data");
                false
            }
        }
    }

    /// Queue a follow-up request, enqueued into the runtime once the current
    /// inbound message has been handled.
    pub fn reply(&mut self, request: AmRequest) {
        self.replies.push(request);
    }
}

use super::{AmContext, AmHandler, AmRequest, Buffer, HandlerId};
use crate::fabric::CommId;

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

// attached first by every runtime, so the ids agree on all ranks
pub(crate) const FENCE_MARKER: HandlerId = HandlerId(0);
pub(crate) const FENCE_ACK: HandlerId = HandlerId(1);

/// ranks a fence still waits for, per communicator
pub(crate) type PendingAcks = Arc<Mutex<HashMap<CommId, BTreeSet<usize>>>>;

/// The null message sent by `fence`. Records arrive in order, so by the time
/// the marker executes every earlier record from the same origin has been
/// executed too; the marker answers with an acknowledgement.
pub(crate) struct FenceMarker;

impl AmHandler for FenceMarker {
    fn name(&self) -> &str {
        "amreplay::fence_marker"
    }

    fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
        buffer.get::<()>()?;
        let mut ack = AmRequest::new(ctx.source(), ctx.comm().clone());
        ack.pack(FENCE_ACK, &())?;
        ack.internal = true;
        ctx.reply(ack);
        Ok(())
    }
}

pub(crate) struct FenceAck {
    pending: PendingAcks,
}

impl FenceAck {
    pub(crate) fn new(pending: PendingAcks) -> FenceAck {
        FenceAck { pending }
    }
}

impl AmHandler for FenceAck {
    fn name(&self) -> &str {
        "amreplay::fence_ack"
    }

    fn execute(&self, ctx: &mut AmContext<'_>, buffer: &mut Buffer) -> anyhow::Result<()> {
        buffer.get::<()>()?;
        let removed = self
            .pending
            .lock()
            .get_mut(&ctx.comm().id())
            .map_or(false, |ranks| ranks.remove(&ctx.source()));
        if !removed {
            tracing::warn!(
                comm = %ctx.comm().id(),
                source = ctx.source(),
                "unexpected fence acknowledgement"
            );
        }
        Ok(())
    }
}

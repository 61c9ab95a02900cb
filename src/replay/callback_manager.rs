use crate::event::{Event, EventGroup, EventType, UserEventId};

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Reaction to a dispatched event.
///
/// `user_event` is `0` for dispatches by event type and the user event id
/// for [notify_user][CallbackManager::notify_user]. `data` is the caller's
/// callback data, passed through untouched.
pub trait Callback: Send + Sync {
    fn execute(
        &self,
        cbmanager: &CallbackManager,
        user_event: UserEventId,
        event: &Event,
        data: &mut dyn Any,
    );
}

impl<F> Callback for F
where
    F: Fn(&CallbackManager, UserEventId, &Event, &mut dyn Any) + Send + Sync,
{
    fn execute(
        &self,
        cbmanager: &CallbackManager,
        user_event: UserEventId,
        event: &Event,
        data: &mut dyn Any,
    ) {
        self(cbmanager, user_event, event, data)
    }
}

pub type CallbackPtr = Arc<dyn Callback>;

/// Turn a closure into a shareable callback handle.
pub fn callback<F>(f: F) -> CallbackPtr
where
    F: Fn(&CallbackManager, UserEventId, &Event, &mut dyn Any) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a callback is registered for: one concrete event type or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSelector {
    Type(EventType),
    Group(EventGroup),
}

impl From<EventType> for EventSelector {
    fn from(event_type: EventType) -> Self {
        EventSelector::Type(event_type)
    }
}

impl From<EventGroup> for EventSelector {
    fn from(group: EventGroup) -> Self {
        EventSelector::Group(group)
    }
}

lazy_static! {
    static ref GROUP_MEMBERS: HashMap<EventGroup, Vec<EventType>> = {
        use EventType::*;
        let mut groups = HashMap::new();
        groups.insert(EventGroup::All, EventType::ALL.to_vec());
        groups.insert(
            EventGroup::Nonblock,
            vec![
                MpiSendRequest,
                MpiSendComplete,
                MpiRecvRequest,
                MpiRecvComplete,
                MpiRequestTested,
                MpiCancelled,
            ],
        );
        groups.insert(EventGroup::Enter, vec![Enter, EnterCs, EnterProgram]);
        groups.insert(EventGroup::Leave, vec![Leave, LeaveProgram]);
        groups.insert(EventGroup::Send, vec![MpiSend, MpiSendRequest]);
        groups.insert(EventGroup::Recv, vec![MpiRecv, MpiRecvComplete]);
        groups.insert(
            EventGroup::Begin,
            vec![MpiCollectiveBegin, MpiRmaCollectiveBegin],
        );
        groups.insert(EventGroup::End, vec![MpiCollectiveEnd, MpiRmaCollectiveEnd]);
        groups
    };
}

impl EventGroup {
    /// The concrete event types the group stands for.
    pub fn members(&self) -> &'static [EventType] {
        GROUP_MEMBERS
            .get(self)
            .map(|types| types.as_slice())
            .unwrap_or(&[])
    }
}

impl EventSelector {
    pub fn event_types(&self) -> &[EventType] {
        match self {
            EventSelector::Type(event_type) => std::slice::from_ref(event_type),
            EventSelector::Group(group) => group.members(),
        }
    }
}

/// Dispatches trace events to the callbacks registered for their type, and
/// synthetic user events to the callbacks registered for their id.
///
/// Callbacks run in registration order.
#[derive(Default)]
pub struct CallbackManager {
    event_cbs: HashMap<EventType, Vec<CallbackPtr>>,
    user_cbs: HashMap<UserEventId, Vec<CallbackPtr>>,
}

impl std::fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackManager")
            .field("event_types", &self.event_cbs.len())
            .field("user_events", &self.user_cbs.len())
            .finish()
    }
}

impl CallbackManager {
    pub fn new() -> CallbackManager {
        Default::default()
    }

    /// Register `callback` for an event type, or for every member of a group.
    pub fn register_callback(&mut self, selector: impl Into<EventSelector>, callback: CallbackPtr) {
        let selector = selector.into();
        tracing::trace!(?selector, "register callback");
        for event_type in selector.event_types() {
            self.event_cbs
                .entry(*event_type)
                .or_default()
                .push(callback.clone());
        }
    }

    pub fn register_user_callback(&mut self, user_event: UserEventId, callback: CallbackPtr) {
        self.user_cbs.entry(user_event).or_default().push(callback);
    }

    /// Run the callbacks registered for the type of `event`.
    pub fn notify(&self, event: &Event, data: &mut dyn Any) {
        if let Some(cbs) = self.event_cbs.get(&event.event_type()) {
            for cb in cbs {
                cb.execute(self, 0, event, data);
            }
        }
    }

    /// Run the callbacks registered for `user_event`.
    pub fn notify_user(&self, user_event: UserEventId, event: &Event, data: &mut dyn Any) {
        if let Some(cbs) = self.user_cbs.get(&user_event) {
            for cb in cbs {
                cb.execute(self, user_event, event, data);
            }
        }
    }

    /// Number of callbacks a dispatch of any type of `selector` reaches, summed
    /// over the types of a group.
    pub fn num_callbacks(&self, selector: impl Into<EventSelector>) -> usize {
        selector
            .into()
            .event_types()
            .iter()
            .map(|t| self.event_cbs.get(t).map_or(0, Vec::len))
            .sum()
    }

    pub fn num_user_callbacks(&self, user_event: UserEventId) -> usize {
        self.user_cbs.get(&user_event).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.event_cbs.is_empty() && self.user_cbs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventRecord;

    fn push(tag: &'static str) -> CallbackPtr {
        callback(move |_: &CallbackManager, user: UserEventId, _: &Event, data: &mut dyn Any| {
            if let Some(log) = data.downcast_mut::<Vec<(&'static str, UserEventId)>>() {
                log.push((tag, user));
            }
        })
    }

    #[test]
    fn group_table_matches_expansion() {
        assert_eq!(EventGroup::All.members().len(), EventType::ALL.len());
        assert_eq!(
            EventGroup::Leave.members(),
            &[EventType::Leave, EventType::LeaveProgram]
        );
        for group in EventGroup::ALL {
            assert!(!group.members().is_empty(), "{:?}", group);
        }
    }

    #[test]
    fn dispatch_in_registration_order() {
        let mut cbm = CallbackManager::new();
        cbm.register_callback(EventType::Enter, push("a"));
        cbm.register_callback(EventGroup::Enter, push("b"));
        cbm.register_callback(EventType::Enter, push("c"));

        let mut log: Vec<(&'static str, UserEventId)> = Vec::new();
        let ev = Event::new(0, 0.0, 0, EventRecord::Enter { region: 1 });
        cbm.notify(&ev, &mut log);
        assert_eq!(log, vec![("a", 0), ("b", 0), ("c", 0)]);
        assert_eq!(cbm.num_callbacks(EventType::Enter), 3);
        assert_eq!(cbm.num_callbacks(EventType::EnterProgram), 1);
    }

    #[test]
    fn unregistered_dispatch_is_a_no_op() {
        let cbm = CallbackManager::new();
        let mut log: Vec<(&'static str, UserEventId)> = Vec::new();
        let ev = Event::new(0, 0.0, 0, EventRecord::Leave { region: 1 });
        cbm.notify(&ev, &mut log);
        cbm.notify_user(12, &ev, &mut log);
        assert!(log.is_empty());
        assert!(cbm.is_empty());
    }

    #[test]
    fn user_events_pass_their_id() {
        let mut cbm = CallbackManager::new();
        cbm.register_user_callback(-3, push("u"));
        let mut log: Vec<(&'static str, UserEventId)> = Vec::new();
        let ev = Event::new(0, 0.0, 0, EventRecord::Leave { region: 1 });
        cbm.notify_user(-3, &ev, &mut log);
        assert_eq!(log, vec![("u", -3)]);
        assert_eq!(cbm.num_user_callbacks(-3), 1);
        assert_eq!(cbm.num_callbacks(EventGroup::All), 0);
    }
}

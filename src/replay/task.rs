use crate::error::{Error, Result};

use itertools::Itertools;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> TaskId {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// One step of an analysis.
pub trait Task: Send {
    /// Run the step, false reports failure to the enclosing compound task.
    fn execute(&mut self) -> bool;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A task built from a closure.
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F: FnMut() -> bool + Send> FnTask<F> {
    pub fn new(name: impl Into<String>, f: F) -> FnTask<F> {
        FnTask {
            name: name.into(),
            f,
        }
    }
}

impl<F: FnMut() -> bool + Send> Task for FnTask<F> {
    fn execute(&mut self) -> bool {
        (self.f)()
    }
    fn name(&self) -> &str {
        &self.name
    }
}

struct TaskCell {
    id: TaskId,
    parent: Mutex<Option<TaskId>>,
    // thread currently inside `execute`
    running_on: Mutex<Option<ThreadId>>,
    task: Mutex<Box<dyn Task>>,
}

/// Clears `running_on` when the execution ends, also by unwinding.
struct Running<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// Shared handle to a task, what compound tasks store as children.
///
/// Clones refer to the same task. The task is released when its last handle
/// is dropped.
#[derive(Clone)]
pub struct TaskHandle {
    cell: Arc<TaskCell>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TaskHandle {{ id: {}, parent: {:?} }}",
            self.cell.id,
            *self.cell.parent.lock()
        )
    }
}

impl TaskHandle {
    pub fn new(task: impl Task + 'static) -> TaskHandle {
        TaskHandle::with_id(TaskId::next(), Box::new(task))
    }

    fn with_id(id: TaskId, task: Box<dyn Task>) -> TaskHandle {
        TaskHandle {
            cell: Arc::new(TaskCell {
                id,
                parent: Mutex::new(None),
                running_on: Mutex::new(None),
                task: Mutex::new(task),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// the compound task this task was added to, if any
    pub fn parent(&self) -> Option<TaskId> {
        *self.cell.parent.lock()
    }

    pub fn name(&self) -> String {
        self.cell.task.lock().name().to_owned()
    }

    /// Run the task. A task reached again from within its own execution (a
    /// cycle built through tasks sharing handles) fails instead of blocking.
    pub fn execute(&self) -> bool {
        let me = std::thread::current().id();
        if *self.cell.running_on.lock() == Some(me) {
            tracing::error!(task = %self.cell.id, "task re-entered from its own execution");
            return false;
        }
        let mut task = self.cell.task.lock();
        *self.cell.running_on.lock() = Some(me);
        let _running = Running(&self.cell.running_on);
        task.execute()
    }

    pub fn ptr_eq(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.cell) as usize
    }
}

/// Optional setup and teardown around the children of a [CompoundTask].
pub trait TaskPhases: Send {
    /// Called before the first child, false aborts the compound task.
    fn prepare(&mut self) -> bool {
        true
    }

    /// Called after the last child succeeded, its result is the result of the
    /// compound task.
    fn finish(&mut self) -> bool {
        true
    }
}

impl TaskPhases for () {}

/// An ordered, fail-fast sequence of tasks, itself a task.
///
/// Executing runs `prepare`, then every child in insertion order, then
/// `finish`. The first child returning false stops the sequence: later
/// children and `finish` are skipped and the compound task fails.
/// [current_step][CompoundTask::current_step] tells how far it got, `0` if
/// `prepare` failed and `n` if the `n`-th child failed.
pub struct CompoundTask<P: TaskPhases = ()> {
    id: TaskId,
    name: String,
    phases: P,
    tasks: Vec<TaskHandle>,
    current_step: u32,
}

impl CompoundTask<()> {
    pub fn new(name: impl Into<String>) -> CompoundTask<()> {
        CompoundTask::with_phases(name, ())
    }
}

impl<P: TaskPhases> CompoundTask<P> {
    pub fn with_phases(name: impl Into<String>, phases: P) -> CompoundTask<P> {
        CompoundTask {
            id: TaskId::next(),
            name: name.into(),
            phases,
            tasks: Vec::new(),
            current_step: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn phases(&self) -> &P {
        &self.phases
    }

    pub fn phases_mut(&mut self) -> &mut P {
        &mut self.phases
    }

    /// Append `task` to the sequence and make this compound its parent. Adding
    /// a task a second time is allowed, it then runs once per occurrence.
    ///
    /// A task with another parent is rejected. Nesting is acyclic by
    /// construction since [into_handle][CompoundTask::into_handle] consumes the
    /// compound; a cycle closed through a task that captures a handle is
    /// caught when executed, see [TaskHandle::execute].
    pub fn add_task(&mut self, task: TaskHandle) -> Result<()> {
        {
            let mut parent = task.cell.parent.lock();
            match *parent {
                Some(owner) if owner != self.id => {
                    return Err(Error::ForeignParent {
                        task: task.id(),
                        parent: owner,
                        target: self.id,
                    });
                }
                _ => *parent = Some(self.id),
            }
        }
        tracing::trace!(compound = %self.id, task = %task.id(), "add task");
        self.tasks.push(task);
        Ok(())
    }

    pub fn num_steps(&self) -> u32 {
        self.tasks.len() as u32
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    /// Wrap the compound task in a handle so it can be nested in another one.
    pub fn into_handle(self) -> TaskHandle
    where
        P: 'static,
    {
        let id = self.id;
        TaskHandle::with_id(id, Box::new(self))
    }
}

impl<P: TaskPhases> Task for CompoundTask<P> {
    fn execute(&mut self) -> bool {
        self.current_step = 0;
        if !self.phases.prepare() {
            tracing::debug!(compound = self.name.as_str(), "prepare failed");
            return false;
        }
        self.current_step = 1;
        for task in &self.tasks {
            if !task.execute() {
                tracing::debug!(
                    compound = self.name.as_str(),
                    step = self.current_step,
                    task = task.name().as_str(),
                    "step failed"
                );
                return false;
            }
            self.current_step += 1;
        }
        self.phases.finish()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<P: TaskPhases> Drop for CompoundTask<P> {
    fn drop(&mut self) {
        // a child listed several times is released once
        for task in self.tasks.drain(..).unique_by(|t| t.addr()) {
            let mut parent = task.cell.parent.lock();
            if *parent == Some(self.id) {
                *parent = None;
            }
        }
    }
}

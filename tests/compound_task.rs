use amreplay::replay::{CompoundTask, FnTask, Task, TaskHandle, TaskPhases};
use amreplay::Error;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Trace = Arc<Mutex<Vec<String>>>;

fn recorded(trace: &Trace, name: &'static str, ok: bool) -> TaskHandle {
    let trace = trace.clone();
    TaskHandle::new(FnTask::new(name, move || {
        trace.lock().push(name.to_owned());
        ok
    }))
}

struct Phases {
    trace: Trace,
    prepare_ok: bool,
    finish_ok: bool,
}

impl TaskPhases for Phases {
    fn prepare(&mut self) -> bool {
        self.trace.lock().push("prepare".to_owned());
        self.prepare_ok
    }
    fn finish(&mut self) -> bool {
        self.trace.lock().push("finish".to_owned());
        self.finish_ok
    }
}

fn compound(trace: &Trace, prepare_ok: bool, finish_ok: bool) -> CompoundTask<Phases> {
    CompoundTask::with_phases(
        "analysis",
        Phases {
            trace: trace.clone(),
            prepare_ok,
            finish_ok,
        },
    )
}

#[test]
fn fail_fast_reports_the_failed_step() {
    let trace = Trace::default();
    let mut ct = compound(&trace, true, true);
    for (name, ok) in [("a", true), ("b", true), ("c", false), ("d", true)] {
        ct.add_task(recorded(&trace, name, ok)).unwrap();
    }
    assert_eq!(ct.num_steps(), 4);
    assert!(!ct.execute());
    assert_eq!(ct.current_step(), 3);
    assert_eq!(*trace.lock(), vec!["prepare", "a", "b", "c"]);
}

#[test]
fn failed_prepare_runs_nothing() {
    let trace = Trace::default();
    let mut ct = compound(&trace, false, true);
    ct.add_task(recorded(&trace, "a", true)).unwrap();
    assert!(!ct.execute());
    assert_eq!(ct.current_step(), 0);
    assert_eq!(*trace.lock(), vec!["prepare"]);
}

#[test]
fn finish_decides_the_result() {
    let trace = Trace::default();
    let mut ct = compound(&trace, true, false);
    ct.add_task(recorded(&trace, "a", true)).unwrap();
    ct.add_task(recorded(&trace, "b", true)).unwrap();
    assert!(!ct.execute());
    assert_eq!(ct.current_step(), 3);
    assert_eq!(*trace.lock(), vec!["prepare", "a", "b", "finish"]);

    let mut ok = compound(&trace, true, true);
    ok.add_task(recorded(&trace, "c", true)).unwrap();
    assert!(ok.execute());
}

struct Counted {
    drops: Arc<AtomicUsize>,
}

impl Task for Counted {
    fn execute(&mut self) -> bool {
        true
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn duplicate_children_are_released_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut ct = CompoundTask::new("dups");
    let child = TaskHandle::new(Counted {
        drops: drops.clone(),
    });
    ct.add_task(child.clone()).unwrap();
    ct.add_task(child.clone()).unwrap();
    ct.add_task(child).unwrap();
    assert_eq!(ct.num_steps(), 3);
    assert!(ct.execute());
    assert_eq!(ct.current_step(), 4);
    drop(ct);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn nested_compound_tasks_release_their_subtree() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut inner = CompoundTask::new("inner");
    for _ in 0..3 {
        inner
            .add_task(TaskHandle::new(Counted {
                drops: drops.clone(),
            }))
            .unwrap();
    }
    let mut outer = CompoundTask::new("outer");
    outer.add_task(inner.into_handle()).unwrap();
    assert!(outer.execute());
    drop(outer);
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}

#[test]
fn a_task_has_a_single_parent() {
    let trace = Trace::default();
    let task = recorded(&trace, "shared", true);
    let mut first = CompoundTask::new("first");
    let mut second = CompoundTask::new("second");
    first.add_task(task.clone()).unwrap();

    let err = second.add_task(task.clone()).unwrap_err();
    assert!(matches!(err, Error::ForeignParent { .. }));
    assert!(!err.is_fatal());
    assert_eq!(second.num_steps(), 0);
    assert_eq!(task.parent(), Some(first.id()));

    // once the first parent is gone the task can move
    drop(first);
    assert_eq!(task.parent(), None);
    second.add_task(task.clone()).unwrap();
    assert_eq!(task.parent(), Some(second.id()));
}

#[test]
fn a_cycle_through_a_shared_handle_fails_instead_of_blocking() {
    let back_edge: Arc<Mutex<Option<TaskHandle>>> = Default::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let child = {
        let back_edge = back_edge.clone();
        let runs = runs.clone();
        FnTask::new("back edge", move || {
            runs.fetch_add(1, Ordering::SeqCst);
            match back_edge.lock().as_ref() {
                Some(root) => root.execute(),
                None => true,
            }
        })
    };
    let mut root = CompoundTask::new("root");
    root.add_task(TaskHandle::new(child)).unwrap();
    let root = root.into_handle();
    assert!(root.execute());

    *back_edge.lock() = Some(root.clone());
    assert!(!root.execute());
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // the failed run leaves the task usable
    back_edge.lock().take();
    assert!(root.execute());
}

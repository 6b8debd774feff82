//! Scheduler-wide invariants checked over generated operation sequences.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use cadence_scheduler::{
    Clock, ManualClock, NullSink, SchedulerConfig, TaskHandle, TaskManager, TaskSpec, TaskStatus,
};

fn manager() -> (TaskManager, Rc<ManualClock>) {
    let clock = Rc::new(ManualClock::new());
    let manager = TaskManager::builder(SchedulerConfig::default())
        .clock(clock.clone())
        .events(Rc::new(NullSink))
        .build();
    (manager, clock)
}

/// Small deterministic generator so every run sees the same sequences.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

/// Live tasks the caller can see.
fn live_count(mgr: &TaskManager) -> usize {
    mgr.get_tasks().len() + mgr.get_do_laters().len()
}

#[test]
fn live_tasks_equal_added_minus_removed() {
    for seed in 1..=20 {
        let (mgr, clock) = manager();
        let mut rng = Lcg(seed);
        let mut live: Vec<TaskHandle> = Vec::new();

        for op in 0..200 {
            match rng.below(6) {
                0 | 1 => {
                    let spec = TaskSpec::new(format!("t{}", rng.below(8)), |_| TaskStatus::Cont)
                        .sort(rng.below(5) as i32 - 2);
                    live.push(mgr.spawn(spec).unwrap());
                }
                2 => {
                    let delay = rng.below(10) as f64 * 0.1;
                    let spec = TaskSpec::new(format!("t{}", rng.below(8)), |_| TaskStatus::Cont);
                    live.push(mgr.spawn_later(delay, spec).unwrap());
                }
                3 => {
                    let name = format!("t{}", rng.below(8));
                    let expected = live.iter().filter(|t| t.name() == name).count();
                    assert_eq!(mgr.remove(name.as_str()), expected, "seed {seed} op {op}");
                    live.retain(|t| t.name() != name);
                }
                4 if !live.is_empty() => {
                    let victim = live.swap_remove(rng.below(live.len() as u64) as usize);
                    assert_eq!(mgr.remove(&victim), 1);
                }
                _ => {
                    clock.advance(0.1);
                    mgr.step().unwrap();
                }
            }
            assert_eq!(live_count(&mgr), live.len(), "seed {seed} op {op}");
        }
    }
}

#[test]
fn removed_tasks_are_never_invoked() {
    for seed in 1..=10 {
        let (mgr, clock) = manager();
        let mut rng = Lcg(seed);
        let frame = Rc::new(Cell::new(0u32));
        let calls: Rc<RefCell<HashMap<u64, Vec<u32>>>> = Rc::default();

        let mut handles = Vec::new();
        for i in 0..30 {
            let (f, c) = (Rc::clone(&frame), Rc::clone(&calls));
            let spec = TaskSpec::new(format!("w{i}"), move |call: &cadence_scheduler::Invocation<'_>| {
                if let Some(task) = call.task() {
                    c.borrow_mut().entry(task.id()).or_default().push(f.get());
                }
                TaskStatus::Cont
            })
            .sort(rng.below(4) as i32);
            handles.push(mgr.spawn(spec).unwrap());
        }

        let mut removed_at: HashMap<u64, u32> = HashMap::new();
        for n in 0..15 {
            frame.set(n);
            if let Some(task) = handles.get(rng.below(40) as usize) {
                if task.is_alive() {
                    task.remove();
                    removed_at.insert(task.id(), n);
                }
            }
            clock.advance(0.1);
            mgr.step().unwrap();
        }

        for (id, at) in removed_at {
            let frames = calls.borrow().get(&id).cloned().unwrap_or_default();
            assert!(frames.iter().all(|f| *f < at), "seed {seed}: task {id} ran after removal");
        }
    }
}

#[test]
fn lower_sort_always_runs_first() {
    let (mgr, clock) = manager();
    let mut rng = Lcg(7);
    let log: Rc<RefCell<Vec<i32>>> = Rc::default();
    for i in 0..40 {
        let sort = rng.below(10) as i32 - 5;
        let l = Rc::clone(&log);
        mgr.spawn(
            TaskSpec::new(format!("s{i}"), move |_| {
                l.borrow_mut().push(sort);
                TaskStatus::Cont
            })
            .sort(sort),
        )
        .unwrap();
    }

    for _ in 0..5 {
        log.borrow_mut().clear();
        mgr.step().unwrap();
        clock.advance(0.1);
        let frame = log.borrow();
        assert_eq!(frame.len(), 40);
        assert!(frame.windows(2).all(|w| w[0] <= w[1]), "out of order: {frame:?}");
    }
}

#[test]
fn deferred_tasks_never_fire_early() {
    let (mgr, clock) = manager();
    let mut rng = Lcg(99);
    let early: Rc<RefCell<Vec<String>>> = Rc::default();
    let fired = Rc::new(Cell::new(0));

    for i in 0..50 {
        if rng.below(3) == 0 {
            clock.advance(rng.below(5) as f64 * 0.05);
            mgr.step().unwrap();
        }
        let delay = rng.below(20) as f64 * 0.05;
        let due = clock.frame_time() + delay;
        let (c, e, f) = (Rc::clone(&clock), Rc::clone(&early), Rc::clone(&fired));
        let name = format!("d{i}");
        let label = name.clone();
        mgr.do_method_later(delay, name, move |_| {
            f.set(f.get() + 1);
            if c.frame_time() < due {
                e.borrow_mut().push(label.clone());
            }
            TaskStatus::Done
        })
        .unwrap();
    }

    for _ in 0..100 {
        clock.advance(0.05);
        mgr.step().unwrap();
    }
    assert_eq!(fired.get(), 50);
    assert!(early.borrow().is_empty(), "fired early: {:?}", early.borrow());
}

#[test]
fn again_preserves_identity_and_start() {
    let (mgr, clock) = manager();
    let seen: Rc<RefCell<Vec<(u64, f64, f64)>>> = Rc::default();
    let (s, c) = (Rc::clone(&seen), Rc::clone(&clock));
    let handle = mgr
        .do_method_later(0.2, "again", move |call: &cadence_scheduler::Invocation<'_>| {
            let Some(task) = call.task() else {
                return TaskStatus::Exit;
            };
            s.borrow_mut().push((task.id(), task.time(), c.frame_time()));
            if s.borrow().len() < 4 { TaskStatus::Again } else { TaskStatus::Done }
        })
        .unwrap();

    for _ in 0..40 {
        clock.advance(0.125);
        mgr.step().unwrap();
    }

    let seen = seen.borrow();
    assert_eq!(seen.len(), 4);
    let first_wake = seen[0].2;
    for (id, time, now) in seen.iter() {
        assert_eq!(*id, handle.id());
        assert_eq!(*time, now - first_wake);
    }
}

#[test]
fn upon_death_runs_exactly_once_on_every_path() {
    let (mgr, clock) = manager();
    let deaths: Rc<RefCell<HashMap<String, u32>>> = Rc::default();
    let spec = |name: &str, f: fn() -> TaskStatus| {
        let d = Rc::clone(&deaths);
        TaskSpec::new(name, move |_| f()).upon_death(move |task: &TaskHandle| {
            *d.borrow_mut().entry(task.name().to_string()).or_default() += 1;
        })
    };

    mgr.spawn(spec("done", || TaskStatus::Done)).unwrap();
    mgr.spawn(spec("exit", || TaskStatus::Exit)).unwrap();
    mgr.spawn(spec("by-name", || TaskStatus::Cont)).unwrap();
    let by_handle = mgr.spawn(spec("by-handle", || TaskStatus::Cont)).unwrap();
    let flagged = mgr.spawn(spec("flagged", || TaskStatus::Cont)).unwrap();
    mgr.spawn_later(0.1, spec("deferred-done", || TaskStatus::Done)).unwrap();
    mgr.spawn_later(50.0, spec("deferred-removed", || TaskStatus::Done)).unwrap();
    mgr.spawn(spec("survivor", || TaskStatus::Cont)).unwrap();

    mgr.step().unwrap();
    mgr.remove("by-name");
    mgr.remove("by-name");
    mgr.remove(&by_handle);
    flagged.remove();
    flagged.remove();
    mgr.remove("deferred-removed");
    for _ in 0..5 {
        clock.advance(0.1);
        mgr.step().unwrap();
    }
    mgr.destroy();
    mgr.destroy();

    let deaths = deaths.borrow();
    for name in [
        "done",
        "exit",
        "by-name",
        "by-handle",
        "flagged",
        "deferred-done",
        "deferred-removed",
        "survivor",
    ] {
        assert_eq!(deaths.get(name), Some(&1), "{name}");
    }
}

#[test]
fn name_index_round_trip() {
    let (mgr, _) = manager();
    mgr.add("x", |_| TaskStatus::Cont).unwrap();
    assert!(mgr.has_task_named("x"));
    assert!(mgr.get_tasks_matching("*").iter().any(|t| t.name() == "x"));

    mgr.step().unwrap();
    assert!(mgr.has_task_named("x"));
    assert_eq!(mgr.remove("x"), 1);
    assert!(!mgr.has_task_named("x"));
    assert!(mgr.get_tasks_matching("*").iter().all(|t| t.name() != "x"));
}

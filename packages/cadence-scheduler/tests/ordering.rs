use cadence_scheduler::{Priority, Scheduler, WorkOutcome};
use cadence_timing::VirtualHost;
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<&'static str>>>;

fn log_work(log: &Log, name: &'static str) -> impl FnOnce(bool) -> WorkOutcome + 'static {
    let log = log.clone();
    move |_| {
        log.borrow_mut().push(name);
        WorkOutcome::Done
    }
}

#[test]
fn immediate_runs_before_idle() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Idle, log_work(&log, "idle"));
    scheduler.schedule(Priority::Immediate, log_work(&log, "immediate"));

    host.run_all_turns();
    assert_eq!(*log.borrow(), vec!["immediate", "idle"]);
}

#[test]
fn ready_queue_orders_by_deadline_not_priority_value() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    // Scheduled at the same instant, so deadlines are 10_000 / 250 / 5_000.
    scheduler.schedule(Priority::Low, log_work(&log, "low"));
    scheduler.schedule(Priority::UserBlocking, log_work(&log, "user-blocking"));
    scheduler.schedule(Priority::Normal, log_work(&log, "normal"));

    host.run_all_turns();
    assert_eq!(*log.borrow(), vec!["user-blocking", "normal", "low"]);
}

#[test]
fn equal_deadlines_run_in_schedule_order() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    scheduler.schedule(Priority::Normal, log_work(&log, "first"));
    scheduler.schedule(Priority::Normal, log_work(&log, "second"));
    scheduler.schedule(Priority::Normal, log_work(&log, "third"));

    host.run_all_turns();
    assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
}

#[test]
fn cancelled_task_never_runs() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let handle = scheduler.schedule(Priority::UserBlocking, log_work(&log, "cancelled"));
    scheduler.schedule(Priority::Normal, log_work(&log, "kept"));
    scheduler.cancel(handle);

    // Long past the cancelled task's deadline: tombstones stay dead.
    host.advance(20_000);
    host.run_all_turns();

    assert_eq!(*log.borrow(), vec!["kept"]);
    assert!(scheduler.is_idle());
}

#[test]
fn cancel_is_idempotent_and_safe_after_retire() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    let handle = scheduler.schedule(Priority::Normal, log_work(&log, "task"));
    scheduler.cancel(handle);
    scheduler.cancel(handle);
    host.run_all_turns();

    // Cancelling a retired task is a no-op as well.
    scheduler.cancel(handle);
    assert!(log.borrow().is_empty());
}

#[test]
fn current_priority_reflects_running_task() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let seen = Rc::new(RefCell::new(Vec::new()));

    assert_eq!(scheduler.current_priority(), None);

    {
        let scheduler_in_task = scheduler.clone();
        let seen = seen.clone();
        let work = move |_| {
            seen.borrow_mut().push(scheduler_in_task.current_priority());
            WorkOutcome::Done
        };
        scheduler.schedule(Priority::Low, work);
    }
    {
        let scheduler_in_task = scheduler.clone();
        let seen = seen.clone();
        let work = move |_| {
            seen.borrow_mut().push(scheduler_in_task.current_priority());
            WorkOutcome::Done
        };
        scheduler.schedule(Priority::Immediate, work);
    }

    host.run_all_turns();
    assert_eq!(
        *seen.borrow(),
        vec![Some(Priority::Immediate), Some(Priority::Low)]
    );
    assert_eq!(scheduler.current_priority(), None);
}

#[test]
fn current_task_id_matches_handle_inside_execution() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let seen = Rc::new(RefCell::new(Vec::new()));

    assert_eq!(scheduler.current_task_id(), None);

    let handle = {
        let scheduler_in_task = scheduler.clone();
        let seen = seen.clone();
        scheduler.schedule(Priority::Normal, move |_| {
            seen.borrow_mut().push(scheduler_in_task.current_task_id());
            WorkOutcome::Done
        })
    };

    host.run_all_turns();
    assert_eq!(*seen.borrow(), vec![Some(handle.id())]);
    assert_eq!(scheduler.current_task_id(), None);
}

#[test]
fn expired_task_receives_did_timeout() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let seen = Rc::new(RefCell::new(Vec::new()));

    {
        let seen = seen.clone();
        scheduler.schedule(Priority::Normal, move |did_timeout| {
            seen.borrow_mut().push(("normal", did_timeout));
            WorkOutcome::Done
        });
    }
    {
        let seen = seen.clone();
        scheduler.schedule(Priority::Immediate, move |did_timeout| {
            seen.borrow_mut().push(("immediate", did_timeout));
            WorkOutcome::Done
        });
    }

    // Past both deadlines before the first flush runs.
    host.advance(6_000);
    host.run_all_turns();
    assert_eq!(
        *seen.borrow(),
        vec![("immediate", true), ("normal", true)]
    );
}

#[test]
fn fresh_task_is_not_overdue() {
    let host = VirtualHost::new();
    let scheduler = Scheduler::new(host.clone());
    let seen = Rc::new(RefCell::new(Vec::new()));

    {
        let seen = seen.clone();
        scheduler.schedule(Priority::Normal, move |did_timeout| {
            seen.borrow_mut().push(did_timeout);
            WorkOutcome::Done
        });
    }

    host.run_all_turns();
    assert_eq!(*seen.borrow(), vec![false]);
}

#[test]
fn independent_schedulers_do_not_interfere() {
    let host_a = VirtualHost::new();
    let host_b = VirtualHost::new();
    let scheduler_a = Scheduler::new(host_a.clone());
    let scheduler_b = Scheduler::new(host_b.clone());
    let log: Log = Rc::new(RefCell::new(Vec::new()));

    scheduler_a.schedule(Priority::Normal, log_work(&log, "a"));
    scheduler_b.schedule(Priority::Normal, log_work(&log, "b"));

    host_b.run_all_turns();
    assert_eq!(*log.borrow(), vec!["b"]);
    assert!(!scheduler_a.is_idle());

    host_a.run_all_turns();
    assert_eq!(*log.borrow(), vec!["b", "a"]);
    assert!(scheduler_a.is_idle());
}

//! Property tests for scheduling, composite waits and links.
//!
//! Each property builds a fresh kernel from generated parameters and checks
//! an invariant that must hold for every input, not just hand-picked cases.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use strand_kernel::{
    Kernel, KernelError, Outcome, Script, Step, StrandError, StrandId, StrandObserver, Value,
    Yieldable, api, from_fn,
};

/// A task that cooperates `passes` times, then returns `value`.
fn after_passes(passes: usize, value: i64) -> Yieldable {
    let mut left = passes;
    Yieldable::coroutine(from_fn(move |_| {
        if left == 0 {
            Step::done(value)
        } else {
            left -= 1;
            Step::yielding(api::cooperate())
        }
    }))
}

#[derive(Default)]
struct Counter {
    exits: RefCell<usize>,
}

impl StrandObserver for Counter {
    fn on_exit(&self, _strand: StrandId, _outcome: &Outcome) -> Result<(), StrandError> {
        *self.exits.borrow_mut() += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum LateOp {
    Resume,
    Throw,
    Terminate,
}

fn late_op() -> impl Strategy<Value = LateOp> {
    prop_oneof![Just(LateOp::Resume), Just(LateOp::Throw), Just(LateOp::Terminate)]
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    parent[i] = root;
    root
}

proptest! {
    #[test]
    fn prop_all_keys_every_index_in_completion_order(passes in prop::collection::vec(0usize..4, 1..8)) {
        let tasks: Vec<Yieldable> = passes
            .iter()
            .enumerate()
            .map(|(i, &p)| after_passes(p, i as i64))
            .collect();
        let mut kernel = Kernel::new();
        let caller = kernel.spawn(Script::new().then(move |_| Step::yielding(api::all(tasks))));

        let results = match kernel.run_until(caller) {
            Ok(Value::Map(results)) => results,
            other => panic!("unexpected result: {other:?}"),
        };

        let mut expected: Vec<usize> = (0..passes.len()).collect();
        expected.sort_by_key(|&i| passes[i]);
        prop_assert_eq!(results.keys(), expected);

        let mut spawn_order = results.keys();
        spawn_order.sort_unstable();
        prop_assert_eq!(spawn_order, (0..passes.len()).collect::<Vec<_>>());
        for (index, value) in results.iter() {
            prop_assert_eq!(value, &Value::Int(*index as i64));
        }
    }

    #[test]
    fn prop_some_out_of_range_spawns_nothing(total in 0usize..5, excess in 0usize..4, zero in any::<bool>()) {
        let count = if zero { 0 } else { total + excess + 1 };
        let tasks: Vec<Yieldable> = (0..total).map(|i| after_passes(0, i as i64)).collect();
        let mut kernel = Kernel::new();
        let caller = kernel.spawn(Script::new().then(move |_| Step::yielding(api::some(count, tasks))));

        let failed_with_invalid_argument = matches!(
            kernel.run_until(caller),
            Err(KernelError::StrandFailed {
                source: StrandError::InvalidArgument { operation: "some", .. },
                ..
            })
        );
        prop_assert!(failed_with_invalid_argument);
        let next = kernel.spawn(api::cooperate());
        prop_assert_eq!(next.get(), caller.get() + 1);
    }

    #[test]
    fn prop_termination_cascades_through_linked_components(
        n in 2usize..7,
        edges in prop::collection::vec((0usize..7, 0usize..7), 0..10),
        victim in 0usize..7,
    ) {
        let mut kernel = Kernel::new();
        let ids: Vec<StrandId> = (0..n).map(|_| kernel.spawn(api::suspend())).collect();
        let mut parent: Vec<usize> = (0..n).collect();
        for &(a, b) in &edges {
            let (a, b) = (a % n, b % n);
            kernel.link(ids[a], ids[b]).unwrap();
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            parent[ra] = rb;
        }
        kernel.run().unwrap();

        let victim = victim % n;
        kernel.terminate(ids[victim]);
        let component = find(&mut parent, victim);
        for i in 0..n {
            let linked = find(&mut parent, i) == component;
            prop_assert_eq!(kernel.has_exited(ids[i]), linked, "strand {} of {}", i, n);
        }
    }

    #[test]
    fn prop_exited_strands_ignore_late_operations(ops in prop::collection::vec(late_op(), 0..8)) {
        let counter = Rc::new(Counter::default());
        let mut kernel = Kernel::new();
        let id = kernel.spawn(after_passes(1, 9));
        kernel.attach_observer(id, counter.clone()).unwrap();
        kernel.run().unwrap();

        for op in ops {
            match op {
                LateOp::Resume => kernel.resume(id, 1),
                LateOp::Throw => kernel.throw(id, StrandError::raised("late")),
                LateOp::Terminate => kernel.terminate(id),
            }
            kernel.run().unwrap();
            prop_assert!(kernel.has_exited(id));
        }
        prop_assert_eq!(*counter.exits.borrow(), 1);
        prop_assert_eq!(kernel.outcome(id), Some(&Outcome::Succeeded(Value::Int(9))));
    }

    #[test]
    fn prop_sleep_zero_is_indistinguishable_from_cooperate(sleeps in prop::collection::vec(any::<bool>(), 1..6)) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut kernel = Kernel::new();
        for (i, &sleep) in sleeps.iter().enumerate() {
            let before = Rc::clone(&log);
            let after = Rc::clone(&log);
            kernel.spawn(
                Script::new()
                    .then(move |_| {
                        before.borrow_mut().push(format!("{i}:before"));
                        let pause = if sleep { api::sleep(0.0) } else { api::cooperate() };
                        Step::yielding(pause)
                    })
                    .then(move |_| {
                        after.borrow_mut().push(format!("{i}:after"));
                        Step::done(Value::Null)
                    }),
            );
        }
        kernel.run().unwrap();

        let expected: Vec<String> = (0..sleeps.len())
            .map(|i| format!("{i}:before"))
            .chain((0..sleeps.len()).map(|i| format!("{i}:after")))
            .collect();
        prop_assert_eq!(log.borrow().clone(), expected);
    }
}

use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tally::{Collector, Heap, PopOutcome};

struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
enum Step {
    Push(usize),
    Pop(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..4usize).prop_map(Step::Push),
        (0..4usize).prop_map(Step::Pop),
    ]
}

proptest! {
    #[test]
    fn balanced_pushes_and_pops_reach_zero_once(n in 1usize..64) {
        let collector = Collector::new("prop");
        let addr = 0x1000 as *const u8;
        for _ in 0..n {
            collector.push(addr);
        }
        let mut lasts = 0;
        for _ in 0..n {
            // SAFETY: no handle is bound to `addr`.
            if unsafe { collector.pop(addr) }.is_last() {
                lasts += 1;
            }
        }
        prop_assert_eq!(lasts, 1);
        prop_assert_eq!(collector.utility_of(addr), 0);
        prop_assert!(collector.journal().is_clean());
    }

    #[test]
    fn counts_match_a_model(steps in proptest::collection::vec(step(), 0..128)) {
        let collector = Collector::new("model");
        let mut model = [0usize; 4];
        let mut registered = [false; 4];
        let mut anomalies = 0u64;

        for step in steps {
            match step {
                Step::Push(slot) => {
                    let count = collector.push((0x100 * (slot + 1)) as *const u8);
                    model[slot] += 1;
                    registered[slot] = true;
                    prop_assert_eq!(count, model[slot]);
                }
                Step::Pop(slot) => {
                    // SAFETY: the addresses are never bound to a handle.
                    let outcome = unsafe { collector.pop((0x100 * (slot + 1)) as *const u8) };
                    let expected = match (registered[slot], model[slot]) {
                        (false, _) => PopOutcome::Unregistered,
                        (true, 0) => PopOutcome::Saturated,
                        (true, 1) => PopOutcome::Last,
                        (true, n) => PopOutcome::Shared { remaining: n - 1 },
                    };
                    if matches!(expected, PopOutcome::Unregistered | PopOutcome::Saturated) {
                        anomalies += 1;
                    }
                    model[slot] = model[slot].saturating_sub(1);
                    prop_assert_eq!(outcome, expected);
                }
            }
        }

        for (slot, &count) in model.iter().enumerate() {
            prop_assert_eq!(collector.utility_of((0x100 * (slot + 1)) as *const u8), count);
        }
        prop_assert_eq!(collector.journal().total(), anomalies);
    }

    #[test]
    fn any_drop_order_destroys_once_after_the_last(
        order in (1usize..12).prop_flat_map(|m| Just((0..m).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let heap = Heap::new();
        let drops = Arc::new(AtomicUsize::new(0));
        let root = heap.share(Counted(Arc::clone(&drops))).unwrap();
        let mut copies: Vec<_> = order.iter().map(|_| Some(root.clone())).collect();
        drop(root);

        for (done, &index) in order.iter().enumerate() {
            prop_assert_eq!(drops.load(Ordering::SeqCst), 0);
            prop_assert_eq!(copies[index].as_ref().map(|h| h.use_count()), Some(order.len() - done));
            copies[index] = None;
        }
        prop_assert_eq!(drops.load(Ordering::SeqCst), 1);
        prop_assert!(heap.allocator().ledger().is_empty());
        prop_assert!(heap.collector().is_empty());
    }
}

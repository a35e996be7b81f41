#[cfg(test)]
mod tests {
    use promise_out::{combine_all, Outcome, Promise};
    use proptest::prelude::*;

    fn started(count: usize) -> Vec<Promise<i64>> {
        (0..count)
            .map(|_| {
                let promise = Promise::new();
                promise.start();
                promise
            })
            .collect()
    }

    proptest! {
        #[test]
        fn sum_does_not_depend_on_completion_order(
            values in prop::collection::vec(-1_000i64..1_000, 1..12),
            seed in any::<u64>(),
        ) {
            let parts = started(values.len());
            let thunks: Vec<_> = parts.iter().cloned().map(|p| move || p).collect();
            let sum = combine_all(thunks, |all: Vec<i64>| Outcome::Value(all.into_iter().sum::<i64>()));

            let mut order: Vec<usize> = (0..values.len()).collect();
            let len = order.len();
            for i in 0..len {
                let j = (seed.rotate_left(i as u32) as usize) % len;
                order.swap(i, j);
            }
            for &index in &order {
                prop_assert!(sum.is_pending());
                parts[index].complete(values[index]);
            }

            let expected: i64 = values.iter().sum();
            prop_assert!(matches!(sum.result(), Outcome::Value(v) if v == expected));
        }

        #[test]
        fn first_failure_names_its_index(
            count in 2usize..8,
            failing in 0usize..8,
        ) {
            let failing = failing % count;
            let parts = started(count);
            let thunks: Vec<_> = parts.iter().cloned().map(|p| move || p).collect();
            let combined = combine_all(thunks, |all: Vec<i64>| Outcome::Value(all.len() as i64));

            parts[failing].fail(promise_out::Error::msg("boom"));
            let error = combined.result().error().cloned();
            prop_assert_eq!(error.and_then(|e| e.failed_index()), Some((failing, count)));
            for (index, part) in parts.iter().enumerate() {
                if index != failing {
                    prop_assert!(part.is_aborted());
                }
            }
        }
    }
}

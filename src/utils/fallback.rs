//! "First success" combinator shared by every fallback chain.

use futures::future::BoxFuture;
use log::debug;

/// A lazily started step of a fallback chain.
pub type FallbackStep<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Option<T>> + Send + 'a>;

/// Runs `steps` in order and returns the first `Some`. Later steps are never started.
pub async fn first_success<'a, T>(steps: Vec<(&'static str, FallbackStep<'a, T>)>) -> Option<T> {
    for (name, step) in steps {
        match step().await {
            Some(value) => {
                debug!("[fallback] step '{name}' succeeded");
                return Some(value);
            }
            None => debug!("[fallback] step '{name}' yielded nothing"),
        }
    }

    None
}

/// A ranking rule: picks the index of the preferred item, if any.
pub type RankRule<'r, T> = &'r dyn Fn(&[T]) -> Option<usize>;

/// Synchronous counterpart for ranking rules over a slice. Each rule only applies when
/// every rule before it found nothing.
pub fn first_match<'a, T>(items: &'a [T], rules: &[RankRule<'_, T>]) -> Option<&'a T> {
    rules
        .iter()
        .find_map(|rule| rule(items))
        .and_then(|idx| items.get(idx))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn should_stop_at_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));

        let step = |result: Option<u32>| -> FallbackStep<'static, u32> {
            let calls = calls.clone();
            Box::new(move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    result
                }
                .boxed()
            })
        };

        let res = first_success(vec![
            ("none", step(None)),
            ("two", step(Some(2))),
            ("three", step(Some(3))),
        ])
        .await;

        assert_eq!(res, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn should_yield_none_when_exhausted() {
        let empty: FallbackStep<'static, u8> = Box::new(|| async { None }.boxed());
        let res = first_success(vec![("empty", empty)]).await;
        assert_eq!(res, None);
    }

    #[test]
    fn should_apply_rules_in_order() {
        let items = [1, 4, 6, 9];
        let even = |xs: &[i32]| xs.iter().position(|x| x % 2 == 0);
        let big = |xs: &[i32]| xs.iter().position(|x| *x > 5);

        assert_eq!(first_match(&items, &[&big, &even]), Some(&6));
        assert_eq!(first_match(&items, &[&even, &big]), Some(&4));
        assert_eq!(first_match(&items[..1], &[&even, &big]), None);
    }
}

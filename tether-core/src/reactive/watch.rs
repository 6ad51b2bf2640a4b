//! Watchers
//!
//! A watcher is an effect that recomputes a value and hands changes to a
//! callback. The value is tracked deeply; the callback runs untracked, so
//! whatever it reads does not become a dependency of the watcher.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use super::effect::Effect;
use super::runtime::Runtime;
use super::state::State;

impl Runtime {
    /// Call `callback(new, old)` whenever the value produced by `getter`
    /// changes.
    ///
    /// The getter runs immediately to record the initial value; the callback
    /// does not run for it.
    pub fn watch(
        &self,
        getter: impl Fn() -> Value + 'static,
        callback: impl FnMut(&Value, &Value) + 'static,
    ) -> Effect {
        let last: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let callback = RefCell::new(callback);
        let rt = self.downgrade();

        self.effect(move || {
            let next = getter();
            let previous = last.borrow_mut().replace(next.clone());
            let Some(previous) = previous else {
                return;
            };
            if previous == next {
                return;
            }
            let mut callback = callback.borrow_mut();
            match rt.upgrade() {
                Some(rt) => rt.untrack(|| (*callback)(&next, &previous)),
                None => (*callback)(&next, &previous),
            }
        })
    }
}

impl State {
    /// Watch a dot-separated path such as `"user.name"`.
    ///
    /// Missing paths read as `null`; nested containers are compared by
    /// content.
    pub fn watch(
        &self,
        path: &str,
        callback: impl FnMut(&Value, &Value) + 'static,
    ) -> Option<Effect> {
        let rt = self.runtime()?;
        let weak = self.downgrade();
        let path = path.to_owned();
        Some(rt.watch(
            move || {
                weak.upgrade()
                    .and_then(|state| state.get_path(&path))
                    .map(|entry| entry.snapshot())
                    .unwrap_or(Value::Null)
            },
            callback,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn watch_reports_changes_with_previous_value() {
        let rt = Runtime::new();
        let state = rt.state(json!({"user": {"name": "ada"}}));
        let changes = Rc::new(RefCell::new(Vec::new()));

        let log = changes.clone();
        let watcher = state
            .watch("user.name", move |new, old| {
                log.borrow_mut().push((new.clone(), old.clone()))
            })
            .unwrap();

        assert!(changes.borrow().is_empty());
        state
            .get("user")
            .and_then(|e| e.into_state())
            .unwrap()
            .set("name", "grace");
        assert_eq!(
            *changes.borrow(),
            vec![(json!("grace"), json!("ada"))]
        );
        assert_eq!(watcher.run_count(), 2);
    }

    #[test]
    fn deep_watch_sees_nested_writes() {
        let rt = Runtime::new();
        let state = rt.state(json!({"items": [1, 2]}));
        let count = Rc::new(RefCell::new(0));

        let (source, hits) = (state.clone(), count.clone());
        rt.watch(
            move || source.value("items"),
            move |_, _| *hits.borrow_mut() += 1,
        );

        let items = state.get("items").and_then(|e| e.into_state()).unwrap();
        items.push(3);
        items.reverse();
        // Same content written back does not count.
        items.fill(3, 0..1);
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn callback_reads_are_untracked() {
        let rt = Runtime::new();
        let state = rt.state(json!({"a": 0, "b": 0}));

        let (source, reader) = (state.clone(), state.clone());
        let watcher = rt.watch(
            move || source.value("a"),
            move |_, _| {
                reader.get("b");
            },
        );

        state.set("a", 1);
        state.set("b", 1);
        assert_eq!(watcher.run_count(), 2);
    }
}

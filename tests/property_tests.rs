//! Property tests for the job state machine and the sync cycle.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use edge_executor::callbacks::{CallbackKind, RecordingCallbacks};
use edge_executor::clock::{Clock, ManualClock};
use edge_executor::metrics::NoopMetricSink;
use edge_executor::store::memory::{InMemoryJobStore, InMemoryWorkerStore};
use edge_executor::store::JobStore;
use edge_executor::{EdgeExecutor, JobRecord, JobState, JobUpdate, TaskIdentity};
use proptest::prelude::*;

fn any_state() -> impl Strategy<Value = JobState> {
    proptest::sample::select(JobState::ALL.to_vec())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_terminal_states_never_transition(from in any_state(), to in any_state()) {
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(&to));
        }
        prop_assert!(!from.can_transition_to(&from));
    }

    #[test]
    fn prop_store_writes_are_monotonic(
        writes in proptest::collection::vec((any_state(), -600i64..600), 1..20)
    ) {
        runtime().block_on(async {
            let store = InMemoryJobStore::new();
            let key = TaskIdentity::new("wf", "run", "task", -1, 1);
            let start = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
            store
                .insert(JobRecord::queued(key.clone(), "default", String::new(), 1, start))
                .await
                .unwrap();

            let mut previous = store.get(&key)[0].clone();
            for (state, offset) in writes {
                let at = start + Duration::seconds(offset);
                let _ = store.update(&key, JobUpdate::transition(state, at), None).await;
                let current = store.get(&key)[0].clone();
                prop_assert!(current.last_update >= previous.last_update);
                if previous.state.is_terminal() {
                    prop_assert_eq!(current.state, previous.state);
                }
                previous = current;
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_repeated_sync_never_refires(
        states in proptest::collection::vec(
            (any_state(), proptest::option::of(any_state())),
            1..12,
        ),
        extra_cycles in 1usize..4,
    ) {
        runtime().block_on(async {
            let jobs = Arc::new(InMemoryJobStore::new());
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap());
            let callbacks = Arc::new(RecordingCallbacks::new());
            let mut executor = EdgeExecutor::builder(jobs.clone(), Arc::new(InMemoryWorkerStore::new()))
                .clock(Arc::new(clock.clone()))
                .callbacks(callbacks.clone())
                .metrics(Arc::new(NoopMetricSink))
                .build()
                .unwrap();

            let mut keys = Vec::new();
            for (i, (state, duplicate)) in states.iter().enumerate() {
                // Some tasks get a second row, possibly in another state.
                let key = TaskIdentity::new("wf", "run", format!("task_{i}"), -1, 1);
                for state in std::iter::once(*state).chain(*duplicate) {
                    let mut record = JobRecord::queued(key.clone(), "default", String::new(), 1, clock.now());
                    record.state = state;
                    jobs.insert(record).await.unwrap();
                }
                keys.push(key);
            }
            executor.adopt(keys.clone()).await.unwrap();

            executor.sync().await;
            let first = callbacks.calls();
            for _ in 0..extra_cycles {
                executor.sync().await;
            }
            prop_assert_eq!(callbacks.calls(), first);

            for key in &keys {
                for kind in [CallbackKind::Running, CallbackKind::Success, CallbackKind::Failed] {
                    prop_assert!(callbacks.count_for(kind, key) <= 1);
                }
            }
            Ok(())
        })?;
    }
}

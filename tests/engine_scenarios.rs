use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use millrace::{
    Engine, KickRequest, Run, State, StatusCount, StatusListener, StepResult, TRIGGER_STATE_NEW,
};

const DONE: &str = "done";
const MIDDLE: &str = "middle";
const DONE_TWO: &str = "done_two";

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
struct Payload {
    count: usize,
    items: Vec<String>,
    text: String,
}

#[derive(Default)]
struct RecordingListener {
    snapshots: Mutex<Vec<Vec<StatusCount>>>,
}

impl StatusListener for RecordingListener {
    fn status_update(&self, counts: Vec<StatusCount>) {
        self.snapshots.lock().push(counts);
    }
}

fn counts(state: &str, completed: usize, executing: usize, waiting: usize, terminal: bool) -> StatusCount {
    StatusCount {
        state: state.into(),
        completed,
        executing,
        waiting,
        terminal,
    }
}

#[tokio::test(start_paused = true)]
async fn ten_jobs_run_one_hop_in_parallel() {
    let mut run = Run::new("one-hop", ());
    for _ in 0..10 {
        run.add_job(Payload::default());
    }
    let states = vec![
        State::new(
            TRIGGER_STATE_NEW,
            10,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                payload.count += 1;
                tokio::time::sleep(Duration::from_secs(1)).await;
                StepResult::next(payload, DONE)
            },
        ),
        State::terminal(DONE),
    ];
    let engine = Engine::new((), states).unwrap();

    let started = Instant::now();
    engine
        .execute(CancellationToken::new(), &mut run)
        .await
        .unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "ten one-second jobs at concurrency ten should overlap"
    );

    for job in run.jobs.values() {
        assert_eq!(job.payload.count, 1);
        assert_eq!(job.state, DONE);
    }
}

#[tokio::test]
async fn two_sequential_hops_touch_every_job_twice() {
    let mut run = Run::new("two-hop", ());
    for _ in 0..10 {
        run.add_job(Payload::default());
    }
    let states = vec![
        State::new(
            TRIGGER_STATE_NEW,
            10,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                payload.count += 1;
                StepResult::next(payload, MIDDLE)
            },
        ),
        State::new(
            MIDDLE,
            10,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                payload.count += 1;
                StepResult::next(payload, DONE)
            },
        ),
        State::terminal(DONE),
    ];
    let engine = Engine::new((), states).unwrap();

    let started = std::time::Instant::now();
    engine
        .execute(CancellationToken::new(), &mut run)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    for job in run.jobs.values() {
        assert_eq!(job.payload.count, 2);
        assert_eq!(job.state, DONE);
    }
}

#[tokio::test]
async fn errored_retries_accumulate_until_the_job_moves_on() {
    let mut run = Run::new("retries", ());
    for _ in 0..10 {
        run.add_job(Payload::default());
    }
    let states = vec![
        State::new(
            TRIGGER_STATE_NEW,
            10,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                payload.count += 1;
                if payload.count <= 3 {
                    StepResult::next(payload, TRIGGER_STATE_NEW).with_error("New error")
                } else {
                    StepResult::next(payload, DONE)
                }
            },
        ),
        State::terminal(DONE),
    ];
    let engine = Engine::new((), states).unwrap();

    engine
        .execute(CancellationToken::new(), &mut run)
        .await
        .unwrap();

    for job in run.jobs.values() {
        assert_eq!(job.payload.count, 4);
        assert_eq!(job.state, DONE);
        assert_eq!(
            job.state_errors.get(TRIGGER_STATE_NEW),
            Some(&vec![
                "New error".to_string(),
                "New error".to_string(),
                "New error".to_string(),
            ])
        );
    }
}

#[tokio::test]
async fn kicked_jobs_expand_the_population() {
    let item = "abcdefghijklmnopqrstuvwxyz0123".to_string();
    assert_eq!(item.len(), 30);

    let mut run = Run::new("expand", ());
    for _ in 0..10 {
        run.add_job(Payload {
            items: vec![item.clone(); 10],
            ..Payload::default()
        });
    }
    let states = vec![
        State::new(
            TRIGGER_STATE_NEW,
            10,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, payload: Payload| async move {
                let kicks: Vec<KickRequest<Payload>> = payload
                    .items
                    .iter()
                    .map(|text| {
                        KickRequest::new(
                            Payload {
                                text: text.clone(),
                                ..Payload::default()
                            },
                            MIDDLE,
                        )
                    })
                    .collect();
                StepResult::next(payload, DONE).with_kicks(kicks)
            },
        ),
        State::new(
            MIDDLE,
            10,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                payload.count = payload.text.len();
                StepResult::next(payload, DONE_TWO)
            },
        ),
        State::terminal(DONE),
        State::terminal(DONE_TWO),
    ];
    let engine = Engine::new((), states).unwrap();

    engine
        .execute(CancellationToken::new(), &mut run)
        .await
        .unwrap();

    let mut per_state = std::collections::HashMap::new();
    for job in run.jobs.values() {
        *per_state.entry(job.state.clone()).or_insert(0) += 1;
        match job.state.as_str() {
            DONE => assert_eq!(job.payload.count, 0),
            DONE_TWO => assert_eq!(job.payload.count, 30),
            other => panic!("job finished in unexpected state {other}"),
        }
    }
    assert_eq!(per_state[DONE], 10);
    assert_eq!(per_state[DONE_TWO], 100);
    assert_eq!(run.job_count(), 110);
}

#[tokio::test]
async fn capacity_one_releases_the_oldest_waiter_first() {
    let mut run = Run::new("fair", ());
    for _ in 0..5 {
        run.add_job(Payload::default());
    }

    let total = Arc::new(AtomicUsize::new(0));
    let states = vec![
        State::new(TRIGGER_STATE_NEW, 1, {
            let total = Arc::clone(&total);
            move |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| {
                let total = Arc::clone(&total);
                async move {
                    let seen = total.fetch_add(1, Ordering::SeqCst) + 1;
                    if seen > 10 {
                        return StepResult::next(payload, DONE);
                    }
                    payload.count += 1;
                    StepResult::next(payload, TRIGGER_STATE_NEW)
                }
            }
        }),
        State::terminal(DONE),
    ];
    let engine = Engine::new((), states).unwrap();

    engine
        .execute(CancellationToken::new(), &mut run)
        .await
        .unwrap();

    // Round-robin through the queue means each of the five jobs gets exactly
    // two passes before the shared threshold trips.
    for job in run.jobs.values() {
        assert_eq!(job.payload.count, 2, "job {} was starved or favored", job.id);
    }
}

#[tokio::test]
async fn self_loops_without_kicks_emit_no_status() {
    let mut run = Run::new("dedup", ());
    run.add_job(Payload::default());

    let listener = Arc::new(RecordingListener::default());
    let states = vec![
        State::new(
            TRIGGER_STATE_NEW,
            1,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                payload.count += 1;
                if payload.count < 10 {
                    StepResult::next(payload, TRIGGER_STATE_NEW)
                } else {
                    StepResult::next(payload, DONE)
                }
            },
        ),
        State::terminal(DONE),
    ];
    let engine = Engine::new((), states)
        .unwrap()
        .with_status_listener(Arc::clone(&listener));

    engine
        .execute(CancellationToken::new(), &mut run)
        .await
        .unwrap();

    let snapshots = listener.snapshots.lock();
    assert_eq!(
        *snapshots,
        vec![
            vec![counts(DONE, 0, 0, 0, true), counts(TRIGGER_STATE_NEW, 0, 1, 0, false)],
            vec![counts(DONE, 1, 0, 0, true), counts(TRIGGER_STATE_NEW, 0, 0, 0, false)],
        ],
        "every no-kick self-loop should be deduplicated"
    );
}

#[tokio::test]
async fn an_already_terminal_run_emits_one_snapshot_and_skips_workers() {
    let mut run = Run::new("settled", ());
    for _ in 0..10 {
        run.add_job(Payload::default());
    }
    for _ in 0..5 {
        run.add_job_with_state(Payload::default(), DONE_TWO);
    }

    let listener = Arc::new(RecordingListener::default());
    let states = vec![
        State::<(), (), Payload>::terminal(TRIGGER_STATE_NEW),
        State::terminal(DONE_TWO),
    ];
    let engine = Engine::new((), states)
        .unwrap()
        .with_status_listener(Arc::clone(&listener));

    let started = std::time::Instant::now();
    engine
        .execute(CancellationToken::new(), &mut run)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let snapshots = listener.snapshots.lock();
    assert_eq!(
        *snapshots,
        vec![vec![
            counts(DONE_TWO, 5, 0, 0, true),
            counts(TRIGGER_STATE_NEW, 10, 0, 0, true),
        ]]
    );
}

#[tokio::test]
async fn cyclic_routes_terminate_once_the_exec_fn_says_so() {
    let mut run = Run::new("cycle", ());
    for _ in 0..10 {
        run.add_job(Payload::default());
    }
    let states = vec![
        State::new(
            TRIGGER_STATE_NEW,
            10,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                payload.count += 1;
                StepResult::next(payload, MIDDLE)
            },
        ),
        State::new(
            MIDDLE,
            10,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                payload.count += 1;
                if payload.count > 9 {
                    StepResult::next(payload, DONE)
                } else {
                    StepResult::next(payload, TRIGGER_STATE_NEW)
                }
            },
        ),
        State::terminal(DONE),
    ];
    let engine = Engine::new((), states).unwrap();

    engine
        .execute(CancellationToken::new(), &mut run)
        .await
        .unwrap();

    for job in run.jobs.values() {
        assert_eq!(job.payload.count, 10);
        assert_eq!(job.state, DONE);
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_ok_and_preserves_partial_state() {
    let mut run = Run::new("halted", ());
    for _ in 0..4 {
        run.add_job(Payload::default());
    }
    let states = vec![
        State::new(
            TRIGGER_STATE_NEW,
            2,
            |_cancel: CancellationToken, _app: Arc<()>, _overall: Arc<()>, mut payload: Payload| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                payload.count += 1;
                StepResult::next(payload, TRIGGER_STATE_NEW)
            },
        ),
        State::terminal(DONE),
    ];
    let engine = Engine::new((), states).unwrap();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            cancel.cancel();
        }
    });

    engine.execute(cancel, &mut run).await.unwrap();

    assert_eq!(run.job_count(), 4);
    for job in run.jobs.values() {
        assert_eq!(job.state, TRIGGER_STATE_NEW, "cancellation is not a transition");
    }
}

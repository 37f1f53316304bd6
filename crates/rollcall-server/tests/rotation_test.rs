//! Rotation loop timing
//!
//! Runs the loop on Tokio's paused clock so a 30 second schedule completes
//! instantly and deterministically.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rollcall_core::{Environment, TokenAuthority, TokenIssuer};
use rollcall_server::RotationLoop;
use tokio::{sync::watch, time::Instant};

/// Wall clock derived from Tokio's (paused) monotonic clock.
#[derive(Clone)]
struct PausedClock {
    base: DateTime<Utc>,
    start: Instant,
}

impl PausedClock {
    fn new() -> Self {
        Self { base: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(), start: Instant::now() }
    }

    fn at(&self, secs: i64) -> DateTime<Utc> {
        self.base + TimeDelta::seconds(secs)
    }
}

impl Environment for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + TimeDelta::from_std(self.start.elapsed()).unwrap()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

fn counting_authority(ttl_secs: i64) -> (Arc<TokenAuthority>, Arc<AtomicUsize>) {
    let authority =
        Arc::new(TokenAuthority::new(TokenIssuer::default(), TimeDelta::seconds(ttl_secs)));
    let published = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&published);
    authority.register_publish_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (authority, published)
}

#[tokio::test(start_paused = true)]
async fn publishes_on_start_and_every_ttl() {
    let clock = PausedClock::new();
    let (authority, published) = counting_authority(30);
    let (stop_tx, stop_rx) = watch::channel(false);

    let rotation = RotationLoop::new(clock.clone(), Arc::clone(&authority), Duration::from_secs(5));
    assert_eq!(rotation.period(), Duration::from_secs(30));
    let handle = tokio::spawn(rotation.run(stop_rx));

    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(published.load(Ordering::SeqCst), 4);
    let current = authority.current_token_snapshot().unwrap();
    assert_eq!(current.issued_at().timestamp(), clock.at(90).timestamp());
    assert_eq!(current.value(), "ATTEND-20240101120130");

    stop_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_does_not_move_schedule() {
    let clock = PausedClock::new();
    let (authority, published) = counting_authority(30);
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(
        RotationLoop::new(clock.clone(), Arc::clone(&authority), Duration::from_secs(5)).run(stop_rx),
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    let manual = authority.force_refresh(clock.now()).unwrap();
    assert_eq!(manual.issued_at().timestamp(), clock.at(10).timestamp());

    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(published.load(Ordering::SeqCst), 3);
    let current = authority.current_token_snapshot().unwrap();
    assert_eq!(current.issued_at().timestamp(), clock.at(30).timestamp());

    stop_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_publish_keeps_loop_alive() {
    let clock = PausedClock::new();
    let (authority, published) = counting_authority(0);
    let (stop_tx, stop_rx) = watch::channel(false);

    let rotation = RotationLoop::new(clock, Arc::clone(&authority), Duration::from_secs(5));
    assert_eq!(rotation.period(), Duration::from_secs(5));
    let handle = tokio::spawn(rotation.run(stop_rx));

    tokio::time::sleep(Duration::from_secs(21)).await;

    assert!(!handle.is_finished());
    assert_eq!(published.load(Ordering::SeqCst), 0);
    assert!(authority.current_token_snapshot().is_none());

    stop_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dropping_shutdown_sender_stops_loop() {
    let (authority, published) = counting_authority(30);
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(
        RotationLoop::new(PausedClock::new(), authority, Duration::from_secs(5)).run(stop_rx),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(stop_tx);

    tokio::time::timeout(Duration::from_secs(60), handle).await.unwrap().unwrap();
    assert_eq!(published.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_start_publishes_nothing() {
    let (authority, published) = counting_authority(30);
    let (_stop_tx, stop_rx) = watch::channel(true);

    RotationLoop::new(PausedClock::new(), authority, Duration::from_secs(5)).run(stop_rx).await;

    assert_eq!(published.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn late_wakeup_keeps_the_period_grid() {
    let clock = PausedClock::new();
    let (authority, published) = counting_authority(30);
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(
        RotationLoop::new(clock.clone(), Arc::clone(&authority), Duration::from_secs(5)).run(stop_rx),
    );

    tokio::time::sleep(Duration::from_secs(29)).await;
    // Jump past the 30s tick without letting the loop run in between
    tokio::time::advance(Duration::from_secs(3)).await;
    tokio::time::sleep(Duration::from_secs(29)).await;

    // Publishes at 0, 32 (late) and 60, not 62
    assert_eq!(published.load(Ordering::SeqCst), 3);
    let current = authority.current_token_snapshot().unwrap();
    assert_eq!(current.issued_at().timestamp(), clock.at(60).timestamp());

    stop_tx.send(true).unwrap();
    handle.await.unwrap();
}


//! Background receive loop for one pub/sub subscription.
//!
//! Two threads per subscription:
//!
//! ```text
//!   transport ──receive──▶ [receiver thread] ──queue──▶ [dispatch thread] ──▶ Dispatcher
//! ```
//!
//! The receiver thread only moves raw payloads onto an unbounded queue, so a slow
//! handler never holds up reads from the transport. The dispatch thread decodes
//! each payload through the dispatcher's type table and dispatches it.
//!
//! Envelopes whose id starts with the subscription's own origin prefix are the
//! echoes of its own broadcasts and are dropped before decoding.

use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::transport::TransportSubscription;
use crate::dispatcher::Dispatcher;
use crate::envelope::{Envelope, WireFormat};
use crate::error::DecodeError;

/// Counters collected by a receive loop over its lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Payloads read from the transport.
    pub received: usize,
    /// Envelopes decoded and dispatched.
    pub dispatched: usize,
    /// Envelopes whose type tag is not registered locally.
    pub unknown: usize,
    /// Payloads that were not a valid envelope, or whose payload did not decode.
    pub malformed: usize,
    /// Envelopes this subscription published itself.
    pub echoes: usize,
    pub transport_errors: usize,
}

impl AddAssign for ReceiveStats {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.dispatched += other.dispatched;
        self.unknown += other.unknown;
        self.malformed += other.malformed;
        self.echoes += other.echoes;
        self.transport_errors += other.transport_errors;
    }
}

/// Tracks consecutive transport failures so only the first of a streak is a warning.
#[derive(Debug, Default)]
pub(crate) struct ErrorStreak {
    failures: usize,
}

impl ErrorStreak {
    /// Count one failure; returns whether it starts a new streak.
    pub(crate) fn fail(&mut self) -> bool {
        self.failures += 1;
        self.failures == 1
    }

    /// End the streak; returns how many failures it held.
    pub(crate) fn recover(&mut self) -> usize {
        std::mem::take(&mut self.failures)
    }
}

/// Handle to the two threads serving one subscription.
pub(crate) struct ReceiveLoop {
    stop: Arc<AtomicBool>,
    receiver: Option<JoinHandle<ReceiveStats>>,
    dispatcher: Option<JoinHandle<ReceiveStats>>,
}

impl ReceiveLoop {
    pub(crate) fn spawn(
        name: &str,
        subscription: Box<dyn TransportSubscription>,
        dispatcher: Dispatcher,
        origin: String,
        format: WireFormat,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (queue_tx, queue_rx) = channel();

        let receiver = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("{name}-receive"))
                .spawn(move || receive(subscription, queue_tx, &stop, poll_interval))?
        };

        let dispatch_thread = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("{name}-dispatch"))
                .spawn(move || {
                    drain(queue_rx, &dispatcher, &origin, format, &stop, poll_interval)
                })
        };

        let dispatch_thread = match dispatch_thread {
            Ok(handle) => handle,
            Err(err) => {
                stop.store(true, Ordering::Release);
                let _ = receiver.join();
                return Err(err);
            }
        };

        Ok(Self {
            stop,
            receiver: Some(receiver),
            dispatcher: Some(dispatch_thread),
        })
    }

    /// Signal both threads to stop and wait for them.
    ///
    /// Called from one of the loop's own threads (a handler unsubscribing its own
    /// bus), that thread is not joined; it exits after the current message.
    pub(crate) fn stop(mut self) -> ReceiveStats {
        self.stop.store(true, Ordering::Release);
        let mut stats = ReceiveStats::default();
        for handle in [self.receiver.take(), self.dispatcher.take()].into_iter().flatten() {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            stats += handle.join().unwrap_or_default();
        }
        stats
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn receive(
    mut subscription: Box<dyn TransportSubscription>,
    queue: Sender<Vec<u8>>,
    stop: &AtomicBool,
    poll_interval: Duration,
) -> ReceiveStats {
    let mut stats = ReceiveStats::default();
    let mut streak = ErrorStreak::default();

    while !stop.load(Ordering::Acquire) {
        match subscription.receive(poll_interval) {
            Ok(received) => {
                let failures = streak.recover();
                if failures > 0 {
                    tracing::info!(failures, "transport receive recovered");
                }
                if let Some(payload) = received {
                    stats.received += 1;
                    if queue.send(payload).is_err() {
                        break;
                    }
                }
            }
            Err(err) => {
                stats.transport_errors += 1;
                if streak.fail() {
                    tracing::warn!(error = %err, "transport receive failed; retrying");
                } else {
                    tracing::debug!(error = %err, "transport receive still failing");
                }
                thread::sleep(poll_interval);
            }
        }
    }

    stats
}

fn drain(
    queue: Receiver<Vec<u8>>,
    dispatcher: &Dispatcher,
    origin: &str,
    format: WireFormat,
    stop: &AtomicBool,
    poll_interval: Duration,
) -> ReceiveStats {
    let mut stats = ReceiveStats::default();

    while !stop.load(Ordering::Acquire) {
        match queue.recv_timeout(poll_interval) {
            Ok(payload) => handle(&payload, dispatcher, origin, format, &mut stats),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    stats
}

fn handle(
    payload: &[u8],
    dispatcher: &Dispatcher,
    origin: &str,
    format: WireFormat,
    stats: &mut ReceiveStats,
) {
    let envelope = match Envelope::from_bytes(payload, format) {
        Ok(envelope) => envelope,
        Err(err) => {
            stats.malformed += 1;
            tracing::warn!(error = %err, "dropping undecodable payload");
            return;
        }
    };

    if envelope.id.starts_with(origin) {
        stats.echoes += 1;
        return;
    }

    match dispatcher.decode(&envelope) {
        Ok(message) => {
            dispatcher.dispatch(message.as_ref());
            stats.dispatched += 1;
        }
        Err(DecodeError::UnknownType(message_type)) => {
            stats.unknown += 1;
            tracing::debug!(%message_type, id = %envelope.id, "dropping envelope of unregistered type");
        }
        Err(err) => {
            stats.malformed += 1;
            tracing::warn!(error = %err, id = %envelope.id, "dropping malformed envelope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use serde::{Deserialize, Serialize};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Debug, Serialize, Deserialize)]
    struct Tick {
        n: u32,
    }

    crate::impl_message!(Tick);

    /// Hands out queued results, then reports nothing.
    struct Scripted(VecDeque<Result<Option<Vec<u8>>, TransportError>>);

    impl TransportSubscription for Scripted {
        fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
            match self.0.pop_front() {
                Some(result) => result,
                None => {
                    thread::sleep(timeout);
                    Ok(None)
                }
            }
        }
    }

    fn envelope_bytes(n: u32) -> Vec<u8> {
        Envelope::new(&Tick { n })
            .unwrap()
            .to_bytes(WireFormat::Json)
            .unwrap()
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn error_streak_warns_once_per_outage() {
        let mut streak = ErrorStreak::default();
        assert!(streak.fail());
        assert!(!streak.fail());
        assert!(!streak.fail());
        assert_eq!(streak.recover(), 3);
        assert_eq!(streak.recover(), 0);
        assert!(streak.fail());
    }

    #[test]
    fn survives_transport_errors_and_bad_payloads() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        let sink = Arc::clone(&seen);
        dispatcher.register_handler(move |t: &Tick| sink.lock().unwrap().push(t.n));

        let unknown = serde_json::to_vec(&Envelope {
            id: "x".into(),
            timestamp: 0,
            message_type: "Tock".into(),
            payload: serde_json::Value::Null,
        })
        .unwrap();

        let script = Scripted(VecDeque::from(vec![
            Ok(Some(envelope_bytes(1))),
            Err(TransportError::ConnectionFailed("reset".into())),
            Ok(Some(b"{ not an envelope".to_vec())),
            Ok(Some(unknown)),
            Ok(Some(envelope_bytes(2))),
        ]));

        let receive_loop = ReceiveLoop::spawn(
            "test",
            Box::new(script),
            dispatcher,
            "self/1/".to_string(),
            WireFormat::Json,
            Duration::from_millis(5),
        )
        .unwrap();

        wait_until(|| seen.lock().unwrap().len() == 2);
        let stats = receive_loop.stop();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(stats.received, 4);
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.unknown, 1);
    }

    #[test]
    fn drops_own_echoes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new();
        let sink = Arc::clone(&seen);
        dispatcher.register_handler(move |t: &Tick| sink.lock().unwrap().push(t.n));

        let mut own = Envelope::new(&Tick { n: 7 }).unwrap();
        own.id = format!("self/1/{}", own.id);
        let mut sibling = Envelope::new(&Tick { n: 9 }).unwrap();
        sibling.id = format!("self/12/{}", sibling.id);

        let script = Scripted(VecDeque::from(vec![
            Ok(Some(own.to_bytes(WireFormat::Json).unwrap())),
            Ok(Some(sibling.to_bytes(WireFormat::Json).unwrap())),
            Ok(Some(envelope_bytes(8))),
        ]));

        let receive_loop = ReceiveLoop::spawn(
            "echo",
            Box::new(script),
            dispatcher,
            "self/1/".to_string(),
            WireFormat::Json,
            Duration::from_millis(5),
        )
        .unwrap();

        wait_until(|| seen.lock().unwrap().len() == 2);
        let stats = receive_loop.stop();

        assert_eq!(*seen.lock().unwrap(), vec![9, 8]);
        assert_eq!(stats.echoes, 1);
    }

    #[test]
    fn slow_handler_does_not_block_receiving() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler(|_: &Tick| thread::sleep(Duration::from_millis(200)));

        let script = Scripted(VecDeque::from(
            (0..5).map(|n| Ok(Some(envelope_bytes(n)))).collect::<Vec<_>>(),
        ));

        let receive_loop = ReceiveLoop::spawn(
            "slow",
            Box::new(script),
            dispatcher,
            "self/1/".to_string(),
            WireFormat::Json,
            Duration::from_millis(5),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        let stats = receive_loop.stop();

        // All five were read while the first handler call was still sleeping.
        assert_eq!(stats.received, 5);
        assert!(stats.dispatched <= 1);
    }
}

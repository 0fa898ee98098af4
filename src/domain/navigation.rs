//! Navigation loop
//!
//! Couples the location sample stream to the single-slot HUD link: every
//! admitted position triggers one route resolution whose top instruction is
//! written to the link. Resolutions are awaited inline, so at most one is in
//! flight at a time and a later-issued request can never be overtaken by an
//! earlier one. Samples arriving while a resolution is outstanding are
//! coalesced down to the most recent one.

use crate::domain::models::{
    AppEvent, Coordinates, MessageSeverity, NavigationInstruction, Position, StatusMessage,
};
use crate::error::{LinkError, ResolveError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Seam toward the mapping service: address lookup at session start, route
/// resolution per tick.
#[allow(async_fn_in_trait)]
pub trait RouteResolver {
    /// Resolve a free-text address to coordinates.
    async fn geocode(&self, address: &str) -> Result<Coordinates, ResolveError>;

    /// Resolve the next maneuver for a route from `origin` to `destination`.
    async fn next_instruction(
        &self,
        origin: &Position,
        destination: Coordinates,
    ) -> Result<NavigationInstruction, ResolveError>;
}

/// Seam toward the HUD link. The implementation owns newline framing.
#[allow(async_fn_in_trait)]
pub trait InstructionSink {
    async fn send_line(&mut self, line: &str) -> Result<(), LinkError>;
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The position stream closed (session ended).
    SessionEnded,
    /// Consecutive write failures reached the configured limit.
    LinkLost,
}

pub struct NavigationLoop<R, S> {
    resolver: R,
    sink: S,
    events: mpsc::UnboundedSender<AppEvent>,
    write_failure_limit: u32,
}

impl<R: RouteResolver, S: InstructionSink> NavigationLoop<R, S> {
    pub fn new(
        resolver: R,
        sink: S,
        events: mpsc::UnboundedSender<AppEvent>,
        write_failure_limit: u32,
    ) -> Self {
        Self {
            resolver,
            sink,
            events,
            // A limit of zero would halt before the first write.
            write_failure_limit: write_failure_limit.max(1),
        }
    }

    /// Run until the position stream closes or the link is lost.
    ///
    /// The destination is snapshotted once per session; every tick is
    /// independent and idempotent given the same (position, destination)
    /// pair.
    pub async fn run(
        mut self,
        mut positions: mpsc::UnboundedReceiver<Position>,
        destination: Coordinates,
    ) -> LoopExit {
        let mut consecutive_write_failures = 0u32;

        while let Some(sample) = positions.recv().await {
            let sample = latest_sample(sample, &mut positions);

            let instruction = match self.resolver.next_instruction(&sample, destination).await {
                Ok(instruction) => instruction,
                Err(err) => {
                    // Dropped tick: the next sample retries naturally.
                    debug!("route resolution failed, dropping tick: {err}");
                    continue;
                }
            };

            let line = instruction.line();
            match self.sink.send_line(&line).await {
                Ok(()) => {
                    consecutive_write_failures = 0;
                    debug!("wrote instruction line to HUD");
                    let _ = self.events.send(AppEvent::InstructionSent(line));
                }
                Err(err) => {
                    consecutive_write_failures += 1;
                    warn!(
                        "HUD write failed ({consecutive_write_failures}/{}): {err}",
                        self.write_failure_limit
                    );
                    if consecutive_write_failures >= self.write_failure_limit {
                        let _ = self.events.send(AppEvent::RouteStatus(StatusMessage::new(
                            "HUD link lost, stopping navigation",
                            MessageSeverity::Error,
                        )));
                        return LoopExit::LinkLost;
                    }
                }
            }
        }

        LoopExit::SessionEnded
    }
}

/// Drain the channel down to the most recent buffered sample. Stale samples
/// are discarded; their instructions would be overwritten immediately anyway.
fn latest_sample(first: Position, positions: &mut mpsc::UnboundedReceiver<Position>) -> Position {
    let mut latest = first;
    while let Ok(next) = positions.try_recv() {
        latest = next;
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct OkResolver {
        distance: &'static str,
        instruction: &'static str,
        calls: Arc<Mutex<Vec<Position>>>,
    }

    impl RouteResolver for OkResolver {
        async fn geocode(&self, _address: &str) -> Result<Coordinates, ResolveError> {
            unreachable!("the loop never geocodes")
        }

        async fn next_instruction(
            &self,
            origin: &Position,
            _destination: Coordinates,
        ) -> Result<NavigationInstruction, ResolveError> {
            self.calls.lock().unwrap().push(*origin);
            Ok(NavigationInstruction {
                distance: self.distance.to_string(),
                instruction: self.instruction.to_string(),
            })
        }
    }

    struct FailResolver;

    impl RouteResolver for FailResolver {
        async fn geocode(&self, _address: &str) -> Result<Coordinates, ResolveError> {
            unreachable!("the loop never geocodes")
        }

        async fn next_instruction(
            &self,
            _origin: &Position,
            _destination: Coordinates,
        ) -> Result<NavigationInstruction, ResolveError> {
            Err(ResolveError::ServiceError("NOT_FOUND".to_string()))
        }
    }

    #[derive(Clone)]
    struct MockSink {
        lines: Arc<Mutex<Vec<String>>>,
        failures_left: Arc<Mutex<u32>>,
    }

    impl MockSink {
        fn new(failures: u32) -> Self {
            Self {
                lines: Arc::new(Mutex::new(Vec::new())),
                failures_left: Arc::new(Mutex::new(failures)),
            }
        }
    }

    impl InstructionSink for MockSink {
        async fn send_line(&mut self, line: &str) -> Result<(), LinkError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(LinkError::WriteFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "stream torn down",
                )));
            }
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    fn destination() -> Coordinates {
        Coordinates {
            latitude: 37.4220,
            longitude: -122.0841,
        }
    }

    fn events() -> mpsc::UnboundedSender<AppEvent> {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn test_successful_tick_writes_formatted_line() {
        let sink = MockSink::new(0);
        let resolver = OkResolver {
            distance: "0.1 mi",
            instruction: "Head north",
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let nav = NavigationLoop::new(resolver, sink.clone(), events(), 2);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Position::new(37.4219, -122.0847)).unwrap();
        drop(tx);

        assert_eq!(nav.run(rx, destination()).await, LoopExit::SessionEnded);
        assert_eq!(*sink.lines.lock().unwrap(), vec!["0.1 mi Head north"]);
    }

    #[tokio::test]
    async fn test_resolver_failure_writes_nothing() {
        let sink = MockSink::new(0);
        let nav = NavigationLoop::new(FailResolver, sink.clone(), events(), 2);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Position::new(37.4219, -122.0847)).unwrap();
        drop(tx);

        assert_eq!(nav.run(rx, destination()).await, LoopExit::SessionEnded);
        assert!(sink.lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_write_failures_halt_loop() {
        let sink = MockSink::new(2);
        let resolver = OkResolver {
            distance: "0.1 mi",
            instruction: "Head north",
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let nav = NavigationLoop::new(resolver, sink.clone(), events(), 2);

        let (tx, rx) = mpsc::unbounded_channel();
        let feeder = async {
            for _ in 0..3 {
                // The loop may already have halted and dropped the receiver.
                let _ = tx.send(Position::new(37.4219, -122.0847));
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            drop(tx);
        };
        let (exit, ()) = tokio::join!(nav.run(rx, destination()), feeder);

        assert_eq!(exit, LoopExit::LinkLost);
        assert!(sink.lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_write_failure_is_not_fatal() {
        let sink = MockSink::new(1);
        let resolver = OkResolver {
            distance: "0.1 mi",
            instruction: "Head north",
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let nav = NavigationLoop::new(resolver, sink.clone(), events(), 2);

        let (tx, rx) = mpsc::unbounded_channel();
        let feeder = async {
            for _ in 0..2 {
                tx.send(Position::new(37.4219, -122.0847)).unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            drop(tx);
        };
        let (exit, ()) = tokio::join!(nav.run(rx, destination()), feeder);

        // First write fails, second succeeds and resets the counter.
        assert_eq!(exit, LoopExit::SessionEnded);
        assert_eq!(*sink.lines.lock().unwrap(), vec!["0.1 mi Head north"]);
    }

    #[tokio::test]
    async fn test_buffered_samples_coalesce_to_latest() {
        let sink = MockSink::new(0);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let resolver = OkResolver {
            distance: "0.1 mi",
            instruction: "Head north",
            calls: calls.clone(),
        };
        let nav = NavigationLoop::new(resolver, sink.clone(), events(), 2);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Position::new(37.0, -122.0)).unwrap();
        tx.send(Position::new(37.1, -122.0)).unwrap();
        tx.send(Position::new(37.2, -122.0)).unwrap();
        drop(tx);

        assert_eq!(nav.run(rx, destination()).await, LoopExit::SessionEnded);

        // Only the most recent buffered sample is resolved and written.
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!((calls[0].latitude - 37.2).abs() < 1e-9);
        assert_eq!(sink.lines.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_ticks_produce_identical_lines() {
        let sink = MockSink::new(0);
        let resolver = OkResolver {
            distance: "500 ft",
            instruction: "Turn left onto Main St",
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let nav = NavigationLoop::new(resolver, sink.clone(), events(), 2);

        let (tx, rx) = mpsc::unbounded_channel();
        let feeder = async {
            for _ in 0..2 {
                tx.send(Position::new(37.4219, -122.0847)).unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            drop(tx);
        };
        let (exit, ()) = tokio::join!(nav.run(rx, destination()), feeder);

        assert_eq!(exit, LoopExit::SessionEnded);
        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], lines[1]);
    }
}

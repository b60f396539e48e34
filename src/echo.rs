//! The echo loop and the control-frame handlers it installs.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;

use crate::message::Message;
use crate::tasks::EchoTasks;
use crate::transport::{
    CLOSE_NO_STATUS, Control, ControlHandler, FrameSink, FrameSource, ReadError, WRITE_DEADLINE,
    WriteError, close_payload, read_message,
};

#[derive(Debug, Default)]
struct Counters {
    received: Cell<u64>,
    echoed: Cell<u64>,
    failed: Cell<u64>,
}

impl Counters {
    fn bump(cell: &Cell<u64>) {
        cell.set(cell.get() + 1);
    }
}

/// What happened over the lifetime of one [`EchoClient::run`].
#[derive(Debug)]
pub struct EchoSummary {
    pub received: u64,
    pub echoed: u64,
    pub failed: u64,
    /// The read error that ended the loop.
    pub exit: ReadError,
}

/// Mirrors every data message back to the peer, optionally after a delay.
pub struct EchoClient<W> {
    sink: W,
    echo_delay: Duration,
    counters: Rc<Counters>,
}

impl<W: FrameSink> EchoClient<W> {
    pub fn new(sink: W, echo_delay: Duration) -> Self {
        Self {
            sink,
            echo_delay,
            counters: Rc::default(),
        }
    }

    /// Runs until the first read error, then waits for outstanding echoes.
    ///
    /// With a zero delay each echo is written before the next read. Otherwise
    /// every echo runs as its own task and the loop keeps reading.
    pub async fn run<S: FrameSource>(&self, source: &mut S) -> EchoSummary {
        let mut tasks = EchoTasks::new();

        let exit = loop {
            let message = match read_message(source, self).await {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(error = %err, "Error in reading message");
                    break err;
                }
            };

            Counters::bump(&self.counters.received);
            tracing::info!(kind = ?message.kind, len = message.len(), "Received {message}");

            if self.echo_delay.is_zero() {
                echo(&self.sink, &message, &self.counters).await;
            } else {
                let sink = self.sink.clone();
                let counters = self.counters.clone();
                let delay = self.echo_delay;
                tasks.spawn(async move {
                    monoio::time::sleep(delay).await;
                    echo(&sink, &message, &counters).await;
                });
            }
        };

        tasks.drain().await;

        EchoSummary {
            received: self.counters.received.get(),
            echoed: self.counters.echoed.get(),
            failed: self.counters.failed.get(),
            exit,
        }
    }
}

async fn echo<W: FrameSink>(sink: &W, message: &Message, counters: &Counters) {
    match sink.write_message(message).await {
        Ok(()) => {
            Counters::bump(&counters.echoed);
            tracing::info!(kind = ?message.kind, "Sent received message back to server");
        }
        Err(err) => {
            Counters::bump(&counters.failed);
            tracing::warn!(error = %err, kind = ?message.kind, "Unable to send message to server");
        }
    }
}

impl<W: FrameSink> ControlHandler for EchoClient<W> {
    async fn on_close(&self, code: u16, reason: &str) {
        tracing::info!(code, reason, "Received close message");
        let payload = if code != CLOSE_NO_STATUS {
            close_payload(code)
        } else {
            Bytes::new()
        };
        if let Err(err) = self
            .sink
            .write_control(Control::Close(payload), WRITE_DEADLINE)
            .await
        {
            tracing::warn!(error = %err, "Failed to acknowledge close");
        }
    }

    async fn on_ping(&self, payload: &[u8]) -> Result<(), WriteError> {
        tracing::info!(payload = %String::from_utf8_lossy(payload), "Received ping message");
        let pong = Control::Pong(Bytes::copy_from_slice(payload));
        match self.sink.write_control(pong, WRITE_DEADLINE).await {
            Ok(()) => {
                tracing::info!("Sent pong");
                Ok(())
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(error = %err, "Received temporary error while sending pong");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to send pong");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::transport::{CLOSE_NORMAL, Incoming};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::io::{self, ErrorKind};
    use std::time::Instant;

    fn block_on<F: Future>(fut: F) -> F::Output {
        monoio::RuntimeBuilder::<monoio::FusionDriver>::new()
            .enable_all()
            .build()
            .expect("failed to build monoio runtime")
            .block_on(fut)
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Read,
        Echo(Message),
        Control(Control),
    }

    type Log = Rc<RefCell<Vec<(Event, Instant)>>>;

    fn events(log: &Log) -> Vec<Event> {
        log.borrow().iter().map(|(e, _)| e.clone()).collect()
    }

    struct Script {
        frames: VecDeque<Incoming>,
        log: Log,
    }

    impl Script {
        fn new(frames: impl IntoIterator<Item = Incoming>, log: &Log) -> Self {
            Self {
                frames: frames.into_iter().collect(),
                log: log.clone(),
            }
        }
    }

    impl FrameSource for Script {
        async fn next_frame(&mut self) -> Result<Incoming, ReadError> {
            self.log.borrow_mut().push((Event::Read, Instant::now()));
            self.frames
                .pop_front()
                .ok_or_else(|| ReadError::Io(io::Error::from(ErrorKind::UnexpectedEof)))
        }
    }

    #[derive(Clone)]
    struct Recorder {
        log: Log,
        message_error: Option<ErrorKind>,
        control_error: Option<ErrorKind>,
    }

    impl Recorder {
        fn new(log: &Log) -> Self {
            Self {
                log: log.clone(),
                message_error: None,
                control_error: None,
            }
        }
    }

    impl FrameSink for Recorder {
        async fn write_message(&self, message: &Message) -> Result<(), WriteError> {
            if let Some(kind) = self.message_error {
                return Err(WriteError::Io(io::Error::from(kind)));
            }
            self.log
                .borrow_mut()
                .push((Event::Echo(message.clone()), Instant::now()));
            Ok(())
        }

        async fn write_control(
            &self,
            control: Control,
            _deadline: Duration,
        ) -> Result<(), WriteError> {
            if let Some(kind) = self.control_error {
                return Err(WriteError::Io(io::Error::from(kind)));
            }
            self.log
                .borrow_mut()
                .push((Event::Control(control), Instant::now()));
            Ok(())
        }
    }

    #[test]
    fn zero_delay_echoes_before_next_read() {
        block_on(async {
            let log = Log::default();
            let text = Message::text("ping-test");
            let binary = Message::binary(vec![0xDE, 0xAD, 0xBE, 0xEF]);
            let mut source = Script::new(
                [
                    Incoming::Message(text.clone()),
                    Incoming::Message(binary.clone()),
                ],
                &log,
            );

            let client = EchoClient::new(Recorder::new(&log), Duration::ZERO);
            let summary = client.run(&mut source).await;

            assert_eq!(
                events(&log),
                vec![
                    Event::Read,
                    Event::Echo(text),
                    Event::Read,
                    Event::Echo(binary),
                    Event::Read,
                ]
            );
            assert_eq!(summary.received, 2);
            assert_eq!(summary.echoed, 2);
            assert_eq!(summary.failed, 0);
            assert!(matches!(summary.exit, ReadError::Io(_)));
        });
    }

    #[test]
    fn delayed_echoes_do_not_block_reads() {
        block_on(async {
            let log = Log::default();
            let delay = Duration::from_millis(50);
            let first = Message::text("one");
            let second = Message::new(MessageKind::Binary, vec![1, 2, 3]);
            let mut source = Script::new(
                [
                    Incoming::Message(first.clone()),
                    Incoming::Message(second.clone()),
                ],
                &log,
            );

            let client = EchoClient::new(Recorder::new(&log), delay);
            let start = Instant::now();
            let summary = client.run(&mut source).await;

            let recorded = log.borrow();
            let kinds: Vec<_> = recorded.iter().map(|(e, _)| e.clone()).collect();
            assert_eq!(&kinds[..3], &[Event::Read, Event::Read, Event::Read]);
            assert!(kinds[3..].contains(&Event::Echo(first)));
            assert!(kinds[3..].contains(&Event::Echo(second)));
            for (_, at) in &recorded[3..] {
                assert!(at.duration_since(start) >= delay);
            }
            assert_eq!(summary.echoed, 2);
        });
    }

    #[test]
    fn ping_is_answered_with_same_payload() {
        block_on(async {
            let log = Log::default();
            let mut source = Script::new(
                [
                    Incoming::Ping(Bytes::from_static(b"hello")),
                    Incoming::Pong(Bytes::from_static(b"ignored")),
                    Incoming::Message(Message::text("after")),
                ],
                &log,
            );

            let client = EchoClient::new(Recorder::new(&log), Duration::ZERO);
            let summary = client.run(&mut source).await;

            assert_eq!(
                events(&log),
                vec![
                    Event::Read,
                    Event::Control(Control::Pong(Bytes::from_static(b"hello"))),
                    Event::Read,
                    Event::Read,
                    Event::Echo(Message::text("after")),
                    Event::Read,
                ]
            );
            assert_eq!(summary.received, 1);
        });
    }

    #[test]
    fn fatal_pong_failure_aborts_the_loop() {
        block_on(async {
            let log = Log::default();
            let mut source = Script::new(
                [
                    Incoming::Ping(Bytes::from_static(b"hello")),
                    Incoming::Message(Message::text("never read")),
                ],
                &log,
            );
            let mut sink = Recorder::new(&log);
            sink.control_error = Some(ErrorKind::BrokenPipe);

            let summary = EchoClient::new(sink, Duration::ZERO)
                .run(&mut source)
                .await;

            assert!(matches!(summary.exit, ReadError::Ping(_)));
            assert_eq!(summary.received, 0);
            assert_eq!(source.frames.len(), 1);
        });
    }

    #[test]
    fn transient_pong_failure_is_swallowed() {
        block_on(async {
            let log = Log::default();
            let mut source = Script::new(
                [
                    Incoming::Ping(Bytes::from_static(b"hello")),
                    Incoming::Message(Message::text("still here")),
                ],
                &log,
            );
            let mut sink = Recorder::new(&log);
            sink.control_error = Some(ErrorKind::TimedOut);

            let summary = EchoClient::new(sink, Duration::ZERO)
                .run(&mut source)
                .await;

            assert_eq!(summary.received, 1);
            assert_eq!(summary.echoed, 1);
            assert!(matches!(summary.exit, ReadError::Io(_)));
        });
    }

    #[test]
    fn peer_close_is_acknowledged_and_ends_the_loop() {
        block_on(async {
            let log = Log::default();
            let mut source = Script::new(
                [
                    Incoming::Close {
                        code: CLOSE_NORMAL,
                        reason: "bye".into(),
                    },
                    Incoming::Message(Message::text("never read")),
                ],
                &log,
            );

            let summary = EchoClient::new(Recorder::new(&log), Duration::ZERO)
                .run(&mut source)
                .await;

            assert_eq!(
                events(&log),
                vec![
                    Event::Read,
                    Event::Control(Control::Close(Bytes::from_static(&[0x03, 0xE8]))),
                ]
            );
            assert!(matches!(
                summary.exit,
                ReadError::Closed { code: CLOSE_NORMAL, ref reason } if reason == "bye"
            ));
            assert_eq!(source.frames.len(), 1);
        });
    }

    #[test]
    fn close_without_status_gets_empty_reply() {
        block_on(async {
            let log = Log::default();
            let mut source = Script::new(
                [Incoming::Close {
                    code: CLOSE_NO_STATUS,
                    reason: String::new(),
                }],
                &log,
            );

            EchoClient::new(Recorder::new(&log), Duration::ZERO)
                .run(&mut source)
                .await;

            assert_eq!(
                events(&log),
                vec![Event::Read, Event::Control(Control::Close(Bytes::new()))]
            );
        });
    }

    #[test]
    fn failed_echo_does_not_end_the_loop() {
        block_on(async {
            let log = Log::default();
            let mut source = Script::new(
                [
                    Incoming::Message(Message::text("a")),
                    Incoming::Message(Message::text("b")),
                ],
                &log,
            );
            let mut sink = Recorder::new(&log);
            sink.message_error = Some(ErrorKind::ConnectionReset);

            let summary = EchoClient::new(sink, Duration::ZERO)
                .run(&mut source)
                .await;

            assert_eq!(summary.received, 2);
            assert_eq!(summary.echoed, 0);
            assert_eq!(summary.failed, 2);
            assert!(source.frames.is_empty());
        });
    }
}

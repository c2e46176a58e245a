//! # Poll Loop
//!
//! Drives acquisition: poll → persist → broadcast, once per interval.
//!
//! Every failure inside a cycle is routed through [`PollLoop::recover`],
//! which logs it and decides by [`ErrorKind`] whether the next cycle waits
//! for the backoff interval:
//!
//! | Kind | Action |
//! |------|--------|
//! | Comm, Io, Config | back off, then poll again |
//! | Serialization | drop the record, continue |
//! | Network | monitor dropped, continue |
//! | File | rows kept in memory, continue |
//!
//! Nothing short of the shutdown future ends the loop. Shutdown is only
//! observed between cycles, so a reading is never half persisted.

use std::future::Future;

use chrono::Local;
use tokio::time::{interval, sleep, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broadcast::{BroadcastChannel, Delivery};
use crate::datalog::{RotatingLogWriter, RotationAction};
use crate::error::{ErrorKind, LoggerError};
use crate::instrument::Instrument;
use crate::reading::Reading;
use crate::wire::encoder::encode_frame;

/// Default pause after a failed poll (5 seconds)
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Timing of the poll loop
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Time between the starts of consecutive cycles
    pub poll_interval: Duration,
    /// Bound on a single instrument poll
    pub poll_timeout: Duration,
    /// Pause after a failed poll
    pub backoff: Duration,
    /// Readings between status log lines
    pub status_interval: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(30),
            backoff: DEFAULT_BACKOFF,
            status_interval: 3600,
        }
    }
}

/// What the loop does after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Wait for the backoff interval before the next cycle
    Backoff,
    /// Proceed normally
    Continue,
}

/// Counters reported on shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub readings: u64,
    pub comm_failures: u64,
    pub frames_sent: u64,
    pub rotations: u64,
}

/// Acquisition pipeline owning the instrument, writer and channel
#[derive(Debug)]
pub struct PollLoop<I> {
    instrument: I,
    writer: RotatingLogWriter,
    channel: BroadcastChannel,
    settings: LoopSettings,
    stats: LoopStats,
}

impl<I: Instrument> PollLoop<I> {
    pub fn new(
        instrument: I,
        writer: RotatingLogWriter,
        channel: BroadcastChannel,
        mut settings: LoopSettings,
    ) -> Self {
        settings.status_interval = settings.status_interval.max(1);
        Self {
            instrument,
            writer,
            channel,
            settings,
            stats: LoopStats::default(),
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn writer(&self) -> &RotatingLogWriter {
        &self.writer
    }

    pub fn channel(&self) -> &BroadcastChannel {
        &self.channel
    }

    /// Run until `shutdown` resolves, then flush and close everything
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Cancellation signal, e.g. `tokio::signal::ctrl_c()`
    ///
    /// # Returns
    ///
    /// * `LoopStats` - Counters accumulated over the run
    pub async fn run<F>(mut self, shutdown: F) -> LoopStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            "Polling {} every {:?}",
            self.instrument.name(),
            self.settings.poll_interval
        );

        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            if self.cycle().await == Recovery::Backoff {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = sleep(self.settings.backoff) => {}
                }
                ticker.reset();
            }
        }

        info!("Shutting down, flushing data...");
        self.shutdown().await;
        self.stats
    }

    /// One poll → persist → broadcast cycle
    ///
    /// # Returns
    ///
    /// * `Recovery` - Whether the next cycle should wait for the backoff
    pub async fn cycle(&mut self) -> Recovery {
        self.stats.cycles += 1;

        let polled = match timeout(self.settings.poll_timeout, self.instrument.poll()).await {
            Ok(result) => result,
            Err(_) => Err(LoggerError::Comm(format!(
                "no reading within {:?}",
                self.settings.poll_timeout
            ))),
        };

        match polled {
            Ok(reading) => self.dispatch(&reading).await,
            Err(e) => {
                // Still let a day change close the previous file
                self.rotate(Local::now());
                self.recover("poll", &e)
            }
        }
    }

    /// Persist, then broadcast, one reading
    async fn dispatch(&mut self, reading: &Reading) -> Recovery {
        self.stats.readings += 1;

        self.rotate(reading.captured_at());

        if let Err(e) = self.writer.append(reading) {
            self.recover("append", &e);
        }

        match encode_frame(reading) {
            Ok(frame) => match self.channel.send(&frame).await {
                Ok(Delivery::Sent) => self.stats.frames_sent += 1,
                Ok(Delivery::NoPeer | Delivery::Disabled) => {}
                Err(e) => {
                    self.recover("broadcast", &e);
                }
            },
            Err(e) => {
                self.recover("encode", &e);
            }
        }

        if self.stats.readings % self.settings.status_interval == 0 {
            info!(
                "{} readings logged ({} rows written, {} pending, {} frames sent, \
                 {} comm failures)",
                self.stats.readings,
                self.writer.rows_written(),
                self.writer.pending_rows(),
                self.stats.frames_sent,
                self.stats.comm_failures
            );
        }

        Recovery::Continue
    }

    fn rotate(&mut self, now: chrono::DateTime<Local>) {
        match self.writer.maybe_rotate(now) {
            Ok(RotationAction::Rotated) => self.stats.rotations += 1,
            Ok(RotationAction::Flushed | RotationAction::None) => {}
            Err(e) => {
                self.recover("flush", &e);
            }
        }
    }

    /// Log a failure and map it to the action for the next cycle
    pub fn recover(&mut self, stage: &str, err: &LoggerError) -> Recovery {
        let recovery = recovery_for(err.kind());

        match err.kind() {
            ErrorKind::Comm => {
                self.stats.comm_failures += 1;
                warn!(
                    "Cannot read instrument ({}), waiting {:?}: {}",
                    stage, self.settings.backoff, err
                );
            }
            ErrorKind::Serialization => warn!("Dropping record ({}): {}", stage, err),
            ErrorKind::Network => info!("Broadcast interrupted ({}): {}", stage, err),
            ErrorKind::File => warn!("Data not yet on disk ({}): {}", stage, err),
            ErrorKind::Config | ErrorKind::Io => error!(
                "Unexpected failure ({}), waiting {:?}: {}",
                stage, self.settings.backoff, err
            ),
        }

        recovery
    }

    /// Flush buffered rows, then close the data file and the channel
    async fn shutdown(&mut self) {
        match self.writer.close() {
            Ok(()) => debug!("{} rows written in total", self.writer.rows_written()),
            Err(e) => error!(
                "{} rows could not be written before exit: {}",
                self.writer.pending_rows(),
                e
            ),
        }
        self.channel.close().await;
        info!(
            "Stopped after {} cycles: {} readings, {} comm failures, {} frames sent",
            self.stats.cycles, self.stats.readings, self.stats.comm_failures, self.stats.frames_sent
        );
    }
}

/// Recovery action for an error kind
pub fn recovery_for(kind: ErrorKind) -> Recovery {
    match kind {
        ErrorKind::Serialization | ErrorKind::Network | ErrorKind::File => Recovery::Continue,
        ErrorKind::Comm | ErrorKind::Config | ErrorKind::Io => Recovery::Backoff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{ConnectionState, DEFAULT_SEND_TIMEOUT};
    use crate::datalog::WriterSettings;
    use crate::instrument::MockInstrument;
    use crate::reading::Measurement;
    use crate::wire::decoder::FrameDecoder;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    fn temperature(value: f64) -> Reading {
        Reading::now(vec![Measurement::new("T", value, "degC")])
    }

    fn writer(dir: &Path, buffer_size: usize) -> RotatingLogWriter {
        RotatingLogWriter::new(WriterSettings {
            dir: dir.to_path_buf(),
            base_name: "test".to_string(),
            extension: ".txt".to_string(),
            buffer_size,
        })
    }

    fn settings() -> LoopSettings {
        LoopSettings {
            poll_interval: Duration::from_millis(5),
            poll_timeout: Duration::from_secs(1),
            backoff: Duration::from_millis(20),
            status_interval: 1000,
        }
    }

    fn mock_with(readings: Vec<std::result::Result<f64, &'static str>>) -> MockInstrument {
        let mut mock = MockInstrument::new();
        mock.expect_name().return_const("mock".to_string());
        let mut queue = readings.into_iter();
        mock.expect_poll().returning(move || match queue.next() {
            Some(Ok(v)) => Ok(temperature(v)),
            Some(Err(msg)) => Err(LoggerError::Comm(msg.to_string())),
            None => Err(LoggerError::Comm("exhausted".to_string())),
        });
        mock
    }

    fn only_file(dir: &Path) -> PathBuf {
        let files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1, "expected exactly one data file");
        files[0].clone()
    }

    fn values_in(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(3)
            .map(|line| line.split('\t').nth(1).unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_recovery_mapping() {
        assert_eq!(recovery_for(ErrorKind::Comm), Recovery::Backoff);
        assert_eq!(recovery_for(ErrorKind::Io), Recovery::Backoff);
        assert_eq!(recovery_for(ErrorKind::Network), Recovery::Continue);
        assert_eq!(recovery_for(ErrorKind::File), Recovery::Continue);
        assert_eq!(recovery_for(ErrorKind::Serialization), Recovery::Continue);
    }

    #[tokio::test]
    async fn test_zero_status_interval_logs_every_reading() {
        let dir = TempDir::new().unwrap();
        let mut s = settings();
        s.status_interval = 0;

        let mut pipeline = PollLoop::new(
            mock_with(vec![Ok(1.0), Ok(2.0)]),
            writer(dir.path(), 1),
            BroadcastChannel::disabled(),
            s,
        );

        assert_eq!(pipeline.cycle().await, Recovery::Continue);
        assert_eq!(pipeline.cycle().await, Recovery::Continue);
        assert_eq!(pipeline.stats().readings, 2);
    }

    #[tokio::test]
    async fn test_comm_failure_backs_off_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = PollLoop::new(
            mock_with(vec![Err("timeout")]),
            writer(dir.path(), 1),
            BroadcastChannel::disabled(),
            settings(),
        );

        assert_eq!(pipeline.cycle().await, Recovery::Backoff);
        assert_eq!(pipeline.stats().comm_failures, 1);
        assert_eq!(pipeline.writer().pending_rows(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_no_peer_n_polls_give_n_ordered_rows() {
        let dir = TempDir::new().unwrap();
        let values: Vec<f64> = (0..20).map(|i| i as f64 + 0.5).collect();
        let mut channel = BroadcastChannel::new(
            "127.0.0.1:0",
            Duration::from_millis(1),
            DEFAULT_SEND_TIMEOUT,
        );
        channel.bind().await.unwrap();

        let mut pipeline = PollLoop::new(
            mock_with(values.iter().copied().map(Ok).collect()),
            writer(dir.path(), 3),
            channel,
            settings(),
        );

        for _ in 0..values.len() {
            assert_eq!(pipeline.cycle().await, Recovery::Continue);
        }
        pipeline.shutdown().await;

        let expected: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        assert_eq!(values_in(&only_file(dir.path())), expected);
        assert_eq!(pipeline.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_failures_interleaved_with_readings_keep_order() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = PollLoop::new(
            mock_with(vec![Ok(1.0), Err("crc"), Ok(2.0), Err("timeout"), Err("timeout"), Ok(3.0)]),
            writer(dir.path(), 100),
            BroadcastChannel::disabled(),
            settings(),
        );

        let outcomes = [
            pipeline.cycle().await,
            pipeline.cycle().await,
            pipeline.cycle().await,
            pipeline.cycle().await,
            pipeline.cycle().await,
            pipeline.cycle().await,
        ];
        pipeline.shutdown().await;

        assert_eq!(
            outcomes,
            [
                Recovery::Continue,
                Recovery::Backoff,
                Recovery::Continue,
                Recovery::Backoff,
                Recovery::Backoff,
                Recovery::Continue
            ]
        );
        assert_eq!(values_in(&only_file(dir.path())), vec!["1", "2", "3"]);
        assert_eq!(pipeline.stats().comm_failures, 3);
    }

    #[tokio::test]
    async fn test_late_peer_receives_only_new_frames() {
        let dir = TempDir::new().unwrap();
        let mut channel = BroadcastChannel::new(
            "127.0.0.1:0",
            Duration::from_millis(50),
            DEFAULT_SEND_TIMEOUT,
        );
        channel.bind().await.unwrap();
        let addr = channel.local_addr().unwrap();

        let mut pipeline = PollLoop::new(
            mock_with(vec![Ok(21.3); 4]),
            writer(dir.path(), 100),
            channel,
            settings(),
        );

        for _ in 0..3 {
            assert_eq!(pipeline.cycle().await, Recovery::Continue);
        }
        assert_eq!(pipeline.channel().state(), ConnectionState::Listening);

        let mut peer = TcpStream::connect(addr).await.unwrap();
        assert_eq!(pipeline.cycle().await, Recovery::Continue);
        assert_eq!(pipeline.stats().frames_sent, 1);

        pipeline.shutdown().await;

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let readings = decoder.feed(&received, Local::now());
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].measurements(), &[Measurement::new("T", 21.3, "degC")]);

        let rows = fs::read_to_string(only_file(dir.path())).unwrap();
        let data: Vec<&str> = rows.lines().skip(3).collect();
        assert_eq!(data.len(), 4);
        for row in data {
            let cols: Vec<&str> = row.split('\t').collect();
            assert_eq!(cols.len(), 2);
            assert_eq!(cols[0].len(), 8, "time column is HH:MM:SS");
            assert_eq!(cols[1], "21.3");
        }
    }

    #[tokio::test]
    async fn test_peer_disconnect_does_not_affect_persistence() {
        let dir = TempDir::new().unwrap();
        let mut channel = BroadcastChannel::new(
            "127.0.0.1:0",
            Duration::from_millis(50),
            DEFAULT_SEND_TIMEOUT,
        );
        channel.bind().await.unwrap();
        let addr = channel.local_addr().unwrap();

        let mut pipeline = PollLoop::new(
            mock_with(vec![Ok(1.0), Ok(2.0), Ok(3.0)]),
            writer(dir.path(), 100),
            channel,
            settings(),
        );

        let peer = TcpStream::connect(addr).await.unwrap();
        pipeline.cycle().await;
        drop(peer);
        sleep(Duration::from_millis(100)).await;

        assert_eq!(pipeline.cycle().await, Recovery::Continue);
        assert_eq!(pipeline.channel().state(), ConnectionState::Disconnected);
        assert_eq!(pipeline.cycle().await, Recovery::Continue);
        pipeline.shutdown().await;

        assert_eq!(values_in(&only_file(dir.path())), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_unencodable_reading_is_still_persisted() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockInstrument::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_poll()
            .returning(|| Ok(Reading::now(vec![Measurement::new("VOC", f64::NAN, "ppm")])));

        let mut pipeline = PollLoop::new(
            mock,
            writer(dir.path(), 100),
            BroadcastChannel::disabled(),
            settings(),
        );

        assert_eq!(pipeline.cycle().await, Recovery::Continue);
        pipeline.shutdown().await;

        assert_eq!(values_in(&only_file(dir.path())), vec!["NaN"]);
    }

    #[tokio::test]
    async fn test_run_flushes_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let pipeline = PollLoop::new(
            mock_with((0..1000).map(|i| Ok(i as f64)).collect()),
            writer(dir.path(), 10_000),
            BroadcastChannel::disabled(),
            settings(),
        );

        let stats = pipeline.run(sleep(Duration::from_millis(100))).await;

        assert!(stats.readings > 0);
        let values = values_in(&only_file(dir.path()));
        assert_eq!(values.len() as u64, stats.readings);
        let expected: Vec<String> = (0..stats.readings).map(|i| i.to_string()).collect();
        assert_eq!(values, expected);
    }

    #[tokio::test]
    async fn test_run_stops_during_backoff() {
        let dir = TempDir::new().unwrap();
        let mut s = settings();
        s.backoff = Duration::from_secs(3600);

        let pipeline = PollLoop::new(
            mock_with(vec![]),
            writer(dir.path(), 1),
            BroadcastChannel::disabled(),
            s,
        );

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run(sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap();

        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.comm_failures, 1);
    }
}

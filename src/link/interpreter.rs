use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::coder::{DecodeOutcome, Decoder};
use crate::core::{Config, Error, Result};
use crate::store::UnitStore;
use super::command::{dispatch, route, CommandCode, CommandContext, CommandHandler, Routed};
use super::frames::{ingest, IngestReport};
use super::receive::collect;
use super::transport::Transport;

/// Coordination flags shared by the supervisor and its workers
#[derive(Debug)]
pub struct Signals {
    experiment_running: watch::Sender<bool>,
    run: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

impl Default for Signals {
    fn default() -> Self {
        Signals {
            experiment_running: watch::channel(false).0,
            run: watch::channel(true).0,
            shutdown: watch::channel(false).0,
        }
    }
}

impl Signals {
    /// Creates signals with `run` set and the others clear
    pub fn new() -> Arc<Self> {
        Arc::new(Signals::default())
    }

    /// Marks an experiment as running or stopped
    pub fn set_experiment_running(&self, running: bool) {
        self.experiment_running.send_replace(running);
    }

    /// Whether an experiment is running
    pub fn experiment_running(&self) -> bool {
        *self.experiment_running.borrow()
    }

    /// Lets workers proceed or holds them idle
    pub fn set_run(&self, run: bool) {
        self.run.send_replace(run);
    }

    /// Whether workers may proceed
    pub fn is_running(&self) -> bool {
        *self.run.borrow()
    }

    /// Asks every worker to stop
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Watches the shutdown flag
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Watches the run flag
    pub fn subscribe_run(&self) -> watch::Receiver<bool> {
        self.run.subscribe()
    }
}

/// What one receive cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// A command was dispatched
    Command(CommandCode),
    /// Frames were stored and a bulk decode attempted
    Packets {
        /// Ingest tally
        report: IngestReport,
        /// Decode result
        outcome: DecodeOutcome,
    },
}

/// Receive worker: collects transmissions, runs commands, rebuilds files
pub struct Interpreter<T, S> {
    transport: Option<T>,
    store: S,
    output: PathBuf,
    config: Config,
    handler: Option<Box<dyn CommandHandler>>,
    signals: Arc<Signals>,
}

impl<T: Transport, S: UnitStore> Interpreter<T, S> {
    /// Creates an interpreter with no transport or command handler yet
    pub fn new(store: S, config: Config, signals: Arc<Signals>) -> Self {
        Interpreter {
            transport: None,
            store,
            output: config.output_dir.clone(),
            config,
            handler: None,
            signals,
        }
    }

    /// Attaches the link
    pub fn with_transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attaches the command handler
    pub fn with_handler(mut self, handler: Box<dyn CommandHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Unit store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Link, if attached
    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Runs one receive cycle
    pub async fn cycle(&mut self) -> Result<Cycle> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::connection("Connection to the WTC not established"))?;

        let mut shutdown = self.signals.subscribe_shutdown();
        debug!(experiment = self.signals.experiment_running(), "waiting for data");
        let buffer = collect(
            transport,
            &mut shutdown,
            self.config.poll_interval,
            self.config.fault_tolerance,
        )
        .await?;

        match route(&buffer) {
            Routed::Command(command) => {
                let ctx = CommandContext { transport, store: &mut self.store };
                dispatch(self.handler.as_deref_mut(), &command, ctx)?;
                Ok(Cycle::Command(command.code))
            }
            Routed::Packets => {
                let report = ingest(&buffer, &mut self.store)?;
                let outcome = Decoder::new(&self.output, &mut self.store)
                    .destructive(self.config.destructive)
                    .max_file_size(self.config.max_file_size)
                    .run()?;
                Ok(Cycle::Packets { report, outcome })
            }
        }
    }

    /// Runs cycles until shutdown. Connection faults end the worker, other
    /// cycle failures are logged and the next transmission awaited.
    pub async fn run(&mut self) -> Result<()> {
        let mut shutdown = self.signals.subscribe_shutdown();
        let mut run = self.signals.subscribe_run();
        info!("interpreter started");

        loop {
            if self.signals.is_shutdown() {
                break;
            }

            if !self.signals.is_running() {
                tokio::select! {
                    changed = run.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            match self.cycle().await {
                Ok(Cycle::Command(code)) => debug!(command = %code, "command cycle complete"),
                Ok(Cycle::Packets { outcome, .. }) => debug!(outcome = ?outcome, "packet cycle complete"),
                Err(e @ Error::Connection(_)) => {
                    error!(error = %e, "interpreter stopping");
                    return Err(e);
                }
                Err(e) if self.signals.is_shutdown() => {
                    debug!(error = %e, "cycle interrupted by shutdown");
                }
                Err(e) => {
                    warn!(error = %e, "receive cycle failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!("interpreter stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::Encoder;
    use crate::link::command::PacketCommands;
    use crate::link::transport::MemoryTransport;
    use crate::store::{MemoryStore, UnitId};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(output: &TempDir) -> Config {
        Config {
            output_dir: output.path().to_path_buf(),
            poll_interval: Duration::from_millis(1),
            ..Config::default()
        }
    }

    fn transmission(name: &str, data: &[u8]) -> Vec<u8> {
        let mut encoder = Encoder::new(name, MemoryStore::new());
        encoder.encode_stream(name, data).unwrap();
        let store = encoder.into_store();
        store
            .units()
            .unwrap()
            .into_iter()
            .flat_map(|unit| store.get(unit).unwrap().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_cycle_without_transport() {
        let dir = TempDir::new().unwrap();
        let mut interpreter: Interpreter<MemoryTransport, _> =
            Interpreter::new(MemoryStore::new(), config(&dir), Signals::new());
        assert!(matches!(interpreter.cycle().await, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_packet_cycle_decodes_file() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..300u32).map(|i| (i % 97) as u8).collect();
        let bytes = transmission("downlink.bin", &data);

        let mut link = MemoryTransport::new();
        for chunk in bytes.chunks(100) {
            link.push_data(chunk.to_vec());
        }

        let mut interpreter =
            Interpreter::new(MemoryStore::new(), config(&dir), Signals::new()).with_transport(link);
        match interpreter.cycle().await.unwrap() {
            Cycle::Packets { report, outcome } => {
                assert_eq!(report.stored, 5);
                assert!(outcome.is_complete());
            }
            other => panic!("unexpected cycle {:?}", other),
        }
        assert_eq!(fs::read(dir.path().join("downlink.bin")).unwrap(), data);
        assert!(interpreter.store().contains(UnitId::Init).unwrap());
    }

    #[tokio::test]
    async fn test_command_cycle() {
        let dir = TempDir::new().unwrap();
        let mut link = MemoryTransport::new();
        link.push_data(b"hi".to_vec());

        let mut interpreter = Interpreter::new(MemoryStore::new(), config(&dir), Signals::new())
            .with_transport(link)
            .with_handler(Box::new(PacketCommands));
        assert_eq!(interpreter.cycle().await.unwrap(), Cycle::Command(CommandCode::Ping));
        assert_eq!(interpreter.transport().unwrap().written(), b"HI");
    }

    #[tokio::test]
    async fn test_command_without_handler() {
        let dir = TempDir::new().unwrap();
        let mut link = MemoryTransport::new();
        link.push_data(b"ST".to_vec());

        let mut interpreter =
            Interpreter::new(MemoryStore::new(), config(&dir), Signals::new()).with_transport(link);
        assert!(matches!(interpreter.cycle().await, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let signals = Signals::new();
        let mut interpreter: Interpreter<MemoryTransport, _> =
            Interpreter::new(MemoryStore::new(), config(&dir), signals.clone())
                .with_transport(MemoryTransport::new());

        let stopper = {
            let signals = signals.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                signals.request_shutdown();
            })
        };

        tokio::time::timeout(Duration::from_secs(5), interpreter.run())
            .await
            .expect("interpreter did not stop")
            .unwrap();
        stopper.await.unwrap();
    }

    #[test]
    fn test_signals() {
        let signals = Signals::new();
        assert!(signals.is_running());
        assert!(!signals.is_shutdown());
        assert!(!signals.experiment_running());

        let mut shutdown = signals.subscribe_shutdown();
        signals.set_experiment_running(true);
        signals.set_run(false);
        signals.request_shutdown();

        assert!(signals.experiment_running());
        assert!(!signals.is_running());
        assert!(*shutdown.borrow_and_update());
    }
}

//! Continuous attestation session.
//!
//! A session owns the hash-linked checkpoint chain for one typing session.
//! Checkpoints are cut every `checkpoint_interval` keystrokes (or on
//! demand); each one consumes a fresh monotonic-counter value, carries the
//! most recent TPM quote (refreshed at most every
//! `quote_refresh_interval`), optionally snapshots the platform PCRs, and
//! optionally binds a PUF response derived from the checkpoint's own
//! identity.
//!
//! # Locking
//!
//! All mutable state sits behind one mutex. TPM calls are issued while the
//! lock is held - the only sanctioned lock-held-across-syscall exception;
//! size `checkpoint_interval` accordingly. Callbacks never run under the
//! lock: checkpoint and error events are queued to a dispatcher task, and a
//! panicking callback is contained there.
//!
//! # Background task
//!
//! `start` spawns a single refresh task ticking at `quote_refresh_interval`
//! that keeps the quote fresh even while the user is idle. `stop` signals
//! it through a one-shot channel and is idempotent.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use witnessd_puf::Puf;
use witnessd_tpm::{Tpm, TpmQuote};

use crate::checkpoint::{timing_hash, Checkpoint, Hash32, ZERO_HASH};
use crate::error::{AttestError, Result};

/// PCRs quoted and snapshotted by default: firmware, option ROMs, boot
/// loader and secure-boot state.
pub const DEFAULT_PCRS: [u8; 6] = [0, 1, 2, 3, 4, 7];

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cut a checkpoint every N keystrokes.
    pub checkpoint_interval: u64,
    /// Maximum quote age before a checkpoint forces a refresh.
    pub quote_refresh_interval: Duration,
    /// Snapshot PCR values into each checkpoint.
    pub include_platform_state: bool,
    /// FIFO bound on the in-memory chain.
    pub max_chain_length: usize,
    /// Monotonic counter index used by this session.
    pub counter_index: u8,
    /// PCR selection for quotes and snapshots.
    pub pcrs: Vec<u8>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            quote_refresh_interval: Duration::from_secs(30),
            include_platform_state: true,
            max_chain_length: 10_000,
            counter_index: 0,
            pcrs: DEFAULT_PCRS.to_vec(),
        }
    }
}

/// Self-describing export of a finished (or running) session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: Hash32,
    /// Session start, nanoseconds since the Unix epoch
    pub session_start_nanos: i64,
    pub keystroke_count: u64,
    /// The chain in sequence order
    pub chain: Vec<Checkpoint>,
    /// Counter value of the newest checkpoint
    pub final_counter: u64,
    /// Most recent quote at export time
    pub final_quote: Option<TpmQuote>,
}

/// Callback invoked with each finished checkpoint.
pub type CheckpointCallback = Arc<dyn Fn(&Checkpoint) + Send + Sync>;
/// Callback invoked with background errors.
pub type ErrorCallback = Arc<dyn Fn(&AttestError) + Send + Sync>;

enum SessionEvent {
    Checkpoint(Checkpoint),
    Error(AttestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

struct SessionState {
    phase: Phase,
    session_id: Hash32,
    session_start_nanos: i64,
    keystroke_count: u64,
    checkpoint_count: u64,
    current_counter: u64,
    last_quote: Option<TpmQuote>,
    last_quote_at: Option<Instant>,
    last_checkpoint_hash: Hash32,
    chain: Vec<Checkpoint>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

/// Continuous attestation session. Share behind an `Arc`.
pub struct AttestationSession {
    tpm: Arc<dyn Tpm>,
    puf: Option<Arc<dyn Puf>>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    on_checkpoint: Mutex<Option<CheckpointCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl AttestationSession {
    pub fn new(tpm: Arc<dyn Tpm>, puf: Option<Arc<dyn Puf>>, config: SessionConfig) -> Self {
        Self {
            tpm,
            puf,
            config,
            state: Mutex::new(SessionState {
                phase: Phase::Created,
                session_id: ZERO_HASH,
                session_start_nanos: 0,
                keystroke_count: 0,
                checkpoint_count: 0,
                current_counter: 0,
                last_quote: None,
                last_quote_at: None,
                last_checkpoint_hash: ZERO_HASH,
                chain: Vec::new(),
                events: None,
            }),
            on_checkpoint: Mutex::new(None),
            on_error: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    /// Register the per-checkpoint callback. Must be set before `start`.
    pub fn set_checkpoint_callback(&self, callback: CheckpointCallback) {
        *self.on_checkpoint.lock().unwrap() = Some(callback);
    }

    /// Register the error callback for background failures.
    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.on_error.lock().unwrap() = Some(callback);
    }

    /// Start the session: mint a session id, establish the counter and the
    /// initial quote, emit checkpoint 0, and spawn the background tasks.
    ///
    /// Requires a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Created {
            return Err(AttestError::InvalidState(format!(
                "start called in phase {:?}",
                state.phase
            )));
        }
        if !self.tpm.available() {
            return Err(AttestError::Tpm(witnessd_tpm::TpmError::Unavailable(
                "session requires a TPM provider".to_string(),
            )));
        }

        OsRng.fill_bytes(&mut state.session_id);
        state.session_start_nanos = witnessd_core::now_nanos();
        state.current_counter = self.tpm.increment_counter(self.config.counter_index)?;

        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        let quote = self.tpm.quote(&nonce, &self.config.pcrs)?;
        state.last_quote = Some(quote);
        state.last_quote_at = Some(Instant::now());
        state.phase = Phase::Running;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        state.events = Some(event_tx);

        // Checkpoint 0 takes the same path as user-driven checkpoints.
        self.create_checkpoint_locked(&mut state, ZERO_HASH, &[])?;
        drop(state);

        self.spawn_dispatcher(event_rx);
        self.spawn_refresh_task();

        tracing::info!(
            session = %hex::encode(&self.session_id()[..8]),
            "attestation session started"
        );
        Ok(())
    }

    /// Record one keystroke; cuts a checkpoint at every
    /// `checkpoint_interval`-th keystroke.
    pub fn record_keystroke(
        &self,
        content_hash: Hash32,
        timing: &[u8],
    ) -> Result<Option<Checkpoint>> {
        let mut state = self.state.lock().unwrap();
        self.require_running(&state)?;

        state.keystroke_count += 1;
        if state.keystroke_count % self.config.checkpoint_interval == 0 {
            let checkpoint = self.create_checkpoint_locked(&mut state, content_hash, timing)?;
            return Ok(Some(checkpoint));
        }
        Ok(None)
    }

    /// Cut a checkpoint unconditionally.
    pub fn force_checkpoint(&self, content_hash: Hash32, timing: &[u8]) -> Result<Checkpoint> {
        let mut state = self.state.lock().unwrap();
        self.require_running(&state)?;
        self.create_checkpoint_locked(&mut state, content_hash, timing)
    }

    /// Stop the session. Idempotent; the refresh task exits within a tick.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if state.phase == Phase::Stopped {
            return;
        }
        state.phase = Phase::Stopped;
        state.events = None; // closes the dispatcher
        drop(state);

        if let Some(shutdown) = self.shutdown.lock().unwrap().take() {
            let _ = shutdown.send(());
        }
        tracing::info!("attestation session stopped");
    }

    /// Deep-copied export of the current chain.
    pub fn export(&self) -> SessionExport {
        let state = self.state.lock().unwrap();
        SessionExport {
            session_id: state.session_id,
            session_start_nanos: state.session_start_nanos,
            keystroke_count: state.keystroke_count,
            chain: state.chain.clone(),
            final_counter: state.current_counter,
            final_quote: state.last_quote.clone(),
        }
    }

    /// Session id (zeros before `start`).
    pub fn session_id(&self) -> Hash32 {
        self.state.lock().unwrap().session_id
    }

    /// Checkpoints currently retained in memory.
    pub fn chain_len(&self) -> usize {
        self.state.lock().unwrap().chain.len()
    }

    /// Keystrokes recorded so far.
    pub fn keystroke_count(&self) -> u64 {
        self.state.lock().unwrap().keystroke_count
    }

    fn require_running(&self, state: &SessionState) -> Result<()> {
        match state.phase {
            Phase::Running => Ok(()),
            phase => Err(AttestError::InvalidState(format!(
                "session is {phase:?}, expected Running"
            ))),
        }
    }

    /// The checkpoint algorithm. Called with the state lock held.
    fn create_checkpoint_locked(
        &self,
        state: &mut SessionState,
        content_hash: Hash32,
        timing: &[u8],
    ) -> Result<Checkpoint> {
        // 1. Fresh counter value; must advance strictly.
        let counter = self.tpm.increment_counter(self.config.counter_index)?;
        if counter <= state.current_counter && state.checkpoint_count > 0 {
            return Err(AttestError::CounterMismatch {
                previous: state.current_counter,
                current: counter,
            });
        }

        // 2. Refresh the quote when stale; failure aborts the checkpoint.
        let stale = match state.last_quote_at {
            None => true,
            Some(at) => at.elapsed() > self.config.quote_refresh_interval,
        };
        if stale {
            let mut nonce = [0u8; 32];
            OsRng.fill_bytes(&mut nonce);
            let quote = self.tpm.quote(&nonce, &self.config.pcrs)?;
            state.last_quote = Some(quote);
            state.last_quote_at = Some(Instant::now());
        }

        let sequence_no = state.checkpoint_count;
        let timestamp_nanos = witnessd_core::now_nanos();
        let timing_digest = timing_hash(timing);
        let previous_hash = if sequence_no == 0 {
            ZERO_HASH
        } else {
            state.last_checkpoint_hash
        };

        // 4. PCR snapshot is best-effort: a read failure must not abort
        // checkpoint creation.
        let pcr_values = if self.config.include_platform_state {
            match self.tpm.read_pcrs(&self.config.pcrs) {
                Ok(values) => Some(values),
                Err(e) => {
                    tracing::debug!(error = %e, "PCR snapshot skipped");
                    None
                }
            }
        } else {
            None
        };

        // 5. PUF binding, derived from the checkpoint's own identity. A
        // failing PUF is reported and the checkpoint continues unbound.
        let (puf_challenge, puf_response) = match &self.puf {
            None => (None, None),
            Some(puf) => {
                let challenge = derive_puf_challenge(
                    &state.session_id,
                    sequence_no,
                    counter,
                    &content_hash,
                    &timing_digest,
                );
                match puf.challenge(&challenge) {
                    Ok(response) => (Some(challenge), Some(response)),
                    Err(e) => {
                        self.emit_event(state, SessionEvent::Error(AttestError::Puf(e)));
                        (None, None)
                    }
                }
            }
        };

        // 6-7. Canonical hash, then lift the quote signature.
        let quote = state.last_quote.clone();
        let checkpoint_hash = crate::checkpoint::compute_checkpoint_hash(
            &state.session_id,
            sequence_no,
            timestamp_nanos,
            counter,
            &content_hash,
            state.keystroke_count,
            &timing_digest,
            &previous_hash,
            quote.as_ref().map(|q| q.raw_quote.as_slice()),
            puf_response.as_deref(),
        );
        let tpm_signature = quote.as_ref().map(|q| q.signature.clone()).unwrap_or_default();

        let checkpoint = Checkpoint {
            session_id: state.session_id,
            sequence_no,
            timestamp_nanos,
            tpm_counter: counter,
            content_hash,
            keystroke_count: state.keystroke_count,
            timing_hash: timing_digest,
            previous_hash,
            tpm_quote: quote,
            pcr_values,
            puf_challenge,
            puf_response,
            checkpoint_hash,
            tpm_signature,
            device_signature: Vec::new(),
        };

        // 8. Append with FIFO trimming, then notify off-lock.
        state.chain.push(checkpoint.clone());
        if state.chain.len() > self.config.max_chain_length {
            state.chain.remove(0);
        }
        state.checkpoint_count += 1;
        state.current_counter = counter;
        state.last_checkpoint_hash = checkpoint_hash;

        self.emit_event(state, SessionEvent::Checkpoint(checkpoint.clone()));
        Ok(checkpoint)
    }

    fn emit_event(&self, state: &SessionState, event: SessionEvent) {
        if let Some(events) = &state.events {
            let _ = events.send(event);
        }
    }

    /// Callback dispatcher: runs on its own task so callbacks never execute
    /// under the session lock, and a panicking callback harms nobody.
    fn spawn_dispatcher(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Checkpoint(checkpoint) => {
                        let callback = session.on_checkpoint.lock().unwrap().clone();
                        if let Some(callback) = callback {
                            let result = std::panic::catch_unwind(
                                std::panic::AssertUnwindSafe(|| callback(&checkpoint)),
                            );
                            if result.is_err() {
                                tracing::error!("checkpoint callback panicked");
                            }
                        }
                    }
                    SessionEvent::Error(error) => {
                        let callback = session.on_error.lock().unwrap().clone();
                        if let Some(callback) = callback {
                            let result = std::panic::catch_unwind(
                                std::panic::AssertUnwindSafe(|| callback(&error)),
                            );
                            if result.is_err() {
                                tracing::error!("error callback panicked");
                            }
                        } else {
                            tracing::warn!(error = %error, "unhandled session error");
                        }
                    }
                }
            }
        });
    }

    /// Background quote refresh, one tick per `quote_refresh_interval`.
    fn spawn_refresh_task(self: &Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown.lock().unwrap() = Some(shutdown_tx);

        let session = Arc::clone(self);
        let period = self.config.quote_refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        session.refresh_quote_tick();
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            tracing::debug!("quote refresh task exited");
        });
    }

    fn refresh_quote_tick(&self) {
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Running {
            return;
        }
        let due = match state.last_quote_at {
            None => true,
            Some(at) => at.elapsed() >= self.config.quote_refresh_interval,
        };
        if !due {
            return;
        }

        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        match self.tpm.quote(&nonce, &self.config.pcrs) {
            Ok(quote) => {
                state.last_quote = Some(quote);
                state.last_quote_at = Some(Instant::now());
            }
            Err(e) => {
                self.emit_event(&state, SessionEvent::Error(AttestError::Tpm(e)));
            }
        }
    }
}

/// Per-checkpoint PUF challenge:
/// `SHA256(session_id || sequence_no || tpm_counter || content_hash || timing_hash)`.
fn derive_puf_challenge(
    session_id: &Hash32,
    sequence_no: u64,
    tpm_counter: u64,
    content_hash: &Hash32,
    timing_digest: &Hash32,
) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(session_id);
    hasher.update(sequence_no.to_be_bytes());
    hasher.update(tpm_counter.to_be_bytes());
    hasher.update(content_hash);
    hasher.update(timing_digest);
    hasher.finalize().into()
}

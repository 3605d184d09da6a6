//! Connection manager
//!
//! Drives one connection at a time through
//! `NotConnected -> Connecting -> Connected -> Disconnecting -> NotConnected`.
//!
//! Every negotiation step runs as a [`CancelableCall`] bound to the
//! connection's [`Cancelable`], so `disconnect()` returns control to a blocked
//! `connect()` immediately while late results are cleaned up in the
//! background. Status writes happen with the connection slot locked, which
//! makes check-and-set transitions atomic with respect to `disconnect()`.
//!
//! While connecting, a disconnect request, the `Connected` state and the end of
//! the state stream race each other; when several are ready at once the winner
//! is unspecified.

use crate::connection::collaborators::{
    Dialog, DialogCreator, ProposalLookup, SessionRequester, Subprocess, SubprocessFactory,
};
use crate::connection::status::{ConnectionState, ConnectionStatus};
use crate::error::{CallError, ConnectionError, ProcessError};
use crate::openvpn::state::{ProcessState, StateCallback};
use crate::stats::SessionStatsKeeper;
use crate::types::{Identity, SessionId};
use crate::utils::{invoke_on_success, Cancelable};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

/// State shared between the manager and its background consumer
///
/// `active` holds the cancel signal of the connection owning the manager. It
/// is `Some` exactly when the status is not `NotConnected`.
struct Shared {
    status: watch::Sender<ConnectionStatus>,
    active: Mutex<Option<Cancelable>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Option<Cancelable>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ConnectionStatus) {
        debug!("Connection status: {}", status);
        self.status.send_replace(status);
    }

    /// Update status unless a disconnect is in progress
    fn update(&self, cancel: &Cancelable, status: ConnectionStatus) {
        let _active = self.lock();
        if !cancel.is_cancelled() {
            self.set_status(status);
        }
    }

    /// Cancel an attempt whose caller went away
    ///
    /// Only touches the status while the attempt still owns the slot.
    fn abandon(&self, cancel: &Cancelable) {
        let active = self.lock();
        let owned = active.as_ref().is_some_and(|slot| slot.shares_signal(cancel));
        if owned && cancel.cancel() {
            info!("Connect abandoned by caller, cancelling");
            self.set_status(ConnectionStatus::disconnecting());
        }
    }

    /// Release the slot and fall back to `NotConnected`
    fn finish(&self) {
        let mut active = self.lock();
        *active = None;
        self.set_status(ConnectionStatus::not_connected());
    }
}

/// Forwards state events into a channel that can be closed from outside
///
/// The subprocess holds the callback for as long as it likes; closing the
/// channel once the process exited is what ends the event stream.
#[derive(Clone)]
struct StateEvents {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<ProcessState>>>>,
}

impl StateEvents {
    fn channel() -> (Self, mpsc::UnboundedReceiver<ProcessState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    fn callback(&self) -> StateCallback {
        let events = self.clone();
        Arc::new(move |state: ProcessState| events.send(state))
    }

    fn send(&self, state: ProcessState) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            let _ = tx.send(state);
        }
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

async fn next_state(states: &mut mpsc::UnboundedReceiver<ProcessState>) -> ProcessState {
    states.recv().await.unwrap_or(ProcessState::ChannelClosed)
}

/// Resources acquired so far by a connect attempt
#[derive(Default)]
struct Attempt {
    dialog: Option<Arc<dyn Dialog>>,
    subprocess: Option<Arc<dyn Subprocess>>,
}

/// A tunnel that reached `Connected`
struct Established {
    session_id: SessionId,
    dialog: Arc<dyn Dialog>,
    subprocess: Arc<dyn Subprocess>,
    states: mpsc::UnboundedReceiver<ProcessState>,
}

fn from_call<E: Into<ConnectionError>>(err: CallError<E>) -> ConnectionError {
    match err {
        CallError::ActionCancelled => ConnectionError::ConnectionCancelled,
        CallError::UndefinedAction => ConnectionError::Collaborator(anyhow::anyhow!("undefined action")),
        CallError::Action(e) => e.into(),
    }
}

async fn close_dialog(dialog: Arc<dyn Dialog>) {
    if let Err(e) = dialog.close().await {
        warn!("Failed to close dialog: {}", e);
    }
}

/// Collaborators and shared state needed to run one connect attempt
#[derive(Clone)]
struct Negotiator {
    proposals: Arc<dyn ProposalLookup>,
    dialogs: Arc<dyn DialogCreator>,
    sessions: Arc<dyn SessionRequester>,
    subprocesses: Arc<dyn SubprocessFactory>,
    keeper: Arc<dyn SessionStatsKeeper>,
    shared: Arc<Shared>,
}

/// Cancels the attempt when `connect()` is dropped before it completes
struct AbandonGuard {
    shared: Arc<Shared>,
    cancel: Option<Cancelable>,
}

impl AbandonGuard {
    fn disarm(mut self) {
        self.cancel = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            self.shared.abandon(&cancel);
        }
    }
}

/// Consumer-side connection lifecycle
pub struct ConnectionManager {
    negotiator: Negotiator,
}

impl ConnectionManager {
    pub fn new(
        proposals: Arc<dyn ProposalLookup>,
        dialogs: Arc<dyn DialogCreator>,
        sessions: Arc<dyn SessionRequester>,
        subprocesses: Arc<dyn SubprocessFactory>,
        keeper: Arc<dyn SessionStatsKeeper>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::not_connected());
        Self {
            negotiator: Negotiator {
                proposals,
                dialogs,
                sessions,
                subprocesses,
                keeper,
                shared: Arc::new(Shared {
                    status,
                    active: Mutex::new(None),
                }),
            },
        }
    }

    fn shared(&self) -> &Shared {
        &self.negotiator.shared
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.shared().status.borrow().clone()
    }

    /// Stream of status transitions
    ///
    /// A drop to `NotConnected` without a preceding `Disconnecting` means the
    /// tunnel process went away on its own.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared().status.subscribe()
    }

    /// Establish a tunnel to `provider`
    ///
    /// Returns once the tunnel process reported `Connected`, or with the error
    /// that ended the attempt. Either way nothing opened by the attempt is
    /// left behind on failure and the status is back to `NotConnected`.
    ///
    /// The attempt runs on its own task. Dropping the returned future cancels
    /// it as if `disconnect()` had been called.
    #[tracing::instrument(skip_all, fields(consumer = %consumer, provider = %provider))]
    pub async fn connect(&self, consumer: Identity, provider: Identity) -> Result<(), ConnectionError> {
        let cancel = self.begin_connect()?;
        info!("Connecting");

        let guard = AbandonGuard {
            shared: Arc::clone(&self.negotiator.shared),
            cancel: Some(cancel.clone()),
        };
        let attempt = tokio::spawn(
            self.negotiator
                .clone()
                .run(consumer, provider, cancel)
                .in_current_span(),
        );

        let outcome = attempt.await;
        guard.disarm();
        match outcome {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => std::panic::resume_unwind(join_error.into_panic()),
            Err(_) => Err(ConnectionError::ConnectionCancelled),
        }
    }

    /// Request teardown of the active connection
    ///
    /// Returns immediately; the status reaches `NotConnected` once the tunnel
    /// process is gone. Repeated calls while disconnecting are no-ops. There is
    /// no timeout: a process ignoring the stop request keeps the manager in
    /// `Disconnecting`.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        let active = self.shared().lock();
        let cancel = active.as_ref().ok_or(ConnectionError::NoConnection)?;

        if cancel.cancel() {
            info!("Disconnecting");
            self.shared().set_status(ConnectionStatus::disconnecting());
        }
        Ok(())
    }

    /// Wait until the active connection is fully torn down
    pub async fn wait(&self) -> Result<(), ConnectionError> {
        let mut status = self.subscribe();
        if status.borrow().state() == ConnectionState::NotConnected {
            return Err(ConnectionError::NoConnection);
        }

        // the sender lives in self, so the channel cannot close while waiting
        let _ = status
            .wait_for(|status| status.state() == ConnectionState::NotConnected)
            .await;
        Ok(())
    }

    fn begin_connect(&self) -> Result<Cancelable, ConnectionError> {
        let mut active = self.shared().lock();
        if active.is_some() {
            return Err(ConnectionError::AlreadyExists);
        }

        let cancel = Cancelable::new();
        *active = Some(cancel.clone());
        self.shared().set_status(ConnectionStatus::connecting());
        Ok(cancel)
    }
}

impl Negotiator {
    /// Body of a connect attempt, from negotiation to rollback or hand-off
    async fn run(self, consumer: Identity, provider: Identity, cancel: Cancelable) -> Result<(), ConnectionError> {
        let mut attempt = Attempt::default();
        match self.establish(&consumer, &provider, &cancel, &mut attempt).await {
            Ok(established) => {
                info!(session_id = %established.session_id, "Connected");
                tokio::spawn(
                    consume_states(
                        Arc::clone(&self.shared),
                        Arc::clone(&self.keeper),
                        cancel,
                        established,
                    )
                    .in_current_span(),
                );
                Ok(())
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.rollback(attempt).await;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        consumer: &Identity,
        provider: &Identity,
        cancel: &Cancelable,
        attempt: &mut Attempt,
    ) -> Result<Established, ConnectionError> {
        let lookup = Arc::clone(&self.proposals);
        let lookup_provider = provider.clone();
        let proposals = cancel
            .request()
            .with_action(async move { lookup.find_proposals(&lookup_provider).await })
            .call()
            .await
            .map_err(from_call)?;
        let proposal = proposals.into_iter().next().ok_or(ConnectionError::NoProposals)?;
        let contact = proposal
            .provider_contacts
            .first()
            .cloned()
            .ok_or(ConnectionError::NoProviderContacts)?;
        debug!(proposal_id = proposal.id, "Using proposal");

        let dialogs = Arc::clone(&self.dialogs);
        let (dialog_consumer, dialog_provider) = (consumer.clone(), provider.clone());
        let dialog = cancel
            .request()
            .with_action(async move {
                dialogs
                    .create_dialog(&dialog_consumer, &dialog_provider, &contact)
                    .await
            })
            .with_cleanup(invoke_on_success::<_, anyhow::Error, _>(|dialog: Arc<dyn Dialog>| {
                tokio::spawn(close_dialog(dialog));
            }))
            .call()
            .await
            .map_err(from_call)?;
        attempt.dialog = Some(Arc::clone(&dialog));

        let sessions = Arc::clone(&self.sessions);
        let session_dialog = Arc::clone(&dialog);
        let proposal_id = proposal.id;
        let session = cancel
            .request()
            .with_action(async move { sessions.request_session(session_dialog, proposal_id).await })
            .call()
            .await
            .map_err(from_call)?;
        info!(session_id = %session.id, "Session created");

        let (events, mut states) = StateEvents::channel();
        let subprocess = self
            .subprocesses
            .create(&session, consumer, provider, events.callback())?;

        let starting = Arc::clone(&subprocess);
        let abandoned = Arc::clone(&subprocess);
        cancel
            .request()
            .with_action(async move { starting.start().await })
            .with_cleanup(invoke_on_success::<_, ProcessError, _>(move |()| {
                tokio::spawn(async move { abandoned.stop().await });
            }))
            .call()
            .await
            .map_err(from_call)?;
        attempt.subprocess = Some(Arc::clone(&subprocess));

        let watched = Arc::clone(&subprocess);
        tokio::spawn(async move {
            if let Err(e) = watched.wait().await {
                debug!("Tunnel process finished: {}", e);
            }
            events.close();
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectionError::ConnectionCancelled),
                state = next_state(&mut states) => match state {
                    ProcessState::Connected => break,
                    state if state.is_terminal() => return Err(ConnectionError::OpenvpnProcessDied),
                    state => debug!("Tunnel process state while connecting: {}", state),
                },
            }
        }

        self.mark_connected(cancel, &session.id)?;
        Ok(Established {
            session_id: session.id,
            dialog,
            subprocess,
            states,
        })
    }

    /// `Connecting -> Connected`, unless a disconnect slipped in
    fn mark_connected(&self, cancel: &Cancelable, session_id: &SessionId) -> Result<(), ConnectionError> {
        let _active = self.shared.lock();
        if cancel.is_cancelled() {
            return Err(ConnectionError::ConnectionCancelled);
        }
        self.keeper.mark_session_start();
        self.shared
            .set_status(ConnectionStatus::connected(session_id.clone()));
        Ok(())
    }

    async fn rollback(&self, attempt: Attempt) {
        if let Some(subprocess) = attempt.subprocess {
            tokio::spawn(async move { subprocess.stop().await });
        }
        if let Some(dialog) = attempt.dialog {
            close_dialog(dialog).await;
        }
        self.shared.finish();
    }
}

/// Follow the tunnel process after `Connected` until its state stream ends
async fn consume_states(
    shared: Arc<Shared>,
    keeper: Arc<dyn SessionStatsKeeper>,
    cancel: Cancelable,
    mut established: Established,
) {
    let session_id = established.session_id.clone();
    let mut stop_requested = false;

    loop {
        let state = tokio::select! {
            _ = cancel.cancelled(), if !stop_requested => {
                stop_requested = true;
                info!(session_id = %session_id, "Stopping tunnel process");
                let subprocess = Arc::clone(&established.subprocess);
                tokio::spawn(async move { subprocess.stop().await });
                continue;
            }
            state = next_state(&mut established.states) => state,
        };

        match state {
            ProcessState::Connected => {
                shared.update(&cancel, ConnectionStatus::connected(session_id.clone()))
            }
            ProcessState::Reconnecting => shared.update(&cancel, ConnectionStatus::reconnecting()),
            state if state.is_terminal() => {
                debug!(session_id = %session_id, "Tunnel process state stream ended with {}", state);
                break;
            }
            state => debug!(session_id = %session_id, "Tunnel process state: {}", state),
        }
    }

    if !stop_requested && !cancel.is_cancelled() {
        warn!(session_id = %session_id, "Connection lost: tunnel process exited");
    }

    keeper.mark_session_end();
    if let Err(e) = established.dialog.close().await {
        error!(session_id = %session_id, "Failed to close dialog: {}", e);
    }
    shared.finish();
    info!(session_id = %session_id, "Disconnected");
}

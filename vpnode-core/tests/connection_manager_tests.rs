// Connection manager lifecycle tests driven by fake collaborators

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use vpnode_core::connection::{
    ConnectionManager, ConnectionState, ConnectionStatus, Contact, Dialog, DialogCreator,
    ProposalLookup, ServiceProposal, Session, SessionRequester, Subprocess, SubprocessFactory,
};
use vpnode_core::error::{ConnectionError, ProcessError};
use vpnode_core::openvpn::{ProcessState, StateCallback};
use vpnode_core::stats::SessionStatsKeeper;
use vpnode_core::types::{Identity, SessionId, SessionStats};

const SESSION_ID: &str = "session-1";

fn proposal() -> ServiceProposal {
    ServiceProposal {
        id: 7,
        provider_id: "0xprovider".to_string(),
        service_type: "openvpn".to_string(),
        provider_contacts: vec![Contact {
            contact_type: "nats/v1".to_string(),
            definition: serde_json::json!({"topic": "0xprovider"}),
        }],
    }
}

struct FakeProposals(Vec<ServiceProposal>);

#[async_trait]
impl ProposalLookup for FakeProposals {
    async fn find_proposals(&self, _provider: &Identity) -> anyhow::Result<Vec<ServiceProposal>> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct FakeDialog {
    closed: AtomicUsize,
}

#[async_trait]
impl Dialog for FakeDialog {
    async fn close(&self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeDialogs(Arc<FakeDialog>);

#[async_trait]
impl DialogCreator for FakeDialogs {
    async fn create_dialog(
        &self,
        _consumer: &Identity,
        _provider: &Identity,
        _contact: &Contact,
    ) -> anyhow::Result<Arc<dyn Dialog>> {
        Ok(self.0.clone())
    }
}

/// Session requester that can be made to hang until cancelled
#[derive(Default)]
struct FakeSessions {
    hang: bool,
    entered: Notify,
}

#[async_trait]
impl SessionRequester for FakeSessions {
    async fn request_session(&self, _dialog: Arc<dyn Dialog>, proposal_id: u64) -> anyhow::Result<Session> {
        assert_eq!(proposal_id, 7);
        self.entered.notify_one();
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(Session {
            id: SessionId::new(SESSION_ID),
            config: "{}".to_string(),
        })
    }
}

/// Subprocess reporting scripted states
struct FakeSubprocess {
    sink: StateCallback,
    script: Vec<ProcessState>,
    exit_after_script: bool,
    ignore_stop: bool,
    exited: watch::Sender<bool>,
    stops: AtomicUsize,
}

impl FakeSubprocess {
    fn report(&self, state: ProcessState) {
        (self.sink)(state);
    }

    fn exit(&self) {
        self.exited.send_replace(true);
    }
}

#[async_trait]
impl Subprocess for FakeSubprocess {
    async fn start(&self) -> Result<(), ProcessError> {
        for state in &self.script {
            self.report(state.clone());
        }
        if self.exit_after_script {
            self.exit();
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_stop {
            self.report(ProcessState::Exiting);
            self.exit();
        }
    }

    async fn wait(&self) -> Result<(), ProcessError> {
        let mut exited = self.exited.subscribe();
        let _ = exited.wait_for(|exited| *exited).await;
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    script: Vec<ProcessState>,
    exit_after_script: bool,
    ignore_stop: bool,
    fail: bool,
    created: Mutex<Option<Arc<FakeSubprocess>>>,
}

impl FakeFactory {
    fn subprocess(&self) -> Arc<FakeSubprocess> {
        self.created.lock().unwrap().clone().expect("subprocess not created")
    }
}

impl SubprocessFactory for FakeFactory {
    fn create(
        &self,
        session: &Session,
        _consumer: &Identity,
        _provider: &Identity,
        state_sink: StateCallback,
    ) -> anyhow::Result<Arc<dyn Subprocess>> {
        assert_eq!(session.id.as_str(), SESSION_ID);
        if self.fail {
            anyhow::bail!("tunnel config rejected");
        }
        let (exited, _) = watch::channel(false);
        let subprocess = Arc::new(FakeSubprocess {
            sink: state_sink,
            script: self.script.clone(),
            exit_after_script: self.exit_after_script,
            ignore_stop: self.ignore_stop,
            exited,
            stops: AtomicUsize::new(0),
        });
        *self.created.lock().unwrap() = Some(subprocess.clone());
        Ok(subprocess)
    }
}

#[derive(Default)]
struct CountingKeeper {
    starts: AtomicUsize,
    ends: AtomicUsize,
}

impl SessionStatsKeeper for CountingKeeper {
    fn save(&self, _stats: SessionStats) {}

    fn retrieve(&self) -> SessionStats {
        SessionStats::default()
    }

    fn mark_session_start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_session_end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }

    fn session_duration(&self) -> Duration {
        Duration::ZERO
    }
}

struct Harness {
    manager: Arc<ConnectionManager>,
    dialog: Arc<FakeDialog>,
    sessions: Arc<FakeSessions>,
    factory: Arc<FakeFactory>,
    keeper: Arc<CountingKeeper>,
}

impl Harness {
    fn new(proposals: Vec<ServiceProposal>, sessions: FakeSessions, factory: FakeFactory) -> Self {
        let dialog = Arc::new(FakeDialog::default());
        let sessions = Arc::new(sessions);
        let factory = Arc::new(factory);
        let keeper = Arc::new(CountingKeeper::default());
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(FakeProposals(proposals)),
            Arc::new(FakeDialogs(dialog.clone())),
            sessions.clone(),
            factory.clone(),
            keeper.clone(),
        ));
        Self {
            manager,
            dialog,
            sessions,
            factory,
            keeper,
        }
    }

    /// Manager whose subprocess connects right after start
    fn connecting() -> Self {
        Self::new(
            vec![proposal()],
            FakeSessions::default(),
            FakeFactory {
                script: vec![ProcessState::ProcessStarted, ProcessState::Authenticating, ProcessState::Connected],
                ..FakeFactory::default()
            },
        )
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.manager
            .connect(Identity::from_address("0xconsumer"), Identity::from_address("0xprovider"))
            .await
    }

    async fn wait_for_state(&self, state: ConnectionState) {
        let mut status = self.manager.subscribe();
        tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.state() == state))
            .await
            .expect("state not reached")
            .unwrap();
    }

    fn dialog_closes(&self) -> usize {
        self.dialog.closed.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_new_manager_is_not_connected() {
    let harness = Harness::connecting();
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
}

#[tokio::test]
async fn test_provider_without_proposals_fails() {
    let harness = Harness::new(Vec::new(), FakeSessions::default(), FakeFactory::default());

    let err = harness.connect().await.unwrap_err();

    assert!(matches!(err, ConnectionError::NoProposals));
    assert_eq!(err.to_string(), "provider has no service proposals");
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
}

#[tokio::test]
async fn test_proposal_without_contacts_fails() {
    let mut bare = proposal();
    bare.provider_contacts.clear();
    let harness = Harness::new(vec![bare], FakeSessions::default(), FakeFactory::default());

    assert!(matches!(
        harness.connect().await,
        Err(ConnectionError::NoProviderContacts)
    ));
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
}

#[tokio::test]
async fn test_disconnect_without_connection_fails() {
    let harness = Harness::connecting();

    assert!(matches!(
        harness.manager.disconnect(),
        Err(ConnectionError::NoConnection)
    ));
    assert!(matches!(
        harness.manager.wait().await,
        Err(ConnectionError::NoConnection)
    ));
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
}

#[tokio::test]
async fn test_connect_then_disconnect() {
    let harness = Harness::connecting();

    harness.connect().await.unwrap();
    assert_eq!(
        harness.manager.status(),
        ConnectionStatus::connected(SessionId::new(SESSION_ID))
    );
    assert_eq!(harness.keeper.starts.load(Ordering::SeqCst), 1);

    harness.manager.disconnect().unwrap();
    harness.manager.disconnect().unwrap();
    harness.manager.wait().await.unwrap();

    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
    assert_eq!(harness.keeper.ends.load(Ordering::SeqCst), 1);
    assert_eq!(harness.factory.subprocess().stops.load(Ordering::SeqCst), 1);
    assert_eq!(harness.dialog_closes(), 1);
}

#[tokio::test]
async fn test_concurrent_connects_only_one_wins() {
    let harness = Harness::connecting();

    let (first, second) = tokio::join!(harness.connect(), harness.connect());

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(ConnectionError::AlreadyExists))));
    assert_eq!(
        harness.manager.status(),
        ConnectionStatus::connected(SessionId::new(SESSION_ID))
    );
}

#[tokio::test]
async fn test_connect_while_connected_is_rejected() {
    let harness = Harness::connecting();
    harness.connect().await.unwrap();

    assert!(matches!(
        harness.connect().await,
        Err(ConnectionError::AlreadyExists)
    ));
    assert_eq!(
        harness.manager.status(),
        ConnectionStatus::connected(SessionId::new(SESSION_ID))
    );
}

#[tokio::test]
async fn test_concurrent_connects_on_connected_manager_are_rejected() {
    let harness = Harness::connecting();
    harness.connect().await.unwrap();

    let (first, second) = tokio::join!(harness.connect(), harness.connect());

    assert!(matches!(first, Err(ConnectionError::AlreadyExists)));
    assert!(matches!(second, Err(ConnectionError::AlreadyExists)));
    assert_eq!(
        harness.manager.status(),
        ConnectionStatus::connected(SessionId::new(SESSION_ID))
    );
    assert_eq!(harness.keeper.starts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.dialog_closes(), 0);
}

#[tokio::test]
async fn test_process_exit_after_connect_resets_status() {
    let harness = Harness::connecting();
    harness.connect().await.unwrap();

    let subprocess = harness.factory.subprocess();
    subprocess.report(ProcessState::Exiting);
    subprocess.exit();
    harness.manager.wait().await.unwrap();

    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
    assert_eq!(harness.keeper.starts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.keeper.ends.load(Ordering::SeqCst), 1);
    assert_eq!(harness.dialog_closes(), 1);
}

#[tokio::test]
async fn test_process_death_before_connect_fails() {
    let harness = Harness::new(
        vec![proposal()],
        FakeSessions::default(),
        FakeFactory {
            script: vec![ProcessState::ProcessStarted],
            exit_after_script: true,
            ..FakeFactory::default()
        },
    );

    let err = harness.connect().await.unwrap_err();

    assert!(matches!(err, ConnectionError::OpenvpnProcessDied));
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
    assert_eq!(harness.dialog_closes(), 1);
    assert_eq!(harness.keeper.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disconnect_during_negotiation_cancels_connect() {
    let harness = Harness::new(
        vec![proposal()],
        FakeSessions {
            hang: true,
            ..FakeSessions::default()
        },
        FakeFactory::default(),
    );

    let manager = harness.manager.clone();
    let connect = tokio::spawn(async move {
        manager
            .connect(Identity::from_address("0xconsumer"), Identity::from_address("0xprovider"))
            .await
    });
    harness.sessions.entered.notified().await;
    assert_eq!(harness.manager.status().state(), ConnectionState::Connecting);

    harness.manager.disconnect().unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), connect)
        .await
        .expect("connect did not return")
        .unwrap();
    assert!(matches!(result, Err(ConnectionError::ConnectionCancelled)));
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
    assert_eq!(harness.dialog_closes(), 1);
}

#[tokio::test]
async fn test_abandoned_connect_releases_the_manager() {
    let harness = Harness::new(
        vec![proposal()],
        FakeSessions {
            hang: true,
            ..FakeSessions::default()
        },
        FakeFactory::default(),
    );

    let abandoned = tokio::time::timeout(Duration::from_millis(50), harness.connect()).await;
    assert!(abandoned.is_err());

    harness.wait_for_state(ConnectionState::NotConnected).await;
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
    assert_eq!(harness.dialog_closes(), 1);
    assert!(matches!(
        harness.manager.disconnect(),
        Err(ConnectionError::NoConnection)
    ));

    // a fresh attempt negotiates again instead of hitting AlreadyExists
    let retried = tokio::time::timeout(Duration::from_millis(50), harness.connect()).await;
    assert!(retried.is_err());
    harness.wait_for_state(ConnectionState::NotConnected).await;
    assert_eq!(harness.dialog_closes(), 2);
}

#[tokio::test]
async fn test_disconnect_while_waiting_for_tunnel_cancels_connect() {
    let harness = Harness::new(
        vec![proposal()],
        FakeSessions::default(),
        FakeFactory {
            script: vec![ProcessState::ProcessStarted],
            ..FakeFactory::default()
        },
    );

    let manager = harness.manager.clone();
    let connect = tokio::spawn(async move {
        manager
            .connect(Identity::from_address("0xconsumer"), Identity::from_address("0xprovider"))
            .await
    });
    harness.sessions.entered.notified().await;
    // give the attempt time to start the subprocess
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.manager.disconnect().unwrap();

    let result = connect.await.unwrap();
    assert!(matches!(result, Err(ConnectionError::ConnectionCancelled)));
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());

    let subprocess = harness.factory.subprocess();
    tokio::time::timeout(Duration::from_secs(5), subprocess.wait())
        .await
        .expect("subprocess was not stopped")
        .unwrap();
    assert_eq!(subprocess.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_subprocess_factory_error_is_propagated() {
    let harness = Harness::new(
        vec![proposal()],
        FakeSessions::default(),
        FakeFactory {
            fail: true,
            ..FakeFactory::default()
        },
    );

    let err = harness.connect().await.unwrap_err();

    assert_eq!(err.to_string(), "tunnel config rejected");
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
    assert_eq!(harness.dialog_closes(), 1);
}

#[tokio::test]
async fn test_reconnecting_drops_and_restores_session() {
    let harness = Harness::connecting();
    harness.connect().await.unwrap();
    let subprocess = harness.factory.subprocess();

    subprocess.report(ProcessState::Reconnecting);
    harness.wait_for_state(ConnectionState::Reconnecting).await;
    assert_eq!(harness.manager.status(), ConnectionStatus::reconnecting());

    subprocess.report(ProcessState::Connected);
    harness.wait_for_state(ConnectionState::Connected).await;
    assert_eq!(
        harness.manager.status(),
        ConnectionStatus::connected(SessionId::new(SESSION_ID))
    );

    harness.manager.disconnect().unwrap();
    harness.manager.wait().await.unwrap();
    assert_eq!(harness.keeper.starts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.keeper.ends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hung_process_stays_disconnecting() {
    let harness = Harness::new(
        vec![proposal()],
        FakeSessions::default(),
        FakeFactory {
            script: vec![ProcessState::Connected],
            ignore_stop: true,
            ..FakeFactory::default()
        },
    );
    harness.connect().await.unwrap();

    harness.manager.disconnect().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.manager.status(), ConnectionStatus::disconnecting());
    assert!(matches!(
        harness.connect().await,
        Err(ConnectionError::AlreadyExists)
    ));

    // the process finally goes away
    harness.factory.subprocess().exit();
    harness.manager.wait().await.unwrap();
    assert_eq!(harness.manager.status(), ConnectionStatus::not_connected());
}

#[tokio::test]
async fn test_manager_can_reconnect_after_disconnect() {
    let harness = Harness::connecting();

    harness.connect().await.unwrap();
    harness.manager.disconnect().unwrap();
    harness.manager.wait().await.unwrap();

    harness.connect().await.unwrap();
    assert_eq!(
        harness.manager.status(),
        ConnectionStatus::connected(SessionId::new(SESSION_ID))
    );
    assert_eq!(harness.keeper.starts.load(Ordering::SeqCst), 2);
}

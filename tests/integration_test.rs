use machine_orchestrator::clients::{HandlerKind, InMemorySession, SessionContext};
use machine_orchestrator::config::OrchestratorConfig;
use machine_orchestrator::lifecycle::EnvironmentSystem;
use machine_orchestrator::lifecycle;
use machine_orchestrator::mock::{descriptor, BackendRequest, JournalEntry, MockBackend, MockMessageBus};
use machine_orchestrator::model::{
    ChannelId, EnvironmentEvent, EventKind, MachineAction, MachineConfig, MachineSource, MachineStatus, OperationType,
    StatusNotification,
};
use machine_orchestrator::orchestrator_actor::{OrchestratorContext, OrchestratorError};
use machine_orchestrator::resolver::ResolveError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn machine(name: &str, deps: &[&str]) -> MachineConfig {
    MachineConfig::new(name, MachineSource::recipe("dockerfile", format!("http://recipes/{name}")))
        .depends_on(deps.iter().copied())
}

fn spawn_system(backend: Arc<MockBackend>, bus: Arc<MockMessageBus>, session: Arc<InMemorySession>) -> EnvironmentSystem {
    let ctx = OrchestratorContext { backend, bus, session };
    EnvironmentSystem::new("ws-1".into(), ctx, OrchestratorConfig::default())
}

/// Index of the first journal entry matching `predicate`.
fn position(journal: &[JournalEntry], predicate: impl Fn(&JournalEntry) -> bool) -> usize {
    journal.iter().position(predicate).expect("journal entry not found")
}

fn start_of(name: &'static str) -> impl Fn(&JournalEntry) -> bool {
    move |entry| matches!(entry, JournalEntry::Requested(BackendRequest::Start { config, .. }) if config.name == name)
}

/// Waits until the orchestrator listens on `channel`.
async fn wait_for_subscriber(bus: &MockMessageBus, channel: &ChannelId) {
    timeout(Duration::from_secs(5), async {
        while !bus.has_subscriber(channel, HandlerKind::Status) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("status channel never subscribed");
}

fn running_of(name: &'static str) -> impl Fn(&JournalEntry) -> bool {
    move |entry| {
        matches!(entry, JournalEntry::Emitted { machine, status: MachineStatus::Running } if machine == name)
    }
}

/// Full environment start against the mocked backend and transport.
#[tokio::test]
async fn test_environment_starts_rank_by_rank() {
    let bus = Arc::new(MockMessageBus::new());
    let backend = Arc::new(MockBackend::with_status_feed(bus.clone()));
    let system = spawn_system(backend.clone(), bus.clone(), Arc::new(InMemorySession::new()));

    let configs = vec![
        machine("C", &["A", "B"]),
        machine("B", &["A"]),
        machine("A", &[]),
        machine("D", &[]),
    ];
    let handles = timeout(Duration::from_secs(5), system.start_environment(&configs))
        .await
        .expect("environment start timed out")
        .expect("environment start failed");

    assert_eq!(handles.len(), 4);
    assert_eq!(backend.started(), vec!["A", "D", "B", "C"]);

    // Each rank is started only after the previous one is RUNNING.
    let journal = backend.journal();
    assert!(position(&journal, running_of("A")) < position(&journal, start_of("B")));
    assert!(position(&journal, running_of("D")) < position(&journal, start_of("B")));
    assert!(position(&journal, running_of("B")) < position(&journal, start_of("C")));

    for handle in handles {
        assert_eq!(
            system.client.machine_state(handle).await.unwrap(),
            Some(MachineStatus::Running)
        );
    }

    system.stop_environment().await.unwrap();
    assert!(bus.active_channels().is_empty());
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_at_a_rank_blocks_dependents() {
    let bus = Arc::new(MockMessageBus::new());
    let backend = Arc::new(MockBackend::with_status_feed(bus.clone()).failing("db"));
    let system = spawn_system(backend.clone(), bus, Arc::new(InMemorySession::new()));

    let configs = vec![machine("db", &[]), machine("cache", &[]), machine("api", &["db", "cache"])];
    let result = timeout(Duration::from_secs(5), system.start_environment(&configs))
        .await
        .expect("environment start timed out");

    assert_eq!(
        result,
        Err(OrchestratorError::EnvironmentStartFailed {
            failed: vec!["db".to_string()]
        })
    );
    assert_eq!(backend.started(), vec!["db", "cache"]);

    let states: Vec<(String, MachineStatus)> = system
        .client
        .machines()
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.config.name, m.status))
        .collect();
    assert_eq!(
        states,
        vec![
            ("db".to_string(), MachineStatus::Error),
            ("cache".to_string(), MachineStatus::Running),
        ]
    );

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_configuration_errors_fail_before_any_start() {
    let bus = Arc::new(MockMessageBus::new());
    let backend = Arc::new(MockBackend::with_status_feed(bus.clone()));
    let system = spawn_system(backend.clone(), bus, Arc::new(InMemorySession::new()));

    let cyclic = vec![machine("A", &["B"]), machine("B", &["A"])];
    assert_eq!(
        system.start_environment(&cyclic).await,
        Err(OrchestratorError::Resolve(ResolveError::CyclicOrUnresolvableDependency {
            unresolved: vec!["A".to_string(), "B".to_string()]
        }))
    );

    let dangling = vec![machine("app", &["ghost"])];
    assert!(matches!(
        system.start_environment(&dangling).await,
        Err(OrchestratorError::Resolve(ResolveError::UnknownDependency { .. }))
    ));

    assert!(backend.requests().is_empty());
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dev_machine_is_bound_while_environment_runs() {
    let bus = Arc::new(MockMessageBus::new());
    let backend = Arc::new(MockBackend::with_status_feed(bus.clone()));
    let session = Arc::new(InMemorySession::new());
    let system = spawn_system(backend, bus.clone(), session.clone());

    let configs = vec![
        machine("dev", &[]).dev(true).links(["db:database"]),
        machine("db", &[]),
    ];
    timeout(Duration::from_secs(5), system.start_environment(&configs))
        .await
        .expect("environment start timed out")
        .expect("environment start failed");

    let dev = session.dev_machine().expect("dev machine not bound");
    assert_eq!(dev.name, "dev");
    assert_eq!(session.projects_root().as_deref(), Some("/projects"));
    assert!(system
        .client
        .subscribed_channels()
        .await
        .unwrap()
        .contains(&ChannelId::from("workspace:ws-1:ext-server:output")));

    system.stop_environment().await.unwrap();
    assert_eq!(session.dev_machine(), None);
    assert!(bus.active_channels().is_empty());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_in_a_running_environment() {
    let bus = Arc::new(MockMessageBus::new());
    let backend = Arc::new(MockBackend::with_status_feed(bus.clone()));
    let system = spawn_system(backend.clone(), bus, Arc::new(InMemorySession::new()));

    let handles = timeout(Duration::from_secs(5), system.start_environment(&[machine("web", &[])]))
        .await
        .expect("environment start timed out")
        .expect("environment start failed");

    let mut events = system
        .client
        .listen(vec![EventKind::Machine])
        .await
        .unwrap();
    system.client.restart(handles[0]).await.unwrap();

    // Destroyed, then Creating and Running for the new machine.
    let mut actions = Vec::new();
    while actions.len() < 3 {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(EnvironmentEvent::Machine(event))) => actions.push((event.action, event.operation)),
            Ok(Some(_)) => continue,
            Ok(None) => panic!("orchestrator stopped"),
            Err(_) => panic!("restart did not complete"),
        }
    }

    assert_eq!(
        actions,
        vec![
            (MachineAction::Destroyed, OperationType::Start),
            (MachineAction::Creating, OperationType::Restart),
            (MachineAction::Running, OperationType::Restart),
        ]
    );
    assert_eq!(backend.started(), vec!["web", "web"]);

    drop(events);
    system.stop_environment().await.unwrap();
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_machine_destroyed_while_creating_fails_the_start() {
    let bus = Arc::new(MockMessageBus::new());
    let backend = Arc::new(MockBackend::new());
    backend.expect_start().return_ok(descriptor("m-1"));
    let system = spawn_system(backend.clone(), bus.clone(), Arc::new(InMemorySession::new()));

    let client = system.client.clone();
    let configs = vec![machine("A", &[]), machine("B", &["A"])];
    let start = tokio::spawn(async move { lifecycle::start_environment(&client, &configs).await });

    let status = ChannelId::from("machine:m-1:status");
    wait_for_subscriber(&bus, &status).await;
    bus.publish_status(&status, StatusNotification::new("m-1", "ws-1", MachineStatus::Destroyed))
        .await;

    let result = timeout(Duration::from_secs(5), start)
        .await
        .expect("environment start hung")
        .unwrap();
    assert_eq!(
        result,
        Err(OrchestratorError::EnvironmentStartFailed {
            failed: vec!["A".to_string()]
        })
    );
    assert_eq!(backend.started(), vec!["A"]);
    backend.verify();

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopping_mid_rank_fails_the_start() {
    let bus = Arc::new(MockMessageBus::new());
    let backend = Arc::new(MockBackend::new());
    backend.expect_start().return_ok(descriptor("m-1"));
    let system = spawn_system(backend.clone(), bus.clone(), Arc::new(InMemorySession::new()));

    let client = system.client.clone();
    let configs = vec![machine("A", &[]), machine("B", &["A"])];
    let start = tokio::spawn(async move { lifecycle::start_environment(&client, &configs).await });

    wait_for_subscriber(&bus, &ChannelId::from("machine:m-1:status")).await;
    system.stop_environment().await.unwrap();

    let result = timeout(Duration::from_secs(5), start)
        .await
        .expect("environment start hung")
        .unwrap();
    assert_eq!(
        result,
        Err(OrchestratorError::EnvironmentStartFailed {
            failed: vec!["A".to_string()]
        })
    );
    assert_eq!(backend.started(), vec!["A"]);
    assert!(bus.active_channels().is_empty());

    system.shutdown().await.unwrap();
}

use std::time::Duration;

use async_trait::async_trait;
use axon_actors::{
    Actor, ActorContext, ActorError, ActorSystem, DeadLetterEvent, MessageEnvelope, Props,
    RequestError,
};
use axon_proto::actor::Terminated;
use axon_proto::remote::ResponseStatusCode;
use axon_proto::Pid;
use axon_remote::{Remote, RemoteConfig};
use uuid::Uuid;

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct Ping {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct Pong {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct Num {
    #[prost(uint64, tag = "1")]
    pub value: u64,
}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct GetNumbers {}

#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct Numbers {
    #[prost(uint64, repeated, tag = "1")]
    pub values: Vec<u64>,
}

/// Answers `Ping{m}` with `Pong{"<own address> m"}`.
struct EchoActor;

#[async_trait]
impl Actor for EchoActor {
    async fn receive(
        &mut self,
        ctx: &mut ActorContext,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(ping) = envelope.message_as::<Ping>() {
            ctx.respond(Pong {
                message: format!("{} {}", ctx.system().address(), ping.message),
            });
        }
        Ok(())
    }
}

fn echo_props() -> Props {
    Props::from_producer(|| Box::new(EchoActor))
}

/// Collects `Num`s in arrival order and reports them on `GetNumbers`.
#[derive(Default)]
struct CollectorActor {
    values: Vec<u64>,
}

#[async_trait]
impl Actor for CollectorActor {
    async fn receive(
        &mut self,
        ctx: &mut ActorContext,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(num) = envelope.message_as::<Num>() {
            self.values.push(num.value);
        } else if envelope.message_as::<GetNumbers>().is_some() {
            ctx.respond(Numbers {
                values: self.values.clone(),
            });
        }
        Ok(())
    }
}

/// Watches `target` from startup and forwards every Terminated notice it
/// observes; unwatches on `UnwatchNow`.
struct WatchingActor {
    target: Pid,
    observed: flume::Sender<Terminated>,
}

#[derive(Debug, Clone)]
struct UnwatchNow;

#[async_trait]
impl Actor for WatchingActor {
    async fn started(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        ctx.watch(&self.target);
        Ok(())
    }

    async fn receive(
        &mut self,
        ctx: &mut ActorContext,
        envelope: MessageEnvelope,
    ) -> Result<(), ActorError> {
        if let Some(terminated) = envelope.message_as::<Terminated>() {
            let _ = self.observed.send(terminated.clone());
        } else if envelope.message_as::<UnwatchNow>().is_some() {
            ctx.unwatch(&self.target);
        }
        Ok(())
    }
}

fn watcher_props(target: Pid, observed: flume::Sender<Terminated>) -> Props {
    Props::from_producer(move || {
        Box::new(WatchingActor {
            target: target.clone(),
            observed: observed.clone(),
        })
    })
}

fn register_test_types(remote: &Remote) {
    let registry = remote.serializer_registry();
    registry.register::<Ping>("test.Ping");
    registry.register::<Pong>("test.Pong");
    registry.register::<Num>("test.Num");
    registry.register::<GetNumbers>("test.GetNumbers");
    registry.register::<Numbers>("test.Numbers");
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

async fn start_node() -> (ActorSystem, Remote) {
    init_tracing();
    let system = ActorSystem::new();
    let config = RemoteConfig::default()
        .with_host("127.0.0.1")
        .with_port(0)
        .with_remote_kind("EchoActor", echo_props());
    let remote = Remote::start(&system, config)
        .await
        .expect("remote should start");
    register_test_types(&remote);
    (system, remote)
}

#[tokio::test]
async fn test_remote_echo() {
    let (system_a, _remote_a) = start_node().await;
    let (system_b, remote_b) = start_node().await;
    system_b
        .root()
        .spawn_named(&echo_props(), "EchoActorInstance")
        .unwrap();
    let echo = Pid::new(remote_b.address(), "EchoActorInstance");
    let pong: Pong = system_a
        .root()
        .request_async(
            &echo,
            Ping {
                message: "Hello".to_string(),
            },
            Duration::from_secs(5),
        )
        .await
        .expect("echo response expected");
    assert_eq!(pong.message, format!("{} Hello", remote_b.address()));
}

#[tokio::test]
async fn test_unknown_remote_actor_times_out() {
    let (system_a, _remote_a) = start_node().await;
    let (_system_b, remote_b) = start_node().await;
    let missing = Pid::new(remote_b.address(), "doesn't exist");
    let outcome: Result<Pong, _> = system_a
        .root()
        .request_async(
            &missing,
            Ping {
                message: "anyone home?".to_string(),
            },
            Duration::from_secs(2),
        )
        .await;
    assert!(matches!(outcome, Err(RequestError::Timeout)));
}

#[tokio::test]
async fn test_remote_spawn() {
    let (system_a, remote_a) = start_node().await;
    let (_system_b, remote_b) = start_node().await;
    let name = Uuid::new_v4().to_simple().to_string();
    let response = remote_a
        .spawn_named(remote_b.address(), &name, "EchoActor", Duration::from_secs(5))
        .await;
    assert_eq!(response.status_code, ResponseStatusCode::Ok as i32);
    let pid = response.pid.expect("spawned pid expected");
    assert_eq!(pid, Pid::new(remote_b.address(), name.as_str()));
    let pong: Pong = system_a
        .root()
        .request_async(
            &pid,
            Ping {
                message: "Hello".to_string(),
            },
            Duration::from_secs(5),
        )
        .await
        .expect("spawned echo should answer");
    assert_eq!(pong.message, format!("{} Hello", remote_b.address()));
}

#[tokio::test]
async fn test_remote_spawn_name_conflict_returns_existing_pid() {
    let (_system_a, remote_a) = start_node().await;
    let (_system_b, remote_b) = start_node().await;
    let name = Uuid::new_v4().to_simple().to_string();
    let first = remote_a
        .spawn_named(remote_b.address(), &name, "EchoActor", Duration::from_secs(5))
        .await;
    assert_eq!(first.status_code, ResponseStatusCode::Ok as i32);
    let second = remote_a
        .spawn_named(remote_b.address(), &name, "EchoActor", Duration::from_secs(5))
        .await;
    assert_eq!(
        second.status_code,
        ResponseStatusCode::ProcessNameAlreadyExist as i32
    );
    assert_eq!(second.pid, first.pid);
}

#[tokio::test]
async fn test_remote_spawn_unknown_kind_is_an_error() {
    let (_system_a, remote_a) = start_node().await;
    let (_system_b, remote_b) = start_node().await;
    let response = remote_a
        .spawn_named(
            remote_b.address(),
            "whatever",
            "NoSuchKind",
            Duration::from_secs(5),
        )
        .await;
    assert_eq!(response.status_code, ResponseStatusCode::Error as i32);
    assert_eq!(response.pid, None);
}

#[tokio::test]
async fn test_watch_remote_stop_delivers_terminated_once() {
    let (system_a, _remote_a) = start_node().await;
    let (system_b, remote_b) = start_node().await;
    system_b
        .root()
        .spawn_named(&echo_props(), "stoppable")
        .unwrap();
    let watchee = Pid::new(remote_b.address(), "stoppable");
    let (observed_tx, observed_rx) = flume::unbounded();
    system_a
        .root()
        .spawn(&watcher_props(watchee.clone(), observed_tx))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    // Stop the remote actor from the watcher's node.
    system_a.root().stop(&watchee);
    let terminated = tokio::time::timeout(Duration::from_secs(5), observed_rx.recv_async())
        .await
        .expect("terminated notice expected")
        .unwrap();
    assert_eq!(terminated.who, Some(watchee));
    assert!(!terminated.address_terminated);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(observed_rx.try_recv().is_err(), "exactly one notice expected");
}

#[tokio::test]
async fn test_unwatch_is_selective() {
    let (system_a, _remote_a) = start_node().await;
    let (system_b, remote_b) = start_node().await;
    system_b
        .root()
        .spawn_named(&echo_props(), "observed")
        .unwrap();
    let watchee = Pid::new(remote_b.address(), "observed");
    let (observed_tx_1, observed_rx_1) = flume::unbounded();
    let (observed_tx_2, observed_rx_2) = flume::unbounded();
    system_a
        .root()
        .spawn(&watcher_props(watchee.clone(), observed_tx_1))
        .unwrap();
    let watcher_2 = system_a
        .root()
        .spawn(&watcher_props(watchee.clone(), observed_tx_2))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    system_a
        .root()
        .send(&watcher_2, MessageEnvelope::new(UnwatchNow));
    tokio::time::sleep(Duration::from_secs(1)).await;
    system_a.root().stop(&watchee);
    let terminated = tokio::time::timeout(Duration::from_secs(5), observed_rx_1.recv_async())
        .await
        .expect("first watcher should be notified")
        .unwrap();
    assert_eq!(terminated.who, Some(watchee));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(
        observed_rx_2.try_recv().is_err(),
        "unwatched watcher must not be notified"
    );
}

#[tokio::test]
async fn test_peer_loss_synthesizes_address_terminated() {
    let (system_a, _remote_a) = start_node().await;
    let (system_b, remote_b) = start_node().await;
    system_b
        .root()
        .spawn_named(&echo_props(), "lonely")
        .unwrap();
    let watchee = Pid::new(remote_b.address(), "lonely");
    let (observed_tx, observed_rx) = flume::unbounded();
    system_a
        .root()
        .spawn(&watcher_props(watchee.clone(), observed_tx))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    remote_b.shutdown().await.unwrap();
    let terminated = tokio::time::timeout(Duration::from_secs(5), observed_rx.recv_async())
        .await
        .expect("peer loss should synthesize a termination")
        .unwrap();
    assert_eq!(terminated.who, Some(watchee));
    assert!(terminated.address_terminated);
}

#[tokio::test]
async fn test_unreachable_endpoint_dead_letters_every_pending_message() {
    init_tracing();
    let system = ActorSystem::new();
    let config = RemoteConfig::default()
        .with_host("127.0.0.1")
        .with_port(0)
        .with_max_retries(2)
        .with_retry_back_off(Duration::from_millis(10));
    let remote = Remote::start(&system, config).await.unwrap();
    register_test_types(&remote);
    let dead_letters = system.event_stream().subscribe();
    // Nothing listens on port 9; every send is doomed.
    let unreachable = Pid::new("127.0.0.1:9", "ghost");
    let num_messages = 5u64;
    for value in 0..num_messages {
        system
            .root()
            .send(&unreachable, MessageEnvelope::new(Num { value }));
    }
    let mut dead = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while dead.len() < num_messages as usize {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("expected all pending messages to dead-letter in time");
        let event = tokio::time::timeout(remaining, dead_letters.recv_async())
            .await
            .expect("dead letter expected")
            .unwrap();
        if let Some(dead_letter) = event.downcast_ref::<DeadLetterEvent>() {
            assert_eq!(dead_letter.target, unreachable);
            let num = dead_letter
                .message
                .downcast_ref::<Num>()
                .expect("the dead letter should carry the original message");
            dead.push(num.value);
        }
    }
    assert_eq!(dead, (0..num_messages).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_ordering_is_preserved_per_target() {
    let (system_a, _remote_a) = start_node().await;
    let (system_b, remote_b) = start_node().await;
    let collector_props = Props::from_producer(|| Box::new(CollectorActor::default()));
    system_b
        .root()
        .spawn_named(&collector_props, "collector")
        .unwrap();
    let collector = Pid::new(remote_b.address(), "collector");
    let num_messages = 100u64;
    for value in 0..num_messages {
        system_a
            .root()
            .send(&collector, MessageEnvelope::new(Num { value }));
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot: Numbers = system_a
            .root()
            .request_async(&collector, GetNumbers {}, Duration::from_secs(5))
            .await
            .expect("collector should answer");
        if snapshot.values.len() as u64 == num_messages {
            assert_eq!(snapshot.values, (0..num_messages).collect::<Vec<_>>());
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "collector only saw {} of {} messages",
            snapshot.values.len(),
            num_messages
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

//! Single-node behavior: echo, selective receive, channels, identities.

use serde::{Deserialize, Serialize};
use skein::{ClosureRegistry, Node, NodeConfig, Pid, ReceiveError};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::oneshot;

async fn start_node() -> Node {
    Node::start(NodeConfig::new("localhost"), ClosureRegistry::new())
        .await
        .expect("node starts")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    from: Pid,
    text: String,
}

#[tokio::test]
async fn echo_between_two_local_processes() {
    let node = start_node().await;
    let handle = node.handle();

    let echoer = handle.spawn_local(|ctx| async move {
        while let Ok(ping) = ctx.receive::<Ping>().await {
            let _ = ctx.send(&ping.from, &ping.text).await;
        }
    });

    let (tx, rx) = oneshot::channel();
    handle.spawn_local(move |ctx| async move {
        let me = ctx.pid().clone();
        ctx.send(
            &echoer,
            &Ping {
                from: me,
                text: "hello".into(),
            },
        )
        .await
        .unwrap();
        let reply = ctx.receive::<String>().await.unwrap();
        let _ = tx.send(reply);
    });

    assert_eq!(rx.await.unwrap(), "hello");
    node.shutdown().await;
}

#[tokio::test]
async fn selective_receive_orders_by_type_then_age() {
    let node = start_node().await;
    let handle = node.handle();

    let (tx, rx) = oneshot::channel();
    let p = handle.spawn_local(move |ctx| async move {
        // Strings first, regardless of the older queued integers.
        let s1 = ctx.receive::<String>().await.unwrap();
        let s2 = ctx.receive::<String>().await.unwrap();
        let i1 = ctx.receive::<i64>().await.unwrap();
        let i2 = ctx.receive::<i64>().await.unwrap();
        let _ = tx.send((s1, s2, i1, i2));
    });

    // Mailbox contents, in order: [1, "a", 2, "b"].
    handle.send(&p, &1i64).await.unwrap();
    handle.send(&p, &"a".to_string()).await.unwrap();
    handle.send(&p, &2i64).await.unwrap();
    handle.send(&p, &"b".to_string()).await.unwrap();

    let (s1, s2, i1, i2) = rx.await.unwrap();
    assert_eq!((s1.as_str(), s2.as_str(), i1, i2), ("a", "b", 1, 2));
    node.shutdown().await;
}

#[tokio::test]
async fn multi_arm_select_dispatches() {
    let node = start_node().await;
    let handle = node.handle();

    let (tx, rx) = oneshot::channel();
    let p = handle.spawn_local(move |ctx| async move {
        let mut seen = Vec::new();
        for _ in 0..2 {
            let label = ctx
                .select::<String>()
                .on(|s: String| format!("str:{}", s))
                .on(|n: i64| format!("int:{}", n))
                .recv()
                .await
                .unwrap();
            seen.push(label);
        }
        let _ = tx.send(seen);
    });

    handle.send(&p, &7i64).await.unwrap();
    handle.send(&p, &"x".to_string()).await.unwrap();

    assert_eq!(rx.await.unwrap(), vec!["int:7", "str:x"]);
    node.shutdown().await;
}

#[tokio::test]
async fn receive_timeout_leaves_mailbox_intact() {
    let node = start_node().await;
    let handle = node.handle();

    let (tx, rx) = oneshot::channel();
    let p = handle.spawn_local(move |ctx| async move {
        let timed_out = matches!(
            ctx.receive_timeout::<String>(Duration::from_millis(30)).await,
            Err(ReceiveError::Timeout)
        );
        // The integer sent before the receive must still be there.
        let n = ctx.receive::<i64>().await.unwrap();
        let _ = tx.send((timed_out, n));
    });
    handle.send(&p, &5i64).await.unwrap();

    let (timed_out, n) = rx.await.unwrap();
    assert!(timed_out);
    assert_eq!(n, 5);
    node.shutdown().await;
}

#[tokio::test]
async fn channel_fan_in_preserves_per_producer_order() {
    let node = start_node().await;
    let handle = node.handle();

    let (sp, rp) = handle.open_channel::<(u8, u32)>();

    for producer in 0..4u8 {
        let sp = sp.clone();
        handle.spawn_local(move |ctx| async move {
            for value in 1..=100u32 {
                ctx.send_channel(&sp, &(producer, value)).await.unwrap();
            }
        });
    }

    let mut per_producer: Vec<Vec<u32>> = vec![Vec::new(); 4];
    for _ in 0..400 {
        let (producer, value) = rp
            .recv_timeout(Duration::from_secs(5))
            .await
            .expect("fan-in value");
        per_producer[producer as usize].push(value);
    }

    for values in &per_producer {
        assert_eq!(values, &(1..=100).collect::<Vec<_>>());
    }
    node.shutdown().await;
}

#[tokio::test]
async fn pids_are_unique_and_owned_by_the_node() {
    let node = start_node().await;
    let handle = node.handle();

    let mut seen = HashSet::new();
    for _ in 0..50 {
        let pid = handle.spawn_local(|_ctx| async {});
        assert_eq!(pid.node(), handle.id());
        assert!(seen.insert(pid.index()), "local index reused");
    }
    node.shutdown().await;
}

#[tokio::test]
async fn send_to_unknown_local_pid_is_silent() {
    let node = start_node().await;
    let handle = node.handle();

    let ghost = Pid::new(handle.id().clone(), 999_999);
    // Must not error; the message is dropped.
    handle.send(&ghost, &"into the void".to_string()).await.unwrap();
    node.shutdown().await;
}

#[tokio::test]
async fn monitored_process_reports_termination() {
    let node = start_node().await;
    let handle = node.handle();

    let worker = handle.spawn_local(|ctx| async move {
        // Terminate on the first message.
        let _ = ctx.recv_any().await;
    });

    let (tx, rx) = oneshot::channel();
    let worker_for_watcher = worker.clone();
    handle.spawn_local(move |ctx| async move {
        assert!(ctx.monitor(&worker_for_watcher));
        ctx.send(&worker_for_watcher, &()).await.unwrap();
        let notice = ctx.receive::<skein::ExitNotice>().await.unwrap();
        let _ = tx.send(notice);
    });

    let notice = rx.await.unwrap();
    assert_eq!(notice.pid, worker);
    assert!(notice.reason.is_normal());
    node.shutdown().await;
}

#[tokio::test]
async fn spawn_on_own_node_materializes_locally() {
    let node = start_node().await;
    let handle = node.handle();
    let self_id = handle.id().clone();

    // The built-in echo closure works locally too.
    let echoer = handle
        .spawn(&self_id, skein::Closure::nullary(skein::ECHO_CLOSURE))
        .await
        .expect("local spawn through the closure registry");
    assert_eq!(echoer.node(), &self_id);

    let (tx, rx) = oneshot::channel();
    handle.spawn_local(move |ctx| async move {
        let request = skein::EchoRequest {
            reply_to: ctx.pid().clone(),
            env: skein::Envelope::seal(&"bounce".to_string()).unwrap(),
        };
        ctx.send(&echoer, &request).await.unwrap();
        let back = ctx.receive::<String>().await.unwrap();
        let _ = tx.send(back);
    });

    assert_eq!(rx.await.unwrap(), "bounce");
    node.shutdown().await;
}

#[tokio::test]
async fn bound_role_runs_to_completion() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_role = ran.clone();

    let mut closures = ClosureRegistry::new();
    closures.register("test.master", move |(), _ctx| {
        let ran = ran_in_role.clone();
        async move {
            ran.store(true, Ordering::SeqCst);
        }
    });
    closures.bind_role("MASTER", "test.master");

    let mut config = NodeConfig::new("localhost");
    config.role = "MASTER".into();
    let node = Node::start(config, closures).await.unwrap();

    // run() returns once the role body does.
    tokio::time::timeout(Duration::from_secs(5), node.run())
        .await
        .expect("role body returns");
    assert!(ran.load(Ordering::SeqCst));
    node.shutdown().await;
}

#[tokio::test]
async fn shutdown_lets_receivers_drain_accepted_mail() {
    let node = start_node().await;
    let handle = node.handle();

    let (tx, rx) = oneshot::channel();
    let p = handle.spawn_local(move |ctx| async move {
        let mut total = 0i64;
        for _ in 0..10 {
            total += ctx.receive::<i64>().await.unwrap();
        }
        let _ = tx.send(total);
    });
    for i in 0..10i64 {
        handle.send(&p, &i).await.unwrap();
    }

    node.shutdown().await;
    assert_eq!(rx.await.unwrap(), 45);
}

//! End-to-end protocol tests over a Unix socket pair.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use kscale_autoscale::Coordinator;
use kscale_store::MemoryScaleStore;
use kscale_udf::{Handler, run_connection};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;

struct Session {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Session {
    fn start(coordinator: Arc<Coordinator>) -> Self {
        let (client, server) = UnixStream::pair().unwrap();
        let task = tokio::spawn(run_connection(server, Handler::new(coordinator, 1)));
        let (read, write) = client.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
            task,
        }
    }

    async fn send(&mut self, message: Value) -> Value {
        let mut line = serde_json::to_vec(&message).unwrap();
        line.push(b'\n');
        self.write.write_all(&line).await.unwrap();
        let reply = self.lines.next_line().await.unwrap().expect("connection closed");
        serde_json::from_str(&reply).unwrap()
    }

    async fn close(self) {
        drop(self.write);
        self.task.await.unwrap().unwrap();
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

fn string(name: &str, value: &str) -> Value {
    json!({"name": name, "values": [{"type": "string", "value": value}]})
}

fn int(name: &str, value: i64) -> Value {
    json!({"name": name, "values": [{"type": "int", "value": value}]})
}

fn boolean(name: &str, value: bool) -> Value {
    json!({"name": name, "values": [{"type": "bool", "value": value}]})
}

fn init(simulate: bool) -> Value {
    json!({
        "type": "init",
        "options": [
            string("id", "abc"),
            string("when", "cpu_usage > 8"),
            string("by", "current + 2"),
            int("min_instances", 1),
            int("max_instances", 10),
            string("cooldown", "1m"),
            boolean("simulate", simulate),
        ]
    })
}

fn point(cpu: f64, time: i64) -> Value {
    json!({
        "type": "point",
        "name": "cpu",
        "time": time,
        "database": "telegraf",
        "retention_policy": "autogen",
        "tags": {"service": "chat"},
        "fields_double": {"cpu_usage": cpu},
        "fields_int": {"queue_size": 10}
    })
}

fn setup() -> (Arc<MemoryScaleStore>, Arc<Coordinator>) {
    let store = Arc::new(MemoryScaleStore::new().with_service("abc", "chat", 1));
    let coordinator = Arc::new(Coordinator::new(store.clone()));
    (store, coordinator)
}

#[tokio::test]
async fn scales_once_then_passes_through_in_cooldown() {
    let (store, coordinator) = setup();
    let mut session = Session::start(coordinator);

    let info = session.send(json!({"type": "info"})).await;
    assert_eq!(info["type"], "info");
    assert_eq!(info["wants"], "stream");
    assert_eq!(info["provides"], "stream");
    assert_eq!(info["options"]["cooldown"], json!(["string", "duration"]));

    let reply = session.send(init(false)).await;
    assert_eq!(reply, json!({"type": "init", "success": true}));

    let time = now_nanos();
    let reply = session.send(point(10.0, time)).await;
    assert_eq!(reply["type"], "point");
    assert_eq!(reply["time"], time);
    assert_eq!(reply["tags"]["service"], "chat");
    assert_eq!(reply["fields_int"], json!({"scale": 3}));
    assert_eq!(reply["fields_double"], json!({}));
    assert_eq!(store.writes(), vec![("abc".to_string(), 3)]);

    let reply = session.send(point(10.0, time + 1_000_000)).await;
    assert_eq!(reply["fields_double"]["cpu_usage"], 10.0);
    assert_eq!(reply["fields_int"], json!({"queue_size": 10}));
    assert_eq!(store.writes().len(), 1);

    session.close().await;
}

#[tokio::test]
async fn simulate_reports_scale_without_writing() {
    let (store, coordinator) = setup();
    let mut session = Session::start(coordinator);

    session.send(init(true)).await;
    let reply = session.send(point(10.0, now_nanos())).await;
    assert_eq!(reply["fields_int"], json!({"scale": 3}));
    assert!(store.writes().is_empty());

    session.close().await;
}

#[tokio::test]
async fn low_cpu_passes_through() {
    let (store, coordinator) = setup();
    let mut session = Session::start(coordinator);

    session.send(init(false)).await;
    let reply = session.send(point(5.0, now_nanos())).await;
    assert_eq!(reply["fields_double"]["cpu_usage"], 5.0);
    assert_eq!(store.reads(), 0);

    session.close().await;
}

#[tokio::test]
async fn invalid_init_reports_every_problem() {
    let (_store, coordinator) = setup();
    let mut session = Session::start(coordinator);

    let reply = session
        .send(json!({
            "type": "init",
            "options": [
                string("when", "cpu_usage > 8"),
                int("min_instances", 4),
                int("max_instances", 2),
            ]
        }))
        .await;
    assert_eq!(reply["type"], "init");
    assert_eq!(reply["success"], false);
    assert_eq!(
        reply["error"],
        "must supply `id` of the service to scale; \
         `max_instances` must be greater or equal `min_instances`"
    );

    let reply = session.send(point(10.0, now_nanos())).await;
    assert_eq!(
        reply,
        json!({"type": "error", "error": "handler is not initialized"})
    );

    session.close().await;
}

#[tokio::test]
async fn batches_are_rejected() {
    let (_store, coordinator) = setup();
    let mut session = Session::start(coordinator);

    session.send(init(false)).await;
    let reply = session.send(json!({"type": "begin_batch", "name": "cpu"})).await;
    assert_eq!(
        reply,
        json!({"type": "error", "error": "batching not supported"})
    );

    session.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connections_share_one_coordinator() {
    let (store, coordinator) = setup();
    let time = now_nanos();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            let mut session = Session::start(coordinator);
            session.send(init(false)).await;
            let reply = session.send(point(10.0, time)).await;
            session.close().await;
            reply
        }));
    }

    let mut scaled = 0;
    for task in tasks {
        let reply = task.await.unwrap();
        if reply["fields_int"].get("scale").is_some() {
            scaled += 1;
        }
    }

    assert_eq!(scaled, 1);
    assert_eq!(store.writes(), vec![("abc".to_string(), 3)]);
}

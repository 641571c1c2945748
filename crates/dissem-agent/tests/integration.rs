use dissem_agent::{Agent, AgentConfig, KeyConfig};
use dissem_core::{Key, Version};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

const KEY: Key = Key::from_raw(5);

fn config(seed: u64, image: Option<Uuid>) -> AgentConfig {
    AgentConfig {
        bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        seed: Some(seed),
        image_guid: image,
        keys: vec![KeyConfig {
            key: Some(KEY.raw()),
            size: 1,
            redundancy: 1,
            imin_ms: 20,
            imax_ms: 200,
            initial: None,
        }],
        ..AgentConfig::default()
    }
}

async fn pair(image_a: Option<Uuid>, image_b: Option<Uuid>) -> (Agent, Agent) {
    let mut a = Agent::new(config(1, image_a)).await.unwrap();
    let mut b = Agent::new(config(2, image_b)).await.unwrap();
    a.add_peer(b.local_addr().unwrap());
    b.add_peer(a.local_addr().unwrap());
    (a, b)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn console_change_reaches_peer() {
    let (a, b) = pair(None, None).await;

    let (console_a, rx_a) = mpsc::channel(4);
    let (_console_b, rx_b) = mpsc::channel(4);
    console_a.send("change 5 Kg==".to_string()).await.unwrap();

    let a_task = tokio::spawn(a.serve(rx_a, tokio::time::sleep(Duration::from_secs(2))));
    let b_task = tokio::spawn(b.serve(rx_b, tokio::time::sleep(Duration::from_secs(2))));

    let a = a_task.await.unwrap().unwrap();
    let b = b_task.await.unwrap().unwrap();

    for agent in [&a, &b] {
        let view = agent.node().get(KEY).unwrap();
        assert_eq!(view.version(), Version::from_raw(1));
        assert_eq!(view.bytes(), &[0x2A]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_side_wins_after_both_change() {
    let (mut a, mut b) = pair(None, None).await;
    let now = Instant::now();
    a.node_mut().change(KEY, &[0x01], now).unwrap();
    a.node_mut().change(KEY, &[0x02], now).unwrap();
    b.node_mut().change(KEY, &[0x09], now).unwrap();

    let (_console_a, rx_a) = mpsc::channel(1);
    let (_console_b, rx_b) = mpsc::channel(1);
    let a_task = tokio::spawn(a.serve(rx_a, tokio::time::sleep(Duration::from_secs(2))));
    let b_task = tokio::spawn(b.serve(rx_b, tokio::time::sleep(Duration::from_secs(2))));

    let b = b_task.await.unwrap().unwrap();
    let a = a_task.await.unwrap().unwrap();

    for agent in [&a, &b] {
        let view = agent.node().get(KEY).unwrap();
        assert_eq!(view.version(), Version::from_raw(2));
        assert_eq!(view.bytes(), &[0x02]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn foreign_image_is_not_adopted() {
    let (mut a, b) = pair(Some(Uuid::from_u128(1)), Some(Uuid::from_u128(2))).await;
    a.node_mut().change(KEY, &[0x33], Instant::now()).unwrap();

    let (_console_a, rx_a) = mpsc::channel(1);
    let (_console_b, rx_b) = mpsc::channel(1);
    let a_task = tokio::spawn(a.serve(rx_a, tokio::time::sleep(Duration::from_millis(800))));
    let b_task = tokio::spawn(b.serve(rx_b, tokio::time::sleep(Duration::from_millis(800))));

    a_task.await.unwrap().unwrap();
    let b = b_task.await.unwrap().unwrap();

    assert_eq!(b.node().get(KEY).unwrap().version(), Version::UNKNOWN);
}

#[tokio::test]
async fn misconfigured_keys_abort_startup() {
    let mut duplicate = config(3, None);
    duplicate.keys.push(duplicate.keys[0].clone());
    assert!(Agent::new(duplicate).await.is_err());

    let mut oversized = config(4, None);
    oversized.mtu = 16;
    oversized.keys[0].size = 10;
    assert!(Agent::new(oversized).await.is_err());

    let mut summary_too_large = config(6, Some(Uuid::from_u128(1)));
    summary_too_large.mtu = 24;
    assert!(Agent::new(summary_too_large).await.is_err());

    let mut bad_initial = config(5, None);
    bad_initial.keys[0].initial = Some("AQI=".to_string());
    assert!(Agent::new(bad_initial).await.is_err());
}

#[tokio::test]
async fn smallest_accepted_mtu_fits_every_frame() {
    let image = Uuid::from_u128(1);
    let mut small = config(7, Some(image));
    small.mtu = dissem_proto::min_mtu(true);
    let mut agent = Agent::new(small).await.unwrap();

    let now = Instant::now();
    agent.node_mut().change(KEY, &[0x01], now).unwrap();
    let deadline = agent.node().next_deadline().unwrap();
    let data = agent.node_mut().poll(deadline);
    assert_eq!(data.len(), 1);
    assert!(dissem_proto::encode(&data[0]).len() <= dissem_proto::min_mtu(true));

    let mut summary = Vec::new();
    for _ in 0..4 {
        let deadline = agent.node().next_deadline().unwrap();
        summary.extend(agent.node_mut().poll(deadline));
    }
    assert!(!summary.is_empty());
    for msg in &summary {
        assert_eq!(dissem_proto::encode(msg).len(), dissem_proto::min_mtu(true));
    }
}

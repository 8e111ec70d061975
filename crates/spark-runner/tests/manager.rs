//! 管理器装配、重配与关闭语义的集成测试。

mod support;

use std::{
    fs,
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::json;
use spark_runner::{ConfigError, EngineState, InputChannel, Manager, ManagerError, OutputChannel};
use support::{scale, *};

struct Fixture {
    _dir: tempfile::TempDir,
    config_path: std::path::PathBuf,
    manager: Manager,
    out: InputChannel,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("conf").join("scale.toml");
    let out = sink().await;
    let settings = scale::settings(Some(config_path.clone()), vec![out.local_addr().clone()]);
    let manager = Manager::bootstrap(settings, &scale::resolver()).unwrap();
    Fixture {
        _dir: dir,
        config_path,
        manager,
        out,
    }
}

async fn roundtrip(fixture: &mut Fixture, feed: &mut OutputChannel, payload: &[u8]) -> Vec<u8> {
    feed.send(payload, SEND_TIMEOUT).await.unwrap();
    recv(&mut fixture.out).await.to_vec()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bootstrap_writes_default_configuration() {
    let fx = fixture().await;
    assert!(fx.config_path.exists(), "缺失的配置文件应以默认值生成");

    let report = fx.manager.status();
    assert_eq!(report.status.component_type, scale::PATH);
    assert!(!report.status.running, "engine_autostart = false 时不应自动启动");
    assert_eq!(report.status.state, EngineState::Idle);
    assert_eq!(report.status.config_epoch, 0);
    assert_eq!(report.configs["tests"]["Scale"]["params"]["factor"], json!(1));
    assert_eq!(report.configs["tests"]["Scale"]["method_type"], json!("scale"));
    assert_eq!(report.status.component_id.len(), 32);

    assert!(fx.manager.autostart().unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconfigure_takes_effect_and_persists() {
    let mut fx = fixture().await;
    assert_eq!(fx.manager.start().unwrap().message, "engine started");
    assert_eq!(fx.manager.start().unwrap().message, "engine already running");
    let mut feed = feeder(fx.manager.engine());
    assert_eq!(roundtrip(&mut fx, &mut feed, b"ab").await, b"ab");

    let reply = fx
        .manager
        .reconfigure(&json!({ "tests": { "Scale": { "params": { "factor": 2 } } } }), true)
        .unwrap();
    assert!(reply.ok);
    assert_eq!(reply.message, "reconfigure: ok");
    assert_eq!(roundtrip(&mut fx, &mut feed, b"ab").await, b"abab");

    let on_disk = spark_runner::config::document::read(&fx.config_path).unwrap();
    assert_eq!(on_disk["tests"]["Scale"]["params"]["factor"], json!(2));
    assert_eq!(fx.manager.status().status.config_epoch, 1);

    assert_eq!(fx.manager.stop().unwrap().message, "engine stopped");
    assert_eq!(fx.manager.stop().unwrap().message, "engine not running");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconfigure_without_persist_leaves_file_untouched() {
    let mut fx = fixture().await;
    let before = fs::read(&fx.config_path).unwrap();
    fx.manager.start().unwrap();
    let mut feed = feeder(fx.manager.engine());

    fx.manager
        .reconfigure(&json!({ "tests": { "Scale": { "params": { "suffix": "!" } } } }), false)
        .unwrap();
    assert_eq!(roundtrip(&mut fx, &mut feed, b"x").await, b"x!");
    assert_eq!(fs::read(&fx.config_path).unwrap(), before);

    fx.manager.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_update_changes_nothing() {
    let mut fx = fixture().await;
    let before = fs::read(&fx.config_path).unwrap();
    fx.manager.start().unwrap();
    let mut feed = feeder(fx.manager.engine());

    let err = fx
        .manager
        .reconfigure(&json!({ "tests": { "Scale": { "params": { "factor": 99, "colour": "red" } } } }), true)
        .unwrap_err();
    let ManagerError::Config(ConfigError::Validation(validation)) = &err else {
        panic!("期望校验错误，实际为 {err:?}");
    };
    assert!(validation.mentions("factor"));
    assert!(validation.mentions("colour"), "应一次性报告全部违规字段");
    assert_eq!(err.code(), "runner.config.validation");

    assert_eq!(fs::read(&fx.config_path).unwrap(), before, "失败的重配不得改写文件");
    assert_eq!(fx.manager.status().status.config_epoch, 0);
    assert_eq!(roundtrip(&mut fx, &mut feed, b"ab").await, b"ab");

    fx.manager.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn component_rejection_rolls_back_the_file() {
    let fx = fixture().await;
    let before = fs::read(&fx.config_path).unwrap();

    let err = fx
        .manager
        .reconfigure(&json!({ "tests": { "Scale": { "params": { "suffix": "reject" } } } }), true)
        .unwrap_err();
    assert!(matches!(err, ManagerError::Config(ConfigError::Rejected(_))), "实际为 {err:?}");
    assert_eq!(fs::read(&fx.config_path).unwrap(), before);
    assert_eq!(fx.manager.status().status.config_epoch, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_update_is_a_no_op() {
    let fx = fixture().await;
    for empty in [json!({}), serde_json::Value::Null] {
        let reply = fx.manager.reconfigure(&empty, true).unwrap();
        assert!(reply.ok);
        assert_eq!(reply.message, "reconfigure: no-op (empty config data)");
    }
    assert_eq!(fx.manager.status().status.config_epoch, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_engine_and_is_final() {
    let fx = fixture().await;
    let signal = fx.manager.shutdown_signal();
    fx.manager.start().unwrap();

    let reply = fx.manager.shutdown().unwrap();
    assert!(reply.ok, "{reply:?}");
    assert!(signal.is_triggered());
    assert_eq!(fx.manager.engine().state(), EngineState::Stopped);
    tokio::time::timeout(RECV_TIMEOUT, signal.wait())
        .await
        .expect("关闭信号应已触发");

    assert!(matches!(fx.manager.start(), Err(ManagerError::ShutDown)));
    assert!(matches!(
        fx.manager.reconfigure(&json!({ "all_suffix": "?" }), false),
        Err(ManagerError::ShutDown)
    ));
    assert_eq!(
        fx.manager.shutdown().unwrap().message,
        "shutdown already in progress"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stays_within_join_timeout_behind_a_stuck_message() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = scale::settings(Some(dir.path().join("scale.toml")), Vec::new());
    settings.manager_thread_join_timeout_ms = 200;
    let manager = Arc::new(Manager::bootstrap(settings, &scale::resolver()).unwrap());
    manager.start().unwrap();

    let mut feed = feeder(manager.engine());
    feed.send(b"sleep:3000", SEND_TIMEOUT).await.unwrap();
    wait_until(|| manager.engine().stats().received == 1).await;

    let reconfigure = {
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || {
            manager.reconfigure(&json!({ "tests": { "Scale": { "params": { "factor": 2 } } } }), false)
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let reply = {
        let manager = Arc::clone(&manager);
        tokio::task::spawn_blocking(move || manager.shutdown())
            .await
            .unwrap()
            .unwrap()
    };
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_millis(1000),
        "关闭耗时应受 join 超时约束，实际为 {elapsed:?}"
    );
    assert!(!reply.ok, "工作线程未退出时应返回告警：{reply:?}");
    assert!(manager.shutdown_signal().is_triggered());

    let err = reconfigure.join().unwrap().unwrap_err();
    assert_eq!(err.code(), "runner.config.rejected", "组件忙时重配应被拒绝");
    assert_eq!(manager.status().status.config_epoch, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_reports_a_timeout_instead_of_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = scale::settings(Some(dir.path().join("scale.toml")), Vec::new());
    settings.manager_thread_join_timeout_ms = 150;
    let manager = Manager::bootstrap(settings, &scale::resolver()).unwrap();
    manager.start().unwrap();

    let mut feed = feeder(manager.engine());
    feed.send(b"sleep:1000", SEND_TIMEOUT).await.unwrap();
    wait_until(|| manager.engine().stats().received == 1).await;

    let started = Instant::now();
    let err = manager.stop().unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(800));
    assert_eq!(err.code(), "runner.engine.stop_timeout");
    assert_eq!(manager.engine().state(), EngineState::Stopping);

    wait_until(|| manager.engine().state() == EngineState::Stopped).await;
}

#[test]
fn unknown_component_type_fails_bootstrap() {
    let mut settings = scale::settings(None, Vec::new());
    settings.component_type = "tests.Missing".to_owned();
    let err = match Manager::bootstrap(settings, &scale::resolver()) {
        Ok(_) => panic!("未知组件路径应导致装配失败"),
        Err(err) => err,
    };
    assert_eq!(err.code(), "runner.resolve.not_found");
}

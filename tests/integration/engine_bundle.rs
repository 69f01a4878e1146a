//! Engine bootstrap and test-case bundles.

use std::time::Duration;

use super::common::fixtures::{FakeHttpService, TestDirs};
use replaykit::adapters::{HttpCodec, HttpRequestData};
use replaykit::bundle::{pack_bundle, unpack_bundle, PayloadType, TestSuiteManifest};
use replaykit::config::EngineArgs;
use replaykit::{Engine, Intercepted, Mode};

/// A recording run produces a bundle that a replay engine can start from
#[tokio::test]
async fn test_bundle_replays_recorded_calls() {
    let dirs = TestDirs::new();
    let req = HttpRequestData::new("POST", "http://svc/orders", br#"{"id":1}"#.to_vec());

    let (bundle, recorded) = {
        let engine = Engine::init(dirs.config(Mode::Record)).unwrap();
        let service = FakeHttpService::new().route("http://svc/orders", r#"{"status":"paid"}"#);
        let http = Intercepted::new(service, HttpCodec, engine.manager().clone());

        let rsp = http.call(&req).await.unwrap();
        let bundle = engine
            .recorder()
            .unwrap()
            .record_http("create order", &req, &rsp)
            .unwrap();
        engine.shutdown();
        (bundle, rsp)
    };

    let manifest = TestSuiteManifest::load(&bundle).unwrap().unwrap();
    assert_eq!(manifest.version, 1);
    assert_eq!(manifest.db, vec!["replaykit.db".to_string()]);
    assert_eq!(manifest.cases.len(), 1);
    assert_eq!(manifest.cases[0].req_type, PayloadType::Json);
    assert_eq!(manifest.cases[0].uri, "http://svc/orders");
    assert!(manifest
        .flags
        .contains(&"--replaykit-db-file=replaykit.db".to_string()));
    assert_eq!(
        std::fs::read(bundle.join(&manifest.cases[0].req)).unwrap(),
        req.body
    );

    let args = EngineArgs::parse_flags(&manifest.flags).unwrap();
    let mut config = dirs.config(Mode::Off);
    args.apply(&mut config, &bundle).unwrap();
    assert_eq!(config.mode, Mode::Replay);
    assert_eq!(config.db_path(), bundle.join(&manifest.db[0]));

    let server_time = args.server_time.clone().unwrap();
    let engine = Engine::init(config).unwrap();
    assert_eq!(
        engine.clock().now(),
        chrono::DateTime::parse_from_rfc3339(&server_time).unwrap()
    );
    let http = Intercepted::new(FakeHttpService::new(), HttpCodec, engine.manager().clone());

    assert_eq!(http.call(&req).await.unwrap(), recorded);
    assert_eq!(http.delegate().calls(), 0);
}

/// Count-based rotation moves later cases into a fresh bundle
#[tokio::test]
async fn test_rotate_every_starts_new_bundle() {
    let dirs = TestDirs::new();
    let mut config = dirs.config(Mode::Record);
    config.rotate_every = 2;
    config.refresh_interval_secs = 3600;
    let engine = Engine::init(config).unwrap();
    let recorder = engine.recorder().unwrap().clone();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let first = recorder
        .record_rpc("ping", "Health/Ping", &serde_json::json!({}), &"pong")
        .unwrap();
    let same = recorder
        .record_rpc("ping", "Health/Ping", &serde_json::json!({}), &"pong")
        .unwrap();
    let next = recorder
        .record_rpc("ping", "Health/Ping", &serde_json::json!({}), &"pong")
        .unwrap();

    assert_eq!(first, same);
    assert_ne!(first, next);
    let manifest = TestSuiteManifest::load(&first).unwrap().unwrap();
    assert_eq!(manifest.version, 2);
    assert_eq!(manifest.cases[0].req, "reg_req_0.dat");
    assert_eq!(manifest.cases[1].req, "reg_req.dat");
}

/// A packed bundle unpacks to the same manifest
#[tokio::test]
async fn test_pack_and_unpack_bundle() {
    let dirs = TestDirs::new();
    let engine = Engine::init(dirs.config(Mode::Record)).unwrap();
    let bundle = engine
        .recorder()
        .unwrap()
        .record_rpc("lookup", "Users/Get", &serde_json::json!({"id": 9}), &"bob")
        .unwrap();
    engine.shutdown();

    let archive = dirs.root().join("bundle.zip");
    let packed = pack_bundle(&bundle, &archive).unwrap();
    assert!(packed >= 4);

    let out = dirs.root().join("restored");
    unpack_bundle(&archive, &out, false).unwrap();
    assert_eq!(
        TestSuiteManifest::load(&out).unwrap(),
        TestSuiteManifest::load(&bundle).unwrap()
    );
    assert!(unpack_bundle(&archive, &out, false).is_err());
    unpack_bundle(&archive, &out, true).unwrap();
}

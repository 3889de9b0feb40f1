//! End-to-end behavior of the server role: writes, reads and watchers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use siteconf::deploy::DeployType;
use siteconf::site::{ConfError, Problems, RawConfig, Unified, ValidatorRegistry};

mod common;

#[tokio::test]
async fn test_read_after_write() {
    let (conf, _) = common::start_server("{}", ValidatorRegistry::new());
    let server = conf.server.clone().unwrap();

    let before = conf.client.raw().await;
    let input = RawConfig::from_site(r#"{"externalURL": "https://sourcegraph.example.com"}"#);
    server.write(&input, before.id, 1).await.unwrap();

    let cfg = conf.client.get().await;
    assert_eq!(cfg.site.external_url, "https://sourcegraph.example.com");
    assert_eq!(conf.client.raw().await.id, before.id + 1);
}

#[tokio::test]
async fn test_concurrent_editors_conflict() {
    let (conf, _) = common::start_server("{}", ValidatorRegistry::new());
    let server = conf.server.clone().unwrap();
    let id = conf.client.raw().await.id;

    server
        .write(&RawConfig::from_site(r#"{"licenseKey": "first"}"#), id, 1)
        .await
        .unwrap();
    let err = server
        .write(&RawConfig::from_site(r#"{"licenseKey": "second"}"#), id, 2)
        .await
        .unwrap_err();

    assert!(matches!(err, ConfError::Conflict { .. }));
    assert_eq!(conf.client.get().await.site.license_key.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_watchers_see_log_section_added() {
    let (conf, source) = common::start_server("{}", ValidatorRegistry::new());

    let seen: Arc<Mutex<Vec<Arc<Unified>>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    conf.client
        .watch(move |cfg| recorder.lock().unwrap().push(cfg))
        .await;
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(seen.lock().unwrap()[0].site.log.is_none());

    source.set_site(r#"{"log":{}}"#);
    common::wait_until(Duration::from_secs(5), || seen.lock().unwrap().len() == 2).await;

    assert!(seen.lock().unwrap()[1].site.log.is_some());
    assert_eq!(conf.client.raw().await.site, r#"{"log":{}}"#);
}

#[tokio::test]
async fn test_unchanged_source_does_not_notify() {
    let (conf, _) = common::start_server("{}", ValidatorRegistry::new());

    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    conf.client
        .watch(move |_| *counter.lock().unwrap() += 1)
        .await;

    // Many poll rounds of the same raw value.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_invalid_source_value_keeps_last_valid() {
    let (conf, source) = common::start_server(r#"{"licenseKey": "good"}"#, ValidatorRegistry::new());
    assert_eq!(conf.client.get().await.site.license_key.as_deref(), Some("good"));

    source.set_site("{ this is not json");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let first = conf.client.get().await;
    let second = conf.client.get().await;
    assert_eq!(first.site.license_key.as_deref(), Some("good"));
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_cached_value_follows_writes() {
    let (conf, _) = common::start_server(r#"{"update.channel": "release"}"#, ValidatorRegistry::new());
    let server = conf.server.clone().unwrap();
    let channel = conf
        .client
        .cached(|cfg| siteconf::site::computed::update_channel(cfg).to_string());
    assert_eq!(*channel.get().await, "release");

    let id = conf.client.raw().await.id;
    server
        .write(&RawConfig::from_site(r#"{"update.channel": "none"}"#), id, 1)
        .await
        .unwrap();
    for _ in 0..100 {
        if *channel.get().await == "none" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cached value never refreshed");
}

#[test]
fn test_registry_concatenates_contributions() {
    let mut registry = ValidatorRegistry::new();
    registry.contribute_validator(|_| Problems::from_site_messages(["x"]));
    registry.contribute_validator(|_| Problems::new());

    let problems = registry.validate(&RawConfig::from_site("{}")).unwrap();
    assert_eq!(problems.messages(), vec!["x"]);
}

#[test]
fn test_builtin_external_url_rule() {
    let single = ValidatorRegistry::with_builtin(DeployType::SingleDockerContainer);
    let messages = single
        .validate_site(r#"{"auth.providers": [{"type": "builtin"}]}"#)
        .unwrap();
    assert!(messages.iter().all(|m| !m.contains("externalURL")), "{:?}", messages);

    let k8s = ValidatorRegistry::with_builtin(DeployType::Kubernetes);
    let messages = k8s
        .validate_site(r#"{"auth.providers": [{"type": "builtin"}]}"#)
        .unwrap();
    assert_eq!(messages.iter().filter(|m| m.contains("externalURL")).count(), 1);
}

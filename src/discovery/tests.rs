use super::resolver::{put_addr, remove_addr};
use super::*;
use crate::config::{EtcdConf, RegisterConf};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

fn record(name: &str, addr: &str, version: &str, weight: i32) -> ServiceRecord {
    ServiceRecord {
        name: name.to_string(),
        addr: addr.to_string(),
        version: version.to_string(),
        weight,
        ttl: 10,
    }
}

#[test]
fn register_key_without_version() {
    let r = record("user", "10.0.0.1:9000", "", 1);
    assert_eq!(r.register_key(), "/user/10.0.0.1:9000");
}

#[test]
fn register_key_with_version() {
    let r = record("user", "10.0.0.2:9000", "v2", 2);
    assert_eq!(r.register_key(), "/user/v2/10.0.0.2:9000");
}

#[test]
fn parse_key_inverts_register_key() {
    for r in [
        record("user", "10.0.0.1:9000", "", 1),
        record("connector", "10.0.0.3:9100", "v2", 7),
    ] {
        let parsed = parse_key(&r.register_key()).expect("key should parse");
        assert_eq!(parsed.name, r.name);
        assert_eq!(parsed.version, r.version);
        assert_eq!(parsed.addr, r.addr);
    }
}

#[test]
fn parse_key_ignores_empty_segments() {
    let parsed = parse_key("//user///10.0.0.1:9000").expect("doubled slashes are fine");
    assert_eq!(parsed.name, "user");
    assert_eq!(parsed.addr, "10.0.0.1:9000");
    assert!(parsed.version.is_empty());
}

#[test]
fn parse_key_rejects_wrong_segment_counts() {
    for key in ["", "/", "/user", "/user/v2/10.0.0.1:9000/extra"] {
        assert!(
            matches!(parse_key(key), Err(DiscoveryError::InvalidKey(_))),
            "{:?} should be invalid",
            key
        );
    }
}

#[test]
fn value_round_trips() {
    let r = record("user", "10.0.0.1:9000", "v2", 3);
    let encoded = serde_json::to_vec(&r).unwrap();
    assert_eq!(parse_value(&encoded).unwrap(), r);
}

#[test]
fn value_defaults_optional_fields() {
    let parsed = parse_value(br#"{"name":"user","addr":"10.0.0.1:9000"}"#).unwrap();
    assert!(parsed.version.is_empty());
    assert_eq!(parsed.weight, 0);
    assert_eq!(parsed.ttl, 0);
}

#[test]
fn malformed_value_is_rejected() {
    assert!(matches!(
        parse_value(b"not json"),
        Err(DiscoveryError::MalformedRecord(_))
    ));
    assert!(matches!(
        parse_value(br#"{"addr":"10.0.0.1:9000"}"#),
        Err(DiscoveryError::MalformedRecord(_))
    ));
}

#[test]
fn put_addr_dedups_by_address() {
    let mut list = Vec::new();
    assert!(put_addr(&mut list, ServerAddr::from(&record("user", "10.0.0.1:9000", "", 1))));
    // same address with different weight and version is still the same entry
    assert!(!put_addr(&mut list, ServerAddr::from(&record("user", "10.0.0.1:9000", "v2", 9))));
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].weight, 1);
}

#[test]
fn remove_addr_matches_by_address_alone() {
    let mut list = Vec::new();
    put_addr(&mut list, ServerAddr::from(&record("user", "10.0.0.1:9000", "v2", 5)));

    // a delete event only carries the key, so version and weight are unknown
    assert!(remove_addr(&mut list, "10.0.0.1:9000"));
    assert!(list.is_empty());
    assert!(!remove_addr(&mut list, "10.0.0.1:9000"));
}

#[test]
fn delete_after_stale_put_wins() {
    let mut list = Vec::new();
    put_addr(&mut list, ServerAddr::from(&record("user", "10.0.0.1:9000", "", 1)));
    put_addr(&mut list, ServerAddr::from(&record("user", "10.0.0.1:9000", "", 1)));
    assert!(remove_addr(&mut list, "10.0.0.1:9000"));
    assert!(list.is_empty());
}

#[test]
fn mixed_version_registry_scenario() {
    // registry holds /user/10.0.0.1:9000 (weight 1) and /user/v2/10.0.0.2:9000 (weight 2)
    let plain = record("user", "10.0.0.1:9000", "", 1);
    let versioned = record("user", "10.0.0.2:9000", "v2", 2);

    let mut list = Vec::new();
    for r in [&plain, &versioned] {
        let value = serde_json::to_vec(r).unwrap();
        put_addr(&mut list, ServerAddr::from(&parse_value(&value).unwrap()));
    }
    assert_eq!(list.len(), 2);

    // a delete arrives for the unversioned key
    let deleted = parse_key("/user/10.0.0.1:9000").unwrap();
    assert!(remove_addr(&mut list, &deleted.addr));
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].addr, "10.0.0.2:9000");
    assert_eq!(list[0].version, "v2");
}

// The tests below exercise the full lifecycle against a real coordination
// store and expect etcd on localhost:2379.

fn test_conf(name: &str, addr: &str, ttl: i64) -> EtcdConf {
    EtcdConf {
        addrs: vec!["http://localhost:2379".to_string()],
        dial_timeout: 3,
        rw_timeout: 3,
        register: RegisterConf {
            name: name.to_string(),
            addr: addr.to_string(),
            version: String::new(),
            weight: 1,
            ttl,
        },
    }
}

async fn raw_get(key: &str) -> etcd_client::GetResponse {
    let mut client = etcd_client::Client::connect(["http://localhost:2379"], None)
        .await
        .expect("etcd must be reachable");
    client.get(key, None).await.expect("get should succeed")
}

#[tokio::test]
#[ignore = "requires a local etcd on localhost:2379"]
async fn registrar_publishes_and_withdraws() {
    let conf = test_conf("it-reg", "127.0.0.1:9000", 10);
    let record = conf.register.to_record();
    let key = record.register_key();

    let registrar = Registrar::start(&conf, record.clone())
        .await
        .expect("initial registration should succeed");

    let resp = raw_get(&key).await;
    assert_eq!(resp.count(), 1, "registration key should exist");
    let stored = parse_value(resp.kvs()[0].value()).unwrap();
    assert_eq!(stored, record);

    // stop returns only after withdrawal ran, so the key must already be gone
    registrar.stop().await;
    assert_eq!(raw_get(&key).await.count(), 0, "key should be gone after stop");
}

#[tokio::test]
#[ignore = "requires a local etcd on localhost:2379"]
async fn registrar_outlives_lease_ttl() {
    let conf = test_conf("it-keepalive", "127.0.0.1:9001", 2);
    let record = conf.register.to_record();
    let key = record.register_key();

    let registrar = Registrar::start(&conf, record)
        .await
        .expect("initial registration should succeed");

    // well past the 2s lease, renewal must have kept the key alive
    sleep(Duration::from_secs(6)).await;
    assert_eq!(raw_get(&key).await.count(), 1);

    registrar.stop().await;
}

#[tokio::test]
#[ignore = "requires a local etcd on localhost:2379"]
async fn resolver_tracks_registrations() {
    let conf_a = test_conf("it-user", "127.0.0.1:9002", 10);
    let conf_b = test_conf("it-user", "127.0.0.1:9003", 10);

    let reg_a = Registrar::start(&conf_a, conf_a.register.to_record())
        .await
        .expect("register a");

    let (sink, mut rx) = watch::channel(Vec::new());
    let resolver = Resolver::build(&conf_a, "it-user", sink)
        .await
        .expect("resolver build should succeed");

    let initial = rx.borrow_and_update().clone();
    assert_eq!(initial.len(), 1);
    assert_eq!(initial[0].addr, "127.0.0.1:9002");

    // a second instance appears via a watch event
    let reg_b = Registrar::start(&conf_b, conf_b.register.to_record())
        .await
        .expect("register b");
    timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("watch update should arrive")
        .unwrap();
    assert_eq!(rx.borrow_and_update().len(), 2);

    // withdrawal shows up as a delete event
    reg_b.stop().await;
    timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("delete update should arrive")
        .unwrap();
    let remaining = rx.borrow_and_update().clone();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].addr, "127.0.0.1:9002");

    resolver.close().await;
    reg_a.stop().await;
}

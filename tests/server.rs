use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde_json::{json, Map};
use skv::{FindRsp, SharedQueueThreadPool, SkvClient, SkvServer, ThreadPool};
use tempfile::TempDir;

// binds an ephemeral port to pick an address, then serves on it from a
// background thread until the test process exits
fn spawn_server(data_dir: PathBuf, sweep_interval: Duration) -> SocketAddr {
    let addr = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    thread::spawn(move || {
        let pool = SharedQueueThreadPool::new(4).unwrap();
        let server = SkvServer::new(pool, data_dir, sweep_interval);
        server.run(addr).unwrap();
    });

    // wait for the listener to come up
    for _ in 0..100 {
        if TcpStream::connect(addr).is_ok() {
            return addr;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not start on {}", addr);
}

fn pairs(entries: &[(&str, serde_json::Value)]) -> Map<String, serde_json::Value> {
    entries
        .iter()
        .map(|(key, doc)| (key.to_string(), doc.clone()))
        .collect()
}

#[test]
fn document_operations_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(dir.path().to_path_buf(), Duration::from_secs(60));
    let mut client = SkvClient::connect(addr).unwrap();

    let token = client.session_new(None, false, 0, false).unwrap();

    client
        .set(token, pairs(&[("a", json!(1)), ("b", json!({"n": 2}))]))
        .unwrap();
    assert_eq!(client.count(token).unwrap(), 2);

    // add never overwrites an existing document
    client
        .add(token, pairs(&[("a", json!("replaced?")), ("c", json!(3))]))
        .unwrap();
    let found = client.get(token, vec!["a".to_string(), "c".to_string()]).unwrap();
    assert_eq!(found["a"], json!(1));
    assert_eq!(found["c"], json!(3));

    let mut present = client
        .contains(token, vec!["a".to_string(), "missing".to_string()])
        .unwrap();
    present.sort_unstable();
    assert_eq!(present, vec!["a".to_string()]);

    let mut keys = client.keys(token).unwrap();
    keys.sort_unstable();
    assert_eq!(keys, vec!["a".to_string(), "b".to_string(), "c".to_string()]);

    assert_eq!(client.remove(token, vec!["a".to_string()]).unwrap(), 1);
    assert_eq!(client.clear(token).unwrap(), 2);
    assert_eq!(client.count(token).unwrap(), 0);

    assert_eq!(
        client.clear_set(token, pairs(&[("fresh", json!(true))])).unwrap(),
        0
    );
    assert_eq!(client.count(token).unwrap(), 1);

    client.session_end(token).unwrap();
    assert!(client.count(token).is_err());
}

#[test]
fn shared_sessions_rendezvous_by_name() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(dir.path().to_path_buf(), Duration::from_secs(60));

    let mut alice = SkvClient::connect(addr).unwrap();
    let token = alice
        .session_new(Some("meeting-room".to_string()), true, 0, false)
        .unwrap();
    alice.set(token, pairs(&[("agenda", json!("standup"))])).unwrap();

    // an independent connection converges on the same session by name
    let mut bob = SkvClient::connect(addr).unwrap();
    let opened = bob.session_open("meeting-room".to_string()).unwrap();
    assert_eq!(opened, token);
    assert_eq!(
        bob.get(opened, vec!["agenda".to_string()]).unwrap()["agenda"],
        json!("standup")
    );

    // a duplicate named session is refused, not overwritten
    assert!(alice
        .session_new(Some("meeting-room".to_string()), true, 0, false)
        .is_err());

    // a private named session can be seen to exist but not opened
    alice
        .session_new(Some("journal".to_string()), false, 0, false)
        .unwrap();
    assert!(bob.session_open("journal".to_string()).is_err());
    assert!(bob.session_open("no-such-name".to_string()).is_err());
}

#[test]
fn find_and_update_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(dir.path().to_path_buf(), Duration::from_secs(60));
    let mut client = SkvClient::connect(addr).unwrap();

    let token = client.session_new(None, false, 0, false).unwrap();
    client
        .set(
            token,
            pairs(&[
                ("profile", json!({"name": "Dave", "city": "London"})),
                ("settings", json!({"theme": "dark"})),
            ]),
        )
        .unwrap();

    let matches = client
        .find(token, "$.city".to_string(), None, FindRsp::Keys)
        .unwrap();
    assert_eq!(matches, vec!["profile".to_string()]);

    let found = client.find_kv(token, "$.city".to_string(), None).unwrap();
    assert_eq!(found["profile"]["city"], json!("London"));

    let (existed, replaced) = client
        .update(token, "profile".to_string(), "$.city".to_string(), json!("Paris"))
        .unwrap();
    assert!(existed);
    assert_eq!(replaced, 1);
    assert_eq!(
        client.get(token, vec!["profile".to_string()]).unwrap()["profile"]["city"],
        json!("Paris")
    );

    let (existed, replaced) = client
        .update(token, "missing".to_string(), "$.city".to_string(), json!("x"))
        .unwrap();
    assert!(!existed);
    assert_eq!(replaced, 0);

    // a bad path is an error response, not a dropped connection
    assert!(client
        .find(token, "$[".to_string(), None, FindRsp::Keys)
        .is_err());
    assert_eq!(client.count(token).unwrap(), 2);
}

#[test]
fn save_and_load_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(dir.path().to_path_buf(), Duration::from_secs(60));
    let mut client = SkvClient::connect(addr).unwrap();

    let first = client.session_new(None, false, 0, false).unwrap();
    client.set(first, pairs(&[("x", json!(1))])).unwrap();
    let second = client.session_new(None, false, 0, false).unwrap();
    client.set(second, pairs(&[("y", json!("z"))])).unwrap();

    let (sessions, keys) = client.save("backup".to_string(), None).unwrap();
    assert_eq!(sessions, 2);
    assert_eq!(keys, 2);

    assert_eq!(client.session_end_all().unwrap(), 2);
    assert_eq!(client.session_info_all().unwrap(), (0, 0));

    let (sessions, keys) = client.load("backup".to_string()).unwrap();
    assert_eq!(sessions, 2);
    assert_eq!(keys, 2);
    assert_eq!(client.session_info_all().unwrap(), (2, 2));
    assert_eq!(
        client.get(first, vec!["x".to_string()]).unwrap()["x"],
        json!(1)
    );

    // loading a name that was never saved is an error response
    assert!(client.load("never-saved".to_string()).is_err());
}

#[test]
fn sessions_expire_on_the_sweep_timer() {
    let dir = TempDir::new().unwrap();
    let addr = spawn_server(dir.path().to_path_buf(), Duration::from_millis(50));
    let mut client = SkvClient::connect(addr).unwrap();

    let doomed = client.session_new(None, false, 1, true).unwrap();
    let survivor = client.session_new(None, false, 1, false).unwrap();
    client.set(survivor, pairs(&[("k", json!("v"))])).unwrap();

    let info = client.session_info(survivor).unwrap();
    let expiry = info.expiry.unwrap();
    assert_eq!(expiry.duration_secs, 1);
    assert!(!expiry.delete_on_expire);

    thread::sleep(Duration::from_millis(1500));

    // the delete-on-expire session is gone, the other was only cleared
    let live = client.session_exists(vec![doomed, survivor]).unwrap();
    assert_eq!(live, vec![survivor]);
    assert_eq!(client.count(survivor).unwrap(), 0);
}

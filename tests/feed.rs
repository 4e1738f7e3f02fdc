use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Once;
use std::thread;

use fpl_price_watch::config::WatchConfig;
use fpl_price_watch::feed::fetch_all;
use fpl_price_watch::http_client;

const UNREACHABLE: &str = "http://127.0.0.1:1";

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn isolate_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let cache = std::env::temp_dir()
            .join(format!("fpl_price_watch_feed_{}", std::process::id()));
        // Runs once, before the shared client exists or any request is made.
        unsafe {
            std::env::set_var("XDG_CACHE_HOME", &cache);
            std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        }
        http_client::configure_timeout(5);
    });
}

// Answers every request on a fresh local port with the fixture body.
fn serve_fixture(name: &str) -> String {
    let body = read_fixture(name);
    let listener = TcpListener::bind("127.0.0.1:0").expect("local listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(body.as_bytes());
        }
    });
    format!("http://{addr}")
}

fn config(api_base: String) -> WatchConfig {
    WatchConfig {
        api_base,
        cache_max_age_secs: 0,
        ..WatchConfig::default()
    }
}

#[test]
fn unreachable_bootstrap_fails_the_cycle() {
    isolate_env();
    let err = fetch_all(&config(UNREACHABLE.to_string())).unwrap_err();
    assert!(format!("{err:#}").contains("bootstrap fetch failed"), "{err:#}");
}

#[test]
fn unreachable_transfer_feed_fails_the_cycle() {
    isolate_env();
    let mut cfg = config(serve_fixture("bootstrap.json"));
    cfg.transfers_url = Some(format!("{UNREACHABLE}/transfers"));
    let err = fetch_all(&cfg).unwrap_err();
    assert!(format!("{err:#}").contains("transfers fetch failed"), "{err:#}");
}

#[test]
fn unreachable_price_history_is_tolerated() {
    isolate_env();
    let mut cfg = config(serve_fixture("bootstrap.json"));
    cfg.price_changes_url = Some(format!("{UNREACHABLE}/changes"));
    let bundle = fetch_all(&cfg).expect("history failure should not fail the cycle");
    assert!(bundle.history.is_none());
    assert_eq!(bundle.bootstrap.elements.len(), 5);
    // No transfers URL, so the deltas come from the bootstrap counts.
    assert!(!bundle.transfers.transfers_in.is_empty());
    assert!(!bundle.transfers.transfers_out.is_empty());
}

#[test]
fn served_feeds_are_all_loaded() {
    isolate_env();
    let mut cfg = config(serve_fixture("bootstrap.json"));
    cfg.transfers_url = Some(format!("{}/transfers", serve_fixture("transfers.json")));
    cfg.price_changes_url = Some(format!("{}/changes", serve_fixture("price_changes.json")));
    let bundle = fetch_all(&cfg).expect("all feeds should load");
    assert_eq!(bundle.transfers.transfers_in.len(), 4);
    let history = bundle.history.expect("history should be present");
    assert_eq!(history.risers.len(), 1);
    assert_eq!(history.fallers.len(), 1);
}

extern crate env_logger;
extern crate hanger;
#[macro_use]
extern crate log;

use std::env;
use std::sync::Arc;
use std::thread;

use hanger::{CasStore, Client, ConnectOptions, MemStore, Outcome, Updater};

const ORIGINAL_JSON: &str = r#"{"data":"some json"}"#;
const UPDATED_JSON: &str = r#"{"data":"updated json"}"#;

fn run<S: CasStore + 'static>(updater: Updater<S>) {
    let h = updater.initialize(ORIGINAL_JSON).unwrap();
    let (v1, _) = updater.head(&h).unwrap();
    info!("hanger {} -> {}", h, v1);

    match updater.update(&h, &v1, UPDATED_JSON).unwrap() {
        Outcome::Updated(v2) => info!("updated hanger {} -> {}", h, v2),
        Outcome::Conflict { current } => info!("conflict, hanger at {:?}", current),
    }

    // Everybody starts from the same head, one of them wins
    let (head, _) = updater.head(&h).unwrap();
    let updater = Arc::new(updater);
    let mut handlers = Vec::new();
    for i in 0..4 {
        let (updater, h, head) = (updater.clone(), h.clone(), head.clone());
        let handler = thread::spawn(move || {
            let outcome = updater.update(&h, &head, format!(r#"{{"data":"writer {}"}}"#, i)).unwrap();
            debug!("writer {} in {:?}: {:?}", i, thread::current().id(), outcome);
            outcome
        });
        handlers.push(handler);
    }

    let winners = handlers
        .into_iter()
        .map(|hdl| hdl.join().unwrap())
        .filter(Outcome::is_updated)
        .count();
    let (version, content) = updater.resolve(&h).unwrap();
    info!(
        "{} winner(s), hanger {} -> {}: {}",
        winners,
        h,
        version,
        String::from_utf8_lossy(&content)
    );
}

fn main() {
    env_logger::init();

    match env::args().nth(1) {
        Some(addr) => {
            info!("Using server: {}", addr);
            let client = Client::connect(&[(&addr[..], 1)], ConnectOptions::default()).unwrap();
            run(Updater::new(client));
        }
        None => run(Updater::new(MemStore::new())),
    }
}

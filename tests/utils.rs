use dats::prelude::*;
use dats::StatsdClient;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[allow(dead_code)]
pub const TIMEOUT: Duration = Duration::from_secs(5);

#[allow(dead_code)]
pub fn run_arc_threaded_test(client: StatsdClient, num_threads: u64, iterations: u64) {
    let shared_client = Arc::new(client);

    let threads: Vec<_> = (0..num_threads)
        .map(|_| {
            let local_client = Arc::clone(&shared_client);

            thread::spawn(move || {
                for i in 0..iterations {
                    local_client.counter("some.counter", i as i64);
                    local_client.timing("some.timer", i);
                    local_client.timing("some.timer", Duration::from_millis(i));
                    local_client.gauge("some.gauge", i);
                    local_client.gauge("some.gauge", i as f64);
                    local_client.set("some.set", i as i64);
                    thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    shared_client.close();
}

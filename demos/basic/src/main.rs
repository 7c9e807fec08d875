/**
 * Minimal harness for the courier client.
 *
 * Queues a couple of one-shot requests and a long-poll request against the
 * URL given on the command line, then waits for the callbacks:
 *
 *   cargo run -p courier_example -- https://httpbin.org/get
 *   RUST_LOG=courier_core=debug cargo run -p courier_example -- http://localhost:9/
 */
use std::sync::mpsc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> courier::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::args().nth(1).unwrap_or_else(|| "https://httpbin.org/get".into());

    /*
     * Build the client. The subscribe pool retries quickly here so that an
     * unreachable URL finishes in a few seconds instead of half a minute.
     */
    let client = courier::Client::new(courier::ClientOptions {
        headers: [("User-Agent".into(), "courier-example".into())].into(),
        ..courier::ClientOptions::from("demo")
    })?;
    client.set_max_retries(2);
    client.set_retry_interval(Duration::from_millis(500));

    let (tx, rx) = mpsc::channel();

    /*
     * One-shot requests complete in the order they were queued.
     */
    for n in 1..=2 {
        let tx = tx.clone();
        client.request(courier::Request::new(url.as_str()).header("X-Seq", n.to_string()).on_response(
            move |result: Result<String, courier::DispatchError>| {
                let _ = tx.send(format!("request #{n}: {}", summarize(result)));
            },
        ));
    }

    /*
     * Long-poll request; failures are retried before the callback fires.
     */
    let sub_tx = tx.clone();
    client.subscribe(courier::Request::new(url.as_str()).on_response(
        move |result: Result<String, courier::DispatchError>| {
            let _ = sub_tx.send(format!("subscribe: {}", summarize(result)));
        },
    ));
    drop(tx);

    for line in rx.iter().take(3) {
        info!("{line}");
    }

    info!("done; both pools shut down when the client drops");
    Ok(())
}

fn summarize(result: Result<String, courier::DispatchError>) -> String {
    match result {
        Ok(body) => format!("{} bytes", body.len()),
        Err(err) => err.to_string(),
    }
}

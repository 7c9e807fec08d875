/**
 * Courier — pooled HTTP request dispatch for pub/sub style clients.
 *
 * This is the crate applications depend on. It re-exports the engine from
 * `courier_core` and adds `Client`, which pairs a subscribe (long-poll,
 * retrying) pool with a non-subscribe (fire-once) pool.
 *
 * # Quick start
 *
 * ```ignore
 * fn main() -> courier::Result<()> {
 *     let client = courier::Client::new("pubsub")?;
 *
 *     client.request(courier::Request::new("https://example.com/time/0").on_response(
 *         |result: Result<String, courier::DispatchError>| match result {
 *             Ok(body) => println!("time: {body}"),
 *             Err(err) => eprintln!("failed: {err}"),
 *         },
 *     ));
 *
 *     // client is dropped here → both pools shut down
 *     Ok(())
 * }
 * ```
 */

mod client;

// ---------------------------------------------------------------------------
// Re-exports — the public surface area
// ---------------------------------------------------------------------------

pub use client::{Client, ClientOptions};
pub use courier_core::{
    CancelReason, ClearPolicy, DispatchError, Dispatcher, HttpTransport, HttpTransportFactory,
    PoolConfig, PoolKind, Request, Response, ResponseHandler, Result, Transport, TransportError,
    TransportFactory,
};

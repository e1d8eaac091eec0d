//! TCP server for the framed command protocol
//!
//! One accept loop on a current-thread tokio runtime. Each connection reads
//! length-prefixed request frames; every request takes the process-wide
//! engine mutex for the whole parse-dispatch-respond cycle, so index builds
//! and queries are serialized exactly as a single-threaded poll loop would
//! serialize them. Requests on one connection are answered strictly in
//! order.
//!
//! # Commands (case-insensitive verb)
//!
//! | Verb                | Args                                            |
//! |---------------------|-------------------------------------------------|
//! | `create_collection` | name                                            |
//! | `add_to_collection` | name, key, csv-floats                           |
//! | `query`             | name, csv-floats, k                             |
//! | `HNSW`              | collName, algName, mL, d, numLayers, efc        |
//! | `Vamana`            | collName, algName, d, R, alpha                  |
//! | `IFI`               | collName, algName, d, numCentroids, retrainThr  |
//! | `ANNOY`             | collName, algName, d, threshold, bucketThr, maxDepth, nTrees |
//! | `queryAlg`          | algName, csv-floats, k                          |
//! | `Collections` / `Algorithms` | –                                      |
//! | `exit`              | – (terminates the process)                      |

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::engine::{Engine, EngineError, IndexConfig, DEFAULT_RESERVE};
use crate::protocol::{self, ResCode, MAX_MSG};

/// Shared server state: the catalog behind its coarse mutex.
#[derive(Default)]
pub struct ServerState {
    pub engine: Mutex<Engine>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Bind and serve forever.
pub async fn serve(state: Arc<ServerState>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("quiver-db listening on {}", addr);
    serve_on(state, listener).await
}

/// Serve on an already-bound listener (tests bind port 0 themselves).
pub async fn serve_on(state: Arc<ServerState>, listener: TcpListener) -> std::io::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!(%peer, "client connected");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_connection(state, socket).await;
            tracing::debug!(%peer, "client disconnected");
        });
    }
}

async fn handle_connection(state: Arc<ServerState>, mut socket: TcpStream) {
    loop {
        let mut len_buf = [0u8; 4];
        if socket.read_exact(&mut len_buf).await.is_err() {
            return; // EOF or reset
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MSG {
            tracing::warn!(len, "oversized request frame, closing connection");
            return;
        }

        let mut body = vec![0u8; len];
        if socket.read_exact(&mut body).await.is_err() {
            tracing::warn!("unexpected EOF mid-frame");
            return;
        }

        let reply = {
            let mut engine = state.engine.lock();
            handle_request(&mut engine, &body)
        };
        // A malformed frame drops the connection, matching the original
        // server's state machine.
        let Some(frame) = reply else {
            return;
        };
        if socket.write_all(&frame).await.is_err() {
            return;
        }
    }
}

/// Parse and dispatch one request body. `None` means the frame was
/// malformed and the connection should be closed.
fn handle_request(engine: &mut Engine, body: &[u8]) -> Option<Vec<u8>> {
    let args = match protocol::parse_request(body) {
        Ok(args) => args,
        Err(err) => {
            tracing::warn!(%err, "bad request frame");
            return None;
        }
    };
    if args.is_empty() {
        tracing::warn!("empty argv");
        return None;
    }

    let (code, payload) = dispatch(engine, &args);
    match protocol::encode_response(code, payload.as_bytes()) {
        Ok(frame) => Some(frame),
        Err(_) => {
            // The result set did not fit one frame; report rather than truncate.
            protocol::encode_response(ResCode::Err, b"response too large").ok()
        }
    }
}

/// Route a parsed command to its handler.
pub fn dispatch(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    match args[0].to_ascii_lowercase().as_str() {
        "create_collection" => cmd_create_collection(engine, args),
        "add_to_collection" => cmd_add_to_collection(engine, args),
        "query" => cmd_query_collection(engine, args),
        "hnsw" => cmd_build_hnsw(engine, args),
        "vamana" => cmd_build_vamana(engine, args),
        "ifi" => cmd_build_ifi(engine, args),
        "annoy" => cmd_build_annoy(engine, args),
        "queryalg" => cmd_query_index(engine, args),
        "collections" => (ResCode::Ok, engine.list_collections().join("\n")),
        "algorithms" => (ResCode::Ok, engine.list_indices().join("\n")),
        "exit" => {
            tracing::info!("exit command received, terminating");
            std::process::exit(0);
        }
        other => {
            tracing::warn!(verb = other, "unknown command");
            (ResCode::Err, "Unknown cmd.".to_string())
        }
    }
}

fn cmd_create_collection(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    if args.len() != 2 {
        return short_argv("create_collection");
    }
    match engine.create_collection(&args[1], DEFAULT_RESERVE) {
        Ok(()) => (ResCode::Ok, String::new()),
        Err(EngineError::CollectionExists(name)) => {
            // Present but not fatal.
            tracing::info!(collection = name.as_str(), "collection already exists");
            (ResCode::Ok, String::new())
        }
        Err(err) => (ResCode::Err, err.to_string()),
    }
}

fn cmd_add_to_collection(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    if args.len() < 4 {
        return short_argv("add_to_collection");
    }
    let vector = match parse_floats(&args[3]) {
        Ok(vector) => vector,
        Err(message) => return (ResCode::Err, message),
    };
    match engine.add_to_collection(&args[1], args[2].clone(), vector) {
        Ok(()) => (ResCode::Ok, String::new()),
        Err(err) => (ResCode::Err, err.to_string()),
    }
}

fn cmd_query_collection(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    if args.len() < 4 {
        return short_argv("query");
    }
    let vector = match parse_floats(&args[2]) {
        Ok(vector) => vector,
        Err(message) => return (ResCode::Err, message),
    };
    let k = match parse_arg::<usize>(&args[3], "k") {
        Ok(k) => k,
        Err(message) => return (ResCode::Err, message),
    };
    match engine.query_collection(&args[1], &vector, k) {
        Ok(hits) => (ResCode::Ok, render_keys(&hits)),
        Err(EngineError::CollectionNotFound(_)) => (ResCode::Err, String::new()),
        Err(err) => (ResCode::Err, err.to_string()),
    }
}

fn cmd_query_index(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    if args.len() < 4 {
        return short_argv("queryAlg");
    }
    let vector = match parse_floats(&args[2]) {
        Ok(vector) => vector,
        Err(message) => return (ResCode::Err, message),
    };
    let k = match parse_arg::<usize>(&args[3], "k") {
        Ok(k) => k,
        Err(message) => return (ResCode::Err, message),
    };
    match engine.query_index(&args[1], &vector, k) {
        Ok(hits) => (ResCode::Ok, render_keys(&hits)),
        Err(EngineError::IndexNotFound(_)) => (ResCode::Err, String::new()),
        Err(err) => (ResCode::Err, err.to_string()),
    }
}

fn cmd_build_hnsw(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    if args.len() < 7 {
        return short_argv("HNSW");
    }
    let ml = parse_arg::<f64>(&args[3], "mL");
    let dim = parse_arg::<usize>(&args[4], "d");
    let num_layers = parse_arg::<usize>(&args[5], "num_layers");
    let efc = parse_arg::<usize>(&args[6], "efc");
    match (ml, dim, num_layers, efc) {
        (Ok(ml), Ok(dim), Ok(num_layers), Ok(efc)) => build_index(
            engine,
            &args[1],
            &args[2],
            IndexConfig::Hnsw {
                ml,
                dim,
                num_layers,
                efc,
            },
        ),
        (ml, dim, num_layers, efc) => bad_params(&[e(ml), e(dim), e(num_layers), e(efc)]),
    }
}

fn cmd_build_vamana(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    if args.len() < 6 {
        return short_argv("Vamana");
    }
    let dim = parse_arg::<usize>(&args[3], "d");
    let r = parse_arg::<usize>(&args[4], "R");
    let alpha = parse_arg::<f32>(&args[5], "alpha");
    match (dim, r, alpha) {
        (Ok(dim), Ok(r), Ok(alpha)) => build_index(
            engine,
            &args[1],
            &args[2],
            IndexConfig::Vamana { dim, r, alpha },
        ),
        (dim, r, alpha) => bad_params(&[e(dim), e(r), e(alpha)]),
    }
}

fn cmd_build_ifi(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    if args.len() < 6 {
        return short_argv("IFI");
    }
    let dim = parse_arg::<usize>(&args[3], "d");
    let num_centroids = parse_arg::<usize>(&args[4], "num_centroids");
    let retrain_threshold = parse_arg::<usize>(&args[5], "retrain_threshold");
    match (dim, num_centroids, retrain_threshold) {
        (Ok(dim), Ok(num_centroids), Ok(retrain_threshold)) => build_index(
            engine,
            &args[1],
            &args[2],
            IndexConfig::Ivf {
                dim,
                num_centroids,
                retrain_threshold,
            },
        ),
        (dim, num_centroids, retrain_threshold) => {
            bad_params(&[e(dim), e(num_centroids), e(retrain_threshold)])
        }
    }
}

fn cmd_build_annoy(engine: &mut Engine, args: &[String]) -> (ResCode, String) {
    if args.len() < 8 {
        return short_argv("ANNOY");
    }
    let dim = parse_arg::<usize>(&args[3], "d");
    let threshold = parse_arg::<f32>(&args[4], "threshold");
    let bucket_threshold = parse_arg::<usize>(&args[5], "bucket_threshold");
    let max_depth = parse_arg::<usize>(&args[6], "max_depth");
    let n_trees = parse_arg::<usize>(&args[7], "n_trees");
    match (dim, threshold, bucket_threshold, max_depth, n_trees) {
        (Ok(dim), Ok(threshold), Ok(bucket_threshold), Ok(max_depth), Ok(n_trees)) => build_index(
            engine,
            &args[1],
            &args[2],
            IndexConfig::Annoy {
                dim,
                threshold,
                bucket_threshold,
                max_depth,
                n_trees,
            },
        ),
        (dim, threshold, bucket, depth, trees) => {
            bad_params(&[e(dim), e(threshold), e(bucket), e(depth), e(trees)])
        }
    }
}

fn build_index(
    engine: &mut Engine,
    collection: &str,
    name: &str,
    config: IndexConfig,
) -> (ResCode, String) {
    tracing::info!(kind = config.kind(), collection, "building index");
    match engine.build_index(collection, name, config) {
        Ok(chosen) => (ResCode::Ok, chosen),
        Err(EngineError::CollectionNotFound(_)) => (ResCode::NotFound, String::new()),
        Err(err) => (ResCode::Err, err.to_string()),
    }
}

fn render_keys(hits: &[quiver_core::SearchHit<String>]) -> String {
    hits.iter()
        .map(|hit| hit.key.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// CSV of decimal floats; whitespace is not tolerated.
fn parse_floats(csv: &str) -> Result<Vec<f32>, String> {
    csv.split(',')
        .map(|item| {
            item.parse::<f32>()
                .map_err(|_| format!("invalid float in list: {}", item))
        })
        .collect()
}

fn parse_arg<T: FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("invalid {}: {}", what, raw))
}

fn short_argv(verb: &str) -> (ResCode, String) {
    (
        ResCode::Err,
        format!("wrong number of arguments for {}", verb),
    )
}

fn bad_params(errors: &[Option<String>]) -> (ResCode, String) {
    let message = errors
        .iter()
        .find_map(|slot| slot.clone())
        .unwrap_or_else(|| "invalid argument".to_string());
    (ResCode::Err, message)
}

fn e<T>(result: Result<T, String>) -> Option<String> {
    result.err()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(engine: &mut Engine, args: &[&str]) -> (ResCode, String) {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        dispatch(engine, &owned)
    }

    #[test]
    fn test_scenario_create_add_query() {
        let mut engine = Engine::new();
        assert_eq!(run(&mut engine, &["create_collection", "C"]).0, ResCode::Ok);
        assert_eq!(
            run(&mut engine, &["add_to_collection", "C", "a", "1,0,0"]).0,
            ResCode::Ok
        );
        assert_eq!(
            run(&mut engine, &["add_to_collection", "C", "b", "0,1,0"]).0,
            ResCode::Ok
        );

        let (code, payload) = run(&mut engine, &["query", "C", "0.9,0.05,0", "1"]);
        assert_eq!(code, ResCode::Ok);
        assert_eq!(payload, "a");
    }

    #[test]
    fn test_create_collection_twice_is_ok() {
        let mut engine = Engine::new();
        run(&mut engine, &["create_collection", "C"]);
        assert_eq!(run(&mut engine, &["create_collection", "C"]).0, ResCode::Ok);
    }

    #[test]
    fn test_duplicate_keys_round_trip() {
        let mut engine = Engine::new();
        run(&mut engine, &["add_to_collection", "C", "a", "1,0"]);
        run(&mut engine, &["add_to_collection", "C", "a", "1,0"]);
        let (code, payload) = run(&mut engine, &["query", "C", "1,0", "2"]);
        assert_eq!(code, ResCode::Ok);
        assert_eq!(payload, "a\na");
    }

    #[test]
    fn test_unknown_verb() {
        let mut engine = Engine::new();
        let (code, payload) = run(&mut engine, &["frobnicate"]);
        assert_eq!(code, ResCode::Err);
        assert_eq!(payload, "Unknown cmd.");
    }

    #[test]
    fn test_case_insensitive_verbs() {
        let mut engine = Engine::new();
        assert_eq!(run(&mut engine, &["CREATE_COLLECTION", "C"]).0, ResCode::Ok);
        assert_eq!(run(&mut engine, &["Collections"]).1, "C");
    }

    #[test]
    fn test_bad_float_is_err() {
        let mut engine = Engine::new();
        let (code, payload) = run(&mut engine, &["add_to_collection", "C", "a", "1,zap,0"]);
        assert_eq!(code, ResCode::Err);
        assert!(payload.contains("invalid float"));
    }

    #[test]
    fn test_whitespace_in_csv_rejected() {
        let mut engine = Engine::new();
        let (code, _) = run(&mut engine, &["add_to_collection", "C", "a", "1, 2"]);
        assert_eq!(code, ResCode::Err);
    }

    #[test]
    fn test_short_argv() {
        let mut engine = Engine::new();
        assert_eq!(run(&mut engine, &["query", "C"]).0, ResCode::Err);
        assert_eq!(run(&mut engine, &["HNSW", "C", "h"]).0, ResCode::Err);
    }

    #[test]
    fn test_query_missing_collection_is_empty_err() {
        let mut engine = Engine::new();
        let (code, payload) = run(&mut engine, &["query", "ghost", "1,0", "1"]);
        assert_eq!(code, ResCode::Err);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_query_missing_index_is_empty_err() {
        let mut engine = Engine::new();
        let (code, payload) = run(&mut engine, &["queryAlg", "ghost", "1,0", "1"]);
        assert_eq!(code, ResCode::Err);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_build_on_missing_collection_is_not_found() {
        let mut engine = Engine::new();
        let (code, _) = run(&mut engine, &["HNSW", "ghost", "h", "0.9", "2", "3", "16"]);
        assert_eq!(code, ResCode::NotFound);
    }

    #[test]
    fn test_build_and_query_all_families() {
        let mut engine = Engine::new();
        for i in 0..20 {
            let x = (i % 5) as f32;
            let y = (i / 5) as f32;
            run(
                &mut engine,
                &[
                    "add_to_collection",
                    "C",
                    &format!("p{}", i),
                    &format!("{},{}", x, y),
                ],
            );
        }

        let builds: [(&str, Vec<&str>); 4] = [
            ("hn", vec!["HNSW", "C", "hn", "0.9", "2", "3", "16"]),
            ("va", vec!["Vamana", "C", "va", "2", "6", "1.2"]),
            ("ifi", vec!["IFI", "C", "ifi", "2", "4", "100"]),
            ("an", vec!["ANNOY", "C", "an", "2", "0.5", "4", "8", "4"]),
        ];
        for (name, args) in builds {
            let (code, payload) = run(&mut engine, &args);
            assert_eq!(code, ResCode::Ok, "build {} failed: {}", name, payload);
            assert_eq!(payload, name);
        }

        let (code, payload) = run(&mut engine, &["Algorithms"]);
        assert_eq!(code, ResCode::Ok);
        assert_eq!(payload, "an\nhn\nifi\nva");

        for name in ["hn", "va", "ifi", "an"] {
            let (code, payload) = run(&mut engine, &["queryAlg", name, "0,0", "1"]);
            assert_eq!(code, ResCode::Ok);
            assert_eq!(payload, "p0", "index {} missed the exact match", name);
        }
    }

    #[test]
    fn test_ifi_build_with_too_many_centroids() {
        let mut engine = Engine::new();
        run(&mut engine, &["add_to_collection", "C", "a", "1,0"]);
        run(&mut engine, &["add_to_collection", "C", "b", "0,1"]);
        let (code, _) = run(&mut engine, &["IFI", "C", "ifi", "2", "10", "1"]);
        assert_eq!(code, ResCode::Err);
    }

    #[test]
    fn test_build_name_disambiguation_payload() {
        let mut engine = Engine::new();
        run(&mut engine, &["add_to_collection", "C", "a", "1,0"]);
        let first = run(&mut engine, &["Vamana", "C", "v", "2", "2", "1.0"]);
        let second = run(&mut engine, &["Vamana", "C", "v", "2", "2", "1.0"]);
        assert_eq!(first.1, "v");
        assert_eq!(second.1, "v_1");
    }

    #[test]
    fn test_handle_request_closes_on_malformed_frame() {
        let mut engine = Engine::new();
        assert!(handle_request(&mut engine, &[0xFF, 0xFF]).is_none());
    }

    #[test]
    fn test_handle_request_round_trip() {
        let mut engine = Engine::new();
        let frame = protocol::encode_request(&["create_collection", "C"]).unwrap();
        let reply = handle_request(&mut engine, &frame[4..]).unwrap();
        let (code, payload) = protocol::parse_response(&reply[4..]).unwrap();
        assert_eq!(code, ResCode::Ok);
        assert!(payload.is_empty());
    }
}

//! End-to-end tests: a real server on an ephemeral port and real clients.
//!
//! These cover the full path from an `ArrayMap` on the client through the
//! wire, the compute handler, and back.

use arrow::array::BooleanArray;
use arrow::datatypes::{Float64Type, Int32Type, Int64Type};
use numflight::{
    handlers, ArrayMap, Client, DeliveryMode, FlightError, NdArray, RequestState, Server,
    ServerConfig, ServerHandle,
};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> ServerConfig {
    ServerConfig::default().with_host("127.0.0.1").with_port(0)
}

async fn start(handler: impl numflight::ComputeHandler, config: ServerConfig) -> (ServerHandle, Client) {
    let server = Server::start(config, handler).await.unwrap();
    let client = Client::connect(&server.location().to_string()).await.unwrap();
    (server, client)
}

fn single(name: &str, array: impl Into<NdArray>) -> ArrayMap {
    let mut arrays = ArrayMap::new();
    arrays.insert(name.to_string(), array.into());
    arrays
}

#[tokio::test]
async fn test_compute_doubles_values() {
    let (mut server, client) = start(handlers::Double, test_config()).await;

    let output = client
        .compute("double", &single("input", vec![1i64, 2, 3]))
        .await
        .unwrap();

    assert_eq!(output.len(), 1);
    assert_eq!(output["input"].as_slice::<Int64Type>(), Some(&[2, 4, 6][..]));
    assert_eq!(output["input"].shape(), &[3]);

    client.close().await;
    server.shutdown();
}

#[tokio::test]
async fn test_write_then_get_echo() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;

    client
        .write("store", &single("x", vec![1.5f64, 2.5]))
        .await
        .unwrap();
    let table = client.get("store").await.unwrap();

    assert_eq!(table.column_names(), vec!["x"]);
    let arrays = numflight::decode(&table).unwrap();
    assert_eq!(arrays["x"].as_slice::<Float64Type>(), Some(&[1.5, 2.5][..]));

    server.shutdown();
}

#[tokio::test]
async fn test_multi_column_shapes_survive() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;

    let mut input = ArrayMap::new();
    input.insert(
        "matrix".to_string(),
        NdArray::from(vec![1i32, 2, 3, 4, 5, 6])
            .with_shape(vec![2, 3])
            .unwrap(),
    );
    input.insert("labels".to_string(), NdArray::from(vec!["a", "bb", "ccc"]));
    input.insert("scalar".to_string(), NdArray::from(vec![7.0f64]));

    let output = client.compute("mixed", &input).await.unwrap();
    assert_eq!(output, input);
    assert_eq!(output["matrix"].shape(), &[2, 3]);
    assert_eq!(output["matrix"].as_slice::<Int32Type>(), Some(&[1, 2, 3, 4, 5, 6][..]));
    assert_eq!(output["labels"].as_strings(), Some(vec!["a", "bb", "ccc"]));

    server.shutdown();
}

#[tokio::test]
async fn test_result_is_delivered_once() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;

    client.write("once", &single("v", vec![1i64])).await.unwrap();
    client.get("once").await.unwrap();

    match client.get("once").await {
        Err(FlightError::NotFound { command }) => assert_eq!(command, "once"),
        other => panic!("Expected NotFound, got: {:?}", other),
    }

    server.shutdown();
}

#[tokio::test]
async fn test_retain_mode_rereads() {
    let config = test_config().with_delivery(DeliveryMode::Retain);
    let (mut server, client) = start(handlers::Echo, config).await;

    client.write("kept", &single("v", vec![3i64])).await.unwrap();
    let first = client.get("kept").await.unwrap();
    let second = client.get("kept").await.unwrap();
    assert_eq!(first, second);

    let entries = client.list_descriptors().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].command, "kept");
    assert_eq!(entries[0].state, RequestState::Ready.as_str());

    server.shutdown();
}

#[tokio::test]
async fn test_get_unknown_command_is_not_found_and_client_survives() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;

    assert!(matches!(
        client.get("nonexistent_command").await,
        Err(FlightError::NotFound { .. })
    ));

    // The same client keeps working after a not-found reply.
    let output = client.compute("after", &single("v", vec![1u8])).await.unwrap();
    assert_eq!(output.len(), 1);

    server.shutdown();
}

#[tokio::test]
async fn test_handler_failure_surfaces_as_compute_error() {
    let failing = |_: &str, _: ArrayMap| -> anyhow::Result<ArrayMap> {
        anyhow::bail!("input must be positive")
    };
    let (mut server, client) = start(failing, test_config()).await;

    match client.compute("check", &single("v", vec![-1i64])).await {
        Err(FlightError::Compute { command, message }) => {
            assert_eq!(command, "check");
            assert_eq!(message, "input must be positive");
        }
        other => panic!("Expected Compute, got: {:?}", other),
    }

    server.shutdown();
}

#[tokio::test]
async fn test_double_overflow_is_compute_error() {
    let (mut server, client) = start(handlers::Double, test_config()).await;

    let result = client.compute("double", &single("v", vec![i64::MAX])).await;
    assert!(matches!(result, Err(FlightError::Compute { .. })));

    server.shutdown();
}

#[tokio::test]
async fn test_empty_input_fails_before_sending() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;

    let result = client.write("empty", &ArrayMap::new()).await;
    assert!(matches!(result, Err(FlightError::EmptyInput)));
    assert!(server.descriptors().await.is_empty());

    server.shutdown();
}

#[tokio::test]
async fn test_unsupported_type_fails_before_sending() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;

    let flags = NdArray::new(Arc::new(BooleanArray::from(vec![true, false])));
    match client.write("flags", &single("flags", flags)).await {
        Err(FlightError::UnsupportedType { column, .. }) => assert_eq!(column, "flags"),
        other => panic!("Expected UnsupportedType, got: {:?}", other),
    }
    assert!(server.descriptors().await.is_empty());

    server.shutdown();
}

#[tokio::test]
async fn test_empty_command_is_invalid() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;

    let result = client.write("", &single("v", vec![1i64])).await;
    assert!(matches!(result, Err(FlightError::InvalidCommand { .. })));

    server.shutdown();
}

#[tokio::test]
async fn test_connect_to_closed_port_is_connection_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    match Client::connect(&format!("grpc://{}", addr)).await {
        Err(FlightError::Connection { location, .. }) => {
            assert_eq!(location, format!("grpc://{}", addr));
        }
        other => panic!("Expected Connection, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_server_shutdown_surfaces_connection_error() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;
    server.shutdown();
    drop(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = client.compute("late", &single("v", vec![1i64])).await;
    assert!(
        matches!(result, Err(FlightError::Connection { .. })),
        "Expected Connection, got: {:?}",
        result
    );
}

#[tokio::test]
async fn test_concurrent_clients_are_isolated() {
    let (mut server, first) = start(handlers::Double, test_config()).await;
    let location = server.location().to_string();
    drop(first);

    let mut tasks = Vec::new();
    for i in 0..16i64 {
        let location = location.clone();
        tasks.push(tokio::spawn(async move {
            let client = Client::connect(&location).await.unwrap();
            let values: Vec<i64> = (0..100).map(|v| v * i).collect();
            let output = client
                .compute(&format!("job-{}", i), &single("input", values.clone()))
                .await
                .unwrap();
            let expected: Vec<i64> = values.iter().map(|v| v * 2).collect();
            assert_eq!(output["input"].as_slice::<Int64Type>(), Some(&expected[..]));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(server.descriptors().await.is_empty());
    server.shutdown();
}

#[tokio::test]
async fn test_shared_client_multiplexes_calls() {
    let (mut server, client) = start(handlers::Echo, test_config()).await;
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for i in 0..8i64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let output = client
                .compute(&format!("shared-{}", i), &single("v", vec![i; 10]))
                .await
                .unwrap();
            assert_eq!(output["v"].as_slice::<Int64Type>(), Some(&[i; 10][..]));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    server.shutdown();
}

#[tokio::test]
async fn test_command_is_passed_to_handler() {
    let tagging = |command: &str, mut arrays: ArrayMap| -> anyhow::Result<ArrayMap> {
        arrays.insert("command".to_string(), NdArray::from(vec![command]));
        Ok(arrays)
    };
    let (mut server, client) = start(tagging, test_config()).await;

    let output = client
        .compute("complex/command/path", &single("v", vec![1i64]))
        .await
        .unwrap();
    assert_eq!(
        output["command"].as_strings(),
        Some(vec!["complex/command/path"])
    );

    server.shutdown();
}

#[tokio::test]
async fn test_large_payload_spans_batches() {
    let (mut server, client) = start(handlers::Double, test_config()).await;

    // 32MB of f64, far past a single batch
    let values: Vec<f64> = (0..4_000_000).map(|v| v as f64 * 0.25).collect();
    let input = single(
        "big",
        NdArray::from(values.clone())
            .with_shape(vec![2_000, 2_000])
            .unwrap(),
    );

    let output = client.compute("big", &input).await.unwrap();
    let doubled = output["big"].as_slice::<Float64Type>().unwrap();
    assert_eq!(output["big"].shape(), &[2_000, 2_000]);
    assert_eq!(doubled.len(), values.len());
    assert_eq!(doubled[0], 0.0);
    assert_eq!(doubled[3_999_999], 3_999_999.0 * 0.5);

    client.close().await;
    server.shutdown();
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let config = test_config().with_max_upload_bytes(1024);
    let (mut server, client) = start(handlers::Echo, config).await;

    let values: Vec<i64> = (0..10_000).collect();
    let result = client.write("too-big", &single("v", values)).await;
    assert!(
        matches!(result, Err(FlightError::UploadRejected { .. })),
        "Expected UploadRejected, got: {:?}",
        result
    );
    assert!(server.descriptors().await.is_empty());

    // Small uploads still go through on the same client.
    client.write("small", &single("v", vec![1i64])).await.unwrap();
    assert!(client.get("small").await.is_ok());

    server.shutdown();
}

//! Method call correlation and fail-fast behaviour.

mod fixtures;

use std::time::Duration;

use fixtures::{accept_session, mock_connector, test_builder};
use rivulet::ClientError;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn concurrent_calls_resolve_by_correlation_id() {
    let (connector, mut accepts) = mock_connector();
    let (client, mut server) = tokio::join!(
        test_builder(connector).connect(),
        accept_session(&mut accepts)
    );
    let client = client.expect("connect");

    let call_a = client.call("roomNameById", vec![json!("r-a")]);
    let call_b = client.call("roomNameById", vec![json!("r-b")]);
    let server_task = async {
        let (id_a, params_a) = server.expect_method("roomNameById").await;
        let (id_b, params_b) = server.expect_method("roomNameById").await;
        assert_eq!(params_a[0], json!("r-a"));
        assert_eq!(params_b[0], json!("r-b"));
        // Answer out of order; correlation must still hold.
        server.send_result(&id_b, json!("bravo"));
        server.send_result(&id_a, json!("alpha"));
    };
    let (result_a, result_b, ()) = tokio::join!(call_a, call_b, server_task);

    assert_eq!(result_a.expect("call a"), json!("alpha"));
    assert_eq!(result_b.expect("call b"), json!("bravo"));
}

#[tokio::test(start_paused = true)]
async fn server_errors_surface_verbatim() {
    let (connector, mut accepts) = mock_connector();
    let (client, mut server) = tokio::join!(
        test_builder(connector).connect(),
        accept_session(&mut accepts)
    );
    let client = client.expect("connect");

    let call = client.call("kickUser", vec![json!("alice")]);
    let server_task = async {
        let (id, _params) = server.expect_method("kickUser").await;
        server.send_error(&id, json!({ "error": 403, "reason": "not allowed" }));
    };
    let (result, ()) = tokio::join!(call, server_task);

    match result {
        Err(ClientError::Method(failure)) => {
            assert_eq!(failure.reason.as_deref(), Some("not allowed"));
        }
        other => panic!("expected method error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn calls_fail_fast_while_disconnected() {
    let (connector, mut accepts) = mock_connector();
    let (client, server) = tokio::join!(
        test_builder(connector).connect(),
        accept_session(&mut accepts)
    );
    let client = client.expect("connect");

    drop(server);
    // Give the pump a moment to observe the loss.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = client
        .call("roomNameById", vec![json!("r-a")])
        .await
        .expect_err("call while reconnecting must not queue");
    assert!(matches!(err, ClientError::NotConnected), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn close_rejects_pending_requests() {
    let (connector, mut accepts) = mock_connector();
    let (client, mut server) = tokio::join!(
        test_builder(connector).connect(),
        accept_session(&mut accepts)
    );
    let client = client.expect("connect");

    let call = client.call("slowMethod", vec![]);
    let close_task = async {
        // Wait until the call is in flight before closing.
        let (_id, _params) = server.expect_method("slowMethod").await;
        client.close().await;
    };
    let (result, ()) = tokio::join!(call, close_task);

    assert!(
        matches!(result, Err(ClientError::ConnectionClosed)),
        "got {result:?}"
    );
}

//! Hub routing and invocation over a long-polling connection.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use project_tests::{Endpoint, MockHttpClient, drain_events, eventually, fast_config};
use signalr_client::core::ConnectionEvent;
use signalr_client::{
    ClientError, Connection, HttpClient, HubConnection, LongPollingTransport,
};

const WAIT: Duration = Duration::from_secs(2);
const HUB_URL: &str = "http://localhost:8080/signalr";

fn hub_connection(http: &Arc<MockHttpClient>) -> HubConnection {
    let connection =
        Connection::with_options(HUB_URL, None, Arc::clone(http) as Arc<dyn HttpClient>, fast_config())
            .unwrap();
    HubConnection::from_connection(connection)
}

#[tokio::test]
async fn inbound_invocation_patches_state_then_runs_the_handler() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    http.reply_text(
        Endpoint::Receive,
        r#"{"MessageId":"5","Messages":[{"Hub":"demo","Method":"notify","Args":[42],"State":{"x":1}}]}"#,
    );

    let hubs = hub_connection(&http);
    let proxy = hubs.create_proxy("demo");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer = proxy.clone();
    proxy.on_typed("notify", move |n: i64| {
        sink.lock().unwrap().push((n, observer.get_value::<i64>("x")));
    });

    hubs.start_with(Arc::new(LongPollingTransport::new())).await?;
    assert!(eventually(WAIT, || hubs.message_id().as_deref() == Some("5")).await);

    assert_eq!(*seen.lock().unwrap(), vec![(42, Some(1))]);

    let connect = &http.requests_to(Endpoint::Receive)[0];
    assert_eq!(
        connect.url,
        "http://localhost:8080/signalr/connect?transport=longPolling&connectionId=abc&connectionData=%5B%7B%22Name%22%3A%22demo%22%7D%5D"
    );

    hubs.stop().await;
    Ok(())
}

#[tokio::test]
async fn every_proxy_is_announced_in_creation_order() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    http.reply_text(Endpoint::Receive, r#"{"MessageId":"1"}"#);

    let hubs = hub_connection(&http);
    hubs.create_proxy("Chat");
    hubs.create_proxy("chat");
    hubs.create_proxy("status");

    hubs.start_with(Arc::new(LongPollingTransport::new())).await?;

    let connect = &http.requests_to(Endpoint::Receive)[0];
    let data = connect
        .url
        .split("connectionData=")
        .nth(1)
        .unwrap_or_default();
    assert_eq!(data, "%5B%7B%22Name%22%3A%22Chat%22%7D%2C%7B%22Name%22%3A%22status%22%7D%5D");

    hubs.stop().await;
    Ok(())
}

#[tokio::test]
async fn invoke_sends_the_call_with_state_and_decodes_the_result() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    http.reply_text(Endpoint::Receive, r#"{"MessageId":"1"}"#);
    http.reply_text(Endpoint::Send, "3");

    let hubs = hub_connection(&http);
    let calc = hubs.create_proxy("calc");
    calc.set_value("user", "ann")?;
    hubs.start_with(Arc::new(LongPollingTransport::new())).await?;

    let sum: i64 = calc.invoke("add", vec![json!(1), json!(2)]).await?;
    assert_eq!(sum, 3);

    let send = &http.requests_to(Endpoint::Send)[0];
    assert_eq!(
        send.url,
        "http://localhost:8080/signalr/send?transport=longPolling&connectionId=abc"
    );
    let payload: Value = serde_json::from_str(send.form_value("data").unwrap_or_default())?;
    assert_eq!(
        payload,
        json!({"Hub": "calc", "Action": "add", "Data": [1, 2], "State": {"user": "ann"}})
    );

    hubs.stop().await;
    Ok(())
}

#[tokio::test]
async fn invoke_before_start_is_rejected() {
    let http = MockHttpClient::new();
    let hubs = hub_connection(&http);
    let proxy = hubs.create_proxy("calc");

    let err = proxy.invoke::<Value>("add", Vec::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState { .. }));
    assert!(http.requests_to(Endpoint::Send).is_empty());
}

#[tokio::test]
async fn invoke_after_the_connection_is_dropped_is_rejected() {
    let http = MockHttpClient::new();
    let proxy = hub_connection(&http).create_proxy("calc");

    let err = proxy.invoke::<Value>("add", Vec::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState { .. }));
}

#[tokio::test]
async fn bad_handler_argument_is_reported_as_an_error() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    http.reply_text(
        Endpoint::Receive,
        r#"{"MessageId":"2","Messages":[{"Hub":"demo","Method":"notify","Args":["not a number"]},{"Hub":"demo","Method":"notify","Args":[7]}]}"#,
    );

    let hubs = hub_connection(&http);
    let proxy = hubs.create_proxy("demo");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    proxy.on_typed("notify", move |n: i64| sink.lock().unwrap().push(n));
    let mut events = hubs.events();

    hubs.start_with(Arc::new(LongPollingTransport::new())).await?;
    assert!(eventually(WAIT, || hubs.message_id().as_deref() == Some("2")).await);

    assert_eq!(*seen.lock().unwrap(), vec![7]);
    let errors = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ConnectionEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);

    hubs.stop().await;
    Ok(())
}

#[tokio::test]
async fn unsubscribed_handler_no_longer_runs() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    http.reply_text(
        Endpoint::Receive,
        r#"{"MessageId":"1","Messages":[{"Hub":"demo","Method":"ping"}]}"#,
    );

    let hubs = hub_connection(&http);
    let proxy = hubs.create_proxy("demo");
    let kept = Arc::new(Mutex::new(0));
    let dropped = Arc::new(Mutex::new(0));

    let counter = Arc::clone(&kept);
    proxy.on_unit("ping", move || *counter.lock().unwrap() += 1);
    let counter = Arc::clone(&dropped);
    proxy.on_unit("ping", move || *counter.lock().unwrap() += 1).unsubscribe();

    hubs.start_with(Arc::new(LongPollingTransport::new())).await?;
    assert!(eventually(WAIT, || hubs.message_id().as_deref() == Some("1")).await);

    assert_eq!(*kept.lock().unwrap(), 1);
    assert_eq!(*dropped.lock().unwrap(), 0);

    hubs.stop().await;
    Ok(())
}

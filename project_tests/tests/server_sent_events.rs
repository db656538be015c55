//! Streaming transport: initialization, records, timeout, reconnect and
//! fallback to long polling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use project_tests::{
    BASE_URL, Endpoint, MockHttpClient, Reply, connection, drain_events, eventually, fast_config,
};
use signalr_client::core::ConnectionEvent;
use signalr_client::{
    ClientConfig, ClientError, Connection, ConnectionState, HttpClient, HttpError,
    ServerSentEventsTransport,
};

const WAIT: Duration = Duration::from_secs(2);

fn receive_requests(http: &MockHttpClient) -> Vec<project_tests::RecordedRequest> {
    http.requests_to(Endpoint::Receive)
}

#[tokio::test]
async fn initialized_sentinel_completes_start() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    let feed = http.reply_stream(Endpoint::Receive);
    feed.line("data: initialized");

    let conn = connection(&http);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    conn.on_received(move |m| {
        sink.lock().unwrap().push(m.clone());
        Ok(())
    });

    conn.start_with(Arc::new(ServerSentEventsTransport::new())).await?;
    assert_eq!(conn.state(), ConnectionState::Connected);

    let open = &receive_requests(&http)[0];
    assert_eq!(open.method, "GET");
    assert_eq!(
        open.url,
        format!("{}/connect?transport=serverSentEvents&connectionId=abc", BASE_URL)
    );
    assert_eq!(open.header("accept"), Some("text/event-stream"));

    feed.line("id: 12");
    feed.send("data: {\"Messages\":[\"hi\"]");
    feed.send("}\r\n");
    assert!(eventually(WAIT, || received.lock().unwrap().len() == 1).await);
    assert_eq!(received.lock().unwrap()[0], json!("hi"));
    assert_eq!(conn.message_id().as_deref(), Some("12"));

    conn.stop().await;
    let aborts = http.requests_to(Endpoint::Abort);
    assert_eq!(aborts.len(), 1);
    assert_eq!(
        aborts[0].url,
        format!("{}/abort?transport=serverSentEvents&connectionId=abc", BASE_URL)
    );
    Ok(())
}

#[tokio::test]
async fn silent_stream_times_out_the_initial_connect() {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    let feed = http.reply_stream(Endpoint::Receive);
    feed.line(": comment only");

    let conn = connection(&http);
    let err = conn
        .start_with(Arc::new(ServerSentEventsTransport::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Timeout));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_fault_fails_start() {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    http.reply_fault(
        Endpoint::Receive,
        HttpError::Status {
            status: 404,
            body: "no streaming here".into(),
        },
    );

    let conn = connection(&http);
    let err = conn
        .start_with(Arc::new(ServerSentEventsTransport::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Network(HttpError::Status { status: 404, .. })));
}

#[tokio::test]
async fn timeout_falls_back_to_long_polling() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    // Streaming connect never answers; the long-polling connect does
    http.push(Endpoint::Receive, Reply::Pending);
    http.reply_text(Endpoint::Receive, r#"{"MessageId":"1"}"#);

    let conn = connection(&http);
    conn.start().await?;
    assert_eq!(conn.state(), ConnectionState::Connected);

    let opens = receive_requests(&http);
    assert!(opens[0].url.contains("/connect?transport=serverSentEvents"));
    assert!(opens[1].url.contains("/connect?transport=longPolling"));

    let _: Value = conn.send("ping").await?;
    let send = &http.requests_to(Endpoint::Send)[0];
    assert_eq!(
        send.url,
        format!("{}/send?transport=longPolling&connectionId=abc", BASE_URL)
    );
    assert_eq!(send.form_value("data"), Some("ping"));

    conn.stop().await;
    Ok(())
}

#[tokio::test]
async fn dropped_stream_reconnects_once() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    let first = http.reply_stream(Endpoint::Receive);
    first.line("data: initialized");
    let second = http.reply_stream(Endpoint::Receive);

    let conn = connection(&http);
    let mut events = conn.events();
    conn.start_with(Arc::new(ServerSentEventsTransport::new())).await?;

    first.close();
    assert!(eventually(WAIT, || conn.state() == ConnectionState::Reconnecting).await);
    assert!(eventually(WAIT, || receive_requests(&http).len() == 2).await);
    assert_eq!(
        receive_requests(&http)[1].url,
        format!("{}/?transport=serverSentEvents&connectionId=abc", BASE_URL)
    );

    second.line("data: initialized");
    second.line("data: initialized");
    assert!(eventually(WAIT, || conn.state() == ConnectionState::Connected).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reconnects = drain_events(&mut events)
        .into_iter()
        .filter(|e| *e == ConnectionEvent::Reconnected)
        .count();
    assert_eq!(reconnects, 1);

    conn.stop().await;
    Ok(())
}

#[tokio::test]
async fn server_disconnect_stops_once_the_stream_closes() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    let feed = http.reply_stream(Endpoint::Receive);
    feed.line("data: initialized");

    let conn = connection(&http);
    conn.start_with(Arc::new(ServerSentEventsTransport::new())).await?;

    feed.line(r#"data: {"Disconnect":true}"#);
    feed.close();

    assert!(eventually(WAIT, || conn.state() == ConnectionState::Disconnected).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(receive_requests(&http).len(), 1);
    Ok(())
}

#[tokio::test]
async fn large_group_sets_move_into_the_form_body() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    let first = http.reply_stream(Endpoint::Receive);
    first.line("data: initialized");
    let second = http.reply_stream(Endpoint::Receive);

    let config = ClientConfig {
        groups_post_threshold: 1,
        ..fast_config()
    };
    let conn = Connection::with_options(BASE_URL, None, Arc::clone(&http) as Arc<dyn HttpClient>, config)?;
    conn.start_with(Arc::new(ServerSentEventsTransport::new())).await?;

    first.line(r#"data: {"Messages":[],"TransportData":{"Groups":["a","b"]}}"#);
    assert!(eventually(WAIT, || conn.groups().len() == 2).await);
    first.close();

    assert!(eventually(WAIT, || receive_requests(&http).len() == 2).await);
    let reopen = &receive_requests(&http)[1];
    assert_eq!(reopen.method, "POST");
    assert_eq!(reopen.form_value("groups"), Some(r#"["a","b"]"#));
    assert!(!reopen.url.contains("groups="));

    second.line("data: initialized");
    assert!(eventually(WAIT, || conn.state() == ConnectionState::Connected).await);

    conn.stop().await;
    Ok(())
}

#[tokio::test]
async fn custom_query_is_appended_last() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    let feed = http.reply_stream(Endpoint::Receive);
    feed.line("data: initialized");

    let conn = Connection::with_options(
        BASE_URL,
        Some("token=t1".to_string()),
        Arc::clone(&http) as Arc<dyn HttpClient>,
        fast_config(),
    )?;
    conn.set_sending(|| Some(r#"[{"Name":"chat"}]"#.to_string()));
    conn.start_with(Arc::new(ServerSentEventsTransport::new())).await?;

    assert_eq!(
        http.requests_to(Endpoint::Negotiate)[0].url,
        format!("{}/negotiate?token=t1", BASE_URL)
    );
    assert_eq!(
        receive_requests(&http)[0].url,
        format!(
            "{}/connect?transport=serverSentEvents&connectionId=abc&connectionData=%5B%7B%22Name%22%3A%22chat%22%7D%5D&token=t1",
            BASE_URL
        )
    );

    conn.stop().await;
    Ok(())
}

#[tokio::test]
async fn stop_during_the_reconnect_delay_opens_no_further_stream() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate("abc", "1.0");
    let first = http.reply_stream(Endpoint::Receive);
    first.line("data: initialized");
    http.reply_stream(Endpoint::Receive).line("data: initialized");

    let config = ClientConfig {
        sse_reconnect_delay_ms: 300,
        ..fast_config()
    };
    let conn = Connection::with_options(BASE_URL, None, Arc::clone(&http) as Arc<dyn HttpClient>, config)?;
    conn.start_with(Arc::new(ServerSentEventsTransport::new())).await?;

    first.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    conn.stop().await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(receive_requests(&http).len(), 1);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn stop_during_negotiation_opens_no_stream() -> anyhow::Result<()> {
    let http = MockHttpClient::new();
    http.negotiate_after("abc", "1.0", Duration::from_millis(100));
    http.reply_stream(Endpoint::Receive).line("data: initialized");
    let conn = connection(&http);

    let starter = conn.clone();
    let start = tokio::spawn(async move {
        starter
            .start_with(Arc::new(ServerSentEventsTransport::new()))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    conn.stop().await;

    assert!(matches!(start.await?, Err(ClientError::Aborted)));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(receive_requests(&http).is_empty());
    Ok(())
}

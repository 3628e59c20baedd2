use moorage::{echo, serve, EchoClient};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Starts an echo server on an ephemeral port. Returns the bound address,
/// the shutdown trigger, and the join handle of the serving task.
async fn start_server() -> (SocketAddr, oneshot::Sender<()>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(serve(
        listener,
        async move {
            let _ = shutdown_rx.await;
        },
        echo::echo,
    ));

    (addr, shutdown_tx, server)
}

/// Requests shutdown and waits for the server to fully drain.
async fn stop_server(shutdown: oneshot::Sender<()>, server: JoinHandle<()>) {
    shutdown.send(()).unwrap();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not shut down in time")
        .unwrap();
}

#[tokio::test]
async fn shutdown_before_any_connection() {
    let (_addr, shutdown, server) = start_server().await;
    stop_server(shutdown, server).await;
}

#[tokio::test]
async fn echo_roundtrip() {
    let (addr, shutdown, server) = start_server().await;

    let mut client = EchoClient::connect(addr).await.unwrap();
    let echoed = client.roundtrip(b"hello").await.unwrap();
    assert_eq!(&echoed[..], b"hello");

    drop(client);
    stop_server(shutdown, server).await;
}

#[tokio::test]
async fn sequential_messages_on_one_connection() {
    let (addr, shutdown, server) = start_server().await;

    let mut client = EchoClient::connect(addr).await.unwrap();
    for message in [&b"first"[..], b"second", b"third"] {
        let echoed = client.roundtrip(message).await.unwrap();
        assert_eq!(&echoed[..], message);
    }

    drop(client);
    stop_server(shutdown, server).await;
}

#[tokio::test]
async fn empty_message_is_echoed() {
    let (addr, shutdown, server) = start_server().await;

    let mut client = EchoClient::connect(addr).await.unwrap();
    let echoed = client.roundtrip(b"").await.unwrap();
    assert!(echoed.is_empty());

    drop(client);
    stop_server(shutdown, server).await;
}

#[tokio::test]
async fn concurrent_clients_get_their_own_payload_back() {
    let (addr, shutdown, server) = start_server().await;

    let clients: Vec<_> = (0..100u32)
        .map(|i| {
            tokio::spawn(async move {
                let payload = format!("client-{i:04}-data").into_bytes();
                let mut client = EchoClient::connect(addr).await.unwrap();
                let echoed = client.roundtrip(&payload).await.unwrap();
                assert_eq!(&echoed[..], &payload[..]);
            })
        })
        .collect();

    for client in clients {
        timeout(Duration::from_secs(10), client)
            .await
            .expect("client did not finish in time")
            .unwrap();
    }

    stop_server(shutdown, server).await;
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let (addr, shutdown, server) = start_server().await;

    // One roundtrip per client guarantees its handler is up before the
    // connection goes idle.
    let mut clients = Vec::new();
    for _ in 0..10 {
        let mut client = EchoClient::connect(addr).await.unwrap();
        client.roundtrip(b"warm-up").await.unwrap();
        clients.push(client);
    }

    stop_server(shutdown, server).await;

    // Every handler observed the signal and dropped its connection.
    for client in clients {
        timeout(Duration::from_secs(1), client.closed())
            .await
            .expect("connection was not closed by shutdown")
            .unwrap();
    }
}

#[tokio::test]
async fn client_connected_during_shutdown_does_not_hang_the_server() {
    let (addr, shutdown, server) = start_server().await;

    let mut client = EchoClient::connect(addr).await.unwrap();
    client.roundtrip(b"still here").await.unwrap();

    // Shutdown must converge even though the client never disconnects on
    // its own.
    stop_server(shutdown, server).await;
    client.closed().await.unwrap();
}

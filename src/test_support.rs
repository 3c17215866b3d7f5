//! Loopback HTTP server with canned responses, for exercising the real clients.

use reqwest::Url;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Answers every request with `status` and `body`.
pub async fn serve(status: &str, body: &str) -> Url {
    serve_raw(format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    ))
    .await
}

/// Announces `announced` body bytes, sends `body`, then closes the connection.
pub async fn serve_truncated(body: &str, announced: usize) -> Url {
    serve_raw(format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        announced, body
    ))
    .await
}

/// Accepts connections and never answers.
pub async fn serve_silent() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = base_url(&listener);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                // Held open until the client gives up
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    url
}

async fn serve_raw(response: String) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = base_url(&listener);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(answer(socket, response.clone()));
        }
    });

    url
}

async fn answer(mut socket: TcpStream, response: String) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];

    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn base_url(listener: &TcpListener) -> Url {
    let addr = listener.local_addr().unwrap();
    Url::parse(&format!("http://{}/", addr)).unwrap()
}

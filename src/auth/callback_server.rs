//! Local HTTP callback server for browser sign-in.
//!
//! Listens on the loopback redirect URI, shows a result page (or redirects
//! the browser to a configured success URL), and hands the full redirect URL
//! back to the caller.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

/// How often the accept loop checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result from the callback server.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackResult {
    /// Received a redirect; contains the full URL including query parameters.
    Success(String),
    /// The cancellation token fired.
    Cancelled,
    /// No redirect arrived within the timeout.
    TimedOut,
    /// Error occurred.
    Error(String),
}

/// Bind the listener for `redirect_uri`, which must be an `http` loopback URL.
pub fn bind(redirect_uri: &Url) -> Result<TcpListener, String> {
    if redirect_uri.scheme() != "http" {
        return Err(format!("redirect URI must use http: {}", redirect_uri));
    }
    match redirect_uri.host_str() {
        Some("localhost") | Some("127.0.0.1") => {}
        other => return Err(format!("redirect URI host is not loopback: {:?}", other)),
    }

    let port = redirect_uri.port_or_known_default().unwrap_or(80);
    let addr = format!("127.0.0.1:{}", port);

    let listener = TcpListener::bind(&addr).map_err(|e| {
        error!("Failed to bind callback server to {}: {}", addr, e);
        format!("Failed to start server: {}", e)
    })?;

    // Non-blocking so the accept loop can observe cancellation
    listener
        .set_nonblocking(true)
        .map_err(|e| format!("Server configuration error: {}", e))?;

    info!("OAuth callback server listening on {}", addr);
    Ok(listener)
}

/// Wait for a single OAuth redirect on `listener`.
///
/// The redirect is reported relative to `redirect_uri`. When `success_redirect`
/// is set the browser is sent there after a successful sign-in.
pub fn serve(
    listener: TcpListener,
    redirect_uri: &Url,
    success_redirect: Option<&Url>,
    cancel: &CancellationToken,
    timeout: Duration,
) -> CallbackResult {
    let deadline = Instant::now() + timeout;
    let origin = redirect_uri.origin().ascii_serialization();

    loop {
        if cancel.is_cancelled() {
            info!("Callback server cancelled");
            return CallbackResult::Cancelled;
        }
        if Instant::now() >= deadline {
            info!("Callback server timed out");
            return CallbackResult::TimedOut;
        }

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                debug!("Connection from {}", peer_addr);
                if let Some(path) = handle_connection(stream, redirect_uri.path(), success_redirect)
                {
                    info!("OAuth callback received");
                    return CallbackResult::Success(format!("{}{}", origin, path));
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                return CallbackResult::Error(format!("Connection error: {}", e));
            }
        }
    }
}

/// Handle an incoming HTTP connection.
///
/// Returns the request path if this was an OAuth redirect, None otherwise.
fn handle_connection(
    mut stream: TcpStream,
    expected_path: &str,
    success_redirect: Option<&Url>,
) -> Option<String> {
    // Accepted sockets may inherit non-blocking mode
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buffer = [0; 4096];
    let bytes_read = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return None;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let request_line = request.lines().next()?;
    debug!("Received request: {}", request_line);

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        send_response(&mut stream, "400 Bad Request", "text/plain", "Bad Request");
        return None;
    }

    let (method, path) = (parts[0], parts[1]);

    if method != "GET" {
        send_response(&mut stream, "405 Method Not Allowed", "text/plain", "Method Not Allowed");
        return None;
    }

    let route = path.split('?').next().unwrap_or_default();
    if route != expected_path {
        send_response(&mut stream, "404 Not Found", "text/plain", "Not Found");
        return None;
    }

    if path.contains("error=") {
        let description = error_description(path);
        send_page(&mut stream, "Authentication Failed", &description, "#EF4444");
        // The caller still needs the URL to report the error
        return Some(path.to_string());
    }

    if !path.contains("code=") {
        send_response(&mut stream, "400 Bad Request", "text/plain", "Missing authorization code");
        return None;
    }

    match success_redirect {
        Some(target) => send_redirect(&mut stream, target),
        None => send_page(
            &mut stream,
            "Authentication Successful",
            "You can close this tab and return to the console.",
            "#10B981",
        ),
    }

    Some(path.to_string())
}

fn error_description(path: &str) -> String {
    let Some(start) = path.find("error_description=") else {
        return "Authentication was cancelled or failed.".to_string();
    };
    let start = start + "error_description=".len();
    let end = path[start..].find('&').map(|i| start + i).unwrap_or(path.len());
    let raw = path[start..end].replace('+', " ");
    urlencoding::decode(&raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| "Authentication failed".to_string())
}

fn send_page(stream: &mut TcpStream, title: &str, message: &str, accent: &str) {
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; display: flex;
               align-items: center; justify-content: center; min-height: 100vh; margin: 0;
               background: #F3F4F6; }}
        .container {{ background: white; padding: 3rem; border-radius: 1rem; text-align: center;
                     border-top: 6px solid {accent}; max-width: 400px; }}
        h1 {{ color: #1F2937; font-size: 1.5rem; }}
        p {{ color: #6B7280; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        <p>{message}</p>
    </div>
</body>
</html>"#,
        title = title,
        message = html_escape(message),
        accent = accent,
    );
    send_response(stream, "200 OK", "text/html; charset=utf-8", &html);
}

fn send_redirect(stream: &mut TcpStream, target: &Url) {
    let response = format!(
        "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        target
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn send_response(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_listener() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        let redirect = Url::parse(&format!("http://localhost:{}/callback", port)).unwrap();
        (listener, redirect)
    }

    fn send_request(port: u16, request_line: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "{}\r\nHost: localhost\r\n\r\n", request_line).unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        response
    }

    #[test]
    fn test_bind_rejects_non_loopback() {
        assert!(bind(&Url::parse("http://example.com/callback").unwrap()).is_err());
        assert!(bind(&Url::parse("https://localhost/callback").unwrap()).is_err());
    }

    #[test]
    fn test_serve_receives_callback() {
        let (listener, redirect) = local_listener();
        let port = redirect.port().unwrap();
        let client = std::thread::spawn(move || {
            let not_found = send_request(port, "GET /favicon.ico HTTP/1.1");
            let ok = send_request(port, "GET /callback?code=abc&state=xyz HTTP/1.1");
            (not_found, ok)
        });

        let result = serve(
            listener,
            &redirect,
            None,
            &CancellationToken::new(),
            Duration::from_secs(10),
        );
        let (not_found, ok) = client.join().unwrap();

        assert_eq!(
            result,
            CallbackResult::Success(format!("http://localhost:{}/callback?code=abc&state=xyz", port))
        );
        assert!(not_found.starts_with("HTTP/1.1 404"));
        assert!(ok.contains("Authentication Successful"));
    }

    #[test]
    fn test_serve_redirects_on_success() {
        let (listener, redirect) = local_listener();
        let port = redirect.port().unwrap();
        let target = Url::parse("https://www.bing.com/?q=signed+in").unwrap();
        let client = std::thread::spawn(move || {
            send_request(port, "GET /callback?code=abc&state=xyz HTTP/1.1")
        });

        let result = serve(
            listener,
            &redirect,
            Some(&target),
            &CancellationToken::new(),
            Duration::from_secs(10),
        );
        let response = client.join().unwrap();

        assert!(matches!(result, CallbackResult::Success(_)));
        assert!(response.starts_with("HTTP/1.1 302"));
        assert!(response.contains("Location: https://www.bing.com/?q=signed+in"));
    }

    #[test]
    fn test_serve_cancelled() {
        let (listener, redirect) = local_listener();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = serve(listener, &redirect, None, &cancel, Duration::from_secs(10));
        assert_eq!(result, CallbackResult::Cancelled);
    }

    #[test]
    fn test_serve_times_out() {
        let (listener, redirect) = local_listener();
        let result = serve(
            listener,
            &redirect,
            None,
            &CancellationToken::new(),
            Duration::from_millis(150),
        );
        assert_eq!(result, CallbackResult::TimedOut);
    }

    #[test]
    fn test_error_description() {
        assert_eq!(
            error_description("/callback?error=access_denied&error_description=User+cancelled%21"),
            "User cancelled!"
        );
        assert_eq!(
            error_description("/callback?error=access_denied"),
            "Authentication was cancelled or failed."
        );
    }
}

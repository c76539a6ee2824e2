use chrono::Utc;
use reqwest::blocking::Client;
use serde_json::Value;
use snh48_core::{Snapshot, SnapshotError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str =
    "https://h5.48.cn/resource/jsonp/allmembers.php?gid=00&callback=get_members_success";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// The provider refuses requests without a browser-looking agent.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("member api returned status {status}")]
    Status { status: u16 },
    #[error("malformed jsonp envelope: {0}")]
    Envelope(&'static str),
    #[error("member payload is not valid json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unexpected member payload: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Anything that can hand the coordinator a fresh member snapshot.
pub trait MemberSource: Send + Sync {
    fn fetch(&self) -> Result<Snapshot, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

pub struct HttpMemberSource {
    client: Client,
    url: String,
}

impl HttpMemberSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl MemberSource for HttpMemberSource {
    fn fetch(&self) -> Result<Snapshot, RemoteError> {
        info!(event = "members_fetch_started", url = %self.url);
        let response = self.client.get(&self.url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text()?;
        debug!(event = "members_fetch_body", bytes = body.len());
        let snapshot = Snapshot::from_payload(parse_jsonp(&body)?, Utc::now())?;
        info!(
            event = "members_fetched",
            rows = snapshot.row_count(),
            url = %self.url
        );
        Ok(snapshot)
    }
}

/// Unwraps `callback({...})` and decodes the JSON between the first `(` and
/// the last `)`.
pub fn parse_jsonp(text: &str) -> Result<Value, RemoteError> {
    let start = text
        .find('(')
        .ok_or(RemoteError::Envelope("missing opening parenthesis"))?;
    let end = text
        .rfind(')')
        .ok_or(RemoteError::Envelope("missing closing parenthesis"))?;
    if end < start {
        return Err(RemoteError::Envelope("closing parenthesis before opening"));
    }
    Ok(serde_json::from_str(&text[start + 1..end])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serves exactly one canned HTTP response and reports the request head.
    fn serve_once(status_line: &'static str, body: String) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).expect("read request") == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            let _ = tx.send(head);
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: text/javascript; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .expect("write response");
        });
        (
            format!("http://{addr}/resource/jsonp/allmembers.php?gid=00"),
            rx,
        )
    }

    fn source(url: String) -> HttpMemberSource {
        HttpMemberSource::new(HttpSourceConfig {
            url,
            timeout: Duration::from_secs(5),
            ..HttpSourceConfig::default()
        })
        .expect("build source")
    }

    #[test]
    fn unwraps_callback_envelope() {
        let value = parse_jsonp(r#"get_members_success({"rows":[{"sid":"10125"}]});"#)
            .expect("parse jsonp");
        assert_eq!(value, json!({"rows": [{"sid": "10125"}]}));
    }

    #[test]
    fn uses_outermost_parentheses() {
        let value = parse_jsonp(r#"cb({"rows":[{"sname":"x (y)"}]})"#).expect("parse jsonp");
        assert_eq!(value["rows"][0]["sname"], json!("x (y)"));
    }

    #[test]
    fn rejects_missing_delimiters_and_bad_json() {
        assert!(matches!(
            parse_jsonp(r#"{"rows":[]}"#),
            Err(RemoteError::Envelope(_))
        ));
        assert!(matches!(
            parse_jsonp("cb({\"rows\":[]}"),
            Err(RemoteError::Envelope(_))
        ));
        assert!(matches!(parse_jsonp(")cb("), Err(RemoteError::Envelope(_))));
        assert!(matches!(
            parse_jsonp("cb({rows: oops})"),
            Err(RemoteError::Decode(_))
        ));
    }

    #[test]
    fn fetches_and_decodes_members_over_http() {
        let body = r#"get_members_success({"rows":[{"sid":"10125","sname":"刘增艳"}],"total":1})"#;
        let (url, request) = serve_once("200 OK", body.to_string());

        let snapshot = source(url).fetch().expect("fetch members");
        assert_eq!(snapshot.row_count(), 1);
        assert_eq!(snapshot.records()[0].get("sname"), Some("刘增艳"));
        assert_eq!(snapshot.payload().get("total"), Some(&json!(1)));

        let head = request.recv().expect("request head").to_lowercase();
        assert!(head.starts_with("get /resource/jsonp/allmembers.php?gid=00 "));
        assert!(head.contains(&format!("user-agent: {}", BROWSER_USER_AGENT.to_lowercase())));
    }

    #[test]
    fn non_success_status_is_an_error() {
        let (url, _request) = serve_once("500 Internal Server Error", "oops".to_string());
        let err = source(url).fetch().expect_err("status 500 must fail");
        assert!(matches!(err, RemoteError::Status { status: 500 }));
    }

    #[test]
    fn payload_without_rows_is_empty_not_an_error() {
        let (url, _request) = serve_once("200 OK", "cb({\"msg\":\"none\"})".to_string());
        let snapshot = source(url).fetch().expect("fetch members");
        assert_eq!(snapshot.row_count(), 0);
    }
}

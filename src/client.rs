use std::time::Duration;

use reqwest::{StatusCode, Url};

use crate::common::{BuildError, SubmitError};

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/v", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP writer for encoded batches.
///
/// One POST per batch, no retry. Failures come back classified so the
/// flush pipeline can log why a batch was dropped.
pub(crate) struct InfluxClient {
    write_url: Url,
    auth: Option<(String, String)>,
    http: reqwest::Client,
}

impl InfluxClient {
    pub fn new(
        write_endpoint: &str,
        database: &str,
        auth: Option<(String, String)>,
    ) -> Result<Self, BuildError> {
        let mut write_url = Url::parse(write_endpoint)
            .map_err(|e| BuildError::InvalidWriteEndpoint(e.to_string()))?;
        if !write_url.has_host() {
            return Err(BuildError::InvalidWriteEndpoint(
                "write endpoint has no host".to_string(),
            ));
        }
        write_url.query_pairs_mut().append_pair("db", database);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BuildError::FailedToCreateClient(e.to_string()))?;

        Ok(InfluxClient {
            write_url,
            auth,
            http,
        })
    }

    /// Submits one encoded batch body.
    pub async fn submit(&self, body: String) -> Result<(), SubmitError> {
        let mut request = self.http.post(self.write_url.clone()).body(body);
        if let Some((username, password)) = &self.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(SubmitError::Network)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SubmitError::Auth {
                status: status.as_u16(),
            });
        }

        Err(SubmitError::Rejected {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::InfluxClient;
    use crate::common::SubmitError;
    use crate::testing::FakeInfluxServer;

    #[tokio::test]
    async fn test_submit_posts_body_with_database_and_user_agent() {
        let server = FakeInfluxServer::start().await;
        let client = InfluxClient::new(&server.write_url(), "testdb", None).unwrap();

        client.submit("m v=1i 1\n".to_string()).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body, "m v=1i 1\n");
        assert!(requests[0].target.contains("db=testdb"));
        assert!(requests[0].authorization.is_none());
    }

    #[tokio::test]
    async fn test_credentials_are_sent_as_basic_auth() {
        let server = FakeInfluxServer::start().await;
        let client = InfluxClient::new(
            &server.write_url(),
            "testdb",
            Some(("scott".to_string(), "tiger".to_string())),
        )
        .unwrap();

        client.submit("m v=1i 1\n".to_string()).await.unwrap();

        let requests = server.requests();
        let auth = requests[0].authorization.as_deref().unwrap();
        assert!(auth.starts_with("Basic "));
    }

    #[tokio::test]
    async fn test_auth_failures_are_classified() {
        let server = FakeInfluxServer::start().await;
        server.set_response_status(401);
        let client = InfluxClient::new(&server.write_url(), "testdb", None).unwrap();

        match client.submit("m v=1i 1\n".to_string()).await {
            Err(SubmitError::Auth { status: 401 }) => (),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_rejections_are_classified() {
        let server = FakeInfluxServer::start().await;
        server.set_response_status(400);
        let client = InfluxClient::new(&server.write_url(), "testdb", None).unwrap();

        match client.submit("bogus\n".to_string()).await {
            Err(SubmitError::Rejected { status: 400, .. }) => (),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_network_error() {
        // Bind a port and release it so nothing is listening there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{port}/write");
        let client = InfluxClient::new(&url, "testdb", None).unwrap();

        match client.submit("m v=1i 1\n".to_string()).await {
            Err(SubmitError::Network(_)) => (),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_endpoint_fails_fast() {
        assert!(InfluxClient::new("not a url", "db", None).is_err());
        assert!(InfluxClient::new("file:///nope", "db", None).is_err());
    }
}

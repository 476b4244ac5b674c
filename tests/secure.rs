use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::{StatusCode, Version};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use range_probe::config::ServerConfig;
use range_probe::error::ServerError;
use range_probe::probe::ProbeHarness;
use range_probe::server::Server;
use range_probe::transport::{Protocol, Transport, TransportConfig, Verification};

const HSTS: &str = "max-age=63072000; includeSubDomains";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn verified() -> Verification {
    Verification::Verified { cert_file: fixture("cert.pem"), key_file: fixture("key.pem") }
}

struct RunningServer {
    plain: SocketAddr,
    secure: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl RunningServer {
    async fn start() -> Self {
        let config = ServerConfig {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            secure_port: 0,
            cert_file: fixture("cert.pem"),
            key_file: fixture("key.pem"),
            grace_period: Duration::from_secs(5),
            ..ServerConfig::default()
        };
        let server = Server::bind(&config).await.expect("server should bind with fixture cert");
        let plain = server.plain_addr().unwrap();
        let secure = server.secure_addr().unwrap();

        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async {
            let _ = rx.await;
        }));
        RunningServer { plain, secure, shutdown, handle }
    }

    fn transport(&self, protocol: Protocol, verification: Verification) -> Transport {
        TransportConfig::new("127.0.0.1", self.secure.port(), protocol, verification)
            .build()
            .expect("client")
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(15), self.handle)
            .await
            .expect("both listeners should stop within the grace period")
            .unwrap();
        assert!(result.is_ok(), "{result:?}");
    }
}

#[tokio::test]
async fn test_battery_over_every_tls_transport() {
    let server = RunningServer::start().await;

    for protocol in [Protocol::Http1, Protocol::Http2] {
        for verification in [Verification::SkipVerify, verified()] {
            let transport = server.transport(protocol, verification);
            let label = transport.config.to_string();
            assert!(transport.base_url.starts_with("https://"), "{label}");

            let report = ProbeHarness::new(transport, false).run_battery().await.unwrap();
            assert_eq!(10, report.outcomes.len(), "{label}");
            assert!(report.is_clean(), "{label}: {report:?}");
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn test_tls_responses_carry_hsts() {
    let server = RunningServer::start().await;

    for (protocol, version) in [(Protocol::Http1, Version::HTTP_11), (Protocol::Http2, Version::HTTP_2)] {
        let transport = server.transport(protocol, verified());
        let url = format!("{}/", transport.base_url);

        let response = transport.client.get(&url).header("X-Dolt-Range", "bytes=-80").send().await.unwrap();
        assert_eq!(version, response.version());
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
        assert_eq!(HSTS, response.headers()["strict-transport-security"]);
        assert_eq!("bytes 3920-3999/4000", response.headers()["content-range"]);
        assert_eq!(80, response.bytes().await.unwrap().len());

        // rejections still go through the secure listener's headers
        let response = transport.client.get(&url).header("Range", "bytes=+5-10").send().await.unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        assert_eq!(HSTS, response.headers()["strict-transport-security"]);
    }

    // the plain listener of the same server never sends it
    let response = reqwest::Client::new()
        .get(format!("http://{}/", server.plain))
        .send()
        .await
        .unwrap();
    assert_eq!(StatusCode::OK, response.status());
    assert!(response.headers().get("strict-transport-security").is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_plain_client_cannot_reach_tls_listener() {
    let server = RunningServer::start().await;

    let transport = TransportConfig::new("127.0.0.1", server.secure.port(), Protocol::Http1, Verification::None)
        .build()
        .unwrap();
    let observed = ProbeHarness::new(transport, false).send_raw().await;
    assert!(observed.is_err());

    server.stop().await;
}

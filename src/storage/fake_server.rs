/// Local HTTP server standing in for Google endpoints in the client tests.
///
/// Every request is recorded as `"METHOD /path?query"` with the URI exactly as
/// it arrived, so tests can assert on the encoding the client produced.

use std::sync::{Arc, Mutex};

use actix_web::dev::ServerHandle;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};

pub type Route = fn(&HttpRequest, &[u8]) -> HttpResponse;

pub struct FakeServer {
    /// `127.0.0.1:<port>`, usable as an emulator host or metadata host.
    pub host: String,
    requests: Arc<Mutex<Vec<String>>>,
    handle: ServerHandle,
}

impl FakeServer {
    /// Bind an ephemeral port and serve every request through `route`.
    /// Must be called from inside an actix system.
    pub fn start(route: Route) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();

        let server = HttpServer::new(move || {
            let log = log.clone();
            App::new().default_service(web::to(move |req: HttpRequest, body: web::Bytes| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(format!("{} {}", req.method(), req.uri()));
                    route(&req, &body)
                }
            }))
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .unwrap();

        let host = format!("127.0.0.1:{}", server.addrs()[0].port());
        let server = server.run();
        let handle = server.handle();
        actix_rt::spawn(server);

        Self { host, requests, handle }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

/// GCS-style JSON error body.
pub fn error_response(status: actix_web::http::StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "error": { "code": status.as_u16(), "message": message }
    }))
}

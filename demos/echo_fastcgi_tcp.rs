//! Minimal FastCGI responder listening on a TCP socket. Point a web
//! server's FastCGI proxy (e.g. nginx's `fastcgi_pass 127.0.0.1:9000`) at
//! it to see requests echoed back as JSON.

use fastcgi_engine::{FcgiResult, ListenAddr, Request, Response, Server, ServerConfig};

struct Echo;

#[async_trait::async_trait]
impl fastcgi_engine::RequestHandler for Echo {
    async fn call(&self, req: Request, res: &mut Response) -> FcgiResult<()> {
        res.json(&serde_json::json!({
            "method": req.method,
            "path": req.path,
            "query": req.query,
            "remote_addr": req.remote_addr,
        }))
    }
}

#[tokio::main]
async fn main() -> FcgiResult<()> {
    fastcgi_engine::logging::init();
    let config = ServerConfig::new(ListenAddr::Tcp("127.0.0.1:9000".parse().unwrap()));
    let server = Server::new(config, Echo);
    server.serve().await
}

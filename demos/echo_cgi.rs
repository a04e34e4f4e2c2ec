//! Minimal CGI program: run once per request under a CGI-capable web
//! server (or `cgi-fcgi`/curl against a CGI wrapper), reading the
//! environment and standard input and writing a JSON echo of the request
//! to standard output.

use fastcgi_engine::{FcgiResult, Request, Response};

struct Echo;

#[async_trait::async_trait]
impl fastcgi_engine::RequestHandler for Echo {
    async fn call(&self, req: Request, res: &mut Response) -> FcgiResult<()> {
        res.json(&serde_json::json!({
            "method": req.method,
            "path": req.path,
            "query": req.query,
        }))
    }
}

#[tokio::main]
async fn main() -> FcgiResult<()> {
    fastcgi_engine::logging::init();
    fastcgi_engine::cgi::driver::run(&Echo).await?;
    Ok(())
}
